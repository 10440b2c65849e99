//! External sort and N-way merge of newline-terminated spool files.
//!
//! Input is cut into runs of at most `chunk_lines` lines, each sorted in
//! memory and written to a temporary file, then all runs are merged through
//! a min-heap. Output is written beside its destination and renamed into
//! place, so a failed sort never leaves a partial sorted file behind and
//! never touches its input.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::TermdexError;
use crate::Result;

pub struct ExternalSorter {
    temp_dir: PathBuf,
    chunk_lines: usize,
}

impl ExternalSorter {
    pub fn new(temp_dir: impl Into<PathBuf>, chunk_lines: usize) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            chunk_lines: chunk_lines.max(1),
        }
    }

    /// Sort `input` into `output` in ascending byte order. Returns the number
    /// of lines written.
    pub fn sort(&self, input: &Path, output: &Path) -> Result<u64> {
        std::fs::create_dir_all(&self.temp_dir)?;
        let mut reader = BufReader::new(File::open(input)?);
        let mut runs: Vec<NamedTempFile> = Vec::new();
        let mut chunk: Vec<Vec<u8>> = Vec::new();

        while let Some(line) = read_line(&mut reader)? {
            chunk.push(line);
            if chunk.len() >= self.chunk_lines {
                runs.push(self.write_run(&mut chunk)?);
            }
        }

        let lines = if runs.is_empty() {
            chunk.sort_unstable();
            let mut out = Output::create(output)?;
            for line in &chunk {
                out.write_line(line)?;
            }
            out.commit()?
        } else {
            if !chunk.is_empty() {
                runs.push(self.write_run(&mut chunk)?);
            }
            tracing::debug!(runs = runs.len(), input = %input.display(), "merging sort runs");
            let paths: Vec<PathBuf> = runs.iter().map(|run| run.path().to_path_buf()).collect();
            merge_into(&paths, output)?
        };

        if !output.exists() {
            return Err(TermdexError::Integrity(format!(
                "sort of {} produced no output",
                input.display()
            )));
        }
        Ok(lines)
    }

    /// Merge already sorted files into `output`.
    pub fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<u64> {
        merge_into(inputs, output)
    }

    fn write_run(&self, chunk: &mut Vec<Vec<u8>>) -> Result<NamedTempFile> {
        chunk.sort_unstable();
        let mut run = NamedTempFile::new_in(&self.temp_dir)?;
        {
            let mut out = BufWriter::new(run.as_file_mut());
            for line in chunk.iter() {
                out.write_all(line)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        chunk.clear();
        Ok(run)
    }
}

fn merge_into(inputs: &[PathBuf], output: &Path) -> Result<u64> {
    let mut readers = Vec::with_capacity(inputs.len());
    for path in inputs {
        readers.push(BufReader::new(File::open(path)?));
    }

    let mut heap = BinaryHeap::new();
    for (i, reader) in readers.iter_mut().enumerate() {
        if let Some(line) = read_line(reader)? {
            heap.push(Reverse((line, i)));
        }
    }

    let mut out = Output::create(output)?;
    while let Some(Reverse((line, i))) = heap.pop() {
        out.write_line(&line)?;
        if let Some(next) = read_line(&mut readers[i])? {
            heap.push(Reverse((next, i)));
        }
    }
    out.commit()
}

/// Next line without its newline; blank lines are skipped.
fn read_line(reader: &mut impl BufRead) -> Result<Option<Vec<u8>>> {
    loop {
        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if !line.is_empty() {
            return Ok(Some(line));
        }
    }
}

struct Output {
    target: PathBuf,
    file: BufWriter<NamedTempFile>,
    lines: u64,
}

impl Output {
    fn create(target: &Path) -> Result<Self> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            target: target.to_path_buf(),
            file: BufWriter::new(NamedTempFile::new_in(dir)?),
            lines: 0,
        })
    }

    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.file.write_all(line)?;
        self.file.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    fn commit(self) -> Result<u64> {
        let temp = self
            .file
            .into_inner()
            .map_err(|e| TermdexError::Io(e.into_error()))?;
        temp.as_file().sync_all()?;
        temp.persist(&self.target)
            .map_err(|e| TermdexError::Io(e.error))?;
        Ok(self.lines)
    }
}
