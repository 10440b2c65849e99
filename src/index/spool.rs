//! Append-only spool of `term SEP docId SEP storeId SEP occurrences (SEP position)*`
//! records written during batch indexing.
//!
//! Document ids are zero-padded to a fixed width so a plain byte sort orders
//! documents ascending inside each term group. `SEP` begins with a NUL byte,
//! which also makes `cat` sort before `cats`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::codec::PositionLayout;
use crate::error::TermdexError;
use crate::models::{DocumentRef, Position, TermMap};
use crate::Result;

pub const FIELD_SEPARATOR: &[u8] = b"\x00\t";
pub const DOC_ID_WIDTH: usize = 15;
const MAX_DOC_ID: u64 = 999_999_999_999_999;

/// One decoded spool line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpoolRecord {
    pub term: String,
    pub document: DocumentRef,
    pub occurrences: u32,
    pub positions: Vec<Position>,
}

impl SpoolRecord {
    pub fn encode(&self, layout: PositionLayout, out: &mut Vec<u8>) -> Result<()> {
        validate_term(&self.term)?;
        if self.document.document_id > MAX_DOC_ID {
            return Err(TermdexError::Integrity(format!(
                "document id {} does not fit {} digits",
                self.document.document_id, DOC_ID_WIDTH
            )));
        }
        if layout.is_positional() && self.positions.len() != self.occurrences as usize {
            return Err(TermdexError::Integrity(format!(
                "term '{}' in document {} has {} occurrences but {} positions",
                self.term,
                self.document.document_id,
                self.occurrences,
                self.positions.len()
            )));
        }

        out.extend_from_slice(self.term.as_bytes());
        push_field(out, format!("{:0width$}", self.document.document_id, width = DOC_ID_WIDTH));
        push_field(out, self.document.store_id.to_string());
        push_field(out, self.occurrences.to_string());
        if layout.is_positional() {
            for position in &self.positions {
                push_field(out, position.element.to_string());
                push_field(out, position.word.to_string());
                if layout == PositionLayout::ElementWordOffset {
                    let offset = position.offset.ok_or_else(|| {
                        TermdexError::Integrity(format!(
                            "term '{}' in document {} is missing character offsets",
                            self.term, self.document.document_id
                        ))
                    })?;
                    push_field(out, offset.to_string());
                }
            }
        }
        out.push(b'\n');
        Ok(())
    }

    /// Parse one line, without its trailing newline.
    pub fn decode(line: &[u8], layout: PositionLayout) -> Result<Self> {
        let fields = split_fields(line);
        if fields.len() < 4 {
            return Err(malformed(line, "fewer than four fields"));
        }
        let term = std::str::from_utf8(fields[0])
            .map_err(|_| malformed(line, "term is not UTF-8"))?
            .to_string();
        let document_id: u64 = parse_field(fields[1], line)?;
        let store_id: u32 = parse_field(fields[2], line)?;
        let occurrences: u32 = parse_field(fields[3], line)?;

        let ints = layout.ints();
        let rest = &fields[4..];
        let mut positions = Vec::new();
        if ints > 0 {
            if rest.len() != ints * occurrences as usize {
                return Err(malformed(line, "position count does not match occurrences"));
            }
            for chunk in rest.chunks(ints) {
                let mut position = Position::new(parse_field(chunk[0], line)?, parse_field(chunk[1], line)?);
                if ints == 3 {
                    position.offset = Some(parse_field(chunk[2], line)?);
                }
                positions.push(position);
            }
        } else if !rest.is_empty() {
            return Err(malformed(line, "positions in a non-positional spool"));
        }

        Ok(Self {
            term,
            document: DocumentRef::new(document_id, store_id),
            occurrences,
            positions,
        })
    }
}

pub fn validate_term(term: &str) -> Result<()> {
    let bytes = term.as_bytes();
    if bytes.contains(&b'\n') || bytes.windows(2).any(|w| w == FIELD_SEPARATOR) {
        return Err(TermdexError::Integrity(format!(
            "term {term:?} contains a reserved separator"
        )));
    }
    Ok(())
}

fn push_field(out: &mut Vec<u8>, value: String) {
    out.extend_from_slice(FIELD_SEPARATOR);
    out.extend_from_slice(value.as_bytes());
}

fn split_fields(line: &[u8]) -> Vec<&[u8]> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < line.len() {
        if &line[i..i + 2] == FIELD_SEPARATOR {
            fields.push(&line[start..i]);
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }
    fields.push(&line[start..]);
    fields
}

fn parse_field<T: std::str::FromStr>(field: &[u8], line: &[u8]) -> Result<T> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed(line, "non-numeric field"))
}

fn malformed(line: &[u8], reason: &str) -> TermdexError {
    TermdexError::Integrity(format!(
        "malformed spool line ({reason}): {:?}",
        String::from_utf8_lossy(line)
    ))
}

/// Buffered writer over one spool file.
pub struct SpoolWriter {
    path: PathBuf,
    out: BufWriter<File>,
    layout: PositionLayout,
    records: u64,
    line: Vec<u8>,
}

impl SpoolWriter {
    /// Create or truncate the spool at `path`.
    pub fn create(path: impl Into<PathBuf>, layout: PositionLayout) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            layout,
            records: 0,
            line: Vec::with_capacity(256),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Append one record per distinct term of a document.
    pub fn write_document(&mut self, document: DocumentRef, terms: &TermMap) -> Result<()> {
        for (term, occurrences) in terms {
            let record = SpoolRecord {
                term: term.clone(),
                document,
                occurrences: occurrences.occurrences,
                positions: occurrences.positions.clone(),
            };
            self.line.clear();
            record.encode(self.layout, &mut self.line)?;
            self.out.write_all(&self.line)?;
            self.records += 1;
        }
        Ok(())
    }

    /// Flush and close, returning the spool path.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(self.path)
    }
}

/// Sequential reader over a spool file, sorted or not.
pub struct SpoolReader {
    reader: BufReader<File>,
    layout: PositionLayout,
    buf: Vec<u8>,
}

impl SpoolReader {
    pub fn open(path: &Path, layout: PositionLayout) -> Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            layout,
            buf: Vec::with_capacity(256),
        })
    }

    pub fn next_record(&mut self) -> Result<Option<SpoolRecord>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                return Ok(None);
            }
            if self.buf.last() == Some(&b'\n') {
                self.buf.pop();
            }
            if self.buf.is_empty() {
                continue;
            }
            return SpoolRecord::decode(&self.buf, self.layout).map(Some);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TermOccurrences;
    use tempfile::TempDir;

    fn record(term: &str, doc: u64, positions: Vec<Position>) -> SpoolRecord {
        SpoolRecord {
            term: term.to_string(),
            document: DocumentRef::new(doc, 2),
            occurrences: positions.len() as u32,
            positions,
        }
    }

    #[test]
    fn test_line_format() {
        let mut line = Vec::new();
        record("cat", 42, vec![Position::new(0, 3)])
            .encode(PositionLayout::ElementWord, &mut line)
            .unwrap();
        assert_eq!(
            line,
            b"cat\x00\t000000000000042\x00\t2\x00\t1\x00\t0\x00\t3\n".to_vec()
        );
    }

    #[test]
    fn test_encode_decode_line() {
        let written = record("dog", 7, vec![Position::new(1, 2).with_offset(9)]);
        let mut line = Vec::new();
        written
            .encode(PositionLayout::ElementWordOffset, &mut line)
            .unwrap();
        line.pop();
        let decoded = SpoolRecord::decode(&line, PositionLayout::ElementWordOffset).unwrap();
        assert_eq!(decoded, written);
    }

    #[test]
    fn test_padding_orders_documents() {
        let mut small = Vec::new();
        let mut large = Vec::new();
        record("t", 9, vec![]).encode(PositionLayout::None, &mut small).unwrap();
        record("t", 10, vec![]).encode(PositionLayout::None, &mut large).unwrap();
        assert!(small < large);

        let mut prefix = Vec::new();
        let mut longer = Vec::new();
        record("cat", 99, vec![]).encode(PositionLayout::None, &mut prefix).unwrap();
        record("cats", 1, vec![]).encode(PositionLayout::None, &mut longer).unwrap();
        assert!(prefix < longer);
    }

    #[test]
    fn test_reserved_separator_rejected() {
        assert!(validate_term("a\x00\tb").is_err());
        assert!(validate_term("line\nbreak").is_err());
        assert!(validate_term("tab\tonly").is_ok());
    }

    #[test]
    fn test_malformed_lines() {
        assert!(SpoolRecord::decode(b"cat", PositionLayout::None).is_err());
        assert!(SpoolRecord::decode(b"cat\x00\tx\x00\t0\x00\t1", PositionLayout::None).is_err());
        assert!(SpoolRecord::decode(b"cat\x00\t1\x00\t0\x00\t2\x00\t0\x00\t1", PositionLayout::ElementWord).is_err());
    }

    #[test]
    fn test_writer_and_reader() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("spool_TEMP");
        let mut writer = SpoolWriter::create(&path, PositionLayout::None).unwrap();
        let mut terms = TermMap::new();
        terms.insert("b".to_string(), TermOccurrences::count(2));
        terms.insert("a".to_string(), TermOccurrences::count(1));
        writer.write_document(DocumentRef::new(1, 0), &terms).unwrap();
        assert_eq!(writer.records(), 2);
        let path = writer.finish().unwrap();

        let mut reader = SpoolReader::open(&path, PositionLayout::None).unwrap();
        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.term, "a");
        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.occurrences, 2);
        assert!(reader.next_record().unwrap().is_none());
    }
}
