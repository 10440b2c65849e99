use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use termdex::index::{FreqTable, ScanRelation};
use termdex::persistence::ResultSetStore;
use termdex::query::CollectionStats;
use termdex::{CommitOutcome, Combiner, EngineConfig, IndexStore, QueryExpr, TermMap};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "termdex")]
#[command(about = "Sharded inverted-index build and query tool", long_about = None)]
struct Args {
    /// JSON engine configuration (store settings plus index definitions)
    #[arg(long, env = "TERMDEX_CONFIG", default_value = "termdex.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index JSON-lines documents with pre-extracted terms
    Index {
        #[arg(long)]
        index: String,
        /// Input file; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
        /// Run as a distributed worker and print the sorted spool path
        #[arg(long)]
        worker: Option<u32>,
    },
    /// Merge worker spools and commit them
    Merge {
        #[arg(long)]
        index: String,
        sorted: Vec<PathBuf>,
    },
    /// Evaluate a JSON query expression
    Query {
        /// Query file; stdin when omitted
        #[arg(long)]
        query: Option<PathBuf>,
        /// Order by descending weight and rescale weights to 0..1
        #[arg(long)]
        ranked: bool,
        #[arg(long)]
        limit: Option<usize>,
        /// Persist the result set, expiring after this many seconds (0 = never)
        #[arg(long)]
        save: Option<u64>,
    },
    /// Scan the term list
    Terms {
        #[arg(long)]
        index: String,
        #[arg(long, default_value = "")]
        start: String,
        #[arg(long, default_value_t = 20)]
        count: usize,
        #[arg(long, value_enum, default_value_t = Relation::Ge)]
        relation: Relation,
        #[arg(long)]
        end: Option<String>,
    },
    /// Print an index's summary statistics
    Stats {
        #[arg(long)]
        index: String,
    },
    /// Print the most (or least) frequent terms
    Top {
        #[arg(long)]
        index: String,
        #[arg(long, value_enum, default_value_t = Table::Records)]
        table: Table,
        #[arg(long, default_value_t = 10)]
        count: usize,
        #[arg(long)]
        least: bool,
    },
    /// Remove every term of an index
    Clear {
        #[arg(long)]
        index: String,
    },
    /// Drop expired saved result sets
    Purge,
}

#[derive(Clone, Copy, ValueEnum)]
enum Relation {
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Clone, Copy, ValueEnum)]
enum Table {
    Records,
    Occurrences,
}

/// One input line of `termdex index`
#[derive(Deserialize)]
struct InputDocument {
    /// Record store name; the first configured store when omitted
    #[serde(default)]
    store: Option<String>,
    id: u64,
    terms: TermMap,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_json_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let store = IndexStore::open(config.store.clone())?;

    match args.command {
        Command::Index {
            index,
            input,
            worker,
        } => run_index(&store, &config, &index, input.as_deref(), worker),
        Command::Merge { index, sorted } => {
            let settings = config.index(&index)?;
            let merged = store.merge_worker_spools(settings, &sorted)?;
            let summary = store.commit_central_indexing(settings, &merged)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Query {
            query,
            ranked,
            limit,
            save,
        } => run_query(&store, &config, query.as_deref(), ranked, limit, save),
        Command::Terms {
            index,
            start,
            count,
            relation,
            end,
        } => {
            let settings = config.index(&index)?;
            let relation = match relation {
                Relation::Gt => ScanRelation::Greater,
                Relation::Ge => ScanRelation::GreaterOrEqual,
                Relation::Lt => ScanRelation::Less,
                Relation::Le => ScanRelation::LessOrEqual,
            };
            for entry in store.scan_terms(settings, &start, count, relation, end.as_deref())? {
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.term, entry.summary.term_id, entry.summary.doc_freq, entry.summary.occ_freq
                );
            }
            Ok(())
        }
        Command::Stats { index } => {
            let summary = store.fetch_index_metadata(&index)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Top {
            index,
            table,
            count,
            least,
        } => {
            let settings = config.index(&index)?;
            let table = match table {
                Table::Records => FreqTable::Records,
                Table::Occurrences => FreqTable::Occurrences,
            };
            for row in store.fetch_term_frequencies(settings, table, 1, count, least)? {
                let term = if settings.term_ids {
                    store.fetch_term_by_id(settings, row.term_id)?
                } else {
                    None
                };
                println!(
                    "{}\t{}\t{}\t{}",
                    row.rank,
                    row.term_id,
                    row.count,
                    term.unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Clear { index } => {
            store.clear_index(config.index(&index)?)?;
            info!(index = %index, "index cleared");
            Ok(())
        }
        Command::Purge => {
            let results = ResultSetStore::open(results_dir(&config))?;
            println!("{}", results.purge_expired()?);
            Ok(())
        }
    }
}

fn run_index(
    store: &IndexStore,
    config: &EngineConfig,
    index: &str,
    input: Option<&Path>,
    worker: Option<u32>,
) -> Result<()> {
    let settings = config.index(index)?;
    store.create_index(settings)?;
    store.begin_indexing(settings, worker)?;

    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let mut documents = 0u64;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: InputDocument = serde_json::from_str(&line)
            .with_context(|| format!("input line {}", line_no + 1))?;
        let document = match &doc.store {
            Some(name) => store.document_ref(name, doc.id)?,
            None => termdex::DocumentRef::new(doc.id, 0),
        };
        store.store_terms(settings, &doc.terms, document)?;
        documents += 1;
    }
    info!(index, documents, "spooled documents");

    match store.commit_indexing(settings)? {
        CommitOutcome::Committed(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        CommitOutcome::Sorted(path) => println!("{}", path.display()),
    }
    Ok(())
}

fn run_query(
    store: &IndexStore,
    config: &EngineConfig,
    query: Option<&Path>,
    ranked: bool,
    limit: Option<usize>,
    save: Option<u64>,
) -> Result<()> {
    let mut text = String::new();
    match query {
        Some(path) => {
            text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
        }
        None => {
            std::io::stdin().read_to_string(&mut text)?;
        }
    }
    let expr = QueryExpr::from_json(&text)?;
    let clause = expr.resolve(store, &config.indexes)?;

    let first = config.index(expr.first_index())?;
    let stats = if first.vectors {
        Some(store.collection_stats(first)?)
    } else {
        None
    };
    let combiner = match &stats {
        Some(stats) => {
            info!(documents = stats.total_documents(), "ranking against collection stats");
            Combiner::with_stats(stats)
        }
        None => Combiner::new(),
    };

    let mut results = combiner.evaluate(clause)?.into_result_set();
    if ranked {
        if !results.relevancy {
            warn!("query has no relevance clause, weights are unscored");
        }
        results.scale_weights();
        results.order_by_weight(true);
    }
    if let Some(limit) = limit {
        results.items.truncate(limit);
    }

    if let Some(ttl) = save {
        let saved = ResultSetStore::open(results_dir(config))?;
        let expires = (ttl > 0).then(|| Duration::from_secs(ttl));
        let id = saved.store(&results, expires)?;
        info!(id = %id, "saved result set");
    }
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn results_dir(config: &EngineConfig) -> PathBuf {
    config.store.data_dir.join("results")
}
