//! Bucketing strategies for the sharded store.
//!
//! Each strategy is a pure function of the key and its parameters, paired
//! with the full list of bucket names it can ever produce. A key maps to the
//! same bucket for the lifetime of a store, which is why the strategy is
//! persisted alongside the buckets and checked on reopen.

use serde::{Deserialize, Serialize};

use crate::config::BucketConfig;
use crate::error::TermdexError;
use crate::Result;

const OTHER: &str = "other";
const EXTENDED: &str = "extended";
const DIGITS: &str = "0123456789";
const LETTERS: &str = "abcdefghijklmnopqrstuvwxyz";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketStrategy {
    /// Class of the first character
    FirstChar,
    /// First two characters
    FirstTwoChars,
    /// Class of the last character, for suffix lookups
    LastChar,
    /// Last two characters, for suffix lookups
    LastTwoChars,
    /// CRC-32 of the key modulo `buckets`
    HashMod { buckets: u32 },
    /// Numeric key divided by `per_bucket`, clamped to the last bucket
    IntRange { per_bucket: u64, buckets: u32 },
    /// Everything in one bucket
    Single,
}

impl BucketStrategy {
    /// Resolve a named scheme. This is the only place scheme names are looked at.
    pub fn from_config(config: &BucketConfig) -> Result<Self> {
        let strategy = match config.scheme.as_str() {
            "term1" => BucketStrategy::FirstChar,
            "term2" => BucketStrategy::FirstTwoChars,
            "term-1" => BucketStrategy::LastChar,
            "term-2" => BucketStrategy::LastTwoChars,
            "hash" => BucketStrategy::HashMod {
                buckets: positive(config.max_buckets, "hash", "max_buckets")?,
            },
            "int" => {
                let per_bucket = match config.max_items_per_bucket {
                    Some(n) if n > 0 => n,
                    _ => {
                        return Err(TermdexError::Configuration(
                            "int bucketing requires a positive max_items_per_bucket".to_string(),
                        ))
                    }
                };
                BucketStrategy::IntRange {
                    per_bucket,
                    buckets: positive(config.max_buckets, "int", "max_buckets")?,
                }
            }
            "single" | "null" => BucketStrategy::Single,
            other => {
                return Err(TermdexError::Configuration(format!(
                    "unknown bucket scheme '{other}'"
                )))
            }
        };
        Ok(strategy)
    }

    /// Name of the bucket holding `key`.
    pub fn bucket_for(&self, key: &str) -> Result<String> {
        let bucket = match self {
            BucketStrategy::FirstChar => char_class(key.chars().next()),
            BucketStrategy::LastChar => char_class(key.chars().next_back()),
            BucketStrategy::FirstTwoChars => {
                let mut chars = key.chars();
                two_chars(chars.next(), chars.next(), false)
            }
            BucketStrategy::LastTwoChars => {
                let mut chars = key.chars().rev();
                two_chars(chars.next(), chars.next(), true)
            }
            BucketStrategy::HashMod { buckets } => {
                (crc32fast::hash(key.as_bytes()) % buckets).to_string()
            }
            BucketStrategy::IntRange {
                per_bucket,
                buckets,
            } => {
                let value: u64 = key.parse().map_err(|_| {
                    TermdexError::Configuration(format!(
                        "int bucketing requires numeric keys, got '{key}'"
                    ))
                })?;
                let last = u64::from(*buckets) - 1;
                (value / per_bucket).min(last).to_string()
            }
            BucketStrategy::Single => "0".to_string(),
        };
        Ok(bucket)
    }

    /// Every bucket name this strategy can return.
    pub fn candidates(&self) -> Vec<String> {
        match self {
            BucketStrategy::FirstChar | BucketStrategy::LastChar => {
                let mut names = vec![OTHER.to_string(), EXTENDED.to_string()];
                names.extend(DIGITS.chars().chain(LETTERS.chars()).map(String::from));
                names
            }
            BucketStrategy::FirstTwoChars | BucketStrategy::LastTwoChars => {
                let reversed = matches!(self, BucketStrategy::LastTwoChars);
                let mut names = vec![OTHER.to_string(), EXTENDED.to_string()];
                names.extend(DIGITS.chars().map(String::from));
                for letter in LETTERS.chars() {
                    for second in "_".chars().chain(DIGITS.chars()).chain(LETTERS.chars()) {
                        names.push(if reversed {
                            format!("{second}{letter}")
                        } else {
                            format!("{letter}{second}")
                        });
                    }
                }
                names
            }
            BucketStrategy::HashMod { buckets } => (0..*buckets).map(|b| b.to_string()).collect(),
            BucketStrategy::IntRange { buckets, .. } => {
                (0..*buckets).map(|b| b.to_string()).collect()
            }
            BucketStrategy::Single => vec!["0".to_string()],
        }
    }
}

fn positive(value: Option<u32>, scheme: &str, field: &str) -> Result<u32> {
    match value {
        Some(n) if n > 0 => Ok(n),
        _ => Err(TermdexError::Configuration(format!(
            "{scheme} bucketing requires a positive {field}"
        ))),
    }
}

fn char_class(c: Option<char>) -> String {
    match c {
        Some(c) if c.is_ascii_digit() => c.to_string(),
        Some(c) if c.is_ascii_alphabetic() => c.to_ascii_lowercase().to_string(),
        Some(c) if c > 'z' => EXTENDED.to_string(),
        _ => OTHER.to_string(),
    }
}

/// `outer` is the first character read (first or last of the key), `inner`
/// its neighbour. Suffix buckets are spelled in key order.
fn two_chars(outer: Option<char>, inner: Option<char>, reversed: bool) -> String {
    let outer = match outer {
        Some(c) if c.is_ascii_alphabetic() => c.to_ascii_lowercase(),
        other => return char_class(other),
    };
    let inner = match inner {
        None => '0',
        Some(c) if c.is_ascii_alphanumeric() => c.to_ascii_lowercase(),
        Some(_) => '_',
    };
    if reversed {
        format!("{inner}{outer}")
    } else {
        format!("{outer}{inner}")
    }
}
