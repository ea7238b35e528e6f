//! Loading of per-party search query files.
//!
//! A query file carries the secret-shared modifier chain, the public bucket
//! scheme and the keywords, each in four forms: the original (informational
//! only, never fed into the circuit), bucket-padded, length mask and
//! truncated. All secret fields are Base64 share blobs.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

/// Errors raised while loading a query file.
#[derive(Debug)]
pub enum QueryError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file is not valid YAML or contains unknown keys.
    Yaml(serde_yaml::Error),
    /// A keyword entry is missing one of its required fields.
    MissingField {
        /// The index of the entry in the `keywords` list.
        index: usize,
        /// The name of the missing field.
        field: &'static str,
    },
    /// A keyword's bucket size does not appear in the bucket scheme, or the
    /// scheme itself is not strictly ascending.
    InvalidBucketScheme {
        /// The offending bucket size (0 for a malformed scheme).
        bucket_size: u32,
    },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Io(e) => write!(f, "could not read query file: {e}"),
            QueryError::Yaml(e) => write!(f, "could not parse query file: {e}"),
            QueryError::MissingField { index, field } => {
                write!(f, "keyword entry {index} is missing `{field}`")
            }
            QueryError::InvalidBucketScheme { bucket_size } => {
                write!(f, "bucket size {bucket_size} is not part of the bucket scheme")
            }
        }
    }
}

impl std::error::Error for QueryError {}

impl From<std::io::Error> for QueryError {
    fn from(e: std::io::Error) -> Self {
        QueryError::Io(e)
    }
}

impl From<serde_yaml::Error> for QueryError {
    fn from(e: serde_yaml::Error) -> Self {
        QueryError::Yaml(e)
    }
}

/// One search keyword in all the forms the circuit modes consume.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// The cleartext keyword; informational only.
    pub keyword: String,
    /// The bucket size the keyword was padded to.
    pub bucket_size: u32,
    /// The keyword padded to `bucket_size` characters (Base64 share).
    pub keyword_bucketed: String,
    /// The secret length mask, one leading 1-bit per real character
    /// (Base64 share).
    pub keyword_length_mask: String,
    /// The keyword truncated to its real length (Base64 share).
    pub keyword_truncated: String,
}

/// A fully loaded query file.
#[derive(Debug, Clone)]
pub struct Query {
    /// The secret-shared AND/OR/NOT modifier chain (Base64 share).
    pub modifier_chain_share: String,
    /// The public, strictly ascending bucket scheme.
    pub bucket_scheme: Vec<u32>,
    /// The search keywords, in file order.
    pub queries: Vec<SearchQuery>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryFileRaw {
    modifier_chain_share: String,
    bucket_scheme: Vec<u32>,
    keywords: Vec<KeywordEntry>,
}

/// A raw keyword entry. Entries carrying only a `field` placeholder (or any
/// single field) are skipped; all other entries must be complete.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct KeywordEntry {
    field: Option<String>,
    keyword: Option<String>,
    keyword_bucket_size: Option<u32>,
    keyword_bucketed: Option<String>,
    keyword_length_mask: Option<String>,
    keyword_truncated: Option<String>,
}

impl KeywordEntry {
    fn present_fields(&self) -> usize {
        self.field.is_some() as usize
            + self.keyword.is_some() as usize
            + self.keyword_bucket_size.is_some() as usize
            + self.keyword_bucketed.is_some() as usize
            + self.keyword_length_mask.is_some() as usize
            + self.keyword_truncated.is_some() as usize
    }
}

/// Loads and validates a query file.
pub fn load_query_file(path: impl AsRef<Path>) -> Result<Query, QueryError> {
    let raw: QueryFileRaw = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;

    if raw.bucket_scheme.windows(2).any(|w| w[0] >= w[1]) {
        return Err(QueryError::InvalidBucketScheme { bucket_size: 0 });
    }

    let mut queries = vec![];
    for (index, entry) in raw.keywords.into_iter().enumerate() {
        if entry.present_fields() <= 1 {
            continue;
        }
        let missing = |field| QueryError::MissingField { index, field };
        let query = SearchQuery {
            keyword: entry.keyword.ok_or(missing("keyword"))?,
            bucket_size: entry
                .keyword_bucket_size
                .ok_or(missing("keyword_bucket_size"))?,
            keyword_bucketed: entry.keyword_bucketed.ok_or(missing("keyword_bucketed"))?,
            keyword_length_mask: entry
                .keyword_length_mask
                .ok_or(missing("keyword_length_mask"))?,
            keyword_truncated: entry
                .keyword_truncated
                .ok_or(missing("keyword_truncated"))?,
        };
        if !raw.bucket_scheme.contains(&query.bucket_size) {
            return Err(QueryError::InvalidBucketScheme {
                bucket_size: query.bucket_size,
            });
        }
        queries.push(query);
    }

    Ok(Query {
        modifier_chain_share: raw.modifier_chain_share,
        bucket_scheme: raw.bucket_scheme,
        queries,
    })
}
