//! Loading of the per-party mail corpus and search index.
//!
//! The mail directory contains one share file per mail; mails are placed in
//! a dense vector at their sequence number. Sequence numbers without a file
//! are materialised as explicit empty records: they stay part of the result
//! vector (keeping result positions aligned with sequence numbers across
//! all parties) and contribute no match. The search index is a precomputed
//! inverted word list; its occurrence strings are opaque to the engine.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

/// Errors raised while loading mail or index files.
#[derive(Debug)]
pub enum CorpusError {
    /// A file or directory could not be read.
    Io(std::io::Error),
    /// A file is not valid YAML or contains unknown keys.
    Yaml(serde_yaml::Error),
}

impl fmt::Display for CorpusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorpusError::Io(e) => write!(f, "could not read corpus file: {e}"),
            CorpusError::Yaml(e) => write!(f, "could not parse corpus file: {e}"),
        }
    }
}

impl std::error::Error for CorpusError {}

impl From<std::io::Error> for CorpusError {
    fn from(e: std::io::Error) -> Self {
        CorpusError::Io(e)
    }
}

impl From<serde_yaml::Error> for CorpusError {
    fn from(e: serde_yaml::Error) -> Self {
        CorpusError::Yaml(e)
    }
}

/// The words of one bucket size, pre-padded to that size.
#[derive(Debug, Clone)]
pub struct BucketBlock {
    /// The fixed word length of this bucket.
    pub bucket_size: u32,
    /// The padded words (Base64 shares).
    pub words: Vec<String>,
}

/// One mail of the corpus. A defaulted record stands for a sequence number
/// without a share file and matches nothing.
#[derive(Debug, Clone, Default)]
pub struct Mail {
    /// The mail subject; informational only.
    pub subject: String,
    /// The full mail body (Base64 share).
    pub secret_share_block: String,
    /// The truncated body searched in normal and hidden mode (Base64 share).
    pub secret_share_truncated_block: String,
    /// Per-bucket-size word lists, restricted to the public scheme.
    pub buckets: Vec<BucketBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MailFileRaw {
    sequence_number: u32,
    subject: String,
    secret_share_block: String,
    secret_share_truncated_block: String,
    #[serde(default)]
    secret_share_bucket_blocks: BTreeMap<u32, Vec<String>>,
}

/// Loads all mail share files of a directory into a dense, sequence-number
/// indexed vector. Only bucket sizes present in `bucket_scheme` are kept.
pub fn load_mail_dir(
    dir: impl AsRef<Path>,
    bucket_scheme: &[u32],
) -> Result<Vec<Mail>, CorpusError> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    paths.sort();

    let mut parsed = vec![];
    for path in paths {
        let raw: MailFileRaw = serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;
        let buckets = bucket_scheme
            .iter()
            .filter_map(|&bucket_size| {
                raw.secret_share_bucket_blocks
                    .get(&bucket_size)
                    .map(|words| BucketBlock {
                        bucket_size,
                        words: words.clone(),
                    })
            })
            .collect();
        let mail = Mail {
            subject: raw.subject,
            secret_share_block: raw.secret_share_block,
            secret_share_truncated_block: raw.secret_share_truncated_block,
            buckets,
        };
        parsed.push((raw.sequence_number, mail));
    }

    let Some(max_seq) = parsed.iter().map(|(seq, _)| *seq).max() else {
        return Ok(vec![]);
    };
    let mut mails = vec![Mail::default(); max_seq as usize + 1];
    for (seq, mail) in parsed {
        mails[seq as usize] = mail;
    }
    Ok(mails)
}

/// The indexed words of one bucket size.
#[derive(Debug, Clone)]
pub struct IndexBucket {
    /// The fixed word length of this bucket.
    pub bucket_size: u32,
    /// `(word, occurrence string)` pairs; the word is a Base64 share, the
    /// occurrence string is opaque to the engine.
    pub words: Vec<(String, String)>,
}

/// A precomputed inverted index over the mail corpus.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    /// The number of mails the index was built over.
    pub num_of_emails: u32,
    /// The index buckets in ascending bucket-size order.
    pub buckets: Vec<IndexBucket>,
}

impl SearchIndex {
    /// The total number of indexed words, i.e. result wires in index mode.
    pub fn total_words(&self) -> usize {
        self.buckets.iter().map(|b| b.words.len()).sum()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexFileRaw {
    num_of_emails: u32,
    #[serde(rename = "INDEX_BUCKETS")]
    index_buckets: BTreeMap<u32, Vec<BTreeMap<String, String>>>,
}

/// Loads a search index file.
pub fn load_index_file(path: impl AsRef<Path>) -> Result<SearchIndex, CorpusError> {
    let raw: IndexFileRaw = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
    let buckets = raw
        .index_buckets
        .into_iter()
        .map(|(bucket_size, entries)| IndexBucket {
            bucket_size,
            words: entries
                .into_iter()
                .flat_map(|entry| entry.into_iter())
                .collect(),
        })
        .collect();
    Ok(SearchIndex {
        num_of_emails: raw.num_of_emails,
        buckets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_sequence_numbers_become_empty_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("mail_2.yaml")).unwrap();
        write!(
            file,
            "sequence_number: 2\n\
             subject: greetings\n\
             secret_share_block: aGVsbG8=\n\
             secret_share_truncated_block: aGVsbG8=\n\
             secret_share_bucket_blocks:\n\
             \x20 4: [aGVsbA==]\n\
             \x20 16: [aGVsbG8AAAAAAAAAAAA=]\n"
        )
        .unwrap();

        let mails = load_mail_dir(dir.path(), &[4, 8]).unwrap();
        assert_eq!(mails.len(), 3);
        assert!(mails[0].secret_share_truncated_block.is_empty());
        assert!(mails[1].secret_share_truncated_block.is_empty());
        assert_eq!(mails[2].subject, "greetings");
        // bucket size 16 is not part of the scheme and must be dropped
        assert_eq!(mails[2].buckets.len(), 1);
        assert_eq!(mails[2].buckets[0].bucket_size, 4);
    }

    #[test]
    fn empty_directory_yields_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_mail_dir(dir.path(), &[4]).unwrap().is_empty());
    }

    #[test]
    fn unknown_mail_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("mail_0.yaml")).unwrap();
        write!(
            file,
            "sequence_number: 0\n\
             subject: s\n\
             secret_share_block: AA==\n\
             secret_share_truncated_block: AA==\n\
             secret_share_trunacted_block: AA==\n"
        )
        .unwrap();
        assert!(matches!(
            load_mail_dir(dir.path(), &[4]),
            Err(CorpusError::Yaml(_))
        ));
    }

    #[test]
    fn index_words_keep_file_order_within_buckets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "num_of_emails: 3\n\
             INDEX_BUCKETS:\n\
             \x20 4:\n\
             \x20 - amF2YQ==: bTEsbTM=\n\
             \x20 - cGVybA==: bTI=\n\
             \x20 8:\n\
             \x20 - c3lzdGVtcwA=: bTE=\n"
        )
        .unwrap();
        let index = load_index_file(file.path()).unwrap();
        assert_eq!(index.num_of_emails, 3);
        assert_eq!(index.total_words(), 3);
        assert_eq!(index.buckets[0].bucket_size, 4);
        assert_eq!(index.buckets[0].words[0].0, "amF2YQ==");
        assert_eq!(index.buckets[0].words[1].0, "cGVybA==");
        assert_eq!(index.buckets[1].words[0].1, "bTE=");
    }
}
