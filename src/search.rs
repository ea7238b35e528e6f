//! The search circuit builder.
//!
//! Given the loaded query, corpus and index, builds a Boolean circuit with
//! one 1-bit result wire per mail (normal/hidden/bucket mode) or per
//! indexed word (index mode). The wire is 1 iff the query matches that
//! target.
//!
//! Two properties shape everything here:
//!
//! - **No secret-dependent branches.** Construction only ever branches on
//!   public sizes (text length, keyword length, bucket sizes, the scheme).
//!   All selection on secret data happens through circuit structure, so the
//!   parties' circuits stay isomorphic bit for bit.
//! - **Wide SIMD batching.** Within one (keyword, target) pass all
//!   character comparisons are laid out as one flat grid, zipped into
//!   [`CHARACTER_BITLEN`] bit-plane SIMD wires, AND-reduced, masked, zipped
//!   a second time per keyword character and reduced again. The balanced
//!   reductions keep the multiplicative depth (and therefore the number of
//!   online rounds) logarithmic.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::circuit::{CircuitBuilder, CircuitError, Wire};
use crate::corpus::{Mail, SearchIndex};
use crate::encoding::share_input;
use crate::layout::{low_depth_reduce, low_depth_reduce_lanes, split_to_bits};
use crate::query::Query;

/// Payload bits per character; the PrivMail encoding maps its reduced
/// alphabet into the low 6 bits of each byte.
const CHARACTER_BITLEN: usize = 6;

/// The four ways of searching the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Keyword lengths are public; compare at every text offset.
    Normal,
    /// Keyword lengths are secret; keywords are bucket-padded and carry a
    /// secret length mask.
    Hidden,
    /// Search the pre-tokenised per-bucket word lists of each mail.
    Bucket,
    /// Search a precomputed inverted index; one result per indexed word.
    Index,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchMode::Normal => "normal",
            SearchMode::Hidden => "hidden",
            SearchMode::Bucket => "bucket",
            SearchMode::Index => "index",
        };
        write!(f, "{name}")
    }
}

impl FromStr for SearchMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, SearchError> {
        match s {
            "normal" => Ok(SearchMode::Normal),
            "hidden" => Ok(SearchMode::Hidden),
            "bucket" => Ok(SearchMode::Bucket),
            "index" => Ok(SearchMode::Index),
            other => Err(SearchError::InvalidSearchMode(other.to_string())),
        }
    }
}

/// Fatal problems detected while constructing the search circuit.
#[derive(Debug)]
pub enum SearchError {
    /// A gate-level shape violation reported by the circuit builder.
    Circuit(CircuitError),
    /// The search mode string is not one of normal|hidden|bucket|index.
    InvalidSearchMode(String),
    /// A keyword's bucket size does not appear in the public bucket scheme.
    InvalidBucketScheme {
        /// The offending bucket size.
        bucket_size: u32,
    },
    /// A decoded input does not have the size its role requires (keyword vs
    /// bucket size, length mask vs bucket size, modifier chain vs keyword
    /// count).
    ShapeMismatch {
        /// The size required at this position.
        expected: usize,
        /// The size actually found.
        actual: usize,
    },
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::Circuit(e) => write!(f, "{e}"),
            SearchError::InvalidSearchMode(s) => write!(f, "invalid search mode `{s}`"),
            SearchError::InvalidBucketScheme { bucket_size } => {
                write!(f, "search keyword has invalid bucket size {bucket_size}")
            }
            SearchError::ShapeMismatch { expected, actual } => {
                write!(f, "input shape mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for SearchError {}

impl From<CircuitError> for SearchError {
    fn from(e: CircuitError) -> Self {
        SearchError::Circuit(e)
    }
}

/// Builds the search circuit for the given mode and returns one result wire
/// per mail (normal/hidden/bucket) or per indexed word (index).
///
/// The result wires remain secret-shared; the engine never declassifies.
pub fn build_search_circuit(
    b: &mut CircuitBuilder,
    query: &Query,
    mails: &[Mail],
    index: &SearchIndex,
    mode: SearchMode,
) -> Result<Vec<Wire>, SearchError> {
    let full_zero = b.zero();

    debug!("modifier chain share: {}", query.modifier_chain_share);
    let modifier_bytes = share_input(b, &query.modifier_chain_share)?;
    let chain_bits = split_to_bits(b, &modifier_bytes)?;

    match mode {
        SearchMode::Normal => normal_search(b, query, mails, &chain_bits, full_zero),
        SearchMode::Hidden => hidden_search(b, query, mails, &chain_bits, full_zero),
        SearchMode::Bucket => bucket_search(b, query, mails, &chain_bits, full_zero),
        SearchMode::Index => index_search(b, query, index, &chain_bits, full_zero),
    }
}

/// The modifier chain must provide the NOT bit of the first keyword plus an
/// (OR, NOT) pair for every further keyword.
fn ensure_chain(chain_bits: &[Wire], num_keywords: usize) -> Result<(), SearchError> {
    let needed = (2 * num_keywords).saturating_sub(1);
    if chain_bits.len() < needed {
        return Err(SearchError::ShapeMismatch {
            expected: needed,
            actual: chain_bits.len(),
        });
    }
    Ok(())
}

/// Folds the result of keyword `j` into the running chain.
///
/// The first keyword has no previous result: its match bit is XORed with
/// the chain's leading NOT bit. Every further keyword is combined through
/// [`chaining_circuit`] under its secret (OR, NOT) control pair.
fn chain(
    b: &mut CircuitBuilder,
    previous: Option<Wire>,
    new_result: Wire,
    chain_bits: &[Wire],
    j: usize,
) -> Result<Wire, CircuitError> {
    match previous {
        None => b.xor(new_result, chain_bits[0]),
        Some(previous) => chaining_circuit(
            b,
            previous,
            new_result,
            chain_bits[2 * j - 1],
            chain_bits[2 * j],
        ),
    }
}

/// `((previous ^ o) & ((new ^ n) ^ o)) ^ o`: AND of the two operands when
/// `o = 0`, OR when `o = 1`, with `n` negating the new operand. All three
/// control bits are secret shares, so neither the combining operator nor
/// the negation is revealed.
fn chaining_circuit(
    b: &mut CircuitBuilder,
    previous: Wire,
    new_result: Wire,
    or_bit: Wire,
    not_bit: Wire,
) -> Result<Wire, CircuitError> {
    let lhs = b.xor(previous, or_bit)?;
    let rhs = b.xor(new_result, not_bit)?;
    let rhs = b.xor(rhs, or_bit)?;
    let combined = b.and(lhs, rhs)?;
    b.xor(combined, or_bit)
}

/// The low payload bits of an 8-bit character bundle (lanes are stored
/// most-significant first, so these are the trailing lanes).
fn low_bits(b: &mut CircuitBuilder, c: Wire) -> Result<Wire, CircuitError> {
    let width = b.width(c);
    b.select(c, (width - CHARACTER_BITLEN..width).collect())
}

/// A keyword in its bucketed form: exactly `bucket_size` characters plus
/// the negated bits of its secret length mask.
struct BucketedKeyword {
    bucket_size: u32,
    keyword: Vec<Wire>,
    not_mask: Vec<Wire>,
}

/// Decodes the bucketed form and length mask of every keyword.
fn bucketed_keyword_inputs(
    b: &mut CircuitBuilder,
    query: &Query,
) -> Result<Vec<BucketedKeyword>, SearchError> {
    let mut keywords = vec![];
    for q in &query.queries {
        debug!(
            "keyword: {} (bucket size: {})",
            q.keyword_bucketed, q.bucket_size
        );
        let keyword = share_input(b, &q.keyword_bucketed)?;
        debug!("length mask: {}", q.keyword_length_mask);
        let mask_bytes = share_input(b, &q.keyword_length_mask)?;
        let mask_bits = split_to_bits(b, &mask_bytes)?;

        let bucket_size = q.bucket_size as usize;
        if keyword.len() != bucket_size {
            return Err(SearchError::ShapeMismatch {
                expected: bucket_size,
                actual: keyword.len(),
            });
        }
        if mask_bits.len() < bucket_size {
            return Err(SearchError::ShapeMismatch {
                expected: bucket_size,
                actual: mask_bits.len(),
            });
        }
        let not_mask = mask_bits[..bucket_size]
            .iter()
            .map(|&m| b.not(m))
            .collect::<Result<_, _>>()?;
        keywords.push(BucketedKeyword {
            bucket_size: q.bucket_size,
            keyword,
            not_mask,
        });
    }
    Ok(keywords)
}

/// The smallest true length a keyword of this bucket size can have: one
/// more than the previous bucket in the scheme, or 1 for the smallest
/// bucket.
fn min_keyword_length(bucket_size: u32, bucket_scheme: &[u32]) -> Result<usize, SearchError> {
    match bucket_scheme.iter().position(|&s| s == bucket_size) {
        Some(0) => Ok(1),
        Some(i) => Ok(bucket_scheme[i - 1] as usize + 1),
        None => Err(SearchError::InvalidBucketScheme { bucket_size }),
    }
}

/// The flat (position x character) comparison grid of one keyword pass.
///
/// Targets are appended in deterministic public order; `reduce` then runs
/// the two zip stages over the whole grid at once so that each of the 6
/// bit-plane ANDs and each per-character AND is a single wide SIMD gate.
struct ComparisonGrid {
    kw_parts: Vec<Wire>,
    text_parts: Vec<Wire>,
    mask_parts: Vec<Wire>,
    positions: usize,
}

impl ComparisonGrid {
    fn new() -> Self {
        ComparisonGrid {
            kw_parts: vec![],
            text_parts: vec![],
            mask_parts: vec![],
            positions: 0,
        }
    }

    /// Appends all `positions` comparison offsets of one target.
    ///
    /// Grid cells reaching past the end of the target are filled with a
    /// constant on both sides, which makes their comparison an all-1
    /// vector: under the length mask such cells only match-support the
    /// positions where the true (secret) keyword length fits.
    fn add_target(
        &mut self,
        b: &mut CircuitBuilder,
        keyword: &BucketedKeyword,
        text: &[Wire],
        positions: usize,
        zero6: Wire,
    ) -> Result<(), CircuitError> {
        for k in 0..positions {
            for c in 0..keyword.keyword.len() {
                if c + k >= text.len() {
                    self.kw_parts.push(zero6);
                    self.text_parts.push(zero6);
                } else {
                    self.kw_parts.push(low_bits(b, keyword.keyword[c])?);
                    self.text_parts.push(low_bits(b, text[c + k])?);
                }
                self.mask_parts.push(keyword.not_mask[c]);
            }
        }
        self.positions += positions;
        Ok(())
    }

    /// Reduces the grid to one per-position match wire of width
    /// `self.positions`.
    fn reduce(self, b: &mut CircuitBuilder, keyword_len: usize) -> Result<Wire, CircuitError> {
        let kw = b.concat(&self.kw_parts)?;
        let text = b.concat(&self.text_parts)?;
        let xored = b.xor(kw, text)?;
        let xnor = b.not(xored)?;

        // First zip: bit plane t across all (position, character) pairs.
        let pairs = self.mask_parts.len();
        let mut planes = Vec::with_capacity(CHARACTER_BITLEN);
        for t in 0..CHARACTER_BITLEN {
            planes.push(b.select(
                xnor,
                (0..pairs).map(|g| g * CHARACTER_BITLEN + t).collect(),
            )?);
        }
        let char_match = low_depth_reduce(b, planes, |b, x, y| b.and(x, y))?;

        // Character matches or the mask says "don't care".
        let mask = b.concat(&self.mask_parts)?;
        let masked = b.or(char_match, mask)?;

        // Second zip: per character index c across all positions.
        let mut char_planes = Vec::with_capacity(keyword_len);
        for c in 0..keyword_len {
            char_planes.push(b.select(
                masked,
                (0..self.positions).map(|k| k * keyword_len + c).collect(),
            )?);
        }
        low_depth_reduce(b, char_planes, |b, x, y| b.and(x, y))
    }
}

fn decoded_truncated_blocks(
    b: &mut CircuitBuilder,
    mails: &[Mail],
) -> Result<Vec<Vec<Wire>>, CircuitError> {
    let mut target_texts = vec![];
    for mail in mails {
        debug!("target text: {}", mail.secret_share_truncated_block);
        target_texts.push(share_input(b, &mail.secret_share_truncated_block)?);
    }
    Ok(target_texts)
}

fn collect_results(results: Vec<Option<Wire>>, full_zero: Wire) -> Vec<Wire> {
    results
        .into_iter()
        .map(|r| r.unwrap_or(full_zero))
        .collect()
}

/// Normal mode: keyword lengths are public, so the comparison shape per
/// (text, keyword) pair is fixed by public sizes alone.
fn normal_search(
    b: &mut CircuitBuilder,
    query: &Query,
    mails: &[Mail],
    chain_bits: &[Wire],
    full_zero: Wire,
) -> Result<Vec<Wire>, SearchError> {
    let mut search_keywords = vec![];
    for q in &query.queries {
        debug!("keyword: {} (no bucketing)", q.keyword_truncated);
        search_keywords.push(share_input(b, &q.keyword_truncated)?);
    }
    ensure_chain(chain_bits, search_keywords.len())?;
    let target_texts = decoded_truncated_blocks(b, mails)?;

    let mut results: Vec<Option<Wire>> = vec![None; target_texts.len()];
    for (j, keyword) in search_keywords.iter().enumerate() {
        for (i, text) in target_texts.iter().enumerate() {
            let positions = text.len() as i64 - keyword.len() as i64 + 1;
            if positions < 1 || keyword.is_empty() {
                // Nothing to compare, most likely the target text is very
                // short. The public constant 0 still takes part in the
                // modifier chain.
                results[i] = Some(chain(b, results[i], full_zero, chain_bits, j)?);
                continue;
            }
            let positions = positions as usize;

            // Per position, compare the whole keyword against the text
            // window as one wide XNOR.
            let kw_low: Vec<Wire> = keyword
                .iter()
                .map(|&c| low_bits(b, c))
                .collect::<Result<_, _>>()?;
            let kw_cat = b.concat(&kw_low)?;
            let mut xnors = Vec::with_capacity(positions);
            for k in 0..positions {
                let text_low: Vec<Wire> = (0..keyword.len())
                    .map(|c| low_bits(b, text[c + k]))
                    .collect::<Result<_, _>>()?;
                let text_cat = b.concat(&text_low)?;
                let xored = b.xor(kw_cat, text_cat)?;
                xnors.push(b.not(xored)?);
            }

            // Zip the per-position XNOR bits into one SIMD wire per bit
            // index, AND-reduce the planes, then OR across positions.
            let flat = b.concat(&xnors)?;
            let bitlen = CHARACTER_BITLEN * keyword.len();
            let mut planes = Vec::with_capacity(bitlen);
            for t in 0..bitlen {
                planes.push(b.select(flat, (0..positions).map(|k| k * bitlen + t).collect())?);
            }
            let result_bits = low_depth_reduce(b, planes, |b, x, y| b.and(x, y))?;
            let per_email = low_depth_reduce_lanes(b, result_bits, |b, x, y| b.or(x, y))?;

            results[i] = Some(chain(b, results[i], per_email, chain_bits, j)?);
        }
    }
    Ok(collect_results(results, full_zero))
}

/// Hidden mode: the true keyword length stays secret behind the bucket
/// padding and length mask; only the bucket's minimum length bounds the
/// number of comparison positions.
fn hidden_search(
    b: &mut CircuitBuilder,
    query: &Query,
    mails: &[Mail],
    chain_bits: &[Wire],
    full_zero: Wire,
) -> Result<Vec<Wire>, SearchError> {
    let keywords = bucketed_keyword_inputs(b, query)?;
    ensure_chain(chain_bits, keywords.len())?;
    let target_texts = decoded_truncated_blocks(b, mails)?;
    let zero6 = b.constant(vec![false; CHARACTER_BITLEN]);

    let mut results: Vec<Option<Wire>> = vec![None; target_texts.len()];
    for (j, keyword) in keywords.iter().enumerate() {
        let min_len = min_keyword_length(keyword.bucket_size, &query.bucket_scheme)?;
        for (i, text) in target_texts.iter().enumerate() {
            let positions = text.len() as i64 - min_len as i64 + 1;
            if positions < 1 {
                results[i] = Some(chain(b, results[i], full_zero, chain_bits, j)?);
                continue;
            }
            let mut grid = ComparisonGrid::new();
            grid.add_target(b, keyword, text, positions as usize, zero6)?;
            let per_position = grid.reduce(b, keyword.keyword.len())?;
            let per_email = low_depth_reduce_lanes(b, per_position, |b, x, y| b.or(x, y))?;
            results[i] = Some(chain(b, results[i], per_email, chain_bits, j)?);
        }
    }
    Ok(collect_results(results, full_zero))
}

/// One decoded per-bucket word list.
struct BucketInput {
    bucket_size: u32,
    words: Vec<Vec<Wire>>,
}

fn decoded_bucket_words(
    b: &mut CircuitBuilder,
    bucket_size: u32,
    words: &[String],
) -> Result<BucketInput, CircuitError> {
    let mut decoded = vec![];
    for word in words {
        debug!("target word: {word} (bucket size: {bucket_size})");
        decoded.push(share_input(b, word)?);
    }
    Ok(BucketInput {
        bucket_size,
        words: decoded,
    })
}

/// Bucket mode: per mail, the keyword is matched against the word lists of
/// every bucket at least as large as the keyword's own bucket; strictly
/// smaller buckets cannot contain a word of that length class.
fn bucket_search(
    b: &mut CircuitBuilder,
    query: &Query,
    mails: &[Mail],
    chain_bits: &[Wire],
    full_zero: Wire,
) -> Result<Vec<Wire>, SearchError> {
    let keywords = bucketed_keyword_inputs(b, query)?;
    ensure_chain(chain_bits, keywords.len())?;

    let mut targets = vec![];
    for mail in mails {
        let mut buckets = vec![];
        for bucket in &mail.buckets {
            buckets.push(decoded_bucket_words(b, bucket.bucket_size, &bucket.words)?);
        }
        targets.push(buckets);
    }
    let zero6 = b.constant(vec![false; CHARACTER_BITLEN]);

    let mut results: Vec<Option<Wire>> = vec![None; targets.len()];
    for (j, keyword) in keywords.iter().enumerate() {
        let min_len = min_keyword_length(keyword.bucket_size, &query.bucket_scheme)?;
        for (i, target) in targets.iter().enumerate() {
            // One flat grid over every qualifying (bucket, word, position).
            let mut grid = ComparisonGrid::new();
            let mut layout: Vec<Vec<usize>> = vec![];
            for bucket in target {
                if bucket.bucket_size < keyword.bucket_size {
                    continue;
                }
                let mut word_positions = vec![];
                for word in &bucket.words {
                    let positions = word.len() as i64 - min_len as i64 + 1;
                    let positions = positions.max(0) as usize;
                    if positions > 0 {
                        grid.add_target(b, keyword, word, positions, zero6)?;
                    }
                    word_positions.push(positions);
                }
                layout.push(word_positions);
            }

            if grid.positions == 0 {
                // No available buckets at all, most likely because the
                // keyword was very long.
                results[i] = Some(chain(b, results[i], full_zero, chain_bits, j)?);
                continue;
            }

            let per_position = grid.reduce(b, keyword.keyword.len())?;

            // OR over positions per word, over words per bucket, over
            // buckets per mail.
            let mut offset = 0;
            let mut per_bucket = vec![];
            for word_positions in &layout {
                let mut per_word = vec![];
                for &positions in word_positions {
                    if positions == 0 {
                        continue;
                    }
                    let seg = b.select(per_position, (offset..offset + positions).collect())?;
                    offset += positions;
                    per_word.push(low_depth_reduce_lanes(b, seg, |b, x, y| b.or(x, y))?);
                }
                if per_word.is_empty() {
                    continue;
                }
                per_bucket.push(low_depth_reduce(b, per_word, |b, x, y| b.or(x, y))?);
            }
            let per_email = low_depth_reduce(b, per_bucket, |b, x, y| b.or(x, y))?;
            results[i] = Some(chain(b, results[i], per_email, chain_bits, j)?);
        }
    }
    Ok(collect_results(results, full_zero))
}

/// Index mode: the targets are the words of the inverted index, one result
/// wire per word in strict file-iteration order. Words in buckets smaller
/// than the keyword's bucket size hold the public constant 0 in place.
fn index_search(
    b: &mut CircuitBuilder,
    query: &Query,
    index: &SearchIndex,
    chain_bits: &[Wire],
    full_zero: Wire,
) -> Result<Vec<Wire>, SearchError> {
    let keywords = bucketed_keyword_inputs(b, query)?;
    ensure_chain(chain_bits, keywords.len())?;

    let mut buckets = vec![];
    for bucket in &index.buckets {
        let words: Vec<String> = bucket.words.iter().map(|(word, _)| word.clone()).collect();
        buckets.push(decoded_bucket_words(b, bucket.bucket_size, &words)?);
    }
    let total_words: usize = buckets.iter().map(|bucket| bucket.words.len()).sum();
    let zero6 = b.constant(vec![false; CHARACTER_BITLEN]);

    let mut results: Vec<Option<Wire>> = vec![None; total_words];
    for (j, keyword) in keywords.iter().enumerate() {
        let min_len = min_keyword_length(keyword.bucket_size, &query.bucket_scheme)?;

        let mut grid = ComparisonGrid::new();
        let mut layout = vec![];
        let mut per_word = vec![full_zero; total_words];
        let mut word_index = 0;
        for bucket in &buckets {
            for word in &bucket.words {
                if bucket.bucket_size >= keyword.bucket_size {
                    let positions = word.len() as i64 - min_len as i64 + 1;
                    let positions = positions.max(0) as usize;
                    if positions > 0 {
                        grid.add_target(b, keyword, word, positions, zero6)?;
                        layout.push((word_index, positions));
                    }
                }
                word_index += 1;
            }
        }

        if grid.positions > 0 {
            let per_position = grid.reduce(b, keyword.keyword.len())?;
            let mut offset = 0;
            for (word_index, positions) in layout {
                let seg = b.select(per_position, (offset..offset + positions).collect())?;
                offset += positions;
                per_word[word_index] = low_depth_reduce_lanes(b, seg, |b, x, y| b.or(x, y))?;
            }
        }

        for (i, word_result) in per_word.into_iter().enumerate() {
            results[i] = Some(chain(b, results[i], word_result, chain_bits, j)?);
        }
    }
    Ok(collect_results(results, full_zero))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_keyword_length_follows_the_scheme() {
        let scheme = [4, 8, 16];
        assert_eq!(min_keyword_length(4, &scheme).unwrap(), 1);
        assert_eq!(min_keyword_length(8, &scheme).unwrap(), 5);
        assert_eq!(min_keyword_length(16, &scheme).unwrap(), 9);
        assert!(matches!(
            min_keyword_length(12, &scheme),
            Err(SearchError::InvalidBucketScheme { bucket_size: 12 })
        ));
    }

    #[test]
    fn search_mode_parsing() {
        assert_eq!("normal".parse::<SearchMode>().unwrap(), SearchMode::Normal);
        assert_eq!("hidden".parse::<SearchMode>().unwrap(), SearchMode::Hidden);
        assert_eq!("bucket".parse::<SearchMode>().unwrap(), SearchMode::Bucket);
        assert_eq!("index".parse::<SearchMode>().unwrap(), SearchMode::Index);
        assert!(matches!(
            "fuzzy".parse::<SearchMode>(),
            Err(SearchError::InvalidSearchMode(_))
        ));
        assert_eq!(SearchMode::Bucket.to_string(), "bucket");
    }

    #[test]
    fn too_short_modifier_chain_is_rejected() {
        let mut b = CircuitBuilder::new(1);
        let bit = b.zero();
        assert!(ensure_chain(&[bit], 1).is_ok());
        assert!(matches!(
            ensure_chain(&[bit], 2),
            Err(SearchError::ShapeMismatch {
                expected: 3,
                actual: 1
            })
        ));
    }
}
