//! Benchmarks of search circuit construction and full protocol execution.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use criterion::{BenchmarkId, Criterion, Throughput};

use privmail_search::circuit::{Circuit, CircuitBuilder};
use privmail_search::corpus::{Mail, SearchIndex};
use privmail_search::protocol::simulate;
use privmail_search::query::{Query, SearchQuery};
use privmail_search::search::{build_search_circuit, SearchMode};

fn main() {
    let mut c = Criterion::default()
        .significance_level(0.1)
        .sample_size(10)
        .configure_from_args();

    circuit_benchmarks(&mut c);
    protocol_benchmarks(&mut c);

    c.final_summary();
}

/// A degenerate but valid XOR sharing: the first party holds the cleartext,
/// every other party holds zeros. Keeps the benchmark inputs deterministic.
fn blobs(data: &[u8], parties: usize) -> Vec<String> {
    let mut shares = vec![STANDARD.encode(data)];
    shares.resize(parties, STANDARD.encode(vec![0u8; data.len()]));
    shares
}

fn queries(parties: usize, keywords: &[(&str, u32)], scheme: &[u32]) -> Vec<Query> {
    let chain_bits = (2 * keywords.len()).saturating_sub(1);
    let chain = blobs(&vec![0u8; chain_bits.div_ceil(8)], parties);
    let shared: Vec<(Vec<String>, Vec<String>, Vec<String>)> = keywords
        .iter()
        .map(|(kw, bucket_size)| {
            let mut padded = kw.as_bytes().to_vec();
            padded.resize(*bucket_size as usize, 0);
            let mut mask = vec![0u8; (*bucket_size as usize).div_ceil(8)];
            for i in 0..kw.len() {
                mask[i / 8] |= 1 << (7 - i % 8);
            }
            (
                blobs(kw.as_bytes(), parties),
                blobs(&padded, parties),
                blobs(&mask, parties),
            )
        })
        .collect();
    (0..parties)
        .map(|p| Query {
            modifier_chain_share: chain[p].clone(),
            bucket_scheme: scheme.to_vec(),
            queries: keywords
                .iter()
                .zip(&shared)
                .map(|((kw, bucket_size), (truncated, bucketed, mask))| SearchQuery {
                    keyword: kw.to_string(),
                    bucket_size: *bucket_size,
                    keyword_bucketed: bucketed[p].clone(),
                    keyword_length_mask: mask[p].clone(),
                    keyword_truncated: truncated[p].clone(),
                })
                .collect(),
        })
        .collect()
}

fn mails(parties: usize, count: usize, text_len: usize) -> Vec<Vec<Mail>> {
    let text: Vec<u8> = b"the quick brown fox jumps over the lazy dog "
        .iter()
        .cycle()
        .take(text_len)
        .copied()
        .collect();
    let shares = blobs(&text, parties);
    (0..parties)
        .map(|p| {
            (0..count)
                .map(|_| Mail {
                    secret_share_block: shares[p].clone(),
                    secret_share_truncated_block: shares[p].clone(),
                    ..Mail::default()
                })
                .collect()
        })
        .collect()
}

fn party_circuits(
    queries: &[Query],
    mails: &[Vec<Mail>],
    mode: SearchMode,
) -> Vec<Circuit> {
    let index = SearchIndex::default();
    (0..queries.len())
        .map(|p| {
            let mut b = CircuitBuilder::new(queries.len());
            let results =
                build_search_circuit(&mut b, &queries[p], &mails[p], &index, mode).unwrap();
            b.finish(results).unwrap()
        })
        .collect()
}

/// Benchmarks circuit construction alone, without any communication.
fn circuit_benchmarks(c: &mut Criterion) {
    let mut g = c.benchmark_group("circuit");
    for num_mails in [4, 16, 64] {
        let queries = queries(2, &[("secret", 8)], &[4, 8]);
        let mails = mails(2, num_mails, 44);
        g.throughput(Throughput::Elements(num_mails as u64));
        for mode in [SearchMode::Normal, SearchMode::Hidden] {
            let bench_id = BenchmarkId::new(format!("build {mode}"), num_mails);
            g.bench_function(bench_id, |bench| {
                bench.iter(|| party_circuits(&queries, &mails, mode))
            });
        }
    }
    g.finish();
}

/// Benchmarks the full two-party protocol on a small corpus.
fn protocol_benchmarks(c: &mut Criterion) {
    let mut g = c.benchmark_group("mpc");
    let queries = queries(2, &[("secret", 8)], &[4, 8]);
    let mails = mails(2, 2, 16);
    for mode in [SearchMode::Normal, SearchMode::Hidden] {
        let circuits = party_circuits(&queries, &mails, mode);
        g.throughput(Throughput::Elements(circuits[0].and_lanes() as u64));
        g.bench_function(format!("search {mode} 2 parties"), |bench| {
            bench.iter(|| simulate(circuits.clone()).unwrap())
        });
    }
    g.finish();
}
