//! Runtime and communication statistics of a search session.
//!
//! Each [`crate::protocol::Party`] collects a [`RunStats`] per iteration;
//! the driver accumulates them and emits either a JSON report (with the
//! fixed PrivMail keys plus the backend statistics at the top level) or a
//! human-readable block.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::{json, Value};

/// Statistics of one protocol run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    /// Wall-clock time of the setup phase (triple generation) in ms.
    pub setup_ms: f64,
    /// Wall-clock time of the online phase in ms.
    pub online_ms: f64,
    /// Payload bytes sent to all peers.
    pub bytes_sent: u64,
    /// Payload bytes received from all peers.
    pub bytes_received: u64,
    /// Transport-level messages sent.
    pub messages_sent: u64,
    /// Total number of circuit gates.
    pub gates: u64,
    /// Total number of AND lanes (= Beaver triples consumed).
    pub and_lanes: u64,
    /// Multiplicative depth of the circuit (= online rounds).
    pub and_depth: u64,
}

/// Statistics accumulated over the benchmark iterations of one session.
#[derive(Debug, Default, Clone)]
pub struct AccumulatedStats {
    iterations: u32,
    total: RunStats,
}

impl AccumulatedStats {
    /// Folds the statistics of one iteration into the accumulator.
    ///
    /// Runtimes and communication are summed; the circuit shape counters
    /// are identical across iterations and simply kept.
    pub fn add(&mut self, stats: &RunStats) {
        self.iterations += 1;
        self.total.setup_ms += stats.setup_ms;
        self.total.online_ms += stats.online_ms;
        self.total.bytes_sent += stats.bytes_sent;
        self.total.bytes_received += stats.bytes_received;
        self.total.messages_sent += stats.messages_sent;
        self.total.gates = stats.gates;
        self.total.and_lanes = stats.and_lanes;
        self.total.and_depth = stats.and_depth;
    }

    /// The number of accumulated iterations.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Mean setup runtime per iteration in ms.
    pub fn mean_setup_ms(&self) -> f64 {
        self.total.setup_ms / self.iterations.max(1) as f64
    }

    /// Mean online runtime per iteration in ms.
    pub fn mean_online_ms(&self) -> f64 {
        self.total.online_ms / self.iterations.max(1) as f64
    }
}

/// The query/corpus shape counters reported next to the backend statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ReportShape {
    /// The search mode the session ran in.
    pub search_mode: String,
    /// The number of parties in the session.
    pub num_of_parties: usize,
    /// The number of mails in the corpus (including empty records).
    pub num_of_emails: usize,
    /// The number of mails covered by the search index.
    pub num_of_emails_in_index: u32,
    /// Cleartext characters across all truncated keywords.
    pub keyword_characters: u32,
    /// Sum of the keyword bucket sizes.
    pub keyword_buckets: u32,
    /// Cleartext characters across all truncated mail blocks.
    pub email_characters: u32,
}

/// Builds the JSON report: the fixed PrivMail keys, the shape counters and
/// the backend's runtime and communication statistics, all at the top
/// level.
pub fn json_report(shape: &ReportShape, stats: &AccumulatedStats) -> Value {
    json!({
        "project_name": "PrivMail",
        "protocol": "BooleanGMW",
        "search_mode": shape.search_mode,
        "num_of_parties": shape.num_of_parties,
        "num_of_emails": shape.num_of_emails,
        "num_of_emails_in_index": shape.num_of_emails_in_index,
        "keyword_characters": shape.keyword_characters,
        "keyword_buckets": shape.keyword_buckets,
        "email_characters": shape.email_characters,
        "iterations": stats.iterations(),
        "setup_runtime_ms": stats.mean_setup_ms(),
        "online_runtime_ms": stats.mean_online_ms(),
        "total_runtime_ms": stats.mean_setup_ms() + stats.mean_online_ms(),
        "bytes_sent": stats.total.bytes_sent,
        "bytes_received": stats.total.bytes_received,
        "messages_sent": stats.total.messages_sent,
        "circuit_gates": stats.total.gates,
        "and_gates": stats.total.and_lanes,
        "and_depth": stats.total.and_depth,
    })
}

/// Renders the statistics as a human-readable block for standard out.
pub fn human_report(shape: &ReportShape, stats: &AccumulatedStats) -> String {
    let mut out = String::new();
    let rule = "=".repeat(70);
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "PrivMail / BooleanGMW, {} parties, {} mode",
        shape.num_of_parties, shape.search_mode
    );
    let _ = writeln!(out, "{}", "-".repeat(70));
    let _ = writeln!(
        out,
        "emails: {} in corpus, {} in index",
        shape.num_of_emails, shape.num_of_emails_in_index
    );
    let _ = writeln!(
        out,
        "keywords: {} characters in {} bucket slots; email characters: {}",
        shape.keyword_characters, shape.keyword_buckets, shape.email_characters
    );
    let _ = writeln!(
        out,
        "circuit: {} gates, {} AND lanes, depth {}",
        stats.total.gates, stats.total.and_lanes, stats.total.and_depth
    );
    let _ = writeln!(
        out,
        "runtime over {} iteration(s): setup {:.3} ms, online {:.3} ms",
        stats.iterations(),
        stats.mean_setup_ms(),
        stats.mean_online_ms()
    );
    let _ = writeln!(
        out,
        "communication: {} bytes sent, {} bytes received, {} messages",
        stats.total.bytes_sent, stats.total.bytes_received, stats.total.messages_sent
    );
    let _ = writeln!(out, "{rule}");
    out
}
