//! Secure multi-party keyword search over XOR-secret-shared email.
//!
//! Every mail server holds one XOR share of each mail and of the search
//! query. The engine runs as one cooperating process per party: all parties
//! derive the identical Boolean circuit from their share files, evaluate it
//! jointly with a semi-honest Boolean-GMW protocol and end up with one
//! secret-shared result bit per mail (or per indexed word). No single party
//! learns the mail plaintext, the query keywords, the combining operators
//! or the search result.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod channel;
pub mod circuit;
pub mod corpus;
pub mod encoding;
pub mod layout;
pub mod protocol;
pub mod query;
pub mod search;
pub mod stats;

mod ot;
mod triples;
