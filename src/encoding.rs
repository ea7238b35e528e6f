//! Decoding of Base64 share blobs into circuit inputs.
//!
//! All secret-shared values are transported as Base64 strings of raw XOR
//! shares. Decoding happens outside MPC (the bytes are this party's own
//! share); reconstruction happens inside the circuit by XOR-folding one
//! input bundle per party.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::warn;

use crate::circuit::{CircuitBuilder, CircuitError, Wire};

/// Decodes a Base64 share blob into raw share bytes.
///
/// Trailing `=` padding is allowed; a blob containing any byte outside the
/// standard alphabet decodes to an empty sequence. The share producers
/// never emit such blobs, so the degraded input is logged instead of
/// silently dropped.
pub fn decode_share(share: &str) -> Vec<u8> {
    match STANDARD.decode(share) {
        Ok(bytes) => bytes,
        Err(e) => {
            if !share.is_empty() {
                warn!("share blob is not valid Base64 ({e}), treating as empty");
            }
            vec![]
        }
    }
}

/// The number of cleartext characters encoded by a Base64 string:
/// `3 * (len / 4)` minus one per `=` padding character.
pub fn char_len_from_base64(share: &str) -> u32 {
    let padding = share.bytes().filter(|&b| b == b'=').count();
    (3 * (share.len() / 4)).saturating_sub(padding) as u32
}

/// Feeds a share blob into the circuit and reconstructs its value in MPC.
///
/// For each party one 8-bit input bundle per byte is created; the bundles
/// are XOR-folded element-wise, so the returned wires carry the XOR of all
/// parties' shares: the semantic value, still secret inside the circuit.
/// The local share bytes fill this party's input slot; the other parties'
/// slots are topology-only.
pub fn share_input(b: &mut CircuitBuilder, share: &str) -> Result<Vec<Wire>, CircuitError> {
    let bytes = decode_share(share);
    let mut value: Vec<Wire> = vec![];
    for party in 0..b.parties() {
        let bundle: Vec<Wire> = bytes
            .iter()
            .map(|&byte| b.input_byte(party, byte))
            .collect::<Result<_, _>>()?;
        if party == 0 {
            value = bundle;
        } else {
            value = value
                .iter()
                .zip(&bundle)
                .map(|(&v, &w)| b.xor(v, w))
                .collect::<Result<_, _>>()?;
        }
    }
    Ok(value)
}
