//! Beaver multiplication triples, one per AND lane of the circuit.
//!
//! The parties jointly generate XOR shares of random triples `(a, b, c)`
//! with `c = a & b` before the online phase starts. Each party samples its
//! `a` and `b` shares locally; the cross products `a_i & b_j` between every
//! ordered pair of parties are shared with one bit-OT per lane: the sender
//! masks `(r, r ^ a_i)` and the receiver selects with `b_j`, leaving `r` and
//! `r ^ a_i*b_j` as the two shares. Pair sessions run in lexicographic
//! order, which gives every party the same global schedule and keeps the
//! mesh free of circular waits.

use rand::{CryptoRng, Rng};

use crate::channel::Channel;
use crate::ot;

/// One party's XOR shares of the multiplication triples.
#[derive(Debug)]
pub(crate) struct Triples {
    pub(crate) a: Vec<bool>,
    pub(crate) b: Vec<bool>,
    pub(crate) c: Vec<bool>,
}

/// Generates triple shares for `lanes` AND lanes.
pub(crate) async fn generate<C: Channel, RNG: Rng + CryptoRng>(
    channel: &C,
    id: usize,
    parties: usize,
    lanes: usize,
    rng: &mut RNG,
) -> Result<Triples, ot::Error> {
    let a: Vec<bool> = (0..lanes).map(|_| rng.gen()).collect();
    let b: Vec<bool> = (0..lanes).map(|_| rng.gen()).collect();
    let mut c: Vec<bool> = a.iter().zip(&b).map(|(a, b)| a & b).collect();

    for i in 0..parties {
        for j in 0..parties {
            if i == j {
                continue;
            }
            if id == i {
                // This party contributes `a`, the peer selects with `b`.
                let masks: Vec<bool> = (0..lanes).map(|_| rng.gen()).collect();
                let pairs: Vec<(bool, bool)> =
                    masks.iter().zip(&a).map(|(m, a)| (*m, m ^ a)).collect();
                ot::send_bits(channel, j, &pairs, rng).await?;
                for (c, m) in c.iter_mut().zip(&masks) {
                    *c ^= m;
                }
            } else if id == j {
                let cross = ot::recv_bits(channel, i, &b, rng).await?;
                for (c, r) in c.iter_mut().zip(&cross) {
                    *c ^= r;
                }
            }
        }
    }
    Ok(Triples { a, b, c })
}
