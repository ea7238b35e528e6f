//! Semi-honest 1-out-of-2 oblivious transfer for single-bit messages.
//!
//! A batched variant of the Chou-Orlandi protocol over the Ristretto group:
//! the sender publishes `S = y*B`, the receiver blinds each choice as
//! `R_i = c_i*S + x_i*B`, and both sides derive one-bit pads by hashing the
//! shared points together with the OT index (hashing in `i` keeps the pads
//! of a batch independent). Used only during triple generation, once per
//! AND lane and peer.

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_TABLE,
    ristretto::{CompressedRistretto, RistrettoBasepointTable, RistrettoPoint},
    scalar::Scalar,
};
use rand::{CryptoRng, Rng};

use crate::channel::{self, recv_vec_from, send_to, Channel};

/// Errors raised by the oblivious-transfer subprotocol.
#[derive(Debug)]
pub enum Error {
    /// A message could not be exchanged with the peer.
    Channel(channel::Error),
    /// A received group element could not be decompressed.
    InvalidPoint,
}

impl From<channel::Error> for Error {
    fn from(e: channel::Error) -> Self {
        Error::Channel(e)
    }
}

/// Derives a one-bit pad from an OT index and a shared group element.
fn hash_point_bit(i: u64, point: &RistrettoPoint) -> bool {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&i.to_le_bytes());
    hasher.update(point.compress().as_bytes());
    hasher.finalize().as_bytes()[0] & 1 == 1
}

fn decompress(bytes: &[u8]) -> Result<RistrettoPoint, Error> {
    CompressedRistretto::from_slice(bytes)
        .map_err(|_| Error::InvalidPoint)?
        .decompress()
        .ok_or(Error::InvalidPoint)
}

/// Sends one message pair per OT; the peer learns exactly one bit of each
/// pair and the sender learns nothing about the choices.
pub(crate) async fn send_bits<C: Channel, RNG: Rng + CryptoRng>(
    channel: &C,
    peer: usize,
    pairs: &[(bool, bool)],
    rng: &mut RNG,
) -> Result<(), Error> {
    let y = Scalar::random(rng);
    let s = &y * RISTRETTO_BASEPOINT_TABLE;
    send_to(channel, peer, "ot point", &s.compress().to_bytes().to_vec()).await?;
    let ys = y * s;

    let blinded: Vec<Vec<u8>> = recv_vec_from(channel, peer, "ot blinded", pairs.len()).await?;
    let mut ciphertexts = Vec::with_capacity(pairs.len());
    for (i, (r_bytes, (m0, m1))) in blinded.into_iter().zip(pairs).enumerate() {
        let r = decompress(&r_bytes)?;
        let yr = y * r;
        let k0 = hash_point_bit(i as u64, &yr);
        let k1 = hash_point_bit(i as u64, &(yr - ys));
        ciphertexts.push((m0 ^ k0, m1 ^ k1));
    }
    send_to(channel, peer, "ot ciphertexts", &ciphertexts).await?;
    Ok(())
}

/// Receives one bit per OT, selected by the corresponding choice bit.
pub(crate) async fn recv_bits<C: Channel, RNG: Rng + CryptoRng>(
    channel: &C,
    peer: usize,
    choices: &[bool],
    rng: &mut RNG,
) -> Result<Vec<bool>, Error> {
    let s_bytes: Vec<u8> = recv_vec_from(channel, peer, "ot point", 32).await?;
    let s = decompress(&s_bytes)?;
    let s_table = RistrettoBasepointTable::create(&s);

    let mut blinded = Vec::with_capacity(choices.len());
    let mut pads = Vec::with_capacity(choices.len());
    for (i, &c) in choices.iter().enumerate() {
        let x = Scalar::random(rng);
        let mut r = &x * RISTRETTO_BASEPOINT_TABLE;
        if c {
            r += s;
        }
        blinded.push(r.compress().to_bytes().to_vec());
        pads.push(hash_point_bit(i as u64, &(&x * &s_table)));
    }
    send_to(channel, peer, "ot blinded", &blinded).await?;

    let ciphertexts: Vec<(bool, bool)> =
        recv_vec_from(channel, peer, "ot ciphertexts", choices.len()).await?;
    Ok(choices
        .iter()
        .zip(pads)
        .zip(ciphertexts)
        .map(|((&c, pad), (c0, c1))| pad ^ if c { c1 } else { c0 })
        .collect())
}
