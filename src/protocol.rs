//! The semi-honest Boolean-GMW protocol executed by each party.
//!
//! Every wire of the circuit carries one XOR share per party: XOR, NOT and
//! the lane rearrangements are evaluated locally, while each AND gate
//! consumes one Beaver triple and contributes to one broadcast round. All
//! AND lanes of the same multiplicative depth are opened in a single
//! message per peer, so the number of online rounds equals the circuit's
//! AND depth.
//!
//! Outputs are returned as shares and never opened by the engine; whether
//! (and where) to declassify is a deployment decision.

use std::fmt;
use std::time::Instant;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::runtime::Runtime;
use tokio::task;

use crate::channel::{self, recv_from, send_to, Channel, ErrorKind, SimpleChannel};
use crate::circuit::{Circuit, Gate, WireId};
use crate::ot;
use crate::stats::RunStats;
use crate::triples;

/// A custom error type for the MPC computation and communication.
#[derive(Debug)]
pub enum Error {
    /// A message could not be sent or received.
    Channel(channel::Error),
    /// The oblivious-transfer subprotocol failed during setup.
    Ot(ot::Error),
    /// The circuit was built for a different number of parties.
    WrongPartyCount {
        /// The number of parties the circuit was built for.
        circuit: usize,
        /// The number of parties in this session.
        actual: usize,
    },
}

impl From<channel::Error> for Error {
    fn from(e: channel::Error) -> Self {
        Error::Channel(e)
    }
}

impl From<ot::Error> for Error {
    fn from(e: ot::Error) -> Self {
        Error::Ot(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Channel(e) => write!(f, "{e}"),
            Error::Ot(e) => write!(f, "OT error: {e:?}"),
            Error::WrongPartyCount { circuit, actual } => write!(
                f,
                "circuit was built for {circuit} parties, session has {actual}"
            ),
        }
    }
}

impl std::error::Error for Error {}

/// One MPC party, exclusively owning its transport and statistics.
///
/// A party is single-shot: one `run` per constructed circuit, then
/// [`Party::finish`]. Dropping the party releases the transport on every
/// exit path.
#[derive(Debug)]
pub struct Party<C: Channel> {
    id: usize,
    parties: usize,
    channel: C,
    stats: RunStats,
}

impl<C: Channel> Party<C> {
    /// Creates a party with the given id out of `parties` total.
    pub fn new(id: usize, parties: usize, channel: C) -> Self {
        Party {
            id,
            parties,
            channel,
            stats: RunStats::default(),
        }
    }

    /// The id of this party.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Executes setup and online phase for the circuit and returns this
    /// party's share of each output wire (one `Vec<bool>` per output, one
    /// bool per lane).
    pub async fn run(&mut self, circuit: &Circuit) -> Result<Vec<Vec<bool>>, Error> {
        if circuit.n_parties != self.parties {
            return Err(Error::WrongPartyCount {
                circuit: circuit.n_parties,
                actual: self.parties,
            });
        }
        let mut rng = StdRng::from_entropy();

        let setup_start = Instant::now();
        let triples = triples::generate(
            &self.channel,
            self.id,
            self.parties,
            circuit.and_lanes,
            &mut rng,
        )
        .await?;
        self.stats.setup_ms += elapsed_ms(setup_start);

        let online_start = Instant::now();
        let mut values: Vec<Vec<bool>> = vec![vec![]; circuit.nodes.len()];
        self.share_inputs(circuit, &mut values, &mut rng).await?;
        self.evaluate(circuit, &mut values, &triples).await?;
        self.stats.online_ms += elapsed_ms(online_start);

        self.stats.gates += circuit.gates() as u64;
        self.stats.and_lanes += circuit.and_lanes() as u64;
        self.stats.and_depth = self.stats.and_depth.max(circuit.and_depth() as u64);

        Ok(circuit
            .outputs
            .iter()
            .map(|&id| values[id].clone())
            .collect())
    }

    /// XOR-splits this party's input bits and distributes the masks, then
    /// collects the mask shares of every other party's inputs.
    async fn share_inputs(
        &self,
        circuit: &Circuit,
        values: &mut [Vec<bool>],
        rng: &mut StdRng,
    ) -> Result<(), Error> {
        let mut input_nodes: Vec<Vec<WireId>> = vec![vec![]; self.parties];
        for (id, node) in circuit.nodes.iter().enumerate() {
            if let Gate::Input { party, .. } = &node.gate {
                input_nodes[*party].push(id);
            }
        }

        let mut my_bits = vec![];
        for &id in &input_nodes[self.id] {
            if let Gate::Input { bits, .. } = &circuit.nodes[id].gate {
                my_bits.extend_from_slice(bits);
            }
        }
        for p in 0..self.parties {
            if p == self.id {
                continue;
            }
            let masks: Vec<bool> = (0..my_bits.len()).map(|_| rng.gen()).collect();
            for (bit, mask) in my_bits.iter_mut().zip(&masks) {
                *bit ^= mask;
            }
            send_to(&self.channel, p, "input shares", &pack_bits(&masks)).await?;
        }
        distribute_bits(&my_bits, &input_nodes[self.id], circuit, values);

        for p in 0..self.parties {
            if p == self.id {
                continue;
            }
            let total: usize = input_nodes[p]
                .iter()
                .map(|&id| circuit.nodes[id].width)
                .sum();
            let packed: Vec<u8> = recv_from(&self.channel, p, "input shares").await?;
            if packed.len() != total.div_ceil(8) {
                return Err(Error::Channel(channel::Error {
                    phase: "input shares".to_string(),
                    reason: ErrorKind::InvalidLength,
                }));
            }
            let bits = unpack_bits(&packed, total);
            distribute_bits(&bits, &input_nodes[p], circuit, values);
        }
        Ok(())
    }

    /// Evaluates the circuit level by level, one broadcast round per level.
    async fn evaluate(
        &self,
        circuit: &Circuit,
        values: &mut [Vec<bool>],
        triples: &triples::Triples,
    ) -> Result<(), Error> {
        let mut and_by_level: Vec<Vec<WireId>> = vec![vec![]; circuit.max_level + 1];
        let mut sweep_by_level: Vec<Vec<WireId>> = vec![vec![]; circuit.max_level + 1];
        for (id, node) in circuit.nodes.iter().enumerate() {
            match &node.gate {
                Gate::And(_, _) => and_by_level[node.level].push(id),
                Gate::Input { .. } => {}
                _ => sweep_by_level[node.level].push(id),
            }
        }

        let mut triple_offset = 0;
        for level in 0..=circuit.max_level {
            if level > 0 {
                triple_offset = self
                    .open_and_level(circuit, values, triples, &and_by_level[level], triple_offset)
                    .await?;
            }
            for &id in &sweep_by_level[level] {
                values[id] = self.evaluate_local(circuit, values, id);
            }
        }
        Ok(())
    }

    /// Opens `d = x ^ a`, `e = y ^ b` for all AND lanes of one level and
    /// applies the Beaver identity to produce the product shares.
    async fn open_and_level(
        &self,
        circuit: &Circuit,
        values: &mut [Vec<bool>],
        triples: &triples::Triples,
        and_ids: &[WireId],
        triple_offset: usize,
    ) -> Result<usize, Error> {
        let mut opening = vec![];
        let mut offset = triple_offset;
        for &id in and_ids {
            let Gate::And(a, b) = &circuit.nodes[id].gate else {
                unreachable!("non-AND node in AND level");
            };
            let width = circuit.nodes[id].width;
            for lane in 0..width {
                opening.push(values[*a][lane] ^ triples.a[offset + lane]);
                opening.push(values[*b][lane] ^ triples.b[offset + lane]);
            }
            offset += width;
        }

        let mut opened = opening.clone();
        for p in 0..self.parties {
            if p == self.id {
                continue;
            }
            send_to(&self.channel, p, "and openings", &pack_bits(&opening)).await?;
        }
        for p in 0..self.parties {
            if p == self.id {
                continue;
            }
            let packed: Vec<u8> = recv_from(&self.channel, p, "and openings").await?;
            if packed.len() != opening.len().div_ceil(8) {
                return Err(Error::Channel(channel::Error {
                    phase: "and openings".to_string(),
                    reason: ErrorKind::InvalidLength,
                }));
            }
            for (bit, share) in opened.iter_mut().zip(unpack_bits(&packed, opening.len())) {
                *bit ^= share;
            }
        }

        let mut offset = triple_offset;
        let mut cursor = 0;
        for &id in and_ids {
            let width = circuit.nodes[id].width;
            let mut z = Vec::with_capacity(width);
            for lane in 0..width {
                let d = opened[cursor];
                let e = opened[cursor + 1];
                cursor += 2;
                let mut bit = triples.c[offset + lane]
                    ^ (d & triples.b[offset + lane])
                    ^ (e & triples.a[offset + lane]);
                if self.id == 0 {
                    bit ^= d & e;
                }
                z.push(bit);
            }
            offset += width;
            values[id] = z;
        }
        Ok(offset)
    }

    /// Evaluates one communication-free node.
    fn evaluate_local(&self, circuit: &Circuit, values: &[Vec<bool>], id: WireId) -> Vec<bool> {
        let node = &circuit.nodes[id];
        match &node.gate {
            Gate::Constant(bits) => {
                // A public constant is held by party 0; all other shares
                // are zero so the XOR over all parties yields the value.
                if self.id == 0 {
                    bits.clone()
                } else {
                    vec![false; node.width]
                }
            }
            Gate::Xor(a, b) => values[*a]
                .iter()
                .zip(&values[*b])
                .map(|(x, y)| x ^ y)
                .collect(),
            Gate::Not(a) => {
                if self.id == 0 {
                    values[*a].iter().map(|x| !x).collect()
                } else {
                    values[*a].clone()
                }
            }
            Gate::Concat(ids) => ids.iter().flat_map(|&id| values[id].clone()).collect(),
            Gate::Select { src, lanes } => lanes.iter().map(|&lane| values[*src][lane]).collect(),
            Gate::Input { .. } | Gate::And(_, _) => {
                unreachable!("input and AND nodes are evaluated elsewhere")
            }
        }
    }

    /// Final synchronisation barrier. Consumes the party, releasing its
    /// transport, and returns the accumulated statistics.
    pub async fn finish(self) -> Result<RunStats, Error> {
        for p in 0..self.parties {
            if p == self.id {
                continue;
            }
            send_to(&self.channel, p, "finish", &()).await?;
        }
        for p in 0..self.parties {
            if p == self.id {
                continue;
            }
            let () = recv_from(&self.channel, p, "finish").await?;
        }
        let mut stats = self.stats;
        stats.bytes_sent = self.channel.bytes_sent();
        stats.bytes_received = self.channel.bytes_received();
        stats.messages_sent = self.channel.messages_sent();
        Ok(stats)
    }
}

/// Scatters a flat bit string into the per-node value slots, in node order.
fn distribute_bits(bits: &[bool], node_ids: &[WireId], circuit: &Circuit, values: &mut [Vec<bool>]) {
    let mut cursor = 0;
    for &id in node_ids {
        let width = circuit.nodes[id].width;
        values[id] = bits[cursor..cursor + width].to_vec();
        cursor += width;
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn unpack_bits(bytes: &[u8], len: usize) -> Vec<bool> {
    (0..len).map(|i| bytes[i / 8] >> (i % 8) & 1 == 1).collect()
}

/// Simulates all parties of a session in-process over [`SimpleChannel`]s.
///
/// `circuits[i]` is the circuit as constructed by party `i` (identical
/// topology, party-local input bits). Returns each party's output shares;
/// XOR-combining them across parties declassifies the outputs, which is
/// exactly what the tests do.
pub fn simulate(circuits: Vec<Circuit>) -> Result<Vec<Vec<Vec<bool>>>, Error> {
    let n_parties = circuits.len();
    let tokio = Runtime::new().expect("Could not start tokio runtime");
    tokio.block_on(async {
        let channels = SimpleChannel::channels(n_parties);
        let mut tasks = vec![];
        for (id, (circuit, channel)) in circuits.into_iter().zip(channels).enumerate() {
            tasks.push(task::spawn(async move {
                let mut party = Party::new(id, n_parties, channel);
                let outputs = party.run(&circuit).await?;
                party.finish().await?;
                Ok::<_, Error>(outputs)
            }));
        }
        let mut outputs = vec![];
        for task in tasks {
            outputs.push(task.await.expect("party task panicked")?);
        }
        Ok(outputs)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_packing_round_trips() {
        let bits: Vec<bool> = (0..13).map(|i| i % 3 == 0).collect();
        let packed = pack_bits(&bits);
        assert_eq!(packed.len(), 2);
        assert_eq!(unpack_bits(&packed, 13), bits);
    }
}
