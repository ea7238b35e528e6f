//! Communication channels between the search parties.
//!
//! The [`Channel`] trait separates the protocol logic from the message
//! transport: the GMW backend only ever talks to the abstract interface, so
//! the same protocol code runs over an in-process mesh ([`SimpleChannel`],
//! used by tests and benchmarks) or over TCP ([`TcpChannel`], used by the
//! deployed engine).
//!
//! Messages are serialized with `bincode` and split into chunks before they
//! are handed to the transport, so a single logical message can exceed any
//! transport-level size limit. The chunking is reassembled transparently on
//! the receiving side.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpListener, TcpStream,
};
use tokio::sync::{
    mpsc::{channel, Receiver, Sender},
    Mutex,
};
use tokio::time::sleep;
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug)]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    SendError(String),
    /// The message could not be (de-)serialized.
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    InvalidLength,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel error during {}: {:?}", self.phase, self.reason)
    }
}

impl std::error::Error for Error {}

/// A chunk of a message and the number of chunks remaining after it.
#[derive(Debug, Serialize)]
struct SendChunk<'a> {
    chunk: &'a [u8],
    remaining_chunks: usize,
}

/// The receiving-side counterpart of [`SendChunk`].
#[derive(Debug, Deserialize)]
struct RecvChunk {
    chunk: Vec<u8>,
    remaining_chunks: usize,
}

/// A communication channel used to send/receive messages to/from another party.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the party with the given index.
    // The returned future does not need to be Send, in-process channels are
    // polled from the task that created them.
    #[allow(async_fn_in_trait)]
    async fn send_bytes_to(&self, party: usize, msg: Vec<u8>) -> Result<(), Self::SendError>;

    /// Awaits a message from the party with the given index.
    #[allow(async_fn_in_trait)]
    async fn recv_bytes_from(&self, party: usize) -> Result<Vec<u8>, Self::RecvError>;

    /// The total number of payload bytes sent over this channel so far.
    fn bytes_sent(&self) -> u64 {
        0
    }

    /// The total number of payload bytes received over this channel so far.
    fn bytes_received(&self) -> u64 {
        0
    }

    /// The total number of transport-level messages sent so far.
    fn messages_sent(&self) -> u64 {
        0
    }
}

/// The maximum number of payload bytes per transport-level chunk.
const CHUNK_SIZE: usize = 5_000_000;

/// Serializes and sends a protocol message to another party.
pub(crate) async fn send_to<S: Serialize>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    msg: &S,
) -> Result<(), Error> {
    let serialized = bincode::serialize(msg).map_err(|e| Error {
        phase: format!("serializing {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    let mut chunks: Vec<&[u8]> = serialized.chunks(CHUNK_SIZE).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }
    let length = chunks.len();
    for (i, chunk) in chunks.into_iter().enumerate() {
        let chunk = SendChunk {
            chunk,
            remaining_chunks: length - i - 1,
        };
        let chunk = bincode::serialize(&chunk).map_err(|e| Error {
            phase: format!("sending {phase}"),
            reason: ErrorKind::SerdeError(format!("{e:?}")),
        })?;
        channel.send_bytes_to(party, chunk).await.map_err(|e| Error {
            phase: phase.to_string(),
            reason: ErrorKind::SendError(format!("{e:?}")),
        })?;
    }
    Ok(())
}

/// Receives and deserializes a protocol message from another party.
pub(crate) async fn recv_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
) -> Result<T, Error> {
    let mut msg = vec![];
    loop {
        let chunk = channel.recv_bytes_from(party).await.map_err(|e| Error {
            phase: phase.to_string(),
            reason: ErrorKind::RecvError(format!("{e:?}")),
        })?;
        let RecvChunk {
            chunk,
            remaining_chunks,
        } = bincode::deserialize(&chunk).map_err(|e| Error {
            phase: format!("receiving {phase}"),
            reason: ErrorKind::SerdeError(format!("{e:?}")),
        })?;
        msg.extend(chunk);
        if remaining_chunks == 0 {
            break;
        }
    }
    bincode::deserialize(&msg).map_err(|e| Error {
        phase: format!("receiving {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })
}

/// Receives a Vec from another party while checking its length.
pub(crate) async fn recv_vec_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    len: usize,
) -> Result<Vec<T>, Error> {
    let v: Vec<T> = recv_from(channel, party, phase).await?;
    if v.len() == len {
        Ok(v)
    } else {
        Err(Error {
            phase: phase.to_string(),
            reason: ErrorKind::InvalidLength,
        })
    }
}

/// An in-process channel mesh using tokio [`Sender`]s and [`Receiver`]s.
///
/// Intended for tests, benchmarks and multi-party simulation within a single
/// process.
#[derive(Debug)]
pub struct SimpleChannel {
    s: Vec<Option<Sender<Vec<u8>>>>,
    r: Vec<Option<Mutex<Receiver<Vec<u8>>>>>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
}

impl SimpleChannel {
    /// Creates channels for N parties to communicate with each other.
    pub fn channels(parties: usize) -> Vec<Self> {
        let buffer_capacity = 1024;
        let mut channels = vec![];
        for _ in 0..parties {
            let mut s = vec![];
            let mut r = vec![];
            for _ in 0..parties {
                s.push(None);
                r.push(None);
            }
            channels.push(SimpleChannel {
                s,
                r,
                bytes_sent: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                messages_sent: AtomicU64::new(0),
            });
        }
        for a in 0..parties {
            for b in 0..parties {
                if a == b {
                    continue;
                }
                let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
                channels[a].s[b] = Some(send_a_to_b);
                channels[b].r[a] = Some(Mutex::new(recv_a_to_b));
            }
        }
        channels
    }
}

/// The error raised by `recv` calls of a [`SimpleChannel`] or [`TcpChannel`].
#[derive(Debug)]
pub enum AsyncRecvError {
    /// The channel has been closed.
    Closed,
    /// No message was received before the timeout.
    TimeoutElapsed,
}

impl Channel for SimpleChannel {
    type SendError = tokio::sync::mpsc::error::SendError<Vec<u8>>;
    type RecvError = AsyncRecvError;

    async fn send_bytes_to(&self, p: usize, msg: Vec<u8>) -> Result<(), Self::SendError> {
        self.bytes_sent
            .fetch_add(msg.len() as u64, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.s[p]
            .as_ref()
            .unwrap_or_else(|| panic!("No sender for party {p}"))
            .send(msg)
            .await
    }

    async fn recv_bytes_from(&self, p: usize) -> Result<Vec<u8>, AsyncRecvError> {
        let mut r = self.r[p]
            .as_ref()
            .unwrap_or_else(|| panic!("No receiver for party {p}"))
            .lock()
            .await;
        match tokio::time::timeout(Duration::from_secs(10 * 60), r.recv()).await {
            Ok(Some(chunk)) => {
                self.bytes_received
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                Ok(chunk)
            }
            Ok(None) => Err(AsyncRecvError::Closed),
            Err(_) => Err(AsyncRecvError::TimeoutElapsed),
        }
    }

    fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
}

/// A mesh of pairwise TCP connections between all parties.
///
/// Party `i` accepts connections from every party `j > i` and connects to
/// every party `j < i`; the connecting side identifies itself with a 4-byte
/// little-endian id header. Each frame on a stream is a 4-byte little-endian
/// length prefix followed by the payload. Reads are pumped into per-peer
/// queues by background tasks so that `recv_bytes_from` can await a specific
/// peer.
///
/// The mesh is torn down when the channel is dropped, regardless of exit
/// path.
#[derive(Debug)]
pub struct TcpChannel {
    writers: Vec<Option<Mutex<OwnedWriteHalf>>>,
    readers: Vec<Option<Mutex<Receiver<Vec<u8>>>>>,
    bytes_sent: AtomicU64,
    bytes_received: Arc<AtomicU64>,
    messages_sent: AtomicU64,
}

impl TcpChannel {
    /// Establishes the TCP mesh for the party with the given id.
    ///
    /// `addrs[i]` is the listening address of party `i`; `addrs[my_id]` is
    /// bound locally. Connection attempts to parties that have not started
    /// yet are retried until the mesh is complete.
    pub async fn connect(my_id: usize, addrs: &[SocketAddr]) -> std::io::Result<Self> {
        let parties = addrs.len();
        let listener = TcpListener::bind(addrs[my_id]).await?;
        let mut streams: Vec<Option<TcpStream>> = (0..parties).map(|_| None).collect();
        for (peer, addr) in addrs.iter().enumerate().take(my_id) {
            let mut stream = loop {
                match TcpStream::connect(addr).await {
                    Ok(stream) => break stream,
                    Err(_) => {
                        trace!("party {peer} at {addr} not reachable yet, retrying");
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            };
            stream.set_nodelay(true)?;
            stream.write_all(&(my_id as u32).to_le_bytes()).await?;
            streams[peer] = Some(stream);
        }
        for _ in my_id + 1..parties {
            let (mut stream, _) = listener.accept().await?;
            stream.set_nodelay(true)?;
            let mut id = [0u8; 4];
            stream.read_exact(&mut id).await?;
            let peer = u32::from_le_bytes(id) as usize;
            if peer >= parties || streams[peer].is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unexpected peer id {peer}"),
                ));
            }
            streams[peer] = Some(stream);
        }

        let bytes_received = Arc::new(AtomicU64::new(0));
        let mut writers: Vec<Option<Mutex<OwnedWriteHalf>>> = vec![];
        let mut readers: Vec<Option<Mutex<Receiver<Vec<u8>>>>> = vec![];
        for stream in streams {
            match stream {
                Some(stream) => {
                    let (read_half, write_half) = stream.into_split();
                    let (s, r) = channel(1024);
                    tokio::spawn(pump_frames(read_half, s, Arc::clone(&bytes_received)));
                    writers.push(Some(Mutex::new(write_half)));
                    readers.push(Some(Mutex::new(r)));
                }
                None => {
                    writers.push(None);
                    readers.push(None);
                }
            }
        }
        Ok(TcpChannel {
            writers,
            readers,
            bytes_sent: AtomicU64::new(0),
            bytes_received,
            messages_sent: AtomicU64::new(0),
        })
    }
}

/// Reads length-prefixed frames from one peer until the stream closes.
async fn pump_frames(
    mut read_half: OwnedReadHalf,
    queue: Sender<Vec<u8>>,
    bytes_received: Arc<AtomicU64>,
) {
    loop {
        let mut len = [0u8; 4];
        if read_half.read_exact(&mut len).await.is_err() {
            return;
        }
        let mut frame = vec![0u8; u32::from_le_bytes(len) as usize];
        if read_half.read_exact(&mut frame).await.is_err() {
            return;
        }
        bytes_received.fetch_add(frame.len() as u64, Ordering::Relaxed);
        if queue.send(frame).await.is_err() {
            return;
        }
    }
}

impl Channel for TcpChannel {
    type SendError = std::io::Error;
    type RecvError = AsyncRecvError;

    async fn send_bytes_to(&self, p: usize, msg: Vec<u8>) -> Result<(), Self::SendError> {
        let writer = self.writers[p]
            .as_ref()
            .unwrap_or_else(|| panic!("No connection to party {p}"));
        self.bytes_sent
            .fetch_add(msg.len() as u64, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        let mut writer = writer.lock().await;
        writer.write_all(&(msg.len() as u32).to_le_bytes()).await?;
        writer.write_all(&msg).await?;
        writer.flush().await
    }

    async fn recv_bytes_from(&self, p: usize) -> Result<Vec<u8>, Self::RecvError> {
        let mut r = self.readers[p]
            .as_ref()
            .unwrap_or_else(|| panic!("No connection to party {p}"))
            .lock()
            .await;
        match tokio::time::timeout(Duration::from_secs(10 * 60), r.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(AsyncRecvError::Closed),
            Err(_) => Err(AsyncRecvError::TimeoutElapsed),
        }
    }

    fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
}
