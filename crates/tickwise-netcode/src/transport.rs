//! Wire messages and the transport seam
//!
//! The [`Transport`] trait is the only thing a network stack has to
//! implement. Everything above it speaks in [`Packet`]s, which carry a
//! bincode-encoded message body plus enough routing metadata for the
//! receiver to dispatch it to the right entity.
//!
//! [`LoopbackNetwork`] is an in-memory stand-in with configurable loss and
//! latency on the unreliable channel, used by tests and the demo.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use tickwise_core::{Channel, EntityId, PeerId, Tick};
use tracing::trace;

/// Client → server: the most recent inputs for one entity
///
/// Carries several consecutive ticks so a single lost datagram does not lose
/// an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage<I> {
    /// Ascending by tick
    pub inputs: Vec<(Tick, I)>,
}

/// Server → clients: authoritative state of an entity at the end of a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMessage<S> {
    /// Tick whose post-simulation state this is
    pub tick: Tick,
    /// First tick of the current run of ticks simulated with genuine
    /// (non-default) owner input, if the latest tick was one of them
    pub exact_since: Option<Tick>,
    /// Captured state
    pub state: S,
}

#[derive(Deserialize)]
struct SnapshotHeader {
    tick: Tick,
}

/// Read the tick of an encoded [`SnapshotMessage`] without knowing its state type
pub fn snapshot_tick(payload: &[u8]) -> Result<Tick> {
    let header: SnapshotHeader = decode(payload)?;
    Ok(header.tick)
}

/// Server → clients: a replicated field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMessage<T> {
    /// Tick on which the value was sampled
    pub tick: Tick,
    /// New value
    pub value: T,
}

/// What a packet's payload holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketKind {
    /// [`InputMessage`]
    Input,
    /// [`SnapshotMessage`]
    Snapshot,
    /// [`OwnershipChange`](crate::OwnershipChange)
    Ownership,
    /// [`FieldMessage`] for the field with this index
    Field(u16),
}

/// Unit of transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Entity the message is about
    pub entity: EntityId,
    /// Payload type
    pub kind: PacketKind,
    /// bincode-encoded message
    pub payload: Vec<u8>,
}

impl Packet {
    /// Encode a message into a packet
    pub fn new<T: Serialize>(entity: EntityId, kind: PacketKind, message: &T) -> Result<Self> {
        Ok(Self {
            entity,
            kind,
            payload: encode(message)?,
        })
    }

    /// Decode the payload
    pub fn message<T: DeserializeOwned>(&self) -> Result<T> {
        decode(&self.payload)
    }

    /// Encode the whole packet for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Decode a packet received from the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

/// Encode a value with bincode
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a value with bincode
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Who an outgoing packet is addressed to
///
/// Resolved to concrete peers by the session, which knows the connected
/// clients and the current owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The authoritative server
    Server,
    /// Every connected client
    Observers,
    /// Only the current owner of the entity
    Owner,
    /// One specific peer
    Peer(PeerId),
}

/// A packet waiting to be flushed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub route: Route,
    pub channel: Channel,
    pub packet: Packet,
}

/// Datagram transport between peers
///
/// Implementations must never block; `recv` returns `Ok(None)` when nothing
/// is waiting. Sends on [`Channel::Unreliable`] may be dropped, duplicated
/// or reordered. Sends on [`Channel::Reliable`] arrive exactly once, in order.
pub trait Transport: Send + Sync {
    /// Error type for this transport
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send data to a peer
    fn send(&self, data: &[u8], target: PeerId, channel: Channel) -> std::result::Result<(), Self::Error>;

    /// Receive data (non-blocking)
    ///
    /// Returns `Ok(Some((data, source)))` if data was received. The source is
    /// established by the transport, not by the sender's claim.
    fn recv(&self) -> std::result::Result<Option<(Vec<u8>, PeerId)>, Self::Error>;

    /// The peer this transport sends as
    fn local_peer(&self) -> PeerId;
}

/// Error returned by [`LoopbackTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackError(pub String);

impl fmt::Display for LoopbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loopback: {}", self.0)
    }
}

impl std::error::Error for LoopbackError {}

impl From<LoopbackError> for Error {
    fn from(err: LoopbackError) -> Self {
        Error::Transport(err.to_string())
    }
}

#[derive(Debug)]
struct InFlight {
    deliver_at: u64,
    source: PeerId,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct NetworkState {
    /// Current network time in steps
    now: u64,
    /// Per-destination queues
    queues: HashMap<PeerId, VecDeque<InFlight>>,
    /// Probability of dropping an unreliable datagram
    loss: f32,
    /// Steps between send and delivery
    latency: u64,
    /// xorshift64 state for loss decisions
    rng: u64,
    dropped: u64,
    delivered: u64,
}

impl NetworkState {
    fn next_f32(&mut self) -> f32 {
        // xorshift64
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        (x >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// In-memory network connecting any number of [`LoopbackTransport`]s
///
/// Time only advances through [`LoopbackNetwork::advance`], so tests are
/// fully deterministic for a given seed.
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    /// A lossless network with zero latency
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                rng: 0x9E37_79B9_7F4A_7C15,
                ..NetworkState::default()
            })),
        }
    }

    /// Drop unreliable datagrams with probability `loss`, using `seed` for decisions
    pub fn with_loss(self, loss: f32, seed: u64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.loss = loss.clamp(0.0, 1.0);
            // xorshift must not start at zero
            state.rng = seed.max(1);
        }
        self
    }

    /// Deliver datagrams `steps` calls to [`advance`](Self::advance) after sending
    pub fn with_latency(self, steps: u64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.latency = steps;
        }
        self
    }

    /// Create the endpoint for a peer
    pub fn endpoint(&self, peer: PeerId) -> LoopbackTransport {
        if let Ok(mut state) = self.state.lock() {
            state.queues.entry(peer).or_default();
        }
        LoopbackTransport {
            peer,
            state: Arc::clone(&self.state),
        }
    }

    /// Advance network time
    pub fn advance(&self, steps: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.now += steps;
        }
    }

    /// (delivered, dropped) datagram counts
    pub fn counts(&self) -> (u64, u64) {
        self.state
            .lock()
            .map(|s| (s.delivered, s.dropped))
            .unwrap_or((0, 0))
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One peer's endpoint on a [`LoopbackNetwork`]
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    peer: PeerId,
    state: Arc<Mutex<NetworkState>>,
}

impl Transport for LoopbackTransport {
    type Error = LoopbackError;

    fn send(&self, data: &[u8], target: PeerId, channel: Channel) -> std::result::Result<(), Self::Error> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| LoopbackError("network state poisoned".into()))?;

        if !state.queues.contains_key(&target) {
            return Err(LoopbackError(format!("no endpoint for {}", target)));
        }

        if channel == Channel::Unreliable && state.loss > 0.0 && state.next_f32() < state.loss {
            state.dropped += 1;
            trace!(from = %self.peer, to = %target, "loopback dropped datagram");
            return Ok(());
        }

        let deliver_at = state.now + state.latency;
        let source = self.peer;
        if let Some(queue) = state.queues.get_mut(&target) {
            queue.push_back(InFlight {
                deliver_at,
                source,
                data: data.to_vec(),
            });
        }
        Ok(())
    }

    fn recv(&self) -> std::result::Result<Option<(Vec<u8>, PeerId)>, Self::Error> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| LoopbackError("network state poisoned".into()))?;
        let now = state.now;

        let Some(queue) = state.queues.get_mut(&self.peer) else {
            return Ok(None);
        };
        // Constant latency keeps the queue sorted by delivery time
        if queue.front().is_some_and(|d| d.deliver_at <= now) {
            let datagram = queue.pop_front().map(|d| (d.data, d.source));
            state.delivered += 1;
            return Ok(datagram);
        }
        Ok(None)
    }

    fn local_peer(&self) -> PeerId {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_bytes() {
        let message = SnapshotMessage {
            tick: 104,
            exact_since: Some(100),
            state: (1.5f32, -2.0f32),
        };
        let packet = Packet::new(EntityId(7), PacketKind::Snapshot, &message).unwrap();
        let received = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();

        assert_eq!(received.entity, EntityId(7));
        assert_eq!(received.kind, PacketKind::Snapshot);
        assert_eq!(received.message::<SnapshotMessage<(f32, f32)>>().unwrap(), message);
        assert_eq!(snapshot_tick(&received.payload).unwrap(), 104);
        assert!(snapshot_tick(&[1, 2]).is_err());
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(matches!(
            Packet::from_bytes(&[0xff, 0x01]),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_loopback_delivery_and_source() {
        let network = LoopbackNetwork::new();
        let server = network.endpoint(PeerId::SERVER);
        let client = network.endpoint(PeerId(1));

        client.send(b"hello", PeerId::SERVER, Channel::Unreliable).unwrap();
        let (data, source) = server.recv().unwrap().unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(source, PeerId(1));
        assert!(server.recv().unwrap().is_none());
    }

    #[test]
    fn test_loopback_latency() {
        let network = LoopbackNetwork::new().with_latency(2);
        let server = network.endpoint(PeerId::SERVER);
        let client = network.endpoint(PeerId(1));

        server.send(b"x", PeerId(1), Channel::Reliable).unwrap();
        network.advance(1);
        assert!(client.recv().unwrap().is_none());
        network.advance(1);
        assert!(client.recv().unwrap().is_some());
    }

    #[test]
    fn test_loopback_loss_spares_reliable() {
        let network = LoopbackNetwork::new().with_loss(1.0, 42);
        let server = network.endpoint(PeerId::SERVER);
        let client = network.endpoint(PeerId(1));

        client.send(b"lost", PeerId::SERVER, Channel::Unreliable).unwrap();
        client.send(b"kept", PeerId::SERVER, Channel::Reliable).unwrap();

        let (data, _) = server.recv().unwrap().unwrap();
        assert_eq!(data, b"kept");
        assert_eq!(network.counts(), (1, 1));
    }

    #[test]
    fn test_loopback_unknown_peer() {
        let network = LoopbackNetwork::new();
        let client = network.endpoint(PeerId(1));
        assert!(client.send(b"x", PeerId(9), Channel::Reliable).is_err());
    }
}
