//! Transport multiplexer: two logical channels per peer.
//!
//! - `sync`: ordered, reliable. Baselines, exits, chunk snapshots, CVars,
//!   session control, and (in all current transports) client→server
//!   traffic. Anything referenced by a later delta must travel here.
//! - `entities`: unordered, unreliable, zero retransmits. Per-tick entity
//!   deltas only; their obsolescence is faster than any retransmission.
//!
//! Variants:
//! - [`loopback`]: in-process pair, both channels collapse to queues.
//! - [`stream`]: reliable-only TCP; both channels share one ordered
//!   stream. The first entities-preference send that falls back to the
//!   reliable path is logged once per peer.
//! - [`datagram`]: UDP, the native dual-channel case - raw datagrams for
//!   `entities`, a reliability sublayer plus fragmentation for `sync`.

pub mod datagram;
pub mod fragment;
pub mod loopback;
pub mod reliable;
pub mod stream;

use thiserror::Error;

/// The two logical channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Reliable, ordered.
    Sync,
    /// Unreliable, unordered, max retransmits zero.
    Entities,
}

/// Transport-scoped peer handle.
pub type PeerId = u64;

/// Transport failures surfaced to the server/client layers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure.
    #[error("transport io: {0}")]
    Io(#[from] std::io::Error),
    /// Send to a peer the transport no longer tracks.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    /// Payload exceeds what the channel can carry.
    #[error("payload of {0} bytes exceeds the channel limit")]
    PayloadTooLarge(usize),
    /// The connection is gone.
    #[error("disconnected")]
    Disconnected,
}

/// Events surfaced by a server-side transport poll.
#[derive(Debug)]
pub enum TransportEvent {
    /// A peer completed its transport-level handshake.
    Connected {
        /// The new peer.
        peer: PeerId,
    },
    /// A complete message arrived.
    Message {
        /// Sending peer.
        peer: PeerId,
        /// Channel it arrived on.
        channel: ChannelKind,
        /// Tagged protocol bytes.
        payload: Vec<u8>,
    },
    /// A peer disconnected or timed out.
    Disconnected {
        /// The departed peer.
        peer: PeerId,
    },
}

/// Events surfaced by a client-side transport poll.
#[derive(Debug)]
pub enum ClientEvent {
    /// A complete message arrived.
    Message {
        /// Channel it arrived on.
        channel: ChannelKind,
        /// Tagged protocol bytes.
        payload: Vec<u8>,
    },
    /// The server connection is gone.
    Disconnected,
}

/// A server-side transport: accepts peers and moves channel payloads.
///
/// Polling happens outside the tick boundary; the server drains events
/// into session mailboxes before stepping realms.
pub trait Transport: Send {
    /// Drains socket/queue state and returns pending events.
    fn poll(&mut self, now_ms: u64) -> Vec<TransportEvent>;

    /// Sends one message on a channel. Transports without an unreliable
    /// path deliver `Entities` traffic reliably and log the fallback once
    /// per peer.
    fn send(
        &mut self,
        peer: PeerId,
        channel: ChannelKind,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Drops a peer. A `Disconnected` event is surfaced on the next poll.
    fn disconnect(&mut self, peer: PeerId);
}

/// A client-side transport endpoint.
pub trait ClientTransport {
    /// Drains socket/queue state and returns pending events.
    fn poll(&mut self, now_ms: u64) -> Vec<ClientEvent>;

    /// Sends one message on a channel.
    fn send(&mut self, channel: ChannelKind, payload: &[u8]) -> Result<(), TransportError>;
}
