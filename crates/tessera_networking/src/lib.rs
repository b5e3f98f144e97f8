//! # Tessera Networking
//!
//! The server/client synchronization core.
//!
//! ## Architecture
//!
//! ```text
//! client input ──► transport (sync) ──► session mailbox ──► realm tick
//!                                                              │
//!   predictor ◄── transport (entities) ◄── delta broadcast ◄───┘
//! ```
//!
//! - **Protocol** ([`protocol`]): a 1-byte type tag dispatches either the
//!   hand-packed binary hot path (frames, inputs, chunk sync) or the
//!   structured JSON fallback (control messages).
//! - **Transport** ([`transport`]): every peer is presented as two logical
//!   channels - `sync` (reliable, ordered) and `entities` (unreliable,
//!   unordered). Variants: in-process loopback, reliable-only stream, and
//!   the native dual-channel datagram transport.
//! - **Server** ([`server`]): authoritative realms ticking at a fixed
//!   rate, session lifecycle with dormancy, delta-encoded broadcast,
//!   background persistence.
//! - **Client** ([`client`], [`prediction`]): world projection plus
//!   reconciliation-by-replay against the shared movement kernel.

pub mod client;
pub mod prediction;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{ClientWorld, GameClient};
pub use prediction::{InputRing, Predictor};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use server::{GameServer, ServerConfig};
pub use transport::{ChannelKind, PeerId, Transport, TransportEvent};

/// Protocol version exchanged in the hello. The delta-field schema
/// (masks + order) is part of this version: changing it bumps this.
pub const PROTOCOL_VERSION: u16 = 1;

/// Largest datagram the transport will emit. Reliable messages above this
/// are fragmented; unreliable messages above this are dropped (and that is
/// a bug in the caller).
pub const MAX_DATAGRAM_SIZE: usize = 1200;

/// Bound on a session's unprocessed input queue. Overflow discards the
/// oldest unprocessed inputs.
pub const INPUT_QUEUE_LIMIT: usize = 128;

/// How often (in ticks) the server refreshes a session's
/// `loadedChunkKeys` list so clients can evict.
pub const CHUNK_KEYS_INTERVAL: u64 = 30;
