//! Wire protocol: message kinds, their channels, and the codec.
//!
//! Every message begins with a 1-byte type tag. Hot-path messages (frames,
//! player inputs, chunk sync, visible range) are hand-packed binary;
//! everything else rides the structured fallback - a `serde_json` body
//! behind the tag. Compatibility breaks bump [`crate::PROTOCOL_VERSION`].

pub mod chunks;
pub mod delta;
pub mod wire;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tessera_core::PhysicsParams;

use crate::transport::ChannelKind;
use chunks::ChunkSnapshot;
use delta::{EntityBaseline, EntityDelta};
use wire::{ByteReader, ByteWriter};

/// Protocol decode/encode failures.
///
/// A violating message is dropped; a repeated offender at session scope is
/// disconnected with a reason.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Unknown leading type byte.
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),
    /// Payload shorter than its layout requires.
    #[error("truncated payload")]
    Truncated,
    /// Structured fallback body failed to parse.
    #[error("malformed control body")]
    MalformedBody,
    /// Delta mask refers to fields this schema does not define.
    #[error("unknown mask bits {0:#06x}")]
    UnknownMaskBits(u16),
    /// A field held an out-of-domain value.
    #[error("bad value for {0}")]
    BadValue(&'static str),
}

/// Message type tags.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// Server frame: baselines + deltas + exits.
    Frame = 0x01,
    /// Client player input.
    PlayerInput = 0x02,
    /// Chunk snapshots and loaded-key lists.
    SyncChunks = 0x03,
    /// Client visible chunk range.
    VisibleRange = 0x04,

    /// Client hello (structured).
    Hello = 0x10,
    /// Server welcome (structured).
    Welcome = 0x11,
    /// Realm list (structured).
    RealmList = 0x12,
    /// List-realms request (structured).
    ListRealms = 0x13,
    /// Join-realm request (structured).
    JoinRealm = 0x14,
    /// Join confirmation (structured).
    RealmJoined = 0x15,
    /// Leave-realm request (structured).
    LeaveRealm = 0x16,
    /// Leave confirmation (structured).
    RealmLeft = 0x17,
    /// Lobby player-count broadcast (structured).
    RealmPlayerCount = 0x18,
    /// Controlled-entity assignment (structured).
    PlayerAssigned = 0x19,
    /// Initial world state bundle (structured).
    WorldLoaded = 0x1a,
    /// Session gameplay scalars (structured).
    SyncSession = 0x1b,
    /// Invincibility window (structured).
    SyncInvincibility = 0x1c,
    /// Physics CVar broadcast (structured).
    CvarUpdate = 0x1d,
    /// Editor-mode toggle (structured).
    SetEditorMode = 0x1e,
    /// Debug flags (structured).
    SetDebug = 0x1f,
    /// Editor operation (structured).
    EditOp = 0x20,
    /// Editor cursor position (structured).
    EditorCursor = 0x21,
}

/// Axis scale for the input's i16 encoding of `[-1, 1]`. Public so the
/// predictor can pre-quantize its intents to the wire's precision.
pub const INPUT_AXIS_SCALE: f32 = 10_000.0;

/// Input flag: sprint held.
const INPUT_FLAG_SPRINT: u8 = 1 << 0;
/// Input flag: jump held.
const INPUT_FLAG_JUMP: u8 = 1 << 1;

// ---------------------------------------------------------------------
// Control payloads (structured fallback)
// ---------------------------------------------------------------------

/// How the client intends to use the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    /// Single-player embedded server: auto-join the default realm.
    Local,
    /// Multiplayer: land in the lobby and receive the realm list.
    Multiplayer,
}

/// Client hello, the first message on a fresh connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hello {
    /// Stable client id (reconnect key).
    pub client_id: u64,
    /// Client protocol version.
    pub protocol: u16,
    /// Session mode.
    pub mode: ClientMode,
    /// Display name for the profile, if the client has one.
    pub display_name: Option<String>,
}

/// Server accept for a hello.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Welcome {
    /// Server protocol version.
    pub protocol: u16,
    /// True if a dormant session was reclaimed.
    pub resumed: bool,
}

/// One realm-list entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmListEntry {
    /// World id.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Live player count.
    pub player_count: u32,
}

/// Join confirmation with camera placement.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RealmJoined {
    /// Echo of the request id.
    pub request_id: u32,
    /// Joined world.
    pub world_id: u64,
    /// Initial camera center X.
    pub camera_x: f32,
    /// Initial camera center Y.
    pub camera_y: f32,
    /// Initial camera zoom.
    pub camera_zoom: f32,
}

/// Initial world bundle sent after a join.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorldLoaded {
    /// Joined world.
    pub world_id: u64,
    /// Authoritative physics CVars; the client mirrors these into its
    /// predictor verbatim.
    pub cvars: PhysicsParams,
    /// Camera center X.
    pub camera_x: f32,
    /// Camera center Y.
    pub camera_y: f32,
    /// Camera zoom.
    pub camera_zoom: f32,
}

/// Per-session gameplay scalars.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    /// Gems collected by this session.
    pub gems_collected: u32,
    /// Editor mode granted.
    pub editor_enabled: bool,
    /// Mount the player entity is riding, if any.
    pub mount_entity_id: Option<u32>,
}

/// Invincibility window in server ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInvincibility {
    /// Tick the window opened.
    pub start_tick: u64,
    /// Window length in ticks.
    pub duration_ticks: u32,
}

/// Per-session debug flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugFlags {
    /// Pause this session's realm gameplay hooks.
    pub paused: bool,
    /// Noclip for the controlled entity.
    pub noclip: bool,
}

/// Editor operations, each carrying the minimum data to replay the edit
/// server-side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum EditOp {
    /// Set one terrain tile (collision follows the registry).
    TerrainTile {
        /// Global tile X.
        tx: i32,
        /// Global tile Y.
        ty: i32,
        /// Terrain code.
        terrain: u8,
    },
    /// Set one half-tile corner sample.
    TerrainSubgrid {
        /// Global subgrid X.
        gsx: i32,
        /// Global subgrid Y.
        gsy: i32,
        /// Sample value.
        value: u8,
    },
    /// Set the corner sample at a tile corner (write-through to every
    /// owning chunk).
    TerrainCorner {
        /// Global tile X of the corner.
        tx: i32,
        /// Global tile Y of the corner.
        ty: i32,
        /// Sample value.
        value: u8,
    },
    /// Set a road tile.
    Road {
        /// Global tile X.
        tx: i32,
        /// Global tile Y.
        ty: i32,
        /// Road code.
        road: u8,
    },
    /// Set a tile's elevation level.
    Elevation {
        /// Global tile X.
        tx: i32,
        /// Global tile Y.
        ty: i32,
        /// Elevation level (0..=3).
        height: u8,
    },
    /// Spawn an entity of a registered kind.
    Spawn {
        /// Kind name from the registry.
        kind: String,
        /// World X.
        wx: f32,
        /// World Y.
        wy: f32,
    },
    /// Delete an entity by id.
    DeleteEntity {
        /// Target entity.
        entity_id: u32,
    },
    /// Delete a prop by id.
    DeleteProp {
        /// Target prop.
        prop_id: u32,
    },
    /// Reset a chunk's terrain to grass.
    ClearTerrain {
        /// Chunk X.
        cx: i32,
        /// Chunk Y.
        cy: i32,
    },
    /// Clear a chunk's roads.
    ClearRoads {
        /// Chunk X.
        cx: i32,
        /// Chunk Y.
        cy: i32,
    },
    /// Force every loaded chunk to resync to clients.
    InvalidateAllChunks,
}

/// A decoded client player input.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlayerInputMsg {
    /// Strictly ascending per-session sequence number.
    pub seq: u32,
    /// Desired X direction in `[-1, 1]`.
    pub dx: f32,
    /// Desired Y direction in `[-1, 1]`.
    pub dy: f32,
    /// Sprint held.
    pub sprinting: bool,
    /// Jump held.
    pub jump: bool,
    /// Jump edge this input (optional tail).
    pub jump_pressed: Option<bool>,
    /// Client-measured input duration in ms (optional tail).
    pub dt_ms: Option<u16>,
}

/// Client visible chunk range, advertised each time it changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleRange {
    /// West chunk bound (inclusive).
    pub min_cx: i32,
    /// North chunk bound (inclusive).
    pub min_cy: i32,
    /// East chunk bound (inclusive).
    pub max_cx: i32,
    /// South chunk bound (inclusive).
    pub max_cy: i32,
}

impl VisibleRange {
    /// True if a chunk lies inside the range.
    #[must_use]
    pub const fn contains(&self, cx: i32, cy: i32) -> bool {
        cx >= self.min_cx && cx <= self.max_cx && cy >= self.min_cy && cy <= self.max_cy
    }
}

/// A server frame: the per-tick entity sync payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    /// Tick this frame describes.
    pub server_tick: u32,
    /// Highest input sequence processed for the receiving session.
    pub last_processed_input_seq: u32,
    /// The receiving session's controlled entity.
    pub player_entity_id: u32,
    /// Full baselines for newly visible entities.
    pub baselines: Vec<EntityBaseline>,
    /// Field deltas for still-visible entities.
    pub deltas: Vec<EntityDelta>,
    /// Ids that left the interest set.
    pub exits: Vec<u32>,
}

/// Chunk sync payload: loaded-key list and/or snapshots.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncChunks {
    /// Every chunk key the session should keep; the client evicts the
    /// rest. `None` when only updates are carried.
    pub loaded_chunk_keys: Option<Vec<(i32, i32)>>,
    /// Snapshots whose revision advanced past the session's last-sent.
    pub chunk_updates: Vec<ChunkSnapshot>,
}

// ---------------------------------------------------------------------
// Message enums
// ---------------------------------------------------------------------

/// Everything the server can send.
#[derive(Clone, Debug)]
pub enum ServerMessage {
    /// Hello accept.
    Welcome(Welcome),
    /// Realm catalog for the lobby.
    RealmList(Vec<RealmListEntry>),
    /// Join confirmation.
    RealmJoined(RealmJoined),
    /// Leave confirmation.
    RealmLeft {
        /// Echo of the request id.
        request_id: u32,
    },
    /// Player-count change, broadcast to lobby sessions.
    RealmPlayerCount {
        /// World the count is for.
        world_id: u64,
        /// New live count.
        count: u32,
    },
    /// Controlled-entity assignment.
    PlayerAssigned {
        /// The controlled entity.
        entity_id: u32,
    },
    /// Initial world bundle.
    WorldLoaded(WorldLoaded),
    /// Chunk sync.
    SyncChunks(SyncChunks),
    /// Per-tick entity sync.
    Frame(Frame),
    /// Session gameplay scalars.
    SyncSession(SyncSession),
    /// Invincibility window.
    SyncInvincibility(SyncInvincibility),
    /// Physics CVar broadcast.
    CvarUpdate {
        /// The authoritative CVars, verbatim.
        cvars: PhysicsParams,
    },
    /// Another session's editor cursor.
    EditorCursor {
        /// Session whose cursor moved.
        client_id: u64,
        /// Cursor world X.
        wx: f32,
        /// Cursor world Y.
        wy: f32,
    },
}

/// Everything a client can send.
#[derive(Clone, Debug)]
pub enum ClientMessage {
    /// First message on a connection.
    Hello(Hello),
    /// Player input.
    Input(PlayerInputMsg),
    /// Visible chunk range.
    VisibleRange(VisibleRange),
    /// Realm catalog request.
    ListRealms {
        /// Correlation id echoed in the reply.
        request_id: u32,
    },
    /// Join request.
    JoinRealm {
        /// Correlation id echoed in the reply.
        request_id: u32,
        /// Target world.
        world_id: u64,
    },
    /// Leave request.
    LeaveRealm {
        /// Correlation id echoed in the reply.
        request_id: u32,
    },
    /// Editor-mode toggle.
    SetEditorMode {
        /// Desired state.
        enabled: bool,
    },
    /// Debug flags.
    SetDebug(DebugFlags),
    /// Editor operation.
    Edit(EditOp),
    /// Editor cursor position.
    EditorCursor {
        /// Cursor world X.
        wx: f32,
        /// Cursor world Y.
        wy: f32,
    },
}

impl ServerMessage {
    /// The channel this message prefers. Only delta-bearing frames
    /// tolerate loss; a frame carrying baselines or exits is state a
    /// later delta references, so it must arrive, in order - like
    /// everything else.
    #[must_use]
    pub fn channel(&self) -> ChannelKind {
        match self {
            Self::Frame(frame) if frame.baselines.is_empty() && frame.exits.is_empty() => {
                ChannelKind::Entities
            }
            _ => ChannelKind::Sync,
        }
    }

    /// Encodes to a tagged wire buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(64);
        match self {
            Self::Frame(frame) => {
                w.put_u8(MessageType::Frame as u8);
                encode_frame(&mut w, frame);
            }
            Self::SyncChunks(sync) => {
                w.put_u8(MessageType::SyncChunks as u8);
                encode_sync_chunks(&mut w, sync);
            }
            Self::Welcome(body) => put_json(&mut w, MessageType::Welcome, body),
            Self::RealmList(body) => put_json(&mut w, MessageType::RealmList, body),
            Self::RealmJoined(body) => put_json(&mut w, MessageType::RealmJoined, body),
            Self::RealmLeft { request_id } => {
                put_json(&mut w, MessageType::RealmLeft, &serde_json::json!({ "request_id": request_id }));
            }
            Self::RealmPlayerCount { world_id, count } => put_json(
                &mut w,
                MessageType::RealmPlayerCount,
                &serde_json::json!({ "world_id": world_id, "count": count }),
            ),
            Self::PlayerAssigned { entity_id } => put_json(
                &mut w,
                MessageType::PlayerAssigned,
                &serde_json::json!({ "entity_id": entity_id }),
            ),
            Self::WorldLoaded(body) => put_json(&mut w, MessageType::WorldLoaded, body),
            Self::SyncSession(body) => put_json(&mut w, MessageType::SyncSession, body),
            Self::SyncInvincibility(body) => put_json(&mut w, MessageType::SyncInvincibility, body),
            Self::CvarUpdate { cvars } => put_json(&mut w, MessageType::CvarUpdate, cvars),
            Self::EditorCursor { client_id, wx, wy } => put_json(
                &mut w,
                MessageType::EditorCursor,
                &serde_json::json!({ "client_id": client_id, "wx": wx, "wy": wy }),
            ),
        }
        w.into_bytes()
    }

    /// Decodes a tagged wire buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = ByteReader::new(bytes);
        let tag = r.get_u8()?;
        match tag {
            t if t == MessageType::Frame as u8 => Ok(Self::Frame(decode_frame(&mut r)?)),
            t if t == MessageType::SyncChunks as u8 => {
                Ok(Self::SyncChunks(decode_sync_chunks(&mut r)?))
            }
            t if t == MessageType::Welcome as u8 => Ok(Self::Welcome(get_json(&mut r)?)),
            t if t == MessageType::RealmList as u8 => Ok(Self::RealmList(get_json(&mut r)?)),
            t if t == MessageType::RealmJoined as u8 => Ok(Self::RealmJoined(get_json(&mut r)?)),
            t if t == MessageType::RealmLeft as u8 => {
                #[derive(Deserialize)]
                struct Body {
                    request_id: u32,
                }
                let body: Body = get_json(&mut r)?;
                Ok(Self::RealmLeft { request_id: body.request_id })
            }
            t if t == MessageType::RealmPlayerCount as u8 => {
                #[derive(Deserialize)]
                struct Body {
                    world_id: u64,
                    count: u32,
                }
                let body: Body = get_json(&mut r)?;
                Ok(Self::RealmPlayerCount { world_id: body.world_id, count: body.count })
            }
            t if t == MessageType::PlayerAssigned as u8 => {
                #[derive(Deserialize)]
                struct Body {
                    entity_id: u32,
                }
                let body: Body = get_json(&mut r)?;
                Ok(Self::PlayerAssigned { entity_id: body.entity_id })
            }
            t if t == MessageType::WorldLoaded as u8 => Ok(Self::WorldLoaded(get_json(&mut r)?)),
            t if t == MessageType::SyncSession as u8 => Ok(Self::SyncSession(get_json(&mut r)?)),
            t if t == MessageType::SyncInvincibility as u8 => {
                Ok(Self::SyncInvincibility(get_json(&mut r)?))
            }
            t if t == MessageType::CvarUpdate as u8 => {
                Ok(Self::CvarUpdate { cvars: get_json(&mut r)? })
            }
            t if t == MessageType::EditorCursor as u8 => {
                #[derive(Deserialize)]
                struct Body {
                    client_id: u64,
                    wx: f32,
                    wy: f32,
                }
                let body: Body = get_json(&mut r)?;
                Ok(Self::EditorCursor { client_id: body.client_id, wx: body.wx, wy: body.wy })
            }
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

impl ClientMessage {
    /// Client traffic always rides the reliable channel in every current
    /// transport.
    #[must_use]
    pub const fn channel(&self) -> ChannelKind {
        ChannelKind::Sync
    }

    /// Encodes to a tagged wire buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(32);
        match self {
            Self::Input(input) => {
                w.put_u8(MessageType::PlayerInput as u8);
                encode_input(&mut w, input);
            }
            Self::VisibleRange(range) => {
                w.put_u8(MessageType::VisibleRange as u8);
                w.put_i32(range.min_cx);
                w.put_i32(range.min_cy);
                w.put_i32(range.max_cx);
                w.put_i32(range.max_cy);
            }
            Self::Hello(body) => put_json(&mut w, MessageType::Hello, body),
            Self::ListRealms { request_id } => put_json(
                &mut w,
                MessageType::ListRealms,
                &serde_json::json!({ "request_id": request_id }),
            ),
            Self::JoinRealm { request_id, world_id } => put_json(
                &mut w,
                MessageType::JoinRealm,
                &serde_json::json!({ "request_id": request_id, "world_id": world_id }),
            ),
            Self::LeaveRealm { request_id } => put_json(
                &mut w,
                MessageType::LeaveRealm,
                &serde_json::json!({ "request_id": request_id }),
            ),
            Self::SetEditorMode { enabled } => put_json(
                &mut w,
                MessageType::SetEditorMode,
                &serde_json::json!({ "enabled": enabled }),
            ),
            Self::SetDebug(flags) => put_json(&mut w, MessageType::SetDebug, flags),
            Self::Edit(op) => put_json(&mut w, MessageType::EditOp, op),
            Self::EditorCursor { wx, wy } => put_json(
                &mut w,
                MessageType::EditorCursor,
                &serde_json::json!({ "wx": wx, "wy": wy }),
            ),
        }
        w.into_bytes()
    }

    /// Decodes a tagged wire buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = ByteReader::new(bytes);
        let tag = r.get_u8()?;
        match tag {
            t if t == MessageType::PlayerInput as u8 => Ok(Self::Input(decode_input(&mut r)?)),
            t if t == MessageType::VisibleRange as u8 => Ok(Self::VisibleRange(VisibleRange {
                min_cx: r.get_i32()?,
                min_cy: r.get_i32()?,
                max_cx: r.get_i32()?,
                max_cy: r.get_i32()?,
            })),
            t if t == MessageType::Hello as u8 => Ok(Self::Hello(get_json(&mut r)?)),
            t if t == MessageType::ListRealms as u8 => {
                #[derive(Deserialize)]
                struct Body {
                    request_id: u32,
                }
                let body: Body = get_json(&mut r)?;
                Ok(Self::ListRealms { request_id: body.request_id })
            }
            t if t == MessageType::JoinRealm as u8 => {
                #[derive(Deserialize)]
                struct Body {
                    request_id: u32,
                    world_id: u64,
                }
                let body: Body = get_json(&mut r)?;
                Ok(Self::JoinRealm { request_id: body.request_id, world_id: body.world_id })
            }
            t if t == MessageType::LeaveRealm as u8 => {
                #[derive(Deserialize)]
                struct Body {
                    request_id: u32,
                }
                let body: Body = get_json(&mut r)?;
                Ok(Self::LeaveRealm { request_id: body.request_id })
            }
            t if t == MessageType::SetEditorMode as u8 => {
                #[derive(Deserialize)]
                struct Body {
                    enabled: bool,
                }
                let body: Body = get_json(&mut r)?;
                Ok(Self::SetEditorMode { enabled: body.enabled })
            }
            t if t == MessageType::SetDebug as u8 => Ok(Self::SetDebug(get_json(&mut r)?)),
            t if t == MessageType::EditOp as u8 => Ok(Self::Edit(get_json(&mut r)?)),
            t if t == MessageType::EditorCursor as u8 => {
                #[derive(Deserialize)]
                struct Body {
                    wx: f32,
                    wy: f32,
                }
                let body: Body = get_json(&mut r)?;
                Ok(Self::EditorCursor { wx: body.wx, wy: body.wy })
            }
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

// ---------------------------------------------------------------------
// Binary bodies
// ---------------------------------------------------------------------

fn put_json<T: Serialize>(w: &mut ByteWriter, tag: MessageType, body: &T) {
    w.put_u8(tag as u8);
    // Control types serialize infallibly (no maps with non-string keys).
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    w.put_bytes(&bytes);
}

fn get_json<'a, T: Deserialize<'a>>(r: &mut ByteReader<'a>) -> Result<T, ProtocolError> {
    let body = r.get_bytes(r.remaining())?;
    serde_json::from_slice(body).map_err(|_| ProtocolError::MalformedBody)
}

fn encode_input(w: &mut ByteWriter, input: &PlayerInputMsg) {
    w.put_u32(input.seq);
    w.put_i16((input.dx.clamp(-1.0, 1.0) * INPUT_AXIS_SCALE) as i16);
    w.put_i16((input.dy.clamp(-1.0, 1.0) * INPUT_AXIS_SCALE) as i16);
    let mut flags = 0u8;
    if input.sprinting {
        flags |= INPUT_FLAG_SPRINT;
    }
    if input.jump {
        flags |= INPUT_FLAG_JUMP;
    }
    w.put_u8(flags);
    // Optional tail: written only when either field is present.
    if input.dt_ms.is_some() || input.jump_pressed.is_some() {
        w.put_u16(input.dt_ms.unwrap_or(0));
        w.put_u8(u8::from(input.jump_pressed.unwrap_or(false)));
    }
}

fn decode_input(r: &mut ByteReader<'_>) -> Result<PlayerInputMsg, ProtocolError> {
    let seq = r.get_u32()?;
    let dx = f32::from(r.get_i16()?) / INPUT_AXIS_SCALE;
    let dy = f32::from(r.get_i16()?) / INPUT_AXIS_SCALE;
    let flags = r.get_u8()?;
    let mut input = PlayerInputMsg {
        seq,
        dx: dx.clamp(-1.0, 1.0),
        dy: dy.clamp(-1.0, 1.0),
        sprinting: flags & INPUT_FLAG_SPRINT != 0,
        jump: flags & INPUT_FLAG_JUMP != 0,
        jump_pressed: None,
        dt_ms: None,
    };
    if r.remaining() >= 3 {
        input.dt_ms = Some(r.get_u16()?);
        input.jump_pressed = Some(r.get_u8()? != 0);
    }
    Ok(input)
}

fn encode_frame(w: &mut ByteWriter, frame: &Frame) {
    w.put_u32(frame.server_tick);
    w.put_u32(frame.last_processed_input_seq);
    w.put_u32(frame.player_entity_id);
    w.put_u16(frame.baselines.len() as u16);
    w.put_u16(frame.deltas.len() as u16);
    w.put_u16(frame.exits.len() as u16);
    for baseline in &frame.baselines {
        delta::encode_baseline(w, baseline);
    }
    for entity_delta in &frame.deltas {
        delta::encode_delta(w, entity_delta);
    }
    for exit in &frame.exits {
        w.put_u32(*exit);
    }
}

fn decode_frame(r: &mut ByteReader<'_>) -> Result<Frame, ProtocolError> {
    let server_tick = r.get_u32()?;
    let last_processed_input_seq = r.get_u32()?;
    let player_entity_id = r.get_u32()?;
    let baseline_count = r.get_u16()?;
    let delta_count = r.get_u16()?;
    let exit_count = r.get_u16()?;

    let mut frame = Frame {
        server_tick,
        last_processed_input_seq,
        player_entity_id,
        baselines: Vec::with_capacity(baseline_count as usize),
        deltas: Vec::with_capacity(delta_count as usize),
        exits: Vec::with_capacity(exit_count as usize),
    };
    for _ in 0..baseline_count {
        frame.baselines.push(delta::decode_baseline(r)?);
    }
    for _ in 0..delta_count {
        frame.deltas.push(delta::decode_delta(r)?);
    }
    for _ in 0..exit_count {
        frame.exits.push(r.get_u32()?);
    }
    Ok(frame)
}

fn encode_sync_chunks(w: &mut ByteWriter, sync: &SyncChunks) {
    match &sync.loaded_chunk_keys {
        Some(keys) => {
            w.put_u8(1);
            w.put_u16(keys.len() as u16);
            for (cx, cy) in keys {
                w.put_i32(*cx);
                w.put_i32(*cy);
            }
        }
        None => w.put_u8(0),
    }
    w.put_u16(sync.chunk_updates.len() as u16);
    for snapshot in &sync.chunk_updates {
        chunks::encode_chunk_snapshot(w, snapshot);
    }
}

fn decode_sync_chunks(r: &mut ByteReader<'_>) -> Result<SyncChunks, ProtocolError> {
    let has_keys = r.get_u8()? != 0;
    let loaded_chunk_keys = if has_keys {
        let count = r.get_u16()?;
        let mut keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            keys.push((r.get_i32()?, r.get_i32()?));
        }
        Some(keys)
    } else {
        None
    };
    let chunk_count = r.get_u16()?;
    let mut chunk_updates = Vec::with_capacity(chunk_count as usize);
    for _ in 0..chunk_count {
        chunk_updates.push(chunks::decode_chunk_snapshot(r)?);
    }
    Ok(SyncChunks { loaded_chunk_keys, chunk_updates })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_roundtrip_minimal() {
        let msg = ClientMessage::Input(PlayerInputMsg {
            seq: 7,
            dx: 1.0,
            dy: -0.5,
            sprinting: true,
            jump: false,
            jump_pressed: None,
            dt_ms: None,
        });
        let bytes = msg.encode();
        // Fixed 10-byte header: tag + seq + dx + dy + flags.
        assert_eq!(bytes.len(), 10);
        let ClientMessage::Input(decoded) = ClientMessage::decode(&bytes).unwrap() else {
            panic!("wrong kind");
        };
        assert_eq!(decoded.seq, 7);
        assert!((decoded.dx - 1.0).abs() < 1e-3);
        assert!((decoded.dy + 0.5).abs() < 1e-3);
        assert!(decoded.sprinting);
        assert!(!decoded.jump);
        assert_eq!(decoded.dt_ms, None);
    }

    #[test]
    fn test_input_roundtrip_with_tail() {
        let msg = ClientMessage::Input(PlayerInputMsg {
            seq: 1,
            dx: -1.0,
            dy: 0.0,
            sprinting: false,
            jump: true,
            jump_pressed: Some(true),
            dt_ms: Some(33),
        });
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 13);
        let ClientMessage::Input(decoded) = ClientMessage::decode(&bytes).unwrap() else {
            panic!("wrong kind");
        };
        assert_eq!(decoded.dt_ms, Some(33));
        assert_eq!(decoded.jump_pressed, Some(true));
        assert!(decoded.jump);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert_eq!(
            ClientMessage::decode(&[0xee, 1, 2, 3]).unwrap_err(),
            ProtocolError::UnknownType(0xee)
        );
        assert_eq!(
            ServerMessage::decode(&[0xee]).unwrap_err(),
            ProtocolError::UnknownType(0xee)
        );
    }

    #[test]
    fn test_control_roundtrip() {
        let msg = ClientMessage::Hello(Hello {
            client_id: 42,
            protocol: crate::PROTOCOL_VERSION,
            mode: ClientMode::Multiplayer,
            display_name: Some("ada".into()),
        });
        let bytes = msg.encode();
        let ClientMessage::Hello(decoded) = ClientMessage::decode(&bytes).unwrap() else {
            panic!("wrong kind");
        };
        assert_eq!(decoded.client_id, 42);
        assert_eq!(decoded.mode, ClientMode::Multiplayer);
        assert_eq!(decoded.display_name.as_deref(), Some("ada"));
    }

    #[test]
    fn test_edit_op_roundtrip() {
        let ops = vec![
            EditOp::TerrainTile { tx: -3, ty: 9, terrain: 3 },
            EditOp::TerrainCorner { tx: 0, ty: 0, value: 2 },
            EditOp::Spawn { kind: "gem".into(), wx: 10.0, wy: 20.0 },
            EditOp::InvalidateAllChunks,
        ];
        for op in ops {
            let bytes = ClientMessage::Edit(op.clone()).encode();
            let ClientMessage::Edit(decoded) = ClientMessage::decode(&bytes).unwrap() else {
                panic!("wrong kind");
            };
            assert_eq!(decoded, op);
        }
    }

    #[test]
    fn test_frame_channel_preference() {
        assert_eq!(
            ServerMessage::Frame(Frame::default()).channel(),
            ChannelKind::Entities,
            "delta-only frames tolerate loss"
        );
        let with_exits = Frame { exits: vec![4], ..Frame::default() };
        assert_eq!(
            ServerMessage::Frame(with_exits).channel(),
            ChannelKind::Sync,
            "exit-bearing frames must not be lost or reordered"
        );
        assert_eq!(
            ServerMessage::RealmPlayerCount { world_id: 1, count: 2 }.channel(),
            ChannelKind::Sync
        );
    }

    #[test]
    fn test_malformed_control_body_rejected() {
        let mut bytes = vec![MessageType::Hello as u8];
        bytes.extend_from_slice(b"{not json");
        assert_eq!(
            ClientMessage::decode(&bytes).unwrap_err(),
            ProtocolError::MalformedBody
        );
    }
}
