//! Client-side world projection and the game client shell.
//!
//! [`ClientWorld`] mirrors the server's wire-visible state: decoded
//! chunks, entities built from baselines and patched by deltas, session
//! scalars and CVars. [`GameClient`] ties a transport, the projection and
//! the predictor together; the renderer (external) reads the projection.

use std::collections::HashMap;

use tracing::{debug, trace};

use tessera_core::entity::{Entity, EntityId};
use tessera_core::movement::MovementContext;
use tessera_core::tile::{CollisionFlags, Terrain};
use tessera_core::{chunk_of_tile, Aabb, MoveIntent, PhysicsParams, CHUNK_SIZE, STEP_UP_THRESHOLD};
use tessera_procedural::chunk::{Chunk, ChunkPos};

use crate::prediction::Predictor;
use crate::protocol::{
    delta, ClientMessage, ClientMode, Frame, Hello, RealmListEntry, ServerMessage,
    SyncInvincibility, VisibleRange,
};
use crate::transport::{ClientEvent, ClientTransport};
use crate::PROTOCOL_VERSION;

/// The client's mirror of server state.
#[derive(Default)]
pub struct ClientWorld {
    /// Entities by id, from baselines + deltas.
    pub entities: HashMap<u32, Entity>,
    /// Decoded chunk cache.
    pub chunks: HashMap<ChunkPos, Chunk>,
    /// The controlled entity id, once assigned.
    pub player_entity_id: Option<u32>,
    /// Mirrored physics CVars.
    pub cvars: PhysicsParams,
    /// Last frame's server tick.
    pub server_tick: u32,
    /// Highest input sequence the server confirmed.
    pub last_processed_input_seq: u32,
    /// Lobby realm list.
    pub realm_list: Vec<RealmListEntry>,
    /// Joined world, if any.
    pub current_world: Option<u64>,
    /// Camera placement from the join bundle.
    pub camera: (f32, f32, f32),
    /// Session gameplay scalars.
    pub gems_collected: u32,
    /// Editor rights.
    pub editor_enabled: bool,
    /// Mount binding.
    pub mount_entity_id: Option<u32>,
    /// Invincibility window, if active.
    pub invincibility: Option<SyncInvincibility>,
    /// Other sessions' editor cursors.
    pub remote_cursors: HashMap<u64, (f32, f32)>,
    /// Lobby player counts observed while in the lobby.
    pub realm_player_counts: HashMap<u64, u32>,
    /// Every player-count broadcast received, in order (diagnostics).
    pub player_count_events: Vec<(u64, u32)>,
}

impl ClientWorld {
    /// Applies one server message to the projection. Returns the frame
    /// when the message carried one (the caller reconciles with it).
    pub fn apply(&mut self, message: ServerMessage) -> Option<Frame> {
        match message {
            ServerMessage::Welcome(welcome) => {
                trace!(resumed = welcome.resumed, "welcome");
                None
            }
            ServerMessage::RealmList(list) => {
                self.realm_list = list;
                None
            }
            ServerMessage::RealmJoined(joined) => {
                self.current_world = Some(joined.world_id);
                self.camera = (joined.camera_x, joined.camera_y, joined.camera_zoom);
                None
            }
            ServerMessage::RealmLeft { .. } => {
                self.current_world = None;
                self.entities.clear();
                self.chunks.clear();
                self.player_entity_id = None;
                None
            }
            ServerMessage::RealmPlayerCount { world_id, count } => {
                self.player_count_events.push((world_id, count));
                self.realm_player_counts.insert(world_id, count);
                if let Some(entry) = self.realm_list.iter_mut().find(|e| e.id == world_id) {
                    entry.player_count = count;
                }
                None
            }
            ServerMessage::PlayerAssigned { entity_id } => {
                self.player_entity_id = Some(entity_id);
                None
            }
            ServerMessage::WorldLoaded(loaded) => {
                self.current_world = Some(loaded.world_id);
                self.cvars = loaded.cvars;
                self.camera = (loaded.camera_x, loaded.camera_y, loaded.camera_zoom);
                None
            }
            ServerMessage::SyncChunks(sync) => {
                for snapshot in sync.chunk_updates {
                    let pos = snapshot.pos();
                    self.chunks.insert(pos, snapshot.into_chunk());
                }
                if let Some(keys) = sync.loaded_chunk_keys {
                    // Evict whatever the server no longer lists.
                    let keep: std::collections::HashSet<ChunkPos> =
                        keys.iter().map(|&(x, y)| ChunkPos::new(x, y)).collect();
                    self.chunks.retain(|pos, _| keep.contains(pos));
                }
                None
            }
            ServerMessage::Frame(frame) => {
                self.apply_frame(&frame);
                Some(frame)
            }
            ServerMessage::SyncSession(scalars) => {
                self.gems_collected = scalars.gems_collected;
                self.editor_enabled = scalars.editor_enabled;
                self.mount_entity_id = scalars.mount_entity_id;
                None
            }
            ServerMessage::SyncInvincibility(window) => {
                self.invincibility = Some(window);
                None
            }
            ServerMessage::CvarUpdate { cvars } => {
                self.cvars = cvars;
                None
            }
            ServerMessage::EditorCursor { client_id, wx, wy } => {
                self.remote_cursors.insert(client_id, (wx, wy));
                None
            }
        }
    }

    fn apply_frame(&mut self, frame: &Frame) {
        self.server_tick = frame.server_tick;
        self.last_processed_input_seq = frame.last_processed_input_seq;
        if frame.player_entity_id != u32::MAX {
            self.player_entity_id = Some(frame.player_entity_id);
        }
        for exit in &frame.exits {
            self.entities.remove(exit);
        }
        for baseline in &frame.baselines {
            match delta::entity_from_baseline(baseline) {
                Ok(entity) => {
                    self.entities.insert(baseline.id, entity);
                }
                Err(e) => debug!(id = baseline.id, error = %e, "bad baseline skipped"),
            }
        }
        for entity_delta in &frame.deltas {
            if let Some(entity) = self.entities.get_mut(&entity_delta.id) {
                delta::apply_delta(entity, entity_delta);
            }
            // A delta for an unknown id means its baseline was lost on
            // the unreliable path; the next visibility pass re-baselines.
        }
    }

    /// The authoritative view of the controlled entity.
    #[must_use]
    pub fn player_entity(&self) -> Option<&Entity> {
        self.player_entity_id.and_then(|id| self.entities.get(&id))
    }

    /// A movement context over the projected world, excluding one entity
    /// (the predicted self).
    #[must_use]
    pub fn movement_context(&self, exclude: u32) -> ClientContext<'_> {
        ClientContext { world: self, exclude: EntityId(exclude) }
    }
}

/// The predictor's movement context: the chunk cache plus mirrored
/// entities. Props are server-side only; divergence near them corrects
/// on reconcile.
pub struct ClientContext<'a> {
    world: &'a ClientWorld,
    exclude: EntityId,
}

impl ClientContext<'_> {
    fn chunk_and_local(&self, tx: i32, ty: i32) -> Option<(&Chunk, usize)> {
        let pos = ChunkPos::new(chunk_of_tile(tx), chunk_of_tile(ty));
        let chunk = self.world.chunks.get(&pos)?;
        let lx = tx.rem_euclid(CHUNK_SIZE as i32) as usize;
        let ly = ty.rem_euclid(CHUNK_SIZE as i32) as usize;
        Some((chunk, Chunk::tile_index(lx, ly)))
    }
}

impl MovementContext for ClientContext<'_> {
    fn tile_collision(&self, tx: i32, ty: i32) -> CollisionFlags {
        self.chunk_and_local(tx, ty)
            .map_or(CollisionFlags::NONE, |(c, i)| CollisionFlags(c.collision[i]))
    }

    fn tile_height(&self, tx: i32, ty: i32) -> u8 {
        self.chunk_and_local(tx, ty)
            .map_or(0, |(c, i)| c.height_grid[i])
    }

    fn entity_blocked(&self, aabb: &Aabb, z_lo: f32, z_hi: f32, exclude: EntityId) -> bool {
        self.world.entities.values().any(|other| {
            if other.id == exclude || other.id == self.exclude {
                return false;
            }
            let Some(collider) = other.collider else {
                return false;
            };
            // The predicted player also respects client-solid colliders.
            if !collider.solid && !collider.client_solid {
                return false;
            }
            let Some(other_box) = other.aabb() else {
                return false;
            };
            if !other_box.intersects(aabb) {
                return false;
            }
            let (o_lo, o_hi) = other.z_extent();
            if o_hi <= z_lo + STEP_UP_THRESHOLD {
                return false;
            }
            o_lo < z_hi && o_hi > z_lo
        })
    }

    fn prop_blocked(&self, _aabb: &Aabb, _z_lo: f32, _z_hi: f32) -> bool {
        false
    }

    fn walkable_surface_under(&self, aabb: &Aabb, max_z: f32, exclude: EntityId) -> Option<f32> {
        let mut best: Option<f32> = None;
        for other in self.world.entities.values() {
            if other.id == exclude || other.id == self.exclude {
                continue;
            }
            let Some(collider) = other.collider else {
                continue;
            };
            if !collider.solid || collider.physical_height <= 0.0 {
                continue;
            }
            if other.aabb().is_some_and(|b| b.intersects(aabb)) {
                let top = other.z_extent().1;
                if top <= max_z && best.map_or(true, |b| top > b) {
                    best = Some(top);
                }
            }
        }
        best
    }

    fn terrain_at(&self, tx: i32, ty: i32) -> Option<Terrain> {
        self.chunk_and_local(tx, ty)
            .and_then(|(c, i)| Terrain::from_u8(c.terrain[i]))
    }

    fn road_at(&self, tx: i32, ty: i32) -> Option<u8> {
        self.chunk_and_local(tx, ty).map(|(c, i)| c.road_grid[i])
    }
}

/// The connected game client: transport + projection + predictor.
pub struct GameClient<T: ClientTransport> {
    transport: T,
    /// The projected world the renderer reads.
    pub world: ClientWorld,
    /// Local-player predictor.
    pub predictor: Predictor,
    client_id: u64,
    connected: bool,
}

impl<T: ClientTransport> GameClient<T> {
    /// Creates a client and sends the hello.
    pub fn connect(
        mut transport: T,
        client_id: u64,
        mode: ClientMode,
        display_name: Option<String>,
    ) -> Self {
        let hello = ClientMessage::Hello(Hello {
            client_id,
            protocol: PROTOCOL_VERSION,
            mode,
            display_name,
        });
        let _ = transport.send(hello.channel(), &hello.encode());
        Self {
            transport,
            world: ClientWorld::default(),
            predictor: Predictor::new(),
            client_id,
            connected: true,
        }
    }

    /// The stable client id used in the hello.
    #[must_use]
    pub const fn client_id(&self) -> u64 {
        self.client_id
    }

    /// True until the transport reports a disconnect.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Polls the transport and applies everything that arrived,
    /// reconciling the predictor on every frame.
    pub fn update(&mut self, now_ms: u64) {
        for event in self.transport.poll(now_ms) {
            match event {
                ClientEvent::Message { channel: _, payload } => {
                    match ServerMessage::decode(&payload) {
                        Ok(message) => self.apply(message),
                        Err(e) => debug!(error = %e, "undecodable server message dropped"),
                    }
                }
                ClientEvent::Disconnected => {
                    self.connected = false;
                    self.predictor.reset();
                }
            }
        }
    }

    fn apply(&mut self, message: ServerMessage) {
        if let ServerMessage::WorldLoaded(ref loaded) = message {
            self.predictor.params = loaded.cvars;
        }
        if let ServerMessage::CvarUpdate { cvars } = message {
            self.predictor.params = cvars;
            self.world.cvars = cvars;
            return;
        }
        let frame = self.world.apply(message);
        if let Some(frame) = frame {
            self.reconcile(&frame);
        }
    }

    fn reconcile(&mut self, frame: &Frame) {
        let Some(player_id) = self.world.player_entity_id else {
            return;
        };
        let Some(server_entity) = self.world.entities.get(&player_id).cloned() else {
            return;
        };
        let mount = self
            .world
            .mount_entity_id
            .and_then(|m| self.world.entities.get(&m))
            .cloned();
        let ctx = self.world.movement_context(player_id);
        self.predictor
            .reconcile(server_entity, mount, frame.last_processed_input_seq, &ctx);
    }

    /// Samples local input: predicts immediately, sends to the server.
    pub fn send_input(&mut self, intent: MoveIntent, dt: f32) {
        let Some(player_id) = self.world.player_entity_id else {
            return;
        };
        // Late-bind the predicted entity from the projection.
        if self.predictor.entity.is_none() {
            self.predictor.entity = self.world.entities.get(&player_id).cloned();
        }
        let message = {
            let ctx = self.world.movement_context(player_id);
            let input = self.predictor.predict(intent, dt, &ctx);
            ClientMessage::Input(input)
        };
        let _ = self.transport.send(message.channel(), &message.encode());
    }

    /// Advertises the visible chunk window.
    pub fn send_visible_range(&mut self, range: VisibleRange) {
        let message = ClientMessage::VisibleRange(range);
        let _ = self.transport.send(message.channel(), &message.encode());
    }

    /// Sends any other client message.
    pub fn send(&mut self, message: &ClientMessage) {
        let _ = self.transport.send(message.channel(), &message.encode());
    }

    /// The position the renderer should draw the local player at: the
    /// prediction when available, else the authoritative mirror.
    #[must_use]
    pub fn render_position(&self) -> Option<(f32, f32, f32)> {
        if let Some(entity) = self.predictor.entity.as_ref() {
            return Some((entity.wx, entity.wy, entity.wz));
        }
        self.world.player_entity().map(|e| (e.wx, e.wy, e.wz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::delta::WireState;
    use tessera_core::entity::EntityKind;

    #[test]
    fn test_frame_lifecycle_into_projection() {
        let mut world = ClientWorld::default();

        let server_side = Entity::new(EntityId(5), EntityKind::Hostile, 10.0, 20.0);
        let state = WireState::capture(&server_side);
        let baseline = state.baseline(5, EntityKind::Hostile.type_index());

        let frame = Frame {
            server_tick: 1,
            last_processed_input_seq: 0,
            player_entity_id: u32::MAX,
            baselines: vec![baseline],
            ..Frame::default()
        };
        world.apply(ServerMessage::Frame(frame));
        assert_eq!(world.entities[&5].wx, 10.0);

        // Delta moves it.
        let mut moved = server_side.clone();
        moved.wx = 42.0;
        let d = state.diff(&WireState::capture(&moved), 5).unwrap();
        let frame = Frame {
            server_tick: 2,
            deltas: vec![d],
            player_entity_id: u32::MAX,
            ..Frame::default()
        };
        world.apply(ServerMessage::Frame(frame));
        assert_eq!(world.entities[&5].wx, 42.0);

        // Exit removes it.
        let frame = Frame {
            server_tick: 3,
            exits: vec![5],
            player_entity_id: u32::MAX,
            ..Frame::default()
        };
        world.apply(ServerMessage::Frame(frame));
        assert!(world.entities.is_empty());
    }

    #[test]
    fn test_chunk_keys_evict_cache() {
        use crate::protocol::chunks::ChunkSnapshot;
        use crate::protocol::SyncChunks;

        let mut world = ClientWorld::default();
        let chunk = Chunk::new();
        world.apply(ServerMessage::SyncChunks(SyncChunks {
            loaded_chunk_keys: None,
            chunk_updates: vec![
                ChunkSnapshot::capture(ChunkPos::new(0, 0), &chunk),
                ChunkSnapshot::capture(ChunkPos::new(1, 0), &chunk),
            ],
        }));
        assert_eq!(world.chunks.len(), 2);

        world.apply(ServerMessage::SyncChunks(SyncChunks {
            loaded_chunk_keys: Some(vec![(1, 0)]),
            chunk_updates: vec![],
        }));
        assert_eq!(world.chunks.len(), 1);
        assert!(world.chunks.contains_key(&ChunkPos::new(1, 0)));
    }
}
