//! The authoritative game server.
//!
//! Owns the transport, sessions, realm registry, loaded realms and the
//! persistence flusher. The loop shape is: poll the transport into
//! session mailboxes, then step every realm one fixed tick, then
//! broadcast. Network I/O never happens mid-tick.

pub mod broadcast;
pub mod entities;
pub mod persistence;
pub mod realm;
pub mod registry;
pub mod session;
pub mod tick;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use tessera_core::entity::{EntityId, EntityKind};
use tessera_core::{MoveIntent, PhysicsParams, DEFAULT_TICK_RATE};

use crate::protocol::chunks::ChunkSnapshot;
use crate::protocol::{
    ClientMessage, ClientMode, RealmJoined, RealmListEntry, ServerMessage, SyncInvincibility,
    VisibleRange, Welcome, WorldLoaded,
};
use crate::transport::{PeerId, Transport, TransportEvent};
use crate::PROTOCOL_VERSION;

use persistence::{FlushCmd, Flusher, PersistenceStore};
use realm::{NoHooks, Realm, RealmEvent, TickHooks};
use registry::{RealmRegistry, WorldType};
use session::{ClientId, SessionManager, SessionState};
use tick::TickLoop;

/// Protocol violations tolerated before a session is dropped.
const MAX_VIOLATIONS: u32 = 16;

/// Widest visible range accepted from a client, per axis, in chunks.
const MAX_VISIBLE_SPAN: i32 = 16;

/// Per-client persisted profile.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Profile {
    /// Display name.
    pub display_name: String,
}

/// Server configuration (CLI flags + config file land here).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Authoritative tick rate in Hz.
    pub tick_rate: u32,
    /// Persistence root.
    pub data_dir: PathBuf,
    /// Empty-realm unload window.
    pub realm_idle_ms: u64,
    /// Dormant-session grace window.
    pub dormancy_ms: u64,
    /// Physics CVars handed to every realm.
    pub physics: PhysicsParams,
    /// Name of the world local-mode clients auto-join.
    pub default_world_name: String,
    /// Ticks between dirty-chunk flushes.
    pub autosave_ticks: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            data_dir: PathBuf::from("data"),
            realm_idle_ms: 60_000,
            dormancy_ms: 30_000,
            physics: PhysicsParams::default(),
            default_world_name: "overworld".into(),
            autosave_ticks: 150,
        }
    }
}

/// Builds the gameplay hooks for a freshly loaded realm.
pub type HooksFactory = Box<dyn Fn(u64) -> Box<dyn TickHooks> + Send>;

/// The authoritative server.
pub struct GameServer {
    config: ServerConfig,
    transport: Box<dyn Transport>,
    sessions: SessionManager,
    registry: RealmRegistry,
    realms: HashMap<u64, Realm>,
    hooks: HashMap<u64, Box<dyn TickHooks>>,
    hooks_factory: HooksFactory,
    store: PersistenceStore,
    flusher: Flusher,
    default_world_id: u64,
    now_ms: u64,
}

impl GameServer {
    /// Creates a server over a transport, hydrating the registry from the
    /// data dir and ensuring the default world exists.
    pub fn new(config: ServerConfig, transport: Box<dyn Transport>) -> Self {
        Self::with_hooks(
            config,
            transport,
            Box::new(|_| Box::new(NoHooks) as Box<dyn TickHooks>),
        )
    }

    /// Creates a server with a gameplay hooks factory.
    pub fn with_hooks(
        config: ServerConfig,
        transport: Box<dyn Transport>,
        hooks_factory: HooksFactory,
    ) -> Self {
        let store = PersistenceStore::new(&config.data_dir);
        let mut registry = RealmRegistry::new();
        match store.load_table(&store.worlds_path()) {
            Ok(table) => {
                let records = table
                    .iter()
                    .filter_map(|(_, bytes)| serde_json::from_slice(bytes).ok())
                    .collect();
                registry.hydrate(records);
            }
            Err(e) => warn!(error = %e, "worlds table unreadable, starting empty"),
        }

        let flusher = Flusher::spawn(PersistenceStore::new(&config.data_dir));

        let mut server = Self {
            default_world_id: 0,
            store,
            flusher,
            transport,
            sessions: SessionManager::new(),
            registry,
            realms: HashMap::new(),
            hooks: HashMap::new(),
            hooks_factory,
            config,
            now_ms: 0,
        };

        server.default_world_id = match server
            .registry
            .find_by_name(&server.config.default_world_name)
        {
            Some(record) => record.id,
            None => {
                let name = server.config.default_world_name.clone();
                let seed = 0x7e55_e7a0;
                let record = server
                    .registry
                    .create_world(&name, WorldType::Natural, seed, 0)
                    .clone();
                server.persist_world_record(record.id);
                info!(world = record.id, name = %name, "created default world");
                record.id
            }
        };
        server
    }

    /// The id local-mode clients auto-join.
    #[must_use]
    pub const fn default_world_id(&self) -> u64 {
        self.default_world_id
    }

    /// Creates and persists a new world record (admin/tooling surface;
    /// the wire protocol only lists and joins).
    pub fn create_world(&mut self, name: &str, world_type: WorldType, seed: u64) -> u64 {
        let now_secs = self.now_ms / 1000;
        let id = self.registry.create_world(name, world_type, seed, now_secs).id;
        self.persist_world_record(id);
        id
    }

    /// Replaces a realm's physics CVars and broadcasts them verbatim to
    /// every session in the realm, so predictors re-mirror before their
    /// next replay.
    pub fn set_physics(&mut self, world_id: u64, params: PhysicsParams) {
        let Some(realm) = self.realms.get_mut(&world_id) else {
            return;
        };
        realm.params = params;
        let message = ServerMessage::CvarUpdate { cvars: params };
        for client in self.sessions.active_in_realm(world_id) {
            self.send_to_client(client, &message);
        }
    }

    /// Immutable access to a loaded realm (testing and tooling).
    #[must_use]
    pub fn realm(&self, world_id: u64) -> Option<&Realm> {
        self.realms.get(&world_id)
    }

    /// Mutable access to a loaded realm (testing and tooling).
    pub fn realm_mut(&mut self, world_id: u64) -> Option<&mut Realm> {
        self.realms.get_mut(&world_id)
    }

    /// Session lookup by stable client id (testing and tooling).
    #[must_use]
    pub fn session(&self, client_id: u64) -> Option<&session::Session> {
        self.sessions.get(ClientId(client_id))
    }

    // -----------------------------------------------------------------
    // Pump: transport → mailboxes/control
    // -----------------------------------------------------------------

    /// Polls the transport and routes everything that arrived. Runs
    /// between ticks, never mid-tick.
    pub fn pump(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        for event in self.transport.poll(now_ms) {
            match event {
                TransportEvent::Connected { peer } => {
                    trace!(peer, "transport peer connected, awaiting hello");
                }
                TransportEvent::Message { peer, payload, .. } => {
                    self.handle_payload(peer, &payload);
                }
                TransportEvent::Disconnected { peer } => self.handle_disconnect(peer),
            }
        }
    }

    fn handle_payload(&mut self, peer: PeerId, payload: &[u8]) {
        let message = match ClientMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(peer, error = %e, "protocol violation");
                if let Some(session) = self.sessions.get_by_peer_mut(peer) {
                    session.violations += 1;
                    if session.violations >= MAX_VIOLATIONS {
                        warn!(peer, "repeated protocol violations, disconnecting");
                        self.transport.disconnect(peer);
                        self.handle_disconnect(peer);
                    }
                }
                return;
            }
        };
        self.handle_message(peer, message);
    }

    fn handle_message(&mut self, peer: PeerId, message: ClientMessage) {
        match message {
            ClientMessage::Hello(hello) => self.handle_hello(peer, hello),
            ClientMessage::Input(input) => {
                if let Some(session) = self.sessions.get_by_peer_mut(peer) {
                    if matches!(session.state, SessionState::Active { .. }) {
                        session.mailbox.push(input);
                    }
                    // Realm-scoped traffic in the lobby is silently dropped.
                }
            }
            ClientMessage::VisibleRange(range) => {
                if let Some(session) = self.sessions.get_by_peer_mut(peer) {
                    session.visible_range = clamp_range(range);
                }
            }
            ClientMessage::ListRealms { .. } => {
                if let Some(client) = self.sessions.client_of_peer(peer) {
                    let list = self.realm_list();
                    self.send_to_client(client, &ServerMessage::RealmList(list));
                }
            }
            ClientMessage::JoinRealm { request_id, world_id } => {
                if let Some(client) = self.sessions.client_of_peer(peer) {
                    self.join_realm(client, request_id, world_id);
                }
            }
            ClientMessage::LeaveRealm { request_id } => {
                if let Some(client) = self.sessions.client_of_peer(peer) {
                    self.leave_realm(client, Some(request_id));
                }
            }
            ClientMessage::SetEditorMode { enabled } => {
                if let Some(session) = self.sessions.get_by_peer_mut(peer) {
                    session.editor_enabled = enabled;
                }
            }
            ClientMessage::SetDebug(flags) => {
                let Some(session) = self.sessions.get_by_peer_mut(peer) else {
                    return;
                };
                session.debug = flags;
                let binding = (session.state.realm(), session.entity_id);
                if let (Some(world_id), Some(entity_id)) = binding {
                    if let Some(realm) = self.realms.get_mut(&world_id) {
                        if let Some(entity) = realm.entities.get_mut(entity_id) {
                            entity.noclip = flags.noclip;
                        }
                    }
                }
            }
            ClientMessage::Edit(op) => {
                let Some(session) = self.sessions.get_by_peer_mut(peer) else {
                    return;
                };
                if !session.editor_enabled {
                    debug!(peer, "edit from non-editor session dropped");
                    return;
                }
                let Some(world_id) = session.state.realm() else {
                    return;
                };
                if let Some(realm) = self.realms.get_mut(&world_id) {
                    realm.apply_edit(&op);
                }
            }
            ClientMessage::EditorCursor { wx, wy } => {
                let Some(client) = self.sessions.client_of_peer(peer) else {
                    return;
                };
                let Some(world_id) = self
                    .sessions
                    .get(client)
                    .and_then(|s| s.state.realm())
                else {
                    return;
                };
                let message = ServerMessage::EditorCursor { client_id: client.0, wx, wy };
                for other in self.sessions.active_in_realm(world_id) {
                    if other != client {
                        self.send_to_client(other, &message);
                    }
                }
            }
        }
    }

    fn handle_hello(&mut self, peer: PeerId, hello: crate::protocol::Hello) {
        if hello.protocol != PROTOCOL_VERSION {
            warn!(
                peer,
                theirs = hello.protocol,
                ours = PROTOCOL_VERSION,
                "protocol version mismatch"
            );
            self.transport.disconnect(peer);
            return;
        }
        let display_name = hello
            .display_name
            .clone()
            .unwrap_or_else(|| format!("player-{}", hello.client_id % 10_000));
        let outcome = self.sessions.connect(
            peer,
            ClientId(hello.client_id),
            hello.mode,
            display_name.clone(),
            self.now_ms,
            self.config.dormancy_ms,
        );
        let client = outcome.client_id;

        self.flusher.submit(FlushCmd::Profile {
            key: hello.client_id.to_string(),
            bytes: serde_json::to_vec(&Profile { display_name }).unwrap_or_default(),
        });

        self.send_to_client(
            client,
            &ServerMessage::Welcome(Welcome { protocol: PROTOCOL_VERSION, resumed: outcome.resumed }),
        );

        if outcome.resumed {
            // Reclaimed dormant session: full resync of the realm it never
            // really left. No realm list.
            if let Some(world_id) = self.sessions.get(client).and_then(|s| s.state.realm()) {
                self.send_join_bundle(client, None, world_id);
            }
            return;
        }

        match hello.mode {
            ClientMode::Local => {
                let world_id = self.default_world_id;
                self.join_realm(client, 0, world_id);
            }
            ClientMode::Multiplayer => {
                let list = self.realm_list();
                self.send_to_client(client, &ServerMessage::RealmList(list));
            }
        }
    }

    fn handle_disconnect(&mut self, peer: PeerId) {
        if let Some(client) = self.sessions.disconnect_peer(peer, self.now_ms) {
            debug!(client = client.0, "peer disconnected");
            // Dormancy: the decrement is announced only at final removal.
        }
    }

    // -----------------------------------------------------------------
    // Realm lifecycle
    // -----------------------------------------------------------------

    fn load_realm(&mut self, world_id: u64) -> bool {
        if self.realms.contains_key(&world_id) {
            return true;
        }
        let Some(record) = self.registry.get_world(world_id) else {
            return false;
        };

        // The generator is the source of truth unless an overlay exists.
        let mut overlay = HashMap::new();
        match self.store.load_table(&self.store.chunks_path(world_id)) {
            Ok(table) => {
                for (key, bytes) in table.iter() {
                    match ChunkSnapshot::from_bytes(bytes) {
                        Ok(snapshot) => {
                            overlay.insert(snapshot.pos(), snapshot.into_chunk());
                        }
                        Err(e) => warn!(key, error = %e, "bad chunk record skipped"),
                    }
                }
            }
            Err(e) => warn!(world_id, error = %e, "chunk table unreadable, regenerating"),
        }

        info!(world_id, overlay = overlay.len(), "realm loaded");
        let realm = Realm::new(
            world_id,
            record.make_generator(),
            self.config.physics,
            overlay,
        );
        self.realms.insert(world_id, realm);
        self.hooks.insert(world_id, (self.hooks_factory)(world_id));
        true
    }

    fn unload_realm(&mut self, world_id: u64) {
        if let Some(mut realm) = self.realms.remove(&world_id) {
            flush_dirty_chunks(&mut realm, &self.flusher);
            info!(world_id, "realm unloaded");
        }
        self.hooks.remove(&world_id);
    }

    fn join_realm(&mut self, client: ClientId, request_id: u32, world_id: u64) {
        if !self.load_realm(world_id) {
            debug!(client = client.0, world_id, "join to unknown world dropped");
            return;
        }
        // Leaving the previous realm broadcasts its decrement.
        if self
            .sessions
            .get(client)
            .and_then(|s| s.state.realm())
            .is_some()
        {
            self.leave_realm(client, None);
        }

        let spawn = {
            let realm = self.realms.get_mut(&world_id).expect("realm just loaded");
            realm.find_spawn()
        };
        let entity_id = {
            let realm = self.realms.get_mut(&world_id).expect("realm just loaded");
            realm.spawn_entity(EntityKind::Player, spawn.x, spawn.y)
        };

        {
            let Some(session) = self.sessions.get_mut(client) else {
                return;
            };
            session.state = SessionState::Active { realm: world_id };
            session.entity_id = Some(entity_id);
            session.sync.reset();
        }

        self.registry.update_last_played(world_id, self.now_ms / 1000);
        self.persist_world_record(world_id);

        self.send_join_bundle(client, Some(request_id), world_id);
        self.broadcast_player_count(world_id);
    }

    /// Sends the join/reclaim message bundle: confirmation, entity
    /// assignment, and the initial world state with authoritative CVars.
    fn send_join_bundle(&mut self, client: ClientId, request_id: Option<u32>, world_id: u64) {
        let Some(session) = self.sessions.get(client) else {
            return;
        };
        let entity_id = session.entity_id;
        let scalars = session.session_scalars();
        let params = self
            .realms
            .get(&world_id)
            .map_or(self.config.physics, |r| r.params);
        let camera = entity_id
            .and_then(|id| {
                self.realms
                    .get(&world_id)
                    .and_then(|r| r.entities.get(id))
                    .map(|e| (e.wx, e.wy))
            })
            .unwrap_or((0.0, 0.0));

        if let Some(request_id) = request_id {
            self.send_to_client(
                client,
                &ServerMessage::RealmJoined(RealmJoined {
                    request_id,
                    world_id,
                    camera_x: camera.0,
                    camera_y: camera.1,
                    camera_zoom: 1.0,
                }),
            );
        }
        if let Some(entity_id) = entity_id {
            self.send_to_client(client, &ServerMessage::PlayerAssigned { entity_id: entity_id.0 });
        }
        self.send_to_client(
            client,
            &ServerMessage::WorldLoaded(WorldLoaded {
                world_id,
                cvars: params,
                camera_x: camera.0,
                camera_y: camera.1,
                camera_zoom: 1.0,
            }),
        );
        self.send_to_client(client, &ServerMessage::SyncSession(scalars));
        if let Some(session) = self.sessions.get_mut(client) {
            session.last_session_sync = Some(scalars);
        }
    }

    fn leave_realm(&mut self, client: ClientId, request_id: Option<u32>) {
        let Some(session) = self.sessions.get_mut(client) else {
            return;
        };
        let Some(world_id) = session.state.realm() else {
            return;
        };
        let entity_id = session.entity_id.take();
        session.state = SessionState::Lobby;
        session.mount_entity_id = None;
        session.sync.reset();

        if let (Some(realm), Some(entity_id)) = (self.realms.get_mut(&world_id), entity_id) {
            realm.despawn_entity(entity_id);
        }
        if let Some(request_id) = request_id {
            self.send_to_client(client, &ServerMessage::RealmLeft { request_id });
        }
        self.broadcast_player_count(world_id);
    }

    // -----------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------

    /// Steps every loaded realm one tick and runs the lifecycle sweeps.
    pub fn tick(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        let dt = 1.0 / self.config.tick_rate as f32;
        let tick_ms = (dt * 1000.0) as u64;

        let world_ids: Vec<u64> = self.realms.keys().copied().collect();
        for world_id in world_ids {
            self.tick_realm(world_id, dt);
        }

        // Dormant sweep: final removals announce the decrement.
        let swept = self.sessions.sweep_dormant(now_ms, self.config.dormancy_ms);
        for (client, world_id, entity) in swept {
            info!(client = client.0, world_id, "dormant session expired");
            if let (Some(realm), Some(entity)) = (self.realms.get_mut(&world_id), entity) {
                realm.despawn_entity(entity);
            }
            self.broadcast_player_count(world_id);
        }

        // Realm idle sweep: unload worlds nobody is bound to.
        let mut unload = Vec::new();
        for (&world_id, realm) in &mut self.realms {
            if self.sessions.bound_to_realm(world_id).is_empty() {
                realm.idle_ms = realm.idle_ms.saturating_add(tick_ms);
                if realm.idle_ms >= self.config.realm_idle_ms {
                    unload.push(world_id);
                }
            } else {
                realm.idle_ms = 0;
            }
        }
        for world_id in unload {
            self.unload_realm(world_id);
        }
    }

    fn tick_realm(&mut self, world_id: u64, dt: f32) {
        let clients = self.sessions.active_in_realm(world_id);

        // Pause is session-scoped debug state applied realm-wide.
        let paused = clients.iter().any(|c| {
            self.sessions
                .get(*c)
                .map_or(false, |s| s.debug.paused)
        });

        let Some(realm) = self.realms.get_mut(&world_id) else {
            return;
        };
        realm.paused = paused;

        // 1. Input drain, in strict sequence order, sub-tick dt honored.
        for &client in &clients {
            let Some(session) = self.sessions.get_mut(client) else {
                continue;
            };
            let Some(entity_id) = session.entity_id else {
                continue;
            };
            let inputs = session.mailbox.drain(session.last_processed_input_seq);
            if inputs.is_empty() {
                realm.idle_step_entity(entity_id, dt);
                continue;
            }
            for input in inputs {
                let intent = MoveIntent {
                    dx: input.dx,
                    dy: input.dy,
                    sprinting: input.sprinting,
                    jump: input.jump,
                    jump_pressed: input.jump_pressed.unwrap_or(false),
                };
                let step_dt = input
                    .dt_ms
                    .map_or(dt, |ms| (f32::from(ms) / 1000.0).clamp(0.001, 0.1));
                realm.step_entity(entity_id, &intent, step_dt);
                session.last_processed_input_seq = input.seq;
            }
        }

        // 2-6. Hooks and world phases.
        let mut hooks = self.hooks.remove(&world_id).unwrap_or_else(|| Box::new(NoHooks));
        hooks.pre_simulation(realm);
        realm.step_world(dt);
        if !realm.paused {
            hooks.ai(realm, dt);
            hooks.gameplay(realm, dt);
        }

        // Gameplay events become session messages.
        let events = realm.drain_events();
        for event in &events {
            self.apply_realm_event(world_id, event);
        }

        // 8. Broadcast.
        let Some(realm) = self.realms.get_mut(&world_id) else {
            return;
        };
        for &client in &clients {
            let Some(session) = self.sessions.get_mut(client) else {
                continue;
            };
            if session.peer.is_none() {
                continue;
            }

            if let Some(sync) = broadcast::build_sync_chunks(realm, session) {
                let message = ServerMessage::SyncChunks(sync);
                send_via(self.transport.as_mut(), session, &message);
            }
            let frame = broadcast::build_frame(realm, session);
            let message = ServerMessage::Frame(frame);
            send_via(self.transport.as_mut(), session, &message);

            let scalars = session.session_scalars();
            if session.last_session_sync != Some(scalars) {
                session.last_session_sync = Some(scalars);
                let message = ServerMessage::SyncSession(scalars);
                send_via(self.transport.as_mut(), session, &message);
            }
        }

        // 9. Post hooks, then autosave bookkeeping.
        hooks.post_simulation(realm);
        self.hooks.insert(world_id, hooks);

        let autosave_due =
            self.config.autosave_ticks > 0 && realm.tick % self.config.autosave_ticks == 0;
        if autosave_due {
            flush_dirty_chunks(realm, &self.flusher);
            let visible: Vec<(i32, i32, i32, i32)> = clients
                .iter()
                .filter_map(|c| self.sessions.get(*c))
                .map(|s| {
                    let r = s.visible_range;
                    (r.min_cx, r.min_cy, r.max_cx, r.max_cy)
                })
                .collect();
            let evicted = realm.evict_unused(&visible);
            if evicted > 0 {
                trace!(world_id, count = evicted, "chunks evicted");
            }
        }
    }

    fn apply_realm_event(&mut self, world_id: u64, event: &RealmEvent) {
        match *event {
            RealmEvent::GemCollected { player } => {
                if let Some(client) = self.client_controlling(world_id, player) {
                    if let Some(session) = self.sessions.get_mut(client) {
                        session.gems_collected += 1;
                    }
                }
            }
            RealmEvent::Invincibility { player, duration_ticks } => {
                let start_tick = self.realms.get(&world_id).map_or(0, |r| r.tick);
                if let Some(client) = self.client_controlling(world_id, player) {
                    self.send_to_client(
                        client,
                        &ServerMessage::SyncInvincibility(SyncInvincibility {
                            start_tick,
                            duration_ticks,
                        }),
                    );
                }
            }
            RealmEvent::Mounted { player, mount } => {
                if let Some(client) = self.client_controlling(world_id, player) {
                    if let Some(session) = self.sessions.get_mut(client) {
                        session.mount_entity_id = mount;
                    }
                }
            }
        }
    }

    fn client_controlling(&self, world_id: u64, entity: EntityId) -> Option<ClientId> {
        self.sessions
            .iter()
            .find(|s| s.state.realm() == Some(world_id) && s.entity_id == Some(entity))
            .map(|s| s.client_id)
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    fn realm_list(&self) -> Vec<RealmListEntry> {
        self.registry
            .list_worlds()
            .into_iter()
            .map(|record| RealmListEntry {
                id: record.id,
                name: record.name.clone(),
                player_count: self.sessions.bound_to_realm(record.id).len() as u32,
            })
            .collect()
    }

    /// Announces a realm's player count to every connected session -
    /// lobby sessions keep their realm list fresh, realm-bound sessions
    /// see their neighbors come and go.
    fn broadcast_player_count(&mut self, world_id: u64) {
        let count = self.sessions.bound_to_realm(world_id).len() as u32;
        let message = ServerMessage::RealmPlayerCount { world_id, count };
        let connected: Vec<ClientId> = self
            .sessions
            .iter()
            .filter(|s| s.peer.is_some())
            .map(|s| s.client_id)
            .collect();
        for client in connected {
            self.send_to_client(client, &message);
        }
    }

    fn send_to_client(&mut self, client: ClientId, message: &ServerMessage) {
        if let Some(session) = self.sessions.get(client) {
            send_via(self.transport.as_mut(), session, message);
        }
    }

    fn persist_world_record(&self, world_id: u64) {
        if let Some(record) = self.registry.get_world(world_id) {
            self.flusher.submit(FlushCmd::World {
                key: world_id.to_string(),
                bytes: serde_json::to_vec(record).unwrap_or_default(),
            });
        }
    }

    /// Blocking serve loop: pump, tick at the fixed rate, sleep. Returns
    /// when `shutdown` flips.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        let epoch = Instant::now();
        let mut ticks = TickLoop::new(self.config.tick_rate);
        info!(tick_rate = self.config.tick_rate, "server loop started");
        while !shutdown.load(Ordering::Relaxed) {
            let now_ms = epoch.elapsed().as_millis() as u64;
            self.pump(now_ms);
            while ticks.should_tick() {
                let start = ticks.begin_tick();
                let now_ms = epoch.elapsed().as_millis() as u64;
                self.tick(now_ms);
                ticks.end_tick(start);
            }
            ticks.wait_for_next_tick();
        }
        info!("server loop stopped");
    }

    /// Flushes everything and joins the persistence worker.
    pub fn shutdown(mut self) {
        for realm in self.realms.values_mut() {
            flush_dirty_chunks(realm, &self.flusher);
        }
        self.flusher.shutdown();
    }
}

/// Hands every dirty chunk to the flusher and clears the dirty bits.
fn flush_dirty_chunks(realm: &mut Realm, flusher: &Flusher) {
    let world_id = realm.world_id;
    for pos in realm.store.dirty_positions() {
        let Some(chunk) = realm.store.get_mut(pos) else {
            continue;
        };
        chunk.dirty = false;
        let snapshot = ChunkSnapshot::capture(pos, chunk);
        flusher.submit(FlushCmd::Chunk {
            world_id,
            key: pos.key(),
            bytes: snapshot.to_bytes(),
        });
    }
}

/// Sends one message to a session's live peer on the message's channel.
fn send_via(transport: &mut dyn Transport, session: &session::Session, message: &ServerMessage) {
    let Some(peer) = session.peer else {
        return;
    };
    if let Err(e) = transport.send(peer, message.channel(), &message.encode()) {
        debug!(peer, error = %e, "send failed");
    }
}

/// Clamps a client-advertised range to the accepted span.
fn clamp_range(range: VisibleRange) -> VisibleRange {
    let mut out = range;
    if out.max_cx < out.min_cx {
        std::mem::swap(&mut out.max_cx, &mut out.min_cx);
    }
    if out.max_cy < out.min_cy {
        std::mem::swap(&mut out.max_cy, &mut out.min_cy);
    }
    out.max_cx = out.max_cx.min(out.min_cx + MAX_VISIBLE_SPAN - 1);
    out.max_cy = out.max_cy.min(out.min_cy + MAX_VISIBLE_SPAN - 1);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_range() {
        let range = clamp_range(VisibleRange { min_cx: 0, min_cy: 0, max_cx: 100, max_cy: 3 });
        assert_eq!(range.max_cx, MAX_VISIBLE_SPAN - 1);
        assert_eq!(range.max_cy, 3);

        let flipped = clamp_range(VisibleRange { min_cx: 5, min_cy: 5, max_cx: 2, max_cy: 2 });
        assert!(flipped.min_cx <= flipped.max_cx);
    }
}
