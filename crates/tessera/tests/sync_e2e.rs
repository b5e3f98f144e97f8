//! End-to-end synchronization tests over the loopback transport.
//!
//! One in-process server, real protocol bytes, real clients with
//! prediction. Each test drives the pump/tick/update cycle by hand so
//! input arrival relative to the tick boundary is fully controlled.

use tessera::GameplayHooks;
use tessera_core::MoveIntent;
use tessera_networking::client::GameClient;
use tessera_networking::protocol::{ClientMessage, ClientMode, DebugFlags, EditOp, VisibleRange};
use tessera_networking::server::registry::WorldType;
use tessera_networking::server::{GameServer, ServerConfig};
use tessera_networking::transport::loopback::{loopback, LoopbackClient, LoopbackConnector};

const DT: f32 = 1.0 / 30.0;
const STEP_MS: u64 = 34;

/// A 5x5 chunk window centered on a camera position.
fn range_around(camera: (f32, f32, f32)) -> VisibleRange {
    let cx = tessera_core::chunk_of_world(camera.0);
    let cy = tessera_core::chunk_of_world(camera.1);
    VisibleRange { min_cx: cx - 2, min_cy: cy - 2, max_cx: cx + 2, max_cy: cy + 2 }
}

struct Harness {
    server: GameServer,
    connector: LoopbackConnector,
    now_ms: u64,
    _data_dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let data_dir = tempfile::tempdir().expect("tempdir");
        let (hub, connector) = loopback();
        let config = ServerConfig {
            data_dir: data_dir.path().to_owned(),
            dormancy_ms: 2_000,
            realm_idle_ms: 600_000,
            ..ServerConfig::default()
        };
        let server =
            GameServer::with_hooks(config, Box::new(hub), GameplayHooks::factory());
        Self { server, connector, now_ms: 0, _data_dir: data_dir }
    }

    fn client(&self, client_id: u64) -> GameClient<LoopbackClient> {
        GameClient::connect(
            self.connector.connect(),
            client_id,
            ClientMode::Multiplayer,
            None,
        )
    }

    /// One full cycle: server pump + tick, then client updates.
    fn step(&mut self, clients: &mut [&mut GameClient<LoopbackClient>]) {
        self.server.pump(self.now_ms);
        self.server.tick(self.now_ms);
        for client in clients.iter_mut() {
            client.update(self.now_ms);
        }
        self.now_ms += STEP_MS;
    }

    /// Pump without ticking: lets control messages land between ticks.
    fn pump_only(&mut self, clients: &mut [&mut GameClient<LoopbackClient>]) {
        self.server.pump(self.now_ms);
        for client in clients.iter_mut() {
            client.update(self.now_ms);
        }
    }

    fn steps(&mut self, clients: &mut [&mut GameClient<LoopbackClient>], n: usize) {
        for _ in 0..n {
            self.step(clients);
        }
    }

    /// Joins a world and waits until the client holds its player
    /// baseline and the surrounding chunks. The visible range follows
    /// the server-provided camera, the way a real client streams.
    fn join(&mut self, client: &mut GameClient<LoopbackClient>, world_id: u64) {
        // Hello exchange.
        self.steps(&mut [&mut *client], 2);
        client.send(&ClientMessage::JoinRealm { request_id: 1, world_id });
        self.settle(client);
    }

    /// Waits for the world bundle, advertises a camera-centered range,
    /// and then waits for the player baseline and chunks.
    fn settle(&mut self, client: &mut GameClient<LoopbackClient>) {
        let mut range_sent = false;
        for _ in 0..20 {
            self.step(&mut [&mut *client]);
            if !range_sent && client.world.current_world.is_some() {
                client.send_visible_range(range_around(client.world.camera));
                range_sent = true;
            }
            if range_sent
                && client.world.player_entity().is_some()
                && !client.world.chunks.is_empty()
            {
                return;
            }
        }
        panic!("join did not settle");
    }

    fn server_player_pos(&self, client_id: u64) -> (f32, f32) {
        // Panics on missing pieces by design: tests call it only after a
        // successful join.
        let session = self.server.session(client_id).expect("session");
        let world = session.state.realm().expect("in a realm");
        let entity_id = session.entity_id.expect("entity");
        let entity = self
            .server
            .realm(world)
            .expect("realm loaded")
            .entities
            .get(entity_id)
            .expect("entity live");
        (entity.wx, entity.wy)
    }
}

#[test]
fn test_s1_single_input_advances_and_acks() {
    let mut harness = Harness::new();
    let mut client = harness.client(1);
    let world = harness.server.default_world_id();
    harness.join(&mut client, world);

    let (spawn_x, _) = harness.server_player_pos(1);

    // One input enqueued before the next server tick.
    client.send_input(MoveIntent { dx: 1.0, ..MoveIntent::default() }, DT);
    harness.step(&mut [&mut client]);

    let (server_x, _) = harness.server_player_pos(1);
    assert!(server_x > spawn_x, "input moved the authoritative entity east");

    let session = harness.server.session(1).unwrap();
    assert_eq!(session.last_processed_input_seq, 1);

    // The frame acked the input and the predictor converged onto the
    // server's result.
    assert_eq!(client.world.last_processed_input_seq, 1);
    let predicted = client.render_position().unwrap();
    assert!(
        (predicted.0 - server_x).abs() < 1e-3,
        "prediction {} vs server {server_x}",
        predicted.0
    );
}

#[test]
fn test_s2_two_inputs_one_tick_outruns_one_input() {
    // Run A: one input before the tick.
    let mut harness_a = Harness::new();
    let mut client_a = harness_a.client(1);
    let world = harness_a.server.default_world_id();
    harness_a.join(&mut client_a, world);
    let (spawn_a, _) = harness_a.server_player_pos(1);
    client_a.send_input(MoveIntent { dx: 1.0, ..MoveIntent::default() }, DT);
    harness_a.step(&mut [&mut client_a]);
    let (one_input_x, _) = harness_a.server_player_pos(1);

    // Run B: same seed, two inputs enqueued before the same tick.
    let mut harness_b = Harness::new();
    let mut client_b = harness_b.client(1);
    harness_b.join(&mut client_b, world);
    let (spawn_b, _) = harness_b.server_player_pos(1);
    assert_eq!(spawn_a, spawn_b, "same seed, same spawn");
    client_b.send_input(MoveIntent { dx: 1.0, ..MoveIntent::default() }, DT);
    client_b.send_input(MoveIntent { dx: 1.0, ..MoveIntent::default() }, DT);
    harness_b.step(&mut [&mut client_b]);
    let (two_input_x, _) = harness_b.server_player_pos(1);

    assert!(two_input_x > one_input_x, "{two_input_x} vs {one_input_x}");
    assert_eq!(harness_b.server.session(1).unwrap().last_processed_input_seq, 2);
}

#[test]
fn test_property1_input_queue_equivalence_under_noclip() {
    let inputs = [
        MoveIntent { dx: 1.0, ..MoveIntent::default() },
        MoveIntent { dx: 1.0, dy: -0.5, ..MoveIntent::default() },
        MoveIntent { dx: 0.5, dy: 1.0, ..MoveIntent::default() },
        MoveIntent { dx: -0.25, dy: 0.25, ..MoveIntent::default() },
    ];

    // Run A: k inputs spread over k ticks.
    let mut harness_a = Harness::new();
    let mut client_a = harness_a.client(1);
    let world = harness_a.server.default_world_id();
    harness_a.join(&mut client_a, world);
    client_a.send(&ClientMessage::SetDebug(DebugFlags { paused: false, noclip: true }));
    harness_a.step(&mut [&mut client_a]);
    for intent in inputs {
        client_a.send_input(intent, DT);
        harness_a.step(&mut [&mut client_a]);
    }
    // Extra empty ticks must not move a noclip entity.
    harness_a.steps(&mut [&mut client_a], 3);
    let final_a = harness_a.server_player_pos(1);

    // Run B: the same k inputs all enqueued before a single tick.
    let mut harness_b = Harness::new();
    let mut client_b = harness_b.client(1);
    harness_b.join(&mut client_b, world);
    client_b.send(&ClientMessage::SetDebug(DebugFlags { paused: false, noclip: true }));
    harness_b.step(&mut [&mut client_b]);
    for intent in inputs {
        client_b.send_input(intent, DT);
    }
    harness_b.step(&mut [&mut client_b]);
    harness_b.steps(&mut [&mut client_b], 6);
    let final_b = harness_b.server_player_pos(1);

    assert_eq!(final_a, final_b, "jitter pattern must not change the result");
}

#[test]
fn test_property2_prediction_converges_under_jitter() {
    let mut harness = Harness::new();
    let mut client = harness.client(1);
    let world = harness.server.default_world_id();
    harness.join(&mut client, world);

    // Jittered pattern: bursts of inputs, idle ticks in between.
    let pattern: &[usize] = &[3, 0, 2, 1, 0, 4, 1];
    for &burst in pattern {
        for _ in 0..burst {
            client.send_input(MoveIntent { dx: 1.0, dy: 0.25, ..MoveIntent::default() }, DT);
        }
        harness.step(&mut [&mut client]);
    }
    // Let the last ack round-trip, then compare.
    harness.steps(&mut [&mut client], 2);

    assert_eq!(client.predictor.pending_inputs(), 0, "all inputs acked");
    let (server_x, server_y) = harness.server_player_pos(1);
    let predicted = client.render_position().unwrap();
    assert!(
        (predicted.0 - server_x).abs() < 1e-3 && (predicted.1 - server_y).abs() < 1e-3,
        "predicted ({}, {}) vs server ({server_x}, {server_y})",
        predicted.0,
        predicted.1
    );
}

#[test]
fn test_s5_single_player_count_decrement_on_leave() {
    let mut harness = Harness::new();
    let mut client_a = harness.client(1);
    let mut client_b = harness.client(2);
    let world = harness.server.default_world_id();

    harness.join(&mut client_a, world);
    harness.join(&mut client_b, world);
    assert_eq!(
        harness.server.session(1).unwrap().state.realm(),
        Some(world)
    );

    // Reset B's event log, then A leaves.
    client_b.world.player_count_events.clear();
    client_a.send(&ClientMessage::LeaveRealm { request_id: 9 });
    harness.steps(&mut [&mut client_a, &mut client_b], 3);

    let decrements: Vec<&(u64, u32)> = client_b
        .world
        .player_count_events
        .iter()
        .filter(|(w, _)| *w == world)
        .collect();
    assert_eq!(decrements.len(), 1, "exactly one count broadcast");
    assert_eq!(*decrements[0], (world, 1));
}

#[test]
fn test_s6_chunk_edit_reaches_only_interested_session() {
    let mut harness = Harness::new();
    let mut editor = harness.client(1);
    let mut bystander = harness.client(2);
    let world = harness.server.default_world_id();

    harness.join(&mut editor, world);
    harness.join(&mut bystander, world);

    // Editor watches the chunk at (3, -2); the bystander looks far away.
    editor.send_visible_range(VisibleRange { min_cx: 2, min_cy: -3, max_cx: 4, max_cy: 0 });
    bystander.send_visible_range(VisibleRange {
        min_cx: 20,
        min_cy: 20,
        max_cx: 22,
        max_cy: 22,
    });
    editor.send(&ClientMessage::SetEditorMode { enabled: true });
    harness.steps(&mut [&mut editor, &mut bystander], 3);

    let target = tessera_procedural::chunk::ChunkPos::new(3, -2);
    let before = editor.world.chunks.get(&target).expect("chunk streamed").revision;

    // Edit a tile inside chunk (3, -2): tiles 48..63 x -32..-17.
    editor.send(&ClientMessage::Edit(EditOp::TerrainTile {
        tx: 3 * 16 + 4,
        ty: -2 * 16 + 4,
        terrain: tessera_core::Terrain::Stone as u8,
    }));
    harness.pump_only(&mut [&mut editor, &mut bystander]);
    harness.step(&mut [&mut editor, &mut bystander]);

    let chunk = editor.world.chunks.get(&target).expect("still streamed");
    assert!(chunk.revision > before, "revision advanced with the edit");
    let idx = tessera_procedural::chunk::Chunk::tile_index(4, 4);
    assert_eq!(chunk.terrain[idx], tessera_core::Terrain::Stone as u8);
    assert!(
        !bystander.world.chunks.contains_key(&target),
        "uninterested session never receives the chunk"
    );
}

#[test]
fn test_property8_realm_isolation() {
    let mut harness = Harness::new();
    let world_a = harness.server.default_world_id();
    let world_b = harness.server.create_world("second", WorldType::Flat, 7);

    let mut client_a = harness.client(1);
    let mut client_b = harness.client(2);
    harness.join(&mut client_a, world_a);
    harness.join(&mut client_b, world_b);
    harness.steps(&mut [&mut client_a, &mut client_b], 5);

    let a_entity = harness.server.session(1).unwrap().entity_id.unwrap().0;
    let b_entity = harness.server.session(2).unwrap().entity_id.unwrap().0;

    // Ids are realm-unique, not global, so membership is checked by set:
    // each client's interest set holds exactly its own player and nothing
    // from the other realm.
    let a_ids: Vec<u32> = client_a.world.entities.keys().copied().collect();
    let b_ids: Vec<u32> = client_b.world.entities.keys().copied().collect();
    assert_eq!(a_ids, vec![a_entity], "A sees only its own realm");
    assert_eq!(b_ids, vec![b_entity], "B sees only its own realm");
    // And the worlds themselves differ: B's flat world is all grass at
    // height zero, which the default natural world is not.
    assert!(client_b
        .world
        .chunks
        .values()
        .all(|c| c.height_grid.iter().all(|&h| h == 0)));
}

#[test]
fn test_dormant_session_reclaim_keeps_entity() {
    let mut harness = Harness::new();
    let mut client = harness.client(1);
    let world = harness.server.default_world_id();
    harness.join(&mut client, world);
    let entity_before = harness.server.session(1).unwrap().entity_id;

    // Drop the transport; the session goes dormant, the entity stays.
    drop(client);
    harness.server.pump(harness.now_ms);
    harness.server.tick(harness.now_ms);
    let session = harness.server.session(1).expect("session retained");
    assert!(session.peer.is_none(), "dormant sessions have no peer");
    assert_eq!(session.entity_id, entity_before, "entity retained");

    // Reconnect within the grace window: same entity, no fresh spawn.
    harness.now_ms += 500;
    let mut revenant = harness.client(1);
    harness.settle(&mut revenant);
    let session = harness.server.session(1).unwrap();
    assert_eq!(session.state.realm(), Some(world));
    assert_eq!(session.entity_id, entity_before);
    assert!(revenant.world.player_entity().is_some(), "full resync arrived");
}

#[test]
fn test_dormant_expiry_removes_entity_and_announces() {
    let mut harness = Harness::new();
    let mut client = harness.client(1);
    let mut watcher = harness.client(2);
    let world = harness.server.default_world_id();
    harness.join(&mut client, world);
    harness.join(&mut watcher, world);
    let entity = harness.server.session(1).unwrap().entity_id.unwrap();

    watcher.world.player_count_events.clear();
    drop(client);

    // March time past the dormancy grace window.
    for _ in 0..80 {
        harness.step(&mut [&mut watcher]);
    }
    assert!(harness.server.session(1).is_none(), "session swept");
    assert!(
        harness
            .server
            .realm(world)
            .is_none_or_no_entity(entity),
        "entity despawned with the session"
    );
    let decrements: Vec<_> = watcher
        .world
        .player_count_events
        .iter()
        .filter(|(w, c)| *w == world && *c == 1)
        .collect();
    assert_eq!(decrements.len(), 1, "decrement announced exactly once");
}

/// Test-side helper: realm gone, or entity gone from it.
trait RealmProbe {
    fn is_none_or_no_entity(&self, entity: tessera_core::EntityId) -> bool;
}

impl RealmProbe for Option<&tessera_networking::server::realm::Realm> {
    fn is_none_or_no_entity(&self, entity: tessera_core::EntityId) -> bool {
        self.map_or(true, |realm| realm.entities.get(entity).is_none())
    }
}
