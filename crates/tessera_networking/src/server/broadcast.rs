//! The delta encoder / broadcast phase (per session).
//!
//! Against each session's interest set, every tick computes three sets:
//! exits (known but no longer visible), baselines (newly visible), and
//! deltas (still visible, fields changed). Chunk snapshots go out when a
//! visible chunk's revision passes the session's last-sent revision.

use tessera_core::entity::EntityId;
use tessera_procedural::chunk::ChunkPos;

use crate::protocol::chunks::ChunkSnapshot;
use crate::protocol::delta::WireState;
use crate::protocol::{Frame, SyncChunks};
use crate::CHUNK_KEYS_INTERVAL;

use super::realm::Realm;
use super::session::Session;

/// Builds the per-tick entity frame for one session.
///
/// The encoder never fails on one entity; an entity it cannot serialize
/// is simply left out of this frame (there is no fallible path in the
/// capture today, but the structure keeps it that way).
pub fn build_frame(realm: &Realm, session: &mut Session) -> Frame {
    let range = session.visible_range;
    let visible: Vec<EntityId> =
        realm
            .spatial
            .query_range(range.min_cx, range.min_cy, range.max_cx, range.max_cy);

    let mut frame = Frame {
        server_tick: realm.tick as u32,
        last_processed_input_seq: session.last_processed_input_seq,
        player_entity_id: session.entity_id.map_or(u32::MAX, |e| e.0),
        ..Frame::default()
    };

    // Exits: tracked entities that left the interest set (or the world).
    let gone: Vec<EntityId> = session
        .sync
        .sent
        .keys()
        .filter(|id| !visible.contains(id) || realm.entities.get(**id).is_none())
        .copied()
        .collect();
    for id in gone {
        session.sync.sent.remove(&id);
        frame.exits.push(id.0);
    }

    // Baselines and deltas.
    for id in visible {
        let Some(entity) = realm.entities.get(id) else {
            continue;
        };
        let current = WireState::capture(entity);
        match session.sync.sent.get(&id) {
            None => {
                frame
                    .baselines
                    .push(current.baseline(id.0, entity.kind.type_index()));
                session.sync.sent.insert(id, current);
            }
            Some(previous) => {
                if let Some(delta) = previous.diff(&current, id.0) {
                    frame.deltas.push(delta);
                    session.sync.sent.insert(id, current);
                }
            }
        }
    }
    frame
}

/// True if the frame carries nothing worth sending.
#[must_use]
pub fn frame_is_empty(frame: &Frame) -> bool {
    frame.baselines.is_empty() && frame.deltas.is_empty() && frame.exits.is_empty()
}

/// Builds the chunk sync for one session: revision-gated snapshots plus a
/// periodic `loadedChunkKeys` refresh (the client evicts against it).
pub fn build_sync_chunks(realm: &mut Realm, session: &mut Session) -> Option<SyncChunks> {
    let range = session.visible_range;
    realm.ensure_visible(&range);

    let mut sync = SyncChunks::default();
    for cy in range.min_cy..=range.max_cy {
        for cx in range.min_cx..=range.max_cx {
            let pos = ChunkPos::new(cx, cy);
            let Some(chunk) = realm.store.get(pos) else {
                continue;
            };
            let sent = session.sync.sent_chunk_revisions.get(&pos).copied();
            if sent.is_none_or_lower(chunk.revision) {
                sync.chunk_updates.push(ChunkSnapshot::capture(pos, chunk));
                session.sync.sent_chunk_revisions.insert(pos, chunk.revision);
            }
        }
    }

    let keys_due = session
        .sync
        .last_keys_tick
        .map_or(true, |t| realm.tick.saturating_sub(t) >= CHUNK_KEYS_INTERVAL);
    if keys_due {
        session.sync.last_keys_tick = Some(realm.tick);
        let keys: Vec<(i32, i32)> = (range.min_cy..=range.max_cy)
            .flat_map(|cy| (range.min_cx..=range.max_cx).map(move |cx| (cx, cy)))
            .collect();
        sync.loaded_chunk_keys = Some(keys);
    }

    if sync.chunk_updates.is_empty() && sync.loaded_chunk_keys.is_none() {
        None
    } else {
        Some(sync)
    }
}

/// `Option<u32>` comparison helper: absent or behind the revision.
trait RevisionGate {
    fn is_none_or_lower(&self, revision: u32) -> bool;
}

impl RevisionGate for Option<u32> {
    fn is_none_or_lower(&self, revision: u32) -> bool {
        self.map_or(true, |sent| revision > sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tessera_core::entity::EntityKind;
    use tessera_core::tile::Terrain;
    use tessera_core::{MoveIntent, PhysicsParams};
    use tessera_procedural::generator::FlatGenerator;

    use crate::protocol::{ClientMode, VisibleRange};
    use crate::server::session::{ClientId, SessionManager};

    fn realm() -> Realm {
        Realm::new(
            1,
            Box::new(FlatGenerator::default()),
            PhysicsParams::default(),
            HashMap::new(),
        )
    }

    fn session(manager: &mut SessionManager) -> &mut crate::server::session::Session {
        let outcome = manager.connect(1, ClientId(1), ClientMode::Multiplayer, "p".into(), 0, 1000);
        let session = manager.get_mut(outcome.client_id).unwrap();
        session.visible_range = VisibleRange { min_cx: -1, min_cy: -1, max_cx: 1, max_cy: 1 };
        session
    }

    #[test]
    fn test_baseline_then_delta_then_exit() {
        let mut realm = realm();
        let mut manager = SessionManager::new();
        let session = session(&mut manager);

        let id = realm.spawn_entity(EntityKind::Hostile, 10.0, 10.0);

        // First sight: baseline.
        let frame = build_frame(&realm, session);
        assert_eq!(frame.baselines.len(), 1);
        assert_eq!(frame.baselines[0].id, id.0);
        assert!(frame.deltas.is_empty());

        // Unchanged: nothing.
        let frame = build_frame(&realm, session);
        assert!(frame_is_empty(&frame));

        // Moved: delta.
        realm.step_entity(id, &MoveIntent { dx: 1.0, ..MoveIntent::default() }, 1.0 / 30.0);
        let frame = build_frame(&realm, session);
        assert!(frame.baselines.is_empty());
        assert_eq!(frame.deltas.len(), 1);

        // Left the interest set: exit exactly once.
        let e = realm.entities.get_mut(id).unwrap();
        e.wx = 10_000.0;
        let bounds = e.bounds();
        realm.spatial.relocate(id, &bounds);
        let frame = build_frame(&realm, session);
        assert_eq!(frame.exits, vec![id.0]);
        let frame = build_frame(&realm, session);
        assert!(frame.exits.is_empty(), "exit emitted exactly once");
    }

    #[test]
    fn test_despawned_entity_exits() {
        let mut realm = realm();
        let mut manager = SessionManager::new();
        let session = session(&mut manager);

        let id = realm.spawn_entity(EntityKind::Gem, 10.0, 10.0);
        let _ = build_frame(&realm, session);
        realm.despawn_entity(id);
        let frame = build_frame(&realm, session);
        assert_eq!(frame.exits, vec![id.0]);
    }

    #[test]
    fn test_chunk_snapshot_gated_by_revision() {
        let mut realm = realm();
        let mut manager = SessionManager::new();
        let session = session(&mut manager);
        session.visible_range = VisibleRange { min_cx: 0, min_cy: 0, max_cx: 0, max_cy: 0 };

        // First pass sends the chunk and the key list.
        let sync = build_sync_chunks(&mut realm, session).unwrap();
        assert_eq!(sync.chunk_updates.len(), 1);
        assert!(sync.loaded_chunk_keys.is_some());

        // No edit: nothing to send.
        assert!(build_sync_chunks(&mut realm, session).is_none());

        // Edit bumps the revision: resent.
        realm
            .store
            .set_terrain_tile(3, 3, Terrain::Stone, realm.generator.as_ref());
        let sync = build_sync_chunks(&mut realm, session).unwrap();
        assert_eq!(sync.chunk_updates.len(), 1);
        assert_eq!(sync.chunk_updates[0].revision, 2);
    }

    #[test]
    fn test_out_of_range_chunk_not_sent() {
        let mut realm = realm();
        let mut manager = SessionManager::new();
        let session = session(&mut manager);
        session.visible_range = VisibleRange { min_cx: 0, min_cy: 0, max_cx: 0, max_cy: 0 };
        let _ = build_sync_chunks(&mut realm, session);

        // An edit far outside the window changes nothing for us.
        realm
            .store
            .set_terrain_tile(160, 160, Terrain::Stone, realm.generator.as_ref());
        assert!(build_sync_chunks(&mut realm, session).is_none());
    }
}
