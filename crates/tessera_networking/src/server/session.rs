//! Sessions: one per connected client, keyed by stable client id.
//!
//! State machine: `lobby → active ⇄ dormant → gone`. A dormant session
//! keeps its entity for the dormancy grace window so reconnects are
//! seamless; the reclaim rule is "same client id, still within grace".

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::{debug, warn};

use tessera_core::entity::EntityId;
use tessera_procedural::chunk::ChunkPos;

use crate::protocol::delta::WireState;
use crate::protocol::{ClientMode, DebugFlags, PlayerInputMsg, SyncSession, VisibleRange};
use crate::transport::PeerId;
use crate::INPUT_QUEUE_LIMIT;

/// Stable client identity presented in the hello.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

/// Where a session stands in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no realm; receives realm-registry broadcasts only.
    Lobby,
    /// Bound to a realm with a live transport peer.
    Active {
        /// The bound realm.
        realm: u64,
    },
    /// Transport gone; entity retained until the grace window closes.
    Dormant {
        /// The realm the entity still lives in.
        realm: u64,
        /// When the session went dormant.
        since_ms: u64,
    },
}

impl SessionState {
    /// The realm this session is bound to, if any.
    #[must_use]
    pub const fn realm(&self) -> Option<u64> {
        match self {
            Self::Lobby => None,
            Self::Active { realm } | Self::Dormant { realm, .. } => Some(*realm),
        }
    }
}

/// Thread-safe bounded input queue. Transports push from network workers;
/// the realm tick drains. Overflow discards the oldest unprocessed input.
#[derive(Default)]
pub struct InputMailbox {
    queue: Mutex<VecDeque<PlayerInputMsg>>,
}

impl InputMailbox {
    /// Enqueues an input, evicting the oldest on overflow.
    pub fn push(&self, input: PlayerInputMsg) {
        let mut queue = self.queue.lock();
        if queue.len() >= INPUT_QUEUE_LIMIT {
            let dropped = queue.pop_front();
            warn!(seq = dropped.map(|i| i.seq), "input queue overflow, oldest discarded");
        }
        queue.push_back(input);
    }

    /// Drains every input newer than `last_processed`, ascending by
    /// sequence. Duplicates and stale sequences are silently discarded.
    pub fn drain(&self, last_processed: u32) -> Vec<PlayerInputMsg> {
        let mut inputs: Vec<PlayerInputMsg> = self
            .queue
            .lock()
            .drain(..)
            .filter(|i| i.seq > last_processed)
            .collect();
        inputs.sort_by_key(|i| i.seq);
        inputs.dedup_by_key(|i| i.seq);
        inputs
    }

    /// Number of queued inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True if no inputs are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// Per-session sync bookkeeping for the delta encoder.
#[derive(Default)]
pub struct SyncBookkeeping {
    /// Entities the client holds an up-to-date baseline for, with the
    /// last values put on the wire.
    pub sent: HashMap<EntityId, WireState>,
    /// Last chunk revision sent per chunk.
    pub sent_chunk_revisions: HashMap<ChunkPos, u32>,
    /// Tick of the last `loadedChunkKeys` refresh.
    pub last_keys_tick: Option<u64>,
}

impl SyncBookkeeping {
    /// Forgets everything; the next frame resends full baselines.
    pub fn reset(&mut self) {
        self.sent.clear();
        self.sent_chunk_revisions.clear();
        self.last_keys_tick = None;
    }
}

/// Server-side record of one connected (or dormant) client.
pub struct Session {
    /// Stable identity.
    pub client_id: ClientId,
    /// Live transport peer, absent while dormant.
    pub peer: Option<PeerId>,
    /// Lifecycle state.
    pub state: SessionState,
    /// Declared mode.
    pub mode: ClientMode,
    /// Controlled entity, absent in the lobby.
    pub entity_id: Option<EntityId>,
    /// Highest processed input sequence.
    pub last_processed_input_seq: u32,
    /// Advertised chunk window.
    pub visible_range: VisibleRange,
    /// Pending inputs.
    pub mailbox: InputMailbox,
    /// Editor rights granted.
    pub editor_enabled: bool,
    /// Debug flags.
    pub debug: DebugFlags,
    /// Gems collected (gameplay scalar).
    pub gems_collected: u32,
    /// Mount the player is riding.
    pub mount_entity_id: Option<EntityId>,
    /// Delta-encoder bookkeeping.
    pub sync: SyncBookkeeping,
    /// Last `sync-session` scalars put on the wire.
    pub last_session_sync: Option<SyncSession>,
    /// Protocol violations observed; repeat offenders are dropped.
    pub violations: u32,
    /// Profile display name.
    pub display_name: String,
}

impl Session {
    fn new(client_id: ClientId, peer: PeerId, mode: ClientMode, display_name: String) -> Self {
        Self {
            client_id,
            peer: Some(peer),
            state: SessionState::Lobby,
            mode,
            entity_id: None,
            last_processed_input_seq: 0,
            visible_range: VisibleRange::default(),
            mailbox: InputMailbox::default(),
            editor_enabled: false,
            debug: DebugFlags::default(),
            gems_collected: 0,
            mount_entity_id: None,
            sync: SyncBookkeeping::default(),
            last_session_sync: None,
            violations: 0,
            display_name,
        }
    }

    /// The gameplay scalars currently describing this session.
    #[must_use]
    pub fn session_scalars(&self) -> SyncSession {
        SyncSession {
            gems_collected: self.gems_collected,
            editor_enabled: self.editor_enabled,
            mount_entity_id: self.mount_entity_id.map(|m| m.0),
        }
    }
}

/// Result of a connect: the session plus whether it was reclaimed.
pub struct ConnectOutcome {
    /// The client the peer now maps to.
    pub client_id: ClientId,
    /// True if a dormant session was resumed (entity retained).
    pub resumed: bool,
}

/// Owns every session and the peer→client mapping.
#[derive(Default)]
pub struct SessionManager {
    sessions: HashMap<ClientId, Session>,
    by_peer: HashMap<PeerId, ClientId>,
}

impl SessionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles a hello: reclaims a dormant session within the grace
    /// window, replaces the transport on a stale one, or creates fresh.
    pub fn connect(
        &mut self,
        peer: PeerId,
        client_id: ClientId,
        mode: ClientMode,
        display_name: String,
        now_ms: u64,
        grace_ms: u64,
    ) -> ConnectOutcome {
        if let Some(session) = self.sessions.get_mut(&client_id) {
            // Detach any previous peer binding.
            if let Some(old_peer) = session.peer.take() {
                self.by_peer.remove(&old_peer);
            }
            let resumed = match session.state {
                SessionState::Dormant { realm, since_ms }
                    if now_ms.saturating_sub(since_ms) < grace_ms =>
                {
                    session.state = SessionState::Active { realm };
                    // A resumed client needs everything again.
                    session.sync.reset();
                    debug!(client = client_id.0, realm, "dormant session reclaimed");
                    true
                }
                _ => {
                    // Too stale, or a plain reconnect: back to the lobby.
                    session.state = SessionState::Lobby;
                    session.entity_id = None;
                    session.sync.reset();
                    false
                }
            };
            session.peer = Some(peer);
            session.mode = mode;
            self.by_peer.insert(peer, client_id);
            return ConnectOutcome { client_id, resumed };
        }

        let session = Session::new(client_id, peer, mode, display_name);
        self.sessions.insert(client_id, session);
        self.by_peer.insert(peer, client_id);
        ConnectOutcome { client_id, resumed: false }
    }

    /// Handles a transport disconnect. Active sessions go dormant; lobby
    /// sessions are removed outright. Returns the affected client.
    pub fn disconnect_peer(&mut self, peer: PeerId, now_ms: u64) -> Option<ClientId> {
        let client_id = self.by_peer.remove(&peer)?;
        let session = self.sessions.get_mut(&client_id)?;
        session.peer = None;
        match session.state {
            SessionState::Active { realm } => {
                session.state = SessionState::Dormant { realm, since_ms: now_ms };
            }
            SessionState::Lobby => {
                self.sessions.remove(&client_id);
            }
            SessionState::Dormant { .. } => {}
        }
        Some(client_id)
    }

    /// Removes sessions dormant past the grace window. Returns
    /// `(client, realm, entity)` for each removal so the caller can
    /// despawn and announce.
    pub fn sweep_dormant(
        &mut self,
        now_ms: u64,
        grace_ms: u64,
    ) -> Vec<(ClientId, u64, Option<EntityId>)> {
        let expired: Vec<ClientId> = self
            .sessions
            .iter()
            .filter_map(|(id, s)| match s.state {
                SessionState::Dormant { since_ms, .. }
                    if now_ms.saturating_sub(since_ms) >= grace_ms =>
                {
                    Some(*id)
                }
                _ => None,
            })
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                let session = self.sessions.remove(&id)?;
                let realm = session.state.realm()?;
                Some((id, realm, session.entity_id))
            })
            .collect()
    }

    /// Session by stable id.
    pub fn get_mut(&mut self, client_id: ClientId) -> Option<&mut Session> {
        self.sessions.get_mut(&client_id)
    }

    /// Session by stable id, immutable.
    #[must_use]
    pub fn get(&self, client_id: ClientId) -> Option<&Session> {
        self.sessions.get(&client_id)
    }

    /// Session by transport peer.
    pub fn get_by_peer_mut(&mut self, peer: PeerId) -> Option<&mut Session> {
        let client_id = *self.by_peer.get(&peer)?;
        self.sessions.get_mut(&client_id)
    }

    /// Client id for a peer.
    #[must_use]
    pub fn client_of_peer(&self, peer: PeerId) -> Option<ClientId> {
        self.by_peer.get(&peer).copied()
    }

    /// Every session.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Every session, mutable.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// Client ids of sessions active in a realm.
    #[must_use]
    pub fn active_in_realm(&self, realm: u64) -> Vec<ClientId> {
        self.sessions
            .values()
            .filter(|s| matches!(s.state, SessionState::Active { realm: r } if r == realm))
            .map(|s| s.client_id)
            .collect()
    }

    /// Live player count per realm (active sessions only).
    #[must_use]
    pub fn player_count(&self, realm: u64) -> u32 {
        self.active_in_realm(realm).len() as u32
    }

    /// Client ids of every session bound to a realm, dormant included.
    #[must_use]
    pub fn bound_to_realm(&self, realm: u64) -> Vec<ClientId> {
        self.sessions
            .values()
            .filter(|s| s.state.realm() == Some(realm))
            .map(|s| s.client_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_orders_and_dedups() {
        let mailbox = InputMailbox::default();
        for seq in [3u32, 1, 2, 2, 5] {
            mailbox.push(PlayerInputMsg { seq, ..PlayerInputMsg::default() });
        }
        let drained = mailbox.drain(1);
        let seqs: Vec<u32> = drained.iter().map(|i| i.seq).collect();
        assert_eq!(seqs, vec![2, 3, 5], "stale seq 1 dropped, duplicates merged");
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_mailbox_overflow_drops_oldest() {
        let mailbox = InputMailbox::default();
        for seq in 0..(INPUT_QUEUE_LIMIT as u32 + 10) {
            mailbox.push(PlayerInputMsg { seq: seq + 1, ..PlayerInputMsg::default() });
        }
        assert_eq!(mailbox.len(), INPUT_QUEUE_LIMIT);
        let drained = mailbox.drain(0);
        assert_eq!(drained.first().unwrap().seq, 11, "oldest evicted");
    }

    #[test]
    fn test_dormant_reclaim_within_grace() {
        let mut manager = SessionManager::new();
        let client = ClientId(7);
        manager.connect(1, client, ClientMode::Multiplayer, "p".into(), 0, 10_000);
        manager.get_mut(client).unwrap().state = SessionState::Active { realm: 1 };
        manager.get_mut(client).unwrap().entity_id = Some(EntityId(42));

        manager.disconnect_peer(1, 1_000);
        assert!(matches!(
            manager.get(client).unwrap().state,
            SessionState::Dormant { realm: 1, since_ms: 1_000 }
        ));

        let outcome = manager.connect(2, client, ClientMode::Multiplayer, "p".into(), 5_000, 10_000);
        assert!(outcome.resumed);
        let session = manager.get(client).unwrap();
        assert_eq!(session.state, SessionState::Active { realm: 1 });
        assert_eq!(session.entity_id, Some(EntityId(42)), "entity retained");
    }

    #[test]
    fn test_dormant_expiry_back_to_lobby() {
        let mut manager = SessionManager::new();
        let client = ClientId(7);
        manager.connect(1, client, ClientMode::Multiplayer, "p".into(), 0, 10_000);
        manager.get_mut(client).unwrap().state = SessionState::Active { realm: 1 };
        manager.disconnect_peer(1, 0);

        let outcome = manager.connect(2, client, ClientMode::Multiplayer, "p".into(), 60_000, 10_000);
        assert!(!outcome.resumed, "grace expired");
        assert_eq!(manager.get(client).unwrap().state, SessionState::Lobby);
    }

    #[test]
    fn test_sweep_returns_expired_bindings() {
        let mut manager = SessionManager::new();
        let client = ClientId(9);
        manager.connect(1, client, ClientMode::Multiplayer, "p".into(), 0, 10_000);
        manager.get_mut(client).unwrap().state = SessionState::Active { realm: 3 };
        manager.get_mut(client).unwrap().entity_id = Some(EntityId(5));
        manager.disconnect_peer(1, 0);

        assert!(manager.sweep_dormant(5_000, 10_000).is_empty());
        let swept = manager.sweep_dormant(20_000, 10_000);
        assert_eq!(swept, vec![(client, 3, Some(EntityId(5)))]);
        assert!(manager.get(client).is_none());
    }

    #[test]
    fn test_lobby_disconnect_removes_session() {
        let mut manager = SessionManager::new();
        manager.connect(1, ClientId(1), ClientMode::Multiplayer, "p".into(), 0, 10_000);
        manager.disconnect_peer(1, 0);
        assert!(manager.get(ClientId(1)).is_none());
    }
}
