//! Client-side prediction and reconciliation by replay.
//!
//! Every locally generated input is appended to a ring with its sequence
//! number before it is sent, and immediately applied to the predicted
//! entity through the shared movement kernel. When an authoritative
//! snapshot arrives, the predicted entity is reset to the server state,
//! acknowledged inputs are discarded, and the remainder is replayed - by
//! construction this lands exactly where the server will once it
//! processes those inputs, given identical CVars and world state.

use std::collections::VecDeque;

use tessera_core::entity::Entity;
use tessera_core::movement::{self, MovementContext};
use tessera_core::{MoveIntent, PhysicsParams};

use crate::protocol::PlayerInputMsg;

/// Unacked inputs kept for replay.
const INPUT_RING_CAPACITY: usize = 128;

/// One recorded input.
#[derive(Clone, Copy, Debug)]
pub struct RecordedInput {
    /// Sequence number it was sent with.
    pub seq: u32,
    /// The kernel intent.
    pub intent: MoveIntent,
    /// The sub-step duration it was predicted with.
    pub dt: f32,
}

/// Ring of inputs awaiting server acknowledgment.
#[derive(Default)]
pub struct InputRing {
    entries: VecDeque<RecordedInput>,
}

impl InputRing {
    /// Creates an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an input, evicting the oldest when full.
    pub fn push(&mut self, input: RecordedInput) {
        if self.entries.len() >= INPUT_RING_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(input);
    }

    /// Discards every input the server has processed.
    pub fn ack(&mut self, last_processed_seq: u32) {
        while self
            .entries
            .front()
            .is_some_and(|i| i.seq <= last_processed_seq)
        {
            self.entries.pop_front();
        }
    }

    /// Unacked inputs, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RecordedInput> {
        self.entries.iter()
    }

    /// Number of unacked inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when every input is acknowledged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The local player's predictor.
pub struct Predictor {
    /// Predicted local entity, mirrored from the last baseline.
    pub entity: Option<Entity>,
    /// Predicted mount, for the ridden case.
    pub mount: Option<Entity>,
    /// Mirrored physics CVars; must match the server's for convergence.
    pub params: PhysicsParams,
    ring: InputRing,
    next_seq: u32,
    last_correction: f32,
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new()
    }
}

impl Predictor {
    /// Creates a predictor with default CVars (replaced on world load).
    #[must_use]
    pub fn new() -> Self {
        Self {
            entity: None,
            mount: None,
            params: PhysicsParams::default(),
            ring: InputRing::new(),
            next_seq: 0,
            last_correction: 0.0,
        }
    }

    /// Unacked input count (diagnostics).
    #[must_use]
    pub fn pending_inputs(&self) -> usize {
        self.ring.len()
    }

    /// Residual correction magnitude of the last reconcile (diagnostics).
    #[must_use]
    pub const fn last_correction(&self) -> f32 {
        self.last_correction
    }

    /// Records an input, predicts it locally, and returns the message to
    /// put on the wire.
    pub fn predict<C: MovementContext>(
        &mut self,
        intent: MoveIntent,
        dt: f32,
        ctx: &C,
    ) -> PlayerInputMsg {
        self.next_seq += 1;
        let seq = self.next_seq;

        // Predict with exactly what the wire will carry - quantized axes
        // and whole milliseconds - or the replay will not land on the
        // server's floats.
        let quantize = |v: f32| {
            f32::from((v.clamp(-1.0, 1.0) * crate::protocol::INPUT_AXIS_SCALE) as i16)
                / crate::protocol::INPUT_AXIS_SCALE
        };
        let intent = MoveIntent { dx: quantize(intent.dx), dy: quantize(intent.dy), ..intent };
        let dt_ms = (dt * 1000.0).round().clamp(1.0, 100.0) as u16;
        let step_dt = f32::from(dt_ms) / 1000.0;
        self.ring.push(RecordedInput { seq, intent, dt: step_dt });

        if let Some(entity) = self.entity.as_mut() {
            movement::step(entity, &intent, &self.params, ctx, step_dt);
        }

        PlayerInputMsg {
            seq,
            dx: intent.dx,
            dy: intent.dy,
            sprinting: intent.sprinting,
            jump: intent.jump,
            jump_pressed: Some(intent.jump_pressed),
            dt_ms: Some(dt_ms),
        }
    }

    /// Reconciles to an authoritative snapshot: reset, ack, replay.
    pub fn reconcile<C: MovementContext>(
        &mut self,
        server_entity: Entity,
        server_mount: Option<Entity>,
        last_processed_seq: u32,
        ctx: &C,
    ) {
        let predicted = self.entity.as_ref().map(|e| (e.wx, e.wy, e.wz));

        self.mount = server_mount;
        let mut entity = server_entity;
        self.ring.ack(last_processed_seq);
        for input in self.ring.iter() {
            movement::step(&mut entity, &input.intent, &self.params, ctx, input.dt);
        }

        self.last_correction = predicted.map_or(0.0, |(px, py, pz)| {
            let dx = px - entity.wx;
            let dy = py - entity.wy;
            let dz = pz - entity.wz;
            (dx * dx + dy * dy + dz * dz).sqrt()
        });
        self.entity = Some(entity);
    }

    /// Drops all local state (realm leave).
    pub fn reset(&mut self) {
        self.entity = None;
        self.mount = None;
        self.ring = InputRing::new();
        self.last_correction = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::entity::{EntityId, EntityKind};
    use tessera_core::tile::CollisionFlags;
    use tessera_core::Aabb;

    struct OpenWorld;

    impl MovementContext for OpenWorld {
        fn tile_collision(&self, _tx: i32, _ty: i32) -> CollisionFlags {
            CollisionFlags::NONE
        }
        fn tile_height(&self, _tx: i32, _ty: i32) -> u8 {
            0
        }
        fn entity_blocked(&self, _aabb: &Aabb, _z_lo: f32, _z_hi: f32, _e: EntityId) -> bool {
            false
        }
        fn prop_blocked(&self, _aabb: &Aabb, _z_lo: f32, _z_hi: f32) -> bool {
            false
        }
        fn walkable_surface_under(&self, _aabb: &Aabb, _max_z: f32, _e: EntityId) -> Option<f32> {
            None
        }
    }

    // 33 ms: what 1/30 s becomes after wire quantization.
    const DT: f32 = 0.033;

    fn server_step(entity: &mut Entity, intent: &MoveIntent, params: &PhysicsParams) {
        movement::step(entity, intent, params, &OpenWorld, DT);
    }

    #[test]
    fn test_prediction_matches_server_exactly() {
        // The same input stream through the same kernel must land on the
        // same floats, regardless of when acks arrive.
        let params = PhysicsParams::default();
        let mut predictor = Predictor::new();
        predictor.params = params;
        predictor.entity = Some(Entity::new(EntityId(1), EntityKind::Player, 100.0, 100.0));

        let mut server = Entity::new(EntityId(1), EntityKind::Player, 100.0, 100.0);

        let intents = [
            MoveIntent { dx: 1.0, ..MoveIntent::default() },
            MoveIntent { dx: 1.0, dy: 0.5, ..MoveIntent::default() },
            MoveIntent { dx: 0.0, dy: 1.0, jump: true, jump_pressed: true, ..MoveIntent::default() },
            MoveIntent::default(),
            MoveIntent { dx: -1.0, sprinting: true, ..MoveIntent::default() },
        ];

        let mut sent = Vec::new();
        for intent in intents {
            sent.push(predictor.predict(intent, DT, &OpenWorld));
        }
        // Server processes all five, then snapshots.
        for (msg, intent) in sent.iter().zip(intents.iter()) {
            server_step(&mut server, intent, &params);
            let _ = msg;
        }
        predictor.reconcile(server.clone(), None, sent.last().unwrap().seq, &OpenWorld);

        let predicted = predictor.entity.as_ref().unwrap();
        assert_eq!(predicted.wx, server.wx);
        assert_eq!(predicted.wy, server.wy);
        assert_eq!(predicted.wz, server.wz);
        assert_eq!(predictor.last_correction(), 0.0);
        assert!(predictor.pending_inputs() == 0);
    }

    #[test]
    fn test_replay_of_unacked_inputs() {
        // The server has only processed input 2 of 4; reconciliation must
        // replay 3 and 4 on top of the authoritative state and end where
        // the server WILL end.
        let params = PhysicsParams::default();
        let mut predictor = Predictor::new();
        predictor.params = params;
        predictor.entity = Some(Entity::new(EntityId(1), EntityKind::Player, 0.0, 0.0));

        let mut server = Entity::new(EntityId(1), EntityKind::Player, 0.0, 0.0);
        let intent = MoveIntent { dx: 1.0, ..MoveIntent::default() };

        for _ in 0..4 {
            let _ = predictor.predict(intent, DT, &OpenWorld);
        }
        // Server: only the first two.
        server_step(&mut server, &intent, &params);
        server_step(&mut server, &intent, &params);
        predictor.reconcile(server.clone(), None, 2, &OpenWorld);
        assert_eq!(predictor.pending_inputs(), 2);

        // Server later processes 3 and 4.
        server_step(&mut server, &intent, &params);
        server_step(&mut server, &intent, &params);

        let predicted = predictor.entity.as_ref().unwrap();
        assert_eq!(predicted.wx, server.wx, "replay equals deferred server result");
        assert_eq!(predicted.vx, server.vx);
    }

    #[test]
    fn test_stale_acks_discard_ring() {
        let mut predictor = Predictor::new();
        predictor.entity = Some(Entity::new(EntityId(1), EntityKind::Player, 0.0, 0.0));
        for _ in 0..10 {
            let _ = predictor.predict(MoveIntent::default(), DT, &OpenWorld);
        }
        predictor.reconcile(
            Entity::new(EntityId(1), EntityKind::Player, 0.0, 0.0),
            None,
            7,
            &OpenWorld,
        );
        assert_eq!(predictor.pending_inputs(), 3);
    }
}
