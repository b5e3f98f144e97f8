//! Physics tunables (CVars).
//!
//! An explicit value threaded into every kernel call: the realm owns one
//! instance, broadcasts it verbatim to clients, and clients mirror it so
//! prediction matches. There is no ambient global.

use serde::{Deserialize, Serialize};

/// The full set of physics CVars read by the movement kernel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsParams {
    /// Downward acceleration in px/s².
    pub gravity: f32,
    /// Ground friction coefficient (per second).
    pub friction: f32,
    /// Ground acceleration coefficient.
    pub accelerate: f32,
    /// Air acceleration coefficient.
    pub air_accelerate: f32,
    /// Cap on the wish speed used while airborne.
    pub air_wish_cap: f32,
    /// Friction treats speeds below this as this (snappy stops).
    pub stop_speed: f32,
    /// Require a fresh jump press per jump (no held-key rebound).
    pub no_bunny_hop: bool,
    /// Halve the jump impulse.
    pub small_jumps: bool,
    /// Scales gravity integration (slow-motion debugging).
    pub time_scale: f32,

    /// Base walk speed in px/s.
    pub base_speed: f32,
    /// Sprint multiplier on the wish speed.
    pub sprint_multiplier: f32,
    /// Initial vertical velocity of a jump in px/s.
    pub jump_impulse: f32,
    /// Noclip fly speed in px/s.
    pub noclip_speed: f32,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            gravity: 800.0,
            friction: 8.0,
            accelerate: 10.0,
            air_accelerate: 1.5,
            air_wish_cap: 40.0,
            stop_speed: 24.0,
            no_bunny_hop: false,
            small_jumps: false,
            time_scale: 1.0,
            base_speed: 120.0,
            sprint_multiplier: 1.6,
            jump_impulse: 170.0,
            noclip_speed: 260.0,
        }
    }
}

impl PhysicsParams {
    /// The effective jump impulse under the current CVars.
    #[must_use]
    pub fn effective_jump_impulse(&self) -> f32 {
        if self.small_jumps {
            self.jump_impulse * 0.5
        } else {
            self.jump_impulse
        }
    }
}
