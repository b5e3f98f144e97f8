//! Kernel-facing movement intent.
//!
//! The decoded form of a `player-input` message: what the kernel actually
//! consumes. Wire encoding lives in the networking crate.

use serde::{Deserialize, Serialize};

/// One movement desire, normalized to `[-1, 1]` per axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveIntent {
    /// Desired X direction in `[-1, 1]`.
    pub dx: f32,
    /// Desired Y direction in `[-1, 1]`.
    pub dy: f32,
    /// Sprint modifier held.
    pub sprinting: bool,
    /// Jump key held.
    pub jump: bool,
    /// Jump key went down this input (edge, not level).
    pub jump_pressed: bool,
}

impl MoveIntent {
    /// Returns the intent with the jump edge cleared, used when a retained
    /// intent is re-applied on an input-less tick.
    #[must_use]
    pub fn without_edges(mut self) -> Self {
        self.jump_pressed = false;
        self
    }

    /// Clamps both axes into `[-1, 1]`.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.dx = self.dx.clamp(-1.0, 1.0);
        self.dy = self.dy.clamp(-1.0, 1.0);
        self
    }
}
