//! # Tessera Core
//!
//! The simulation kernel shared by the authoritative server and the
//! predicting client.
//!
//! ## Architecture
//!
//! - **Data model**: one canonical [`Entity`] and [`Prop`] definition with
//!   the widest field set; optional capabilities are `Option`s.
//! - **Movement kernel**: [`movement`] steps entities against a read-only
//!   [`MovementContext`]. Server simulation and client prediction execute
//!   the same code with the same [`PhysicsParams`], which is what makes
//!   reconciliation-by-replay converge.
//! - **Spatial index**: chunk-bucketed AABB index for range queries.
//!
//! ## Determinism Guarantee
//!
//! Nothing in this crate reads a clock, allocates ids, or draws randomness.
//! Given identical inputs, every function produces identical f32 results on
//! both ends of the wire.

pub mod entity;
pub mod input;
pub mod math;
pub mod movement;
pub mod params;
pub mod prop;
pub mod spatial;
pub mod tile;

pub use entity::{Entity, EntityId, EntityKind, SpriteState, WanderMode, WanderState};
pub use input::MoveIntent;
pub use math::{Aabb, Vec2};
pub use movement::MovementContext;
pub use params::PhysicsParams;
pub use prop::{Prop, PropId, PropWall};
pub use spatial::SpatialIndex;
pub use tile::{CollisionFlags, Terrain};

/// Edge length of a tile in world pixels.
pub const TILE_SIZE: f32 = 16.0;

/// Edge length of a chunk in tiles.
pub const CHUNK_SIZE: usize = 16;

/// Tiles per chunk.
pub const TILES_PER_CHUNK: usize = CHUNK_SIZE * CHUNK_SIZE;

/// Corner samples per chunk axis: twice the tile grid plus one, so chunk
/// edges share their boundary samples with neighbors.
pub const SUBGRID_DIM: usize = CHUNK_SIZE * 2 + 1;

/// Corner samples per chunk.
pub const SUBGRID_PER_CHUNK: usize = SUBGRID_DIM * SUBGRID_DIM;

/// Blend-layer slots per tile.
pub const MAX_BLEND_LAYERS: usize = 6;

/// Highest tile elevation level.
pub const MAX_TILE_HEIGHT: u8 = 3;

/// World-pixel height of one elevation level.
pub const ELEVATION_PX: f32 = 8.0;

/// Maximum Z-difference the kernel treats as a step rather than a wall
/// or a fall. One elevation level plus slack.
pub const STEP_UP_THRESHOLD: f32 = 9.0;

/// Default authoritative tick rate in Hz.
pub const DEFAULT_TICK_RATE: u32 = 30;

/// Converts a world-pixel coordinate to its tile coordinate.
#[inline]
#[must_use]
pub fn tile_of(w: f32) -> i32 {
    (w / TILE_SIZE).floor() as i32
}

/// Converts a tile coordinate to its chunk coordinate.
#[inline]
#[must_use]
pub fn chunk_of_tile(t: i32) -> i32 {
    t.div_euclid(CHUNK_SIZE as i32)
}

/// Converts a world-pixel coordinate to its chunk coordinate.
#[inline]
#[must_use]
pub fn chunk_of_world(w: f32) -> i32 {
    chunk_of_tile(tile_of(w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_derivation() {
        assert_eq!(tile_of(0.0), 0);
        assert_eq!(tile_of(15.9), 0);
        assert_eq!(tile_of(16.0), 1);
        assert_eq!(tile_of(-0.1), -1);
        assert_eq!(tile_of(-16.0), -1);
        assert_eq!(tile_of(-16.1), -2);

        assert_eq!(chunk_of_tile(0), 0);
        assert_eq!(chunk_of_tile(15), 0);
        assert_eq!(chunk_of_tile(16), 1);
        assert_eq!(chunk_of_tile(-1), -1);
        assert_eq!(chunk_of_tile(-16), -1);
        assert_eq!(chunk_of_tile(-17), -2);
    }
}
