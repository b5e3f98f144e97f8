//! Mathematical types shared between client and server.
//!
//! These are the canonical representations used in the network protocol.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::{chunk_of_tile, tile_of};

/// 2D vector - position, velocity, direction in world pixels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec2 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
}

impl Vec2 {
    /// Creates a new Vec2
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0);

    /// Dot product
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Length squared (avoids sqrt)
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Length
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Returns the vector scaled to unit length, or zero if degenerate.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len > f32::EPSILON {
            Self::new(self.x / len, self.y / len)
        } else {
            Self::ZERO
        }
    }

    /// Distance to another point
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Distance squared (avoids sqrt)
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        (self - other).length_squared()
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Axis-aligned bounding box in world pixels.
///
/// `min` is inclusive, `max` is exclusive for tile-overlap purposes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    /// Minimum X corner.
    pub min_x: f32,
    /// Minimum Y corner.
    pub min_y: f32,
    /// Maximum X corner.
    pub max_x: f32,
    /// Maximum Y corner.
    pub max_y: f32,
}

impl Aabb {
    /// Creates a new AABB from its corners.
    #[must_use]
    pub const fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Creates an AABB from an origin plus offset and extent.
    #[must_use]
    pub fn from_origin(wx: f32, wy: f32, offset_x: f32, offset_y: f32, width: f32, height: f32) -> Self {
        let min_x = wx + offset_x;
        let min_y = wy + offset_y;
        Self::new(min_x, min_y, min_x + width, min_y + height)
    }

    /// Returns this box translated by `(dx, dy)`.
    #[must_use]
    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.min_x + dx, self.min_y + dy, self.max_x + dx, self.max_y + dy)
    }

    /// Returns true if the boxes overlap (touching edges do not count).
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Returns the inclusive tile range `(tx0, ty0, tx1, ty1)` this box overlaps.
    ///
    /// The max edge is treated as exclusive so a box flush against a tile
    /// boundary does not claim the next tile.
    #[must_use]
    pub fn tile_range(&self) -> (i32, i32, i32, i32) {
        const EDGE: f32 = 0.001;
        (
            tile_of(self.min_x),
            tile_of(self.min_y),
            tile_of(self.max_x - EDGE),
            tile_of(self.max_y - EDGE),
        )
    }

    /// Returns the inclusive chunk range `(cx0, cy0, cx1, cy1)` this box overlaps.
    #[must_use]
    pub fn chunk_range(&self) -> (i32, i32, i32, i32) {
        let (tx0, ty0, tx1, ty1) = self.tile_range();
        (
            chunk_of_tile(tx0),
            chunk_of_tile(ty0),
            chunk_of_tile(tx1),
            chunk_of_tile(ty1),
        )
    }

    /// Center point of the box.
    #[must_use]
    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec2_operations() {
        let a = Vec2::new(3.0, 4.0);
        assert_eq!(a.length(), 5.0);
        assert_eq!(a.dot(Vec2::new(1.0, 0.0)), 3.0);

        let n = a.normalized();
        assert!((n.length() - 1.0).abs() < 1e-6);

        assert_eq!(Vec2::ZERO.normalized(), Vec2::ZERO);
    }

    #[test]
    fn test_aabb_intersects() {
        let a = Aabb::new(0.0, 0.0, 10.0, 10.0);
        let b = Aabb::new(5.0, 5.0, 15.0, 15.0);
        let c = Aabb::new(10.0, 0.0, 20.0, 10.0);

        assert!(a.intersects(&b));
        // Touching edges do not overlap.
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_aabb_tile_range_flush_boundary() {
        // A 16px box flush on tile (0,0) must not claim tile (1,_).
        let a = Aabb::new(0.0, 0.0, 16.0, 16.0);
        assert_eq!(a.tile_range(), (0, 0, 0, 0));

        let b = Aabb::new(8.0, 8.0, 24.0, 24.0);
        assert_eq!(b.tile_range(), (0, 0, 1, 1));
    }

    #[test]
    fn test_vec2_pod_layout() {
        let v = Vec2::new(1.0, 2.0);
        let bytes: &[u8] = bytemuck::bytes_of(&v);
        assert_eq!(bytes.len(), 8);
    }
}
