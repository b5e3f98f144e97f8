//! Static props: placed structures with optional wall sub-colliders.

use serde::{Deserialize, Serialize};

use crate::entity::Collider;
use crate::math::Aabb;

/// Realm-unique prop identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropId(pub u32);

/// A wall sub-collider inside a prop.
///
/// Walls model enterable structures, staircases and platforms: each wall
/// occupies a Z band and may expose a walkable top.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropWall {
    /// X offset of the wall box from the prop origin.
    pub offset_x: f32,
    /// Y offset of the wall box from the prop origin.
    pub offset_y: f32,
    /// Wall box width.
    pub width: f32,
    /// Wall box height.
    pub height: f32,
    /// Bottom of the wall's Z band, relative to the prop base.
    pub z_base: f32,
    /// Z extent of the wall band.
    pub z_height: f32,
    /// Entities may stand on top of this wall.
    pub walkable_top: bool,
    /// The wall never blocks (marker geometry).
    pub passable: bool,
}

impl PropWall {
    /// The wall box at the prop's position.
    #[must_use]
    pub fn aabb(&self, wx: f32, wy: f32) -> Aabb {
        Aabb::from_origin(wx, wy, self.offset_x, self.offset_y, self.width, self.height)
    }

    /// The absolute Z band `[lo, hi]` of the wall.
    #[must_use]
    pub fn z_band(&self, prop_wz: f32) -> (f32, f32) {
        (prop_wz + self.z_base, prop_wz + self.z_base + self.z_height)
    }
}

/// A static prop. Static by design: props never move after placement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prop {
    /// Realm-unique id.
    pub id: PropId,
    /// Content kind name (registry key for the art system).
    pub kind: String,
    /// Position X in world pixels.
    pub wx: f32,
    /// Position Y in world pixels.
    pub wy: f32,
    /// Base elevation in world pixels.
    pub wz: f32,
    /// Primary collider.
    pub collider: Collider,
    /// Wall sub-colliders, if the prop is an enterable structure.
    pub walls: Vec<PropWall>,
}

impl Prop {
    /// The primary collider box at the prop's position.
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        let c = &self.collider;
        Aabb::from_origin(self.wx, self.wy, c.offset_x, c.offset_y, c.width, c.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_z_band() {
        let wall = PropWall {
            offset_x: 0.0,
            offset_y: 0.0,
            width: 16.0,
            height: 16.0,
            z_base: 8.0,
            z_height: 16.0,
            walkable_top: true,
            passable: false,
        };
        assert_eq!(wall.z_band(4.0), (12.0, 28.0));
    }
}
