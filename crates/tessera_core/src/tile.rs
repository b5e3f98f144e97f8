//! Tile registry: terrain kinds, collision flags, detail and road codes.
//!
//! The registry is the single source of the terrain→collision mapping;
//! edits that change terrain look collision up here so the two arrays can
//! never drift apart.

/// Per-tile collision flags.
///
/// Stored in the chunk's `collision` array and consulted by the movement
/// kernel. A tile may be solid, water, or neither.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollisionFlags(pub u8);

impl CollisionFlags {
    /// No collision.
    pub const NONE: Self = Self(0);
    /// Blocks horizontal movement at every elevation.
    pub const SOLID: Self = Self(1);
    /// Water surface: passable, but balls despawn on landing and surface
    /// friction differs.
    pub const WATER: Self = Self(2);

    /// Returns true if the solid bit is set.
    #[inline]
    #[must_use]
    pub const fn is_solid(self) -> bool {
        self.0 & Self::SOLID.0 != 0
    }

    /// Returns true if the water bit is set.
    #[inline]
    #[must_use]
    pub const fn is_water(self) -> bool {
        self.0 & Self::WATER.0 != 0
    }
}

/// Terrain kinds.
///
/// The `u8` value is the storage representation inside chunk arrays and on
/// the wire. The list is append-only: new terrain is added at the end.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Terrain {
    /// Open grassland.
    #[default]
    Grass = 0,
    /// Bare dirt.
    Dirt = 1,
    /// Beach / desert sand.
    Sand = 2,
    /// Exposed rock. Solid.
    Stone = 3,
    /// Shallow water.
    Water = 4,
    /// Deep water.
    DeepWater = 5,
    /// Snow cover.
    Snow = 6,
    /// Forest floor.
    Forest = 7,
}

impl Terrain {
    /// Number of terrain kinds.
    pub const COUNT: usize = 8;

    /// Converts from the storage byte.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Grass),
            1 => Some(Self::Dirt),
            2 => Some(Self::Sand),
            3 => Some(Self::Stone),
            4 => Some(Self::Water),
            5 => Some(Self::DeepWater),
            6 => Some(Self::Snow),
            7 => Some(Self::Forest),
            _ => None,
        }
    }

    /// The collision flags this terrain implies.
    ///
    /// Chunk mutators write terrain and collision through this mapping in
    /// one operation.
    #[must_use]
    pub const fn collision(self) -> CollisionFlags {
        match self {
            Self::Stone => CollisionFlags::SOLID,
            Self::Water | Self::DeepWater => CollisionFlags::WATER,
            _ => CollisionFlags::NONE,
        }
    }
}

/// Detail codes scattered by the generator (0 = none).
pub mod detail {
    /// Empty tile.
    pub const NONE: u8 = 0;
    /// Small flower cluster.
    pub const FLOWER: u8 = 1;
    /// Loose rock.
    pub const ROCK: u8 = 2;
    /// Low bush.
    pub const BUSH: u8 = 3;
    /// Tree base.
    pub const TREE: u8 = 4;
}

/// Road-type codes for the per-tile road grid (0 = none).
pub mod road {
    /// No road.
    pub const NONE: u8 = 0;
    /// Trodden dirt path.
    pub const DIRT_PATH: u8 = 1;
    /// Paved stone road.
    pub const STONE: u8 = 2;
}
