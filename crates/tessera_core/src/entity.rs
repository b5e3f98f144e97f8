//! The canonical entity model.
//!
//! One definition with the widest field set; optional capabilities are
//! `Option`s. Ephemeral fields (`prev_*`, `tick_accumulator`, `intent`)
//! live only on the live object and are excluded from every codec path.

use serde::{Deserialize, Serialize};

use crate::input::MoveIntent;
use crate::math::Aabb;

/// Realm-unique entity identifier.
///
/// Ids are allocated monotonically and never recycled within a realm
/// lifetime, so a stale id simply fails to resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// Sentinel for "no entity".
    pub const NONE: Self = Self(u32::MAX);
}

/// Entity kinds known to the realm content.
///
/// The discriminant doubles as the wire type index: the names below are in
/// sorted order and the list is APPEND-ONLY. Removing or reordering kinds
/// is a protocol break.
#[repr(u16)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Bouncing ball projectile.
    Ball = 0,
    /// Friendly critter that flees hostiles.
    Buddy = 1,
    /// Campfire. Destroys hostiles that touch it.
    Fire = 2,
    /// Collectible gem.
    Gem = 3,
    /// Hostile ghost.
    Ghost = 4,
    /// Generic hostile walker.
    Hostile = 5,
    /// Rideable mount.
    Mount = 6,
    /// Player avatar.
    #[default]
    Player = 7,
}

/// Wire name table, index-aligned with the enum discriminants.
pub const KIND_NAMES: &[&str] = &[
    "ball", "buddy", "fire", "gem", "ghost", "hostile", "mount", "player",
];

impl EntityKind {
    /// The stable wire index of this kind.
    #[inline]
    #[must_use]
    pub const fn type_index(self) -> u16 {
        self as u16
    }

    /// Resolves a wire index back to a kind.
    #[must_use]
    pub const fn from_index(index: u16) -> Option<Self> {
        match index {
            0 => Some(Self::Ball),
            1 => Some(Self::Buddy),
            2 => Some(Self::Fire),
            3 => Some(Self::Gem),
            4 => Some(Self::Ghost),
            5 => Some(Self::Hostile),
            6 => Some(Self::Mount),
            7 => Some(Self::Player),
            _ => None,
        }
    }

    /// The registry name of this kind.
    #[must_use]
    pub fn name(self) -> &'static str {
        KIND_NAMES[self as usize]
    }

    /// Whether this kind keeps falling off ledges higher than the step
    /// threshold (rather than snapping down).
    #[must_use]
    pub const fn can_fall(self) -> bool {
        matches!(self, Self::Player | Self::Mount | Self::Ball)
    }
}

/// Axis-aligned collider attached to an entity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Collider {
    /// X offset of the box from the entity origin.
    pub offset_x: f32,
    /// Y offset of the box from the entity origin.
    pub offset_y: f32,
    /// Box width in pixels.
    pub width: f32,
    /// Box height in pixels.
    pub height: f32,
    /// Z extent of the entity body. Zero means "flat" (never blocks in Z).
    pub physical_height: f32,
    /// Blocks other server-simulated entities.
    pub solid: bool,
    /// Blocks the predicted client player even when `solid` is false.
    pub client_solid: bool,
}

impl Collider {
    /// A centered box of the given footprint.
    #[must_use]
    pub fn centered(width: f32, height: f32, physical_height: f32) -> Self {
        Self {
            offset_x: -width * 0.5,
            offset_y: -height * 0.5,
            width,
            height,
            physical_height,
            solid: true,
            client_solid: false,
        }
    }
}

/// Presentation hints mirrored to clients.
///
/// Packed to four bytes on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpriteState {
    /// Facing direction (0 = down, 1 = left, 2 = right, 3 = up).
    pub facing: u8,
    /// Animation selector.
    pub animation: u8,
    /// Presentation flag bits.
    pub flags: u8,
}

impl SpriteState {
    /// Flag: the walk cycle is playing.
    pub const FLAG_MOVING: u8 = 1 << 0;
    /// Flag: the sprint variant of the walk cycle.
    pub const FLAG_SPRINTING: u8 = 1 << 1;

    /// Packs to the wire representation.
    #[must_use]
    pub const fn pack(self) -> u32 {
        (self.facing as u32) | ((self.animation as u32) << 8) | ((self.flags as u32) << 16)
    }

    /// Unpacks from the wire representation.
    #[must_use]
    pub const fn unpack(v: u32) -> Self {
        Self {
            facing: (v & 0xff) as u8,
            animation: ((v >> 8) & 0xff) as u8,
            flags: ((v >> 16) & 0xff) as u8,
        }
    }
}

/// Wander AI mode.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WanderMode {
    /// Standing still.
    #[default]
    Idle = 0,
    /// Walking toward the target point.
    Wander = 1,
    /// Chasing a nearby player.
    Chase = 2,
    /// Fleeing from a threat.
    Flee = 3,
    /// Following a parent/owner entity.
    Follow = 4,
}

impl WanderMode {
    /// Converts from the storage byte.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Idle),
            1 => Some(Self::Wander),
            2 => Some(Self::Chase),
            3 => Some(Self::Flee),
            4 => Some(Self::Follow),
            _ => None,
        }
    }
}

/// Wander AI state carried by AI-driven entities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WanderState {
    /// Current behavior mode.
    pub mode: WanderMode,
    /// Walk target X in world pixels.
    pub target_x: f32,
    /// Walk target Y in world pixels.
    pub target_y: f32,
    /// Decision cooldown in AI steps.
    pub idle_steps: u16,
}

/// The canonical live entity.
#[derive(Clone, Debug)]
pub struct Entity {
    /// Realm-unique id.
    pub id: EntityId,
    /// Content kind.
    pub kind: EntityKind,

    /// Position X in world pixels.
    pub wx: f32,
    /// Position Y in world pixels.
    pub wy: f32,
    /// Velocity X in pixels per second.
    pub vx: f32,
    /// Velocity Y in pixels per second.
    pub vy: f32,

    /// Collider, if this entity participates in collision.
    pub collider: Option<Collider>,

    /// Absolute elevation of the feet in world pixels.
    pub wz: f32,
    /// Height above local ground (presentation; rider offset for mounts).
    pub jump_z: f32,
    /// Vertical velocity while airborne. `None` means grounded.
    pub jump_vz: Option<f32>,
    /// Elevation of the ground currently underfoot.
    pub ground_z: f32,

    /// Presentation hints.
    pub sprite: SpriteState,
    /// Wander AI state, if AI-driven.
    pub wander: Option<WanderState>,

    /// Weak reference to the carrying entity (mounts).
    pub parent_id: Option<EntityId>,
    /// X offset from the parent while carried.
    pub local_offset_x: f32,
    /// Y offset from the parent while carried.
    pub local_offset_y: f32,

    /// Hidden during damage flash.
    pub flash_hidden: bool,
    /// Shadow suppressed (e.g. while carried).
    pub no_shadow: bool,
    /// Ticks until removal, if dying.
    pub death_timer: Option<u16>,
    /// Remaining invincibility ticks.
    pub invincible_ticks: u32,
    /// Knockback velocity X, damped each tick.
    pub knock_vx: f32,
    /// Knockback velocity Y, damped each tick.
    pub knock_vy: f32,

    /// Noclip debug mode (players only).
    pub noclip: bool,

    // --- ephemeral, never transmitted ---
    /// Position X at the start of the current step.
    pub prev_wx: f32,
    /// Position Y at the start of the current step.
    pub prev_wy: f32,
    /// Elevation at the start of the current step.
    pub prev_wz: f32,
    /// Seconds accumulated toward the next AI decision step.
    pub tick_accumulator: f32,
    /// Retained movement desire from the last processed input.
    pub intent: MoveIntent,
}

impl Entity {
    /// Creates an entity of the given kind at a position, with the kind's
    /// default collider.
    #[must_use]
    pub fn new(id: EntityId, kind: EntityKind, wx: f32, wy: f32) -> Self {
        let collider = match kind {
            EntityKind::Player => Some(Collider::centered(10.0, 6.0, 24.0)),
            EntityKind::Mount => Some(Collider::centered(14.0, 8.0, 20.0)),
            EntityKind::Hostile | EntityKind::Ghost | EntityKind::Buddy => {
                Some(Collider::centered(10.0, 6.0, 16.0))
            }
            EntityKind::Ball => Some(Collider {
                solid: false,
                ..Collider::centered(6.0, 6.0, 6.0)
            }),
            EntityKind::Fire => Some(Collider {
                solid: false,
                ..Collider::centered(12.0, 8.0, 12.0)
            }),
            EntityKind::Gem => None,
        };
        Self {
            id,
            kind,
            wx,
            wy,
            vx: 0.0,
            vy: 0.0,
            collider,
            wz: 0.0,
            jump_z: 0.0,
            jump_vz: None,
            ground_z: 0.0,
            sprite: SpriteState::default(),
            wander: None,
            parent_id: None,
            local_offset_x: 0.0,
            local_offset_y: 0.0,
            flash_hidden: false,
            no_shadow: false,
            death_timer: None,
            invincible_ticks: 0,
            knock_vx: 0.0,
            knock_vy: 0.0,
            noclip: false,
            prev_wx: wx,
            prev_wy: wy,
            prev_wz: 0.0,
            tick_accumulator: 0.0,
            intent: MoveIntent::default(),
        }
    }

    /// The collider box at the current position, if any.
    #[must_use]
    pub fn aabb(&self) -> Option<Aabb> {
        self.collider.map(|c| {
            Aabb::from_origin(self.wx, self.wy, c.offset_x, c.offset_y, c.width, c.height)
        })
    }

    /// The collider box at an arbitrary position.
    #[must_use]
    pub fn aabb_at(&self, wx: f32, wy: f32) -> Option<Aabb> {
        self.collider.map(|c| {
            Aabb::from_origin(wx, wy, c.offset_x, c.offset_y, c.width, c.height)
        })
    }

    /// The collider box, or a 1px probe around the origin for
    /// collider-less entities (keeps them indexable and groundable).
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        self.aabb().unwrap_or_else(|| {
            Aabb::new(self.wx - 0.5, self.wy - 0.5, self.wx + 0.5, self.wy + 0.5)
        })
    }

    /// The vertical extent `[wz, wz + physical_height]` of the body.
    #[must_use]
    pub fn z_extent(&self) -> (f32, f32) {
        let h = self.collider.map_or(0.0, |c| c.physical_height);
        (self.wz, self.wz + h)
    }

    /// Whether the entity is standing on ground.
    #[inline]
    #[must_use]
    pub const fn grounded(&self) -> bool {
        self.jump_vz.is_none()
    }

    /// Records the pre-step position for descended-through queries.
    pub fn record_prev(&mut self) {
        self.prev_wx = self.wx;
        self.prev_wy = self.wy;
        self.prev_wz = self.wz;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_table_alignment() {
        // Discriminants must equal the name-table index.
        for (i, name) in KIND_NAMES.iter().enumerate() {
            let kind = EntityKind::from_index(i as u16).unwrap();
            assert_eq!(kind.type_index() as usize, i);
            assert_eq!(kind.name(), *name);
        }
        assert!(EntityKind::from_index(KIND_NAMES.len() as u16).is_none());
    }

    #[test]
    fn test_kind_table_sorted() {
        let mut sorted = KIND_NAMES.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, KIND_NAMES);
    }

    #[test]
    fn test_sprite_state_pack() {
        let s = SpriteState { facing: 2, animation: 7, flags: SpriteState::FLAG_MOVING };
        assert_eq!(SpriteState::unpack(s.pack()), s);
    }

    #[test]
    fn test_entity_aabb() {
        let e = Entity::new(EntityId(1), EntityKind::Player, 100.0, 50.0);
        let b = e.aabb().unwrap();
        assert_eq!(b.min_x, 95.0);
        assert_eq!(b.max_x, 105.0);
        assert_eq!(b.min_y, 47.0);
        assert_eq!(b.max_y, 53.0);
    }

    #[test]
    fn test_gem_has_no_collider() {
        let e = Entity::new(EntityId(2), EntityKind::Gem, 0.0, 0.0);
        assert!(e.aabb().is_none());
    }
}
