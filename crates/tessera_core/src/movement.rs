//! The shared movement kernel.
//!
//! Executed bit-identically by the server tick and the client predictor.
//! Inputs and outputs are value types; side effects are confined to the
//! passed-in entity. The kernel is parameterized by a [`MovementContext`]
//! providing read-only world queries, so each side supplies its own view of
//! the world (authoritative store vs. client chunk cache).
//!
//! The kernel never fails - it only refuses translations.

use crate::entity::{Entity, EntityId, SpriteState};
use crate::input::MoveIntent;
use crate::math::{Aabb, Vec2};
use crate::params::PhysicsParams;
use crate::tile::{road, CollisionFlags, Terrain};
use crate::{ELEVATION_PX, STEP_UP_THRESHOLD};

/// Read-only world queries the kernel steps against.
///
/// A capability interface rather than a bag of closures: the server
/// implements it over the authoritative chunk store and spatial index, the
/// client over its projected chunk cache.
pub trait MovementContext {
    /// Collision flags of the tile at `(tx, ty)`. Unloaded tiles report
    /// whatever the implementation considers safe (usually `NONE`).
    fn tile_collision(&self, tx: i32, ty: i32) -> CollisionFlags;

    /// Elevation level (0..=3) of the tile at `(tx, ty)`.
    fn tile_height(&self, tx: i32, ty: i32) -> u8;

    /// True if a solid entity other than `exclude` overlaps `aabb` within
    /// the Z band `[z_lo, z_hi]`.
    fn entity_blocked(&self, aabb: &Aabb, z_lo: f32, z_hi: f32, exclude: EntityId) -> bool;

    /// True if a prop wall overlaps `aabb` within the Z band `[z_lo, z_hi]`.
    fn prop_blocked(&self, aabb: &Aabb, z_lo: f32, z_hi: f32) -> bool;

    /// The highest walkable prop or entity surface under `aabb` whose top
    /// does not exceed `max_z`. Terrain is handled by the kernel itself.
    fn walkable_surface_under(&self, aabb: &Aabb, max_z: f32, exclude: EntityId) -> Option<f32>;

    /// Global noclip override (per-entity noclip is on the entity).
    fn noclip(&self) -> bool {
        false
    }

    /// Terrain under a tile, for surface-speed modifiers.
    fn terrain_at(&self, _tx: i32, _ty: i32) -> Option<Terrain> {
        None
    }

    /// Road code under a tile, for surface-speed modifiers.
    fn road_at(&self, _tx: i32, _ty: i32) -> Option<u8> {
        None
    }
}

/// One full kernel step: horizontal movement, jump initiation, vertical
/// integration and ground tracking, in that order.
///
/// `dt` is the sub-step duration - the tick DT, or the input's own `dt`
/// when draining queued inputs.
pub fn step<C: MovementContext>(
    entity: &mut Entity,
    intent: &MoveIntent,
    params: &PhysicsParams,
    ctx: &C,
    dt: f32,
) {
    if dt <= 0.0 {
        return;
    }
    entity.record_prev();
    let intent = intent.clamped();

    if entity.noclip || ctx.noclip() {
        step_noclip(entity, &intent, params, dt);
        return;
    }

    let wish = Vec2::new(intent.dx, intent.dy);
    let wish_dir = wish.normalized();
    let mut wish_speed = wish.length().min(1.0) * params.base_speed;
    if intent.sprinting {
        wish_speed *= params.sprint_multiplier;
    }
    wish_speed *= surface_speed_scale(entity, ctx);

    if entity.grounded() {
        apply_friction(entity, params, dt);
        accelerate(entity, wish_dir, wish_speed, params.accelerate, dt);
        if intent.jump && (intent.jump_pressed || !params.no_bunny_hop) {
            entity.jump_vz = Some(params.effective_jump_impulse());
        }
    } else {
        let capped = wish_speed.min(params.air_wish_cap);
        accelerate(entity, wish_dir, capped, params.air_accelerate, dt);
    }

    update_sprite(entity, &intent, wish_dir);

    let dx = (entity.vx + entity.knock_vx) * dt;
    let dy = (entity.vy + entity.knock_vy) * dt;
    translate_swept(entity, dx, dy, ctx);

    integrate_vertical(entity, params, ctx, dt);
    track_ground(entity, ctx);
}

/// Noclip: raw translation, no collision, no gravity, no velocity.
fn step_noclip(entity: &mut Entity, intent: &MoveIntent, params: &PhysicsParams, dt: f32) {
    let mut speed = params.noclip_speed;
    if intent.sprinting {
        speed *= params.sprint_multiplier;
    }
    entity.wx += intent.dx * speed * dt;
    entity.wy += intent.dy * speed * dt;
    entity.vx = 0.0;
    entity.vy = 0.0;
    update_sprite(entity, intent, Vec2::new(intent.dx, intent.dy).normalized());
}

/// Ground friction with a stop-speed floor so low speeds die quickly.
fn apply_friction(entity: &mut Entity, params: &PhysicsParams, dt: f32) {
    let speed = (entity.vx * entity.vx + entity.vy * entity.vy).sqrt();
    if speed < 0.1 {
        entity.vx = 0.0;
        entity.vy = 0.0;
        return;
    }
    let control = speed.max(params.stop_speed);
    let drop = control * params.friction * dt;
    let scale = ((speed - drop) / speed).max(0.0);
    entity.vx *= scale;
    entity.vy *= scale;
}

/// Accelerates toward the wish direction, capped by the projected speed.
fn accelerate(entity: &mut Entity, wish_dir: Vec2, wish_speed: f32, accel: f32, dt: f32) {
    if wish_speed <= 0.0 || (wish_dir.x == 0.0 && wish_dir.y == 0.0) {
        return;
    }
    let current = entity.vx * wish_dir.x + entity.vy * wish_dir.y;
    let add = wish_speed - current;
    if add <= 0.0 {
        return;
    }
    let accel_speed = (accel * wish_speed * dt).min(add);
    entity.vx += accel_speed * wish_dir.x;
    entity.vy += accel_speed * wish_dir.y;
}

/// Surface-speed modifier from the feet tile (roads boost, sand and water
/// drag). Optional queries; contexts without the data report 1.0.
fn surface_speed_scale<C: MovementContext>(entity: &Entity, ctx: &C) -> f32 {
    let tx = crate::tile_of(entity.wx);
    let ty = crate::tile_of(entity.wy);
    if ctx.road_at(tx, ty).is_some_and(|r| r != road::NONE) {
        return 1.25;
    }
    match ctx.terrain_at(tx, ty) {
        Some(Terrain::Sand) => 0.85,
        Some(Terrain::Water) => 0.6,
        _ => 1.0,
    }
}

/// Facing and animation hints derived from the intent, kept in the kernel
/// so server and predictor agree on presentation state.
fn update_sprite(entity: &mut Entity, intent: &MoveIntent, wish_dir: Vec2) {
    let moving = wish_dir.x != 0.0 || wish_dir.y != 0.0;
    let mut flags = 0u8;
    if moving {
        flags |= SpriteState::FLAG_MOVING;
        entity.sprite.facing = if wish_dir.x.abs() >= wish_dir.y.abs() {
            if wish_dir.x >= 0.0 {
                2
            } else {
                1
            }
        } else if wish_dir.y >= 0.0 {
            0
        } else {
            3
        };
    }
    if intent.sprinting {
        flags |= SpriteState::FLAG_SPRINTING;
    }
    entity.sprite.flags = flags;
}

/// The collider box, or a 1px probe for collider-less entities.
fn aabb_or_point(entity: &Entity) -> Aabb {
    entity.bounds()
}

/// Axis-separated sweep: try X, then Y, refusing the blocked component and
/// zeroing its velocity. The Y test uses the post-X position so sliding
/// along walls works.
fn translate_swept<C: MovementContext>(entity: &mut Entity, dx: f32, dy: f32, ctx: &C) {
    if entity.collider.is_none() {
        entity.wx += dx;
        entity.wy += dy;
        return;
    }
    let (z_lo, z_hi) = entity.z_extent();

    if dx != 0.0 {
        let target = entity
            .aabb_at(entity.wx + dx, entity.wy)
            .unwrap_or_else(|| aabb_or_point(entity));
        if sweep_blocked(entity, &target, z_lo, z_hi, ctx) {
            entity.vx = 0.0;
        } else {
            entity.wx += dx;
        }
    }
    if dy != 0.0 {
        let target = entity
            .aabb_at(entity.wx, entity.wy + dy)
            .unwrap_or_else(|| aabb_or_point(entity));
        if sweep_blocked(entity, &target, z_lo, z_hi, ctx) {
            entity.vy = 0.0;
        } else {
            entity.wy += dy;
        }
    }
}

/// True if the translated box is refused by tiles, elevation, props or
/// entities. Blocking tests use Z-range overlap so entities pass over and
/// under each other when non-overlapping in Z.
fn sweep_blocked<C: MovementContext>(
    entity: &Entity,
    target: &Aabb,
    z_lo: f32,
    z_hi: f32,
    ctx: &C,
) -> bool {
    let (tx0, ty0, tx1, ty1) = target.tile_range();
    for ty in ty0..=ty1 {
        for tx in tx0..=tx1 {
            if ctx.tile_collision(tx, ty).is_solid() {
                return true;
            }
            let surface = f32::from(ctx.tile_height(tx, ty)) * ELEVATION_PX;
            if surface > entity.wz + STEP_UP_THRESHOLD {
                return true;
            }
        }
    }
    if ctx.prop_blocked(target, z_lo, z_hi) {
        return true;
    }
    ctx.entity_blocked(target, z_lo, z_hi, entity.id)
}

/// Highest terrain surface under the box.
fn terrain_peak_under<C: MovementContext>(aabb: &Aabb, ctx: &C) -> f32 {
    let (tx0, ty0, tx1, ty1) = aabb.tile_range();
    let mut peak = 0.0f32;
    for ty in ty0..=ty1 {
        for tx in tx0..=tx1 {
            let h = f32::from(ctx.tile_height(tx, ty)) * ELEVATION_PX;
            if h > peak {
                peak = h;
            }
        }
    }
    peak
}

/// Highest terrain surface under the box that the entity has descended
/// through (top at or below `prev_wz`), preventing an upward teleport onto
/// a surface the entity never crossed.
fn descended_terrain_under<C: MovementContext>(aabb: &Aabb, prev_wz: f32, ctx: &C) -> f32 {
    const EPS: f32 = 0.01;
    let (tx0, ty0, tx1, ty1) = aabb.tile_range();
    let mut peak = 0.0f32;
    for ty in ty0..=ty1 {
        for tx in tx0..=tx1 {
            let h = f32::from(ctx.tile_height(tx, ty)) * ELEVATION_PX;
            if h > peak && h <= prev_wz + EPS {
                peak = h;
            }
        }
    }
    peak
}

/// Gravity integration and landing resolution for airborne entities.
fn integrate_vertical<C: MovementContext>(
    entity: &mut Entity,
    params: &PhysicsParams,
    ctx: &C,
    dt: f32,
) {
    let Some(mut vz) = entity.jump_vz else {
        return;
    };
    vz -= params.gravity * params.time_scale * dt;
    entity.wz += vz * dt;
    entity.jump_vz = Some(vz);

    let aabb = aabb_or_point(entity);
    let mut ground = descended_terrain_under(&aabb, entity.prev_wz, ctx);
    if let Some(s) = ctx.walkable_surface_under(&aabb, entity.prev_wz + 0.01, entity.id) {
        if s > ground {
            ground = s;
        }
    }

    if vz <= 0.0 && entity.wz <= ground {
        entity.wz = ground;
        entity.ground_z = ground;
        entity.jump_vz = None;
        entity.jump_z = 0.0;
    } else {
        entity.jump_z = entity.wz - ground;
    }
}

/// Ground tracking for grounded entities: snap onto small ledges, start a
/// free-fall off large ones (if the kind can fall), keep `ground_z` fresh.
fn track_ground<C: MovementContext>(entity: &mut Entity, ctx: &C) {
    if !entity.grounded() {
        return;
    }
    let aabb = aabb_or_point(entity);
    let band = entity.wz + STEP_UP_THRESHOLD;
    let mut ground = terrain_peak_under(&aabb, ctx);
    if let Some(s) = ctx.walkable_surface_under(&aabb, band, entity.id) {
        if s > ground {
            ground = s;
        }
    }

    if ground >= entity.wz {
        // The sweep only admits surfaces within the step threshold.
        entity.wz = ground;
    } else {
        let drop = entity.wz - ground;
        if drop <= STEP_UP_THRESHOLD || !entity.kind.can_fall() {
            entity.wz = ground;
        } else {
            entity.jump_vz = Some(0.0);
        }
    }
    entity.ground_z = ground;
    entity.jump_z = entity.wz - ground;
}
