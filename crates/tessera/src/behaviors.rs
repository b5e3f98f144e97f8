//! The gameplay behavior pack.
//!
//! Everything here is a subscriber on the realm's tick hooks - the sync
//! core carries the contract (inputs, movement, physics, timers,
//! broadcast) and these behaviors show how content plugs into it: wander
//! AI, gem pickup, buddy scares, hostile-vs-fire, mounting.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use tessera_core::entity::{EntityId, EntityKind, WanderMode, WanderState};
use tessera_core::Vec2;
use tessera_networking::server::realm::{Realm, RealmEvent, TickHooks};

/// Seconds between AI decision steps. Movement still integrates every
/// tick; only decisions run on this cadence (the accumulator pattern).
const AI_TICK_PERIOD: f32 = 0.2;

/// Wander target radius around the current position.
const WANDER_RADIUS: f32 = 64.0;

/// Hostiles notice players inside this radius.
const CHASE_RADIUS: f32 = 120.0;

/// Buddies flee hostiles inside this radius.
const SCARE_RADIUS: f32 = 80.0;

/// Gems are collected inside this radius.
const GEM_PICKUP_RADIUS: f32 = 14.0;

/// Hostile contact distance.
const TOUCH_RADIUS: f32 = 10.0;

/// Fires destroy hostiles inside this radius.
const FIRE_RADIUS: f32 = 14.0;

/// Mount/dismount interaction distance.
const MOUNT_RADIUS: f32 = 20.0;

/// Invincibility window after a hostile touch, in ticks.
const INVINCIBILITY_TICKS: u32 = 45;

/// Death animation length for burned hostiles, in ticks.
const DEATH_TICKS: u16 = 20;

/// Knockback impulse from a hostile touch, px/s.
const KNOCKBACK_SPEED: f32 = 220.0;

/// The standard behavior pack.
pub struct GameplayHooks;

impl GameplayHooks {
    /// Creates hooks for a realm.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// A factory suitable for `GameServer::with_hooks`.
    #[must_use]
    pub fn factory() -> tessera_networking::server::HooksFactory {
        Box::new(|_world_id| Box::new(Self::new()) as Box<dyn TickHooks>)
    }
}

impl Default for GameplayHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickHooks for GameplayHooks {
    fn ai(&mut self, realm: &mut Realm, dt: f32) {
        wander_ai(realm, dt);
    }

    fn gameplay(&mut self, realm: &mut Realm, _dt: f32) {
        collect_gems(realm);
        scare_buddies(realm);
        burn_hostiles(realm);
        hostile_touches(realm);
        mount_interactions(realm);
    }
}

fn positions_of(realm: &Realm, kind: EntityKind) -> Vec<(EntityId, Vec2)> {
    realm
        .entities
        .iter()
        .filter(|e| e.kind == kind)
        .map(|e| (e.id, Vec2::new(e.wx, e.wy)))
        .collect()
}

fn nearest(origin: Vec2, candidates: &[(EntityId, Vec2)]) -> Option<(EntityId, Vec2, f32)> {
    candidates
        .iter()
        .map(|&(id, at)| (id, at, origin.distance(at)))
        .min_by(|a, b| a.2.total_cmp(&b.2))
}

/// The wander/chase/flee state machine. Decisions run on the AI
/// accumulator; steering toward the current target runs every tick.
fn wander_ai(realm: &mut Realm, dt: f32) {
    let players = positions_of(realm, EntityKind::Player);
    let hostiles = positions_of(realm, EntityKind::Hostile);
    let tick = realm.tick;

    for id in realm.entities.ids() {
        let Some(entity) = realm.entities.get_mut(id) else {
            continue;
        };
        let wanders = matches!(
            entity.kind,
            EntityKind::Hostile | EntityKind::Buddy | EntityKind::Ghost
        );
        if !wanders {
            continue;
        }
        if entity.wander.is_none() {
            entity.wander = Some(WanderState::default());
        }
        let at = Vec2::new(entity.wx, entity.wy);

        entity.tick_accumulator += dt;
        while entity.tick_accumulator >= AI_TICK_PERIOD {
            entity.tick_accumulator -= AI_TICK_PERIOD;
            let mut rng = ChaCha8Rng::seed_from_u64(tick ^ (u64::from(id.0) << 32));
            let mut state = entity.wander.unwrap_or_default();

            match state.mode {
                WanderMode::Idle => {
                    if state.idle_steps > 0 {
                        state.idle_steps -= 1;
                    } else if rng.gen::<f32>() < 0.4 {
                        let angle = rng.gen::<f32>() * std::f32::consts::TAU;
                        state.mode = WanderMode::Wander;
                        state.target_x = at.x + angle.cos() * WANDER_RADIUS * rng.gen::<f32>();
                        state.target_y = at.y + angle.sin() * WANDER_RADIUS * rng.gen::<f32>();
                    }
                }
                WanderMode::Wander => {
                    let target = Vec2::new(state.target_x, state.target_y);
                    if at.distance(target) < 4.0 {
                        state.mode = WanderMode::Idle;
                        state.idle_steps = rng.gen_range(2..=8);
                    }
                }
                WanderMode::Chase | WanderMode::Flee | WanderMode::Follow => {
                    // Re-evaluated below against live positions.
                }
            }

            // Hostiles and ghosts pick up a chase when a player is near.
            if matches!(entity.kind, EntityKind::Hostile | EntityKind::Ghost) {
                match nearest(at, &players) {
                    Some((_, player_at, distance)) if distance < CHASE_RADIUS => {
                        state.mode = WanderMode::Chase;
                        state.target_x = player_at.x;
                        state.target_y = player_at.y;
                    }
                    _ if state.mode == WanderMode::Chase => {
                        state.mode = WanderMode::Idle;
                        state.idle_steps = 4;
                    }
                    _ => {}
                }
            }
            // Buddies flee nearby hostiles.
            if entity.kind == EntityKind::Buddy {
                match nearest(at, &hostiles) {
                    Some((_, hostile_at, distance)) if distance < SCARE_RADIUS => {
                        state.mode = WanderMode::Flee;
                        state.target_x = at.x + (at.x - hostile_at.x);
                        state.target_y = at.y + (at.y - hostile_at.y);
                    }
                    _ if state.mode == WanderMode::Flee => {
                        state.mode = WanderMode::Idle;
                        state.idle_steps = 2;
                    }
                    _ => {}
                }
            }

            entity.wander = Some(state);
        }

        // Steering: intent toward the target, every tick.
        let state = entity.wander.unwrap_or_default();
        match state.mode {
            WanderMode::Idle => {
                entity.intent.dx = 0.0;
                entity.intent.dy = 0.0;
            }
            _ => {
                let direction =
                    (Vec2::new(state.target_x, state.target_y) - at).normalized();
                entity.intent.dx = direction.x;
                entity.intent.dy = direction.y;
                entity.intent.sprinting = state.mode == WanderMode::Flee;
            }
        }
    }
}

/// Gems vanish into the nearest player standing on them.
fn collect_gems(realm: &mut Realm) {
    let players = positions_of(realm, EntityKind::Player);
    let gems = positions_of(realm, EntityKind::Gem);
    for (gem_id, gem_at) in gems {
        if let Some((player_id, _, distance)) = nearest(gem_at, &players) {
            if distance <= GEM_PICKUP_RADIUS {
                realm.despawn_entity(gem_id);
                realm.push_event(RealmEvent::GemCollected { player: player_id });
            }
        }
    }
}

/// Buddies standing next to a hostile startle even between AI decisions
/// (hop animation hint).
fn scare_buddies(realm: &mut Realm) {
    let hostiles = positions_of(realm, EntityKind::Hostile);
    for id in realm.entities.ids() {
        let Some(entity) = realm.entities.get_mut(id) else {
            continue;
        };
        if entity.kind != EntityKind::Buddy {
            continue;
        }
        let at = Vec2::new(entity.wx, entity.wy);
        let startled = hostiles
            .iter()
            .any(|(_, h)| at.distance(*h) < SCARE_RADIUS * 0.5);
        if startled && entity.grounded() {
            entity.jump_vz = Some(60.0);
        }
    }
}

/// Fires destroy hostiles that wander into them.
fn burn_hostiles(realm: &mut Realm) {
    let fires = positions_of(realm, EntityKind::Fire);
    for id in realm.entities.ids() {
        let Some(entity) = realm.entities.get_mut(id) else {
            continue;
        };
        if entity.kind != EntityKind::Hostile || entity.death_timer.is_some() {
            continue;
        }
        let at = Vec2::new(entity.wx, entity.wy);
        if fires.iter().any(|(_, f)| at.distance(*f) < FIRE_RADIUS) {
            entity.death_timer = Some(DEATH_TICKS);
            entity.flash_hidden = true;
        }
    }
}

/// A hostile touching a vulnerable player knocks them back and opens an
/// invincibility window.
fn hostile_touches(realm: &mut Realm) {
    let hostiles = positions_of(realm, EntityKind::Hostile);
    let mut hits = Vec::new();
    for entity in realm.entities.iter() {
        if entity.kind != EntityKind::Player || entity.invincible_ticks > 0 {
            continue;
        }
        let at = Vec2::new(entity.wx, entity.wy);
        if let Some((_, hostile_at, distance)) = nearest(at, &hostiles) {
            if distance < TOUCH_RADIUS {
                hits.push((entity.id, (at - hostile_at).normalized()));
            }
        }
    }
    for (player_id, away) in hits {
        if let Some(player) = realm.entities.get_mut(player_id) {
            player.invincible_ticks = INVINCIBILITY_TICKS;
            player.knock_vx = away.x * KNOCKBACK_SPEED;
            player.knock_vy = away.y * KNOCKBACK_SPEED;
        }
        realm.push_event(RealmEvent::Invincibility {
            player: player_id,
            duration_ticks: INVINCIBILITY_TICKS,
        });
    }
}

/// Jump next to a mount to ride it; jump again to hop off.
fn mount_interactions(realm: &mut Realm) {
    let mounts = positions_of(realm, EntityKind::Mount);
    let mut changes = Vec::new();
    for entity in realm.entities.iter() {
        if entity.kind != EntityKind::Player || !entity.intent.jump_pressed {
            continue;
        }
        if let Some(mount_id) = entity.parent_id {
            changes.push((entity.id, None, Some(mount_id)));
            continue;
        }
        let at = Vec2::new(entity.wx, entity.wy);
        if let Some((mount_id, _, distance)) = nearest(at, &mounts) {
            if distance < MOUNT_RADIUS {
                changes.push((entity.id, Some(mount_id), None));
            }
        }
    }
    for (player_id, mount_on, _dismount_from) in changes {
        let mount_height = mount_on
            .and_then(|m| realm.entities.get(m))
            .and_then(|m| m.collider)
            .map_or(20.0, |c| c.physical_height);
        let Some(player) = realm.entities.get_mut(player_id) else {
            continue;
        };
        match mount_on {
            Some(mount_id) => {
                player.parent_id = Some(mount_id);
                player.local_offset_x = 0.0;
                player.local_offset_y = -2.0;
                player.jump_z = mount_height;
                player.no_shadow = true;
                // Cancel the jump the press would otherwise trigger.
                player.jump_vz = None;
                realm.push_event(RealmEvent::Mounted {
                    player: player_id,
                    mount: Some(mount_id),
                });
            }
            None => {
                player.parent_id = None;
                player.jump_z = 0.0;
                player.no_shadow = false;
                realm.push_event(RealmEvent::Mounted { player: player_id, mount: None });
            }
        }
        if let Some(player) = realm.entities.get_mut(player_id) {
            player.intent.jump_pressed = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tessera_core::{MoveIntent, PhysicsParams};
    use tessera_procedural::generator::FlatGenerator;

    const DT: f32 = 1.0 / 30.0;

    fn realm_with_hooks() -> (Realm, GameplayHooks) {
        let realm = Realm::new(
            1,
            Box::new(FlatGenerator::default()),
            PhysicsParams::default(),
            HashMap::new(),
        );
        (realm, GameplayHooks::new())
    }

    #[test]
    fn test_gem_collected_by_nearby_player() {
        let (mut realm, mut hooks) = realm_with_hooks();
        let player = realm.spawn_entity(EntityKind::Player, 100.0, 100.0);
        let gem = realm.spawn_entity(EntityKind::Gem, 104.0, 100.0);

        hooks.gameplay(&mut realm, DT);

        assert!(realm.entities.get(gem).is_none(), "gem consumed");
        let events = realm.drain_events();
        assert!(events.contains(&RealmEvent::GemCollected { player }));
    }

    #[test]
    fn test_distant_gem_not_collected() {
        let (mut realm, mut hooks) = realm_with_hooks();
        realm.spawn_entity(EntityKind::Player, 100.0, 100.0);
        let gem = realm.spawn_entity(EntityKind::Gem, 300.0, 100.0);
        hooks.gameplay(&mut realm, DT);
        assert!(realm.entities.get(gem).is_some());
    }

    #[test]
    fn test_hostile_chases_near_player() {
        let (mut realm, mut hooks) = realm_with_hooks();
        realm.spawn_entity(EntityKind::Player, 150.0, 100.0);
        let hostile = realm.spawn_entity(EntityKind::Hostile, 100.0, 100.0);

        // Enough accumulated time for a decision step.
        for _ in 0..8 {
            hooks.ai(&mut realm, DT);
        }
        let e = realm.entities.get(hostile).unwrap();
        assert_eq!(e.wander.unwrap().mode, WanderMode::Chase);
        assert!(e.intent.dx > 0.0, "steering toward the player");
    }

    #[test]
    fn test_fire_destroys_hostile() {
        let (mut realm, mut hooks) = realm_with_hooks();
        realm.spawn_entity(EntityKind::Fire, 100.0, 100.0);
        let hostile = realm.spawn_entity(EntityKind::Hostile, 106.0, 100.0);

        hooks.gameplay(&mut realm, DT);
        assert_eq!(
            realm.entities.get(hostile).unwrap().death_timer,
            Some(DEATH_TICKS)
        );

        // The death countdown removes it.
        for _ in 0..DEATH_TICKS + 1 {
            realm.step_world(DT);
        }
        assert!(realm.entities.get(hostile).is_none());
    }

    #[test]
    fn test_hostile_touch_knockback_and_invincibility() {
        let (mut realm, mut hooks) = realm_with_hooks();
        let player = realm.spawn_entity(EntityKind::Player, 100.0, 100.0);
        realm.spawn_entity(EntityKind::Hostile, 106.0, 100.0);

        hooks.gameplay(&mut realm, DT);
        let p = realm.entities.get(player).unwrap();
        assert_eq!(p.invincible_ticks, INVINCIBILITY_TICKS);
        assert!(p.knock_vx < 0.0, "knocked away from the hostile");
        let events = realm.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, RealmEvent::Invincibility { player: p, .. } if *p == player)));

        // While invincible, a second touch does nothing.
        hooks.gameplay(&mut realm, DT);
        assert!(realm.drain_events().is_empty());
    }

    #[test]
    fn test_mount_and_dismount_by_jump_press() {
        let (mut realm, mut hooks) = realm_with_hooks();
        let player = realm.spawn_entity(EntityKind::Player, 100.0, 100.0);
        let mount = realm.spawn_entity(EntityKind::Mount, 112.0, 100.0);

        realm.entities.get_mut(player).unwrap().intent =
            MoveIntent { jump: true, jump_pressed: true, ..MoveIntent::default() };
        hooks.gameplay(&mut realm, DT);
        {
            let p = realm.entities.get(player).unwrap();
            assert_eq!(p.parent_id, Some(mount));
            assert!(p.no_shadow);
            assert_eq!(p.jump_z, 20.0);
        }
        assert!(realm
            .drain_events()
            .contains(&RealmEvent::Mounted { player, mount: Some(mount) }));

        realm.entities.get_mut(player).unwrap().intent.jump_pressed = true;
        hooks.gameplay(&mut realm, DT);
        assert_eq!(realm.entities.get(player).unwrap().parent_id, None);
    }

    #[test]
    fn test_buddy_flees_hostile() {
        let (mut realm, mut hooks) = realm_with_hooks();
        let buddy = realm.spawn_entity(EntityKind::Buddy, 100.0, 100.0);
        realm.spawn_entity(EntityKind::Hostile, 130.0, 100.0);

        for _ in 0..8 {
            hooks.ai(&mut realm, DT);
        }
        let b = realm.entities.get(buddy).unwrap();
        assert_eq!(b.wander.unwrap().mode, WanderMode::Flee);
        assert!(b.intent.dx < 0.0, "fleeing away on X");
        assert!(b.intent.sprinting, "flight is at sprint speed");
    }
}
