//! Movement kernel benchmark: worst-case swept steps across elevated tiles.

use criterion::{criterion_group, criterion_main, Criterion};

use tessera_core::movement::{self, MovementContext};
use tessera_core::{
    Aabb, CollisionFlags, Entity, EntityId, EntityKind, MoveIntent, PhysicsParams,
};

struct CheckerWorld;

impl MovementContext for CheckerWorld {
    fn tile_collision(&self, tx: i32, ty: i32) -> CollisionFlags {
        if (tx + ty) % 13 == 0 {
            CollisionFlags::SOLID
        } else {
            CollisionFlags::NONE
        }
    }

    fn tile_height(&self, tx: i32, ty: i32) -> u8 {
        ((tx.unsigned_abs() + ty.unsigned_abs()) % 2) as u8
    }

    fn entity_blocked(&self, _aabb: &Aabb, _z_lo: f32, _z_hi: f32, _exclude: EntityId) -> bool {
        false
    }

    fn prop_blocked(&self, _aabb: &Aabb, _z_lo: f32, _z_hi: f32) -> bool {
        false
    }

    fn walkable_surface_under(&self, _aabb: &Aabb, _max_z: f32, _exclude: EntityId) -> Option<f32> {
        None
    }
}

fn bench_kernel_step(c: &mut Criterion) {
    let params = PhysicsParams::default();
    let world = CheckerWorld;
    let intent = MoveIntent { dx: 0.7, dy: 0.7, sprinting: true, ..MoveIntent::default() };

    c.bench_function("kernel_step_100_entities", |b| {
        let mut entities: Vec<Entity> = (0..100)
            .map(|i| Entity::new(EntityId(i), EntityKind::Player, i as f32 * 24.0, 0.0))
            .collect();
        b.iter(|| {
            for e in &mut entities {
                movement::step(e, &intent, &params, &world, 1.0 / 30.0);
            }
        });
    });
}

criterion_group!(benches, bench_kernel_step);
criterion_main!(benches);
