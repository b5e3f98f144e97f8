//! Generation strategies.
//!
//! A [`Generator`] deterministically fills a chunk from `(seed, cx, cy)`:
//! no hidden state besides the seed, so regenerating after a persistence
//! read miss yields the identical chunk.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use tessera_core::tile::Terrain;
use tessera_core::{CHUNK_SIZE, SUBGRID_DIM};

use crate::biome::Biome;
use crate::chunk::{Chunk, ChunkPos};
use crate::noise::{Fbm, WorldSeed};

/// A chunk-content strategy.
pub trait Generator: Send + Sync {
    /// Fills `chunk` for position `pos`. Must be a pure function of the
    /// generator's seed and `pos`.
    fn generate(&self, chunk: &mut Chunk, pos: ChunkPos);
}

/// Noise-driven terrain: multi-octave elevation and moisture fields
/// classified into biomes, corner enforcement, and detail scatter.
pub struct NaturalGenerator {
    seed: WorldSeed,
    elevation: Fbm,
    moisture: Fbm,
}

/// Sub-seed purposes.
const PURPOSE_ELEVATION: u64 = 1;
const PURPOSE_MOISTURE: u64 = 2;
const PURPOSE_SCATTER: u64 = 3;

impl NaturalGenerator {
    /// Creates a generator for a world seed.
    #[must_use]
    pub fn new(seed: WorldSeed) -> Self {
        Self {
            seed,
            elevation: Fbm::new(seed.derive(PURPOSE_ELEVATION), 5, 0.012),
            moisture: Fbm::new(seed.derive(PURPOSE_MOISTURE), 3, 0.02),
        }
    }

    /// Samples the biome at a tile coordinate.
    #[must_use]
    pub fn biome_at(&self, tx: i32, ty: i32) -> Biome {
        let e = self.elevation.sample(tx as f32, ty as f32);
        let m = self.moisture.sample(tx as f32, ty as f32);
        Biome::classify(e, m)
    }
}

impl Generator for NaturalGenerator {
    fn generate(&self, chunk: &mut Chunk, pos: ChunkPos) {
        let (otx, oty) = pos.origin_tile();

        for ly in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                let tx = otx + lx as i32;
                let ty = oty + ly as i32;
                let e = self.elevation.sample(tx as f32, ty as f32);
                let m = self.moisture.sample(tx as f32, ty as f32);
                let biome = Biome::classify(e, m);
                let terrain = biome.terrain();

                let i = Chunk::tile_index(lx, ly);
                chunk.terrain[i] = terrain as u8;
                chunk.collision[i] = terrain.collision().0;
                chunk.height_grid[i] = Biome::height_level(e);
                chunk.blend_base[i] = terrain as u16;
            }
        }

        // Corner enforcement: corners sample the same global fields at
        // half-tile resolution, so shared boundary samples agree across
        // chunks by construction.
        for lsy in 0..SUBGRID_DIM {
            for lsx in 0..SUBGRID_DIM {
                let cx = otx as f32 + lsx as f32 * 0.5;
                let cy = oty as f32 + lsy as f32 * 0.5;
                let e = self.elevation.sample(cx, cy);
                let m = self.moisture.sample(cx, cy);
                chunk.subgrid[Chunk::corner_index(lsx, lsy)] =
                    Biome::classify(e, m).terrain() as u8;
            }
        }

        // Detail scatter: a chunk-local deterministic stream.
        let scatter_seed = self
            .seed
            .derive(PURPOSE_SCATTER)
            .derive((pos.x as u64) << 32 ^ (pos.y as u64 & 0xffff_ffff))
            .value();
        let mut rng = ChaCha8Rng::seed_from_u64(scatter_seed);
        for i in 0..chunk.terrain.len() {
            let biome = {
                let tx = otx + (i % CHUNK_SIZE) as i32;
                let ty = oty + (i / CHUNK_SIZE) as i32;
                self.biome_at(tx, ty)
            };
            let roll: f32 = rng.gen();
            if roll < biome.scatter_chance() {
                chunk.detail[i] = biome.scatter_detail();
            }
        }

        chunk.revision = 1;
        chunk.dirty = false;
        chunk.autotile_computed = false;
    }
}

/// Fills every tile with one terrain, flat. The test and lobby world.
pub struct FlatGenerator {
    terrain: Terrain,
}

impl FlatGenerator {
    /// Creates a flat-fill generator.
    #[must_use]
    pub const fn new(terrain: Terrain) -> Self {
        Self { terrain }
    }
}

impl Default for FlatGenerator {
    fn default() -> Self {
        Self::new(Terrain::Grass)
    }
}

impl Generator for FlatGenerator {
    fn generate(&self, chunk: &mut Chunk, _pos: ChunkPos) {
        chunk.terrain = [self.terrain as u8; tessera_core::TILES_PER_CHUNK];
        chunk.collision = [self.terrain.collision().0; tessera_core::TILES_PER_CHUNK];
        chunk.subgrid =
            [self.terrain as u8; SUBGRID_DIM * SUBGRID_DIM];
        chunk.revision = 1;
        chunk.dirty = false;
        chunk.autotile_computed = false;
    }
}
