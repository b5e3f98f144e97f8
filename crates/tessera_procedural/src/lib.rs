//! # Tessera Procedural
//!
//! The chunked world data model and its generators.
//!
//! A world is a sparse grid of fixed-size chunks ([`Chunk`]) held in a
//! [`ChunkStore`]. Chunks are generated on demand by a [`Generator`]
//! strategy - a pure function of `(seed, cx, cy)` - and afterwards mutated
//! only through revision-bumping editors, so the sync layer can ship a
//! chunk exactly when its revision advances.

pub mod biome;
pub mod chunk;
pub mod generator;
pub mod noise;
pub mod store;

pub use biome::Biome;
pub use chunk::{Chunk, ChunkPos};
pub use generator::{FlatGenerator, Generator, NaturalGenerator};
pub use noise::{Fbm, NoiseField, WorldSeed};
pub use store::ChunkStore;
