//! Chunk snapshot codec.
//!
//! A snapshot carries `(cx, cy, revision)` plus every tile array at fixed
//! length, little-endian. The same encoding is used on the wire (inside
//! `sync-chunks`) and in the persistence store, so a flushed chunk is
//! byte-identical to a transmitted one.

use tessera_core::{MAX_BLEND_LAYERS, SUBGRID_DIM, TILES_PER_CHUNK};
use tessera_procedural::chunk::{Chunk, ChunkPos};

use super::wire::{ByteReader, ByteWriter};
use super::ProtocolError;

/// A transmitted chunk: position, revision, and full content.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkSnapshot {
    /// Chunk X.
    pub cx: i32,
    /// Chunk Y.
    pub cy: i32,
    /// Content revision at capture time.
    pub revision: u32,
    /// The tile arrays.
    pub chunk: Box<Chunk>,
}

impl ChunkSnapshot {
    /// Captures a snapshot of a live chunk.
    #[must_use]
    pub fn capture(pos: ChunkPos, chunk: &Chunk) -> Self {
        Self {
            cx: pos.x,
            cy: pos.y,
            revision: chunk.revision,
            chunk: Box::new(chunk.clone()),
        }
    }

    /// The chunk position.
    #[must_use]
    pub const fn pos(&self) -> ChunkPos {
        ChunkPos::new(self.cx, self.cy)
    }

    /// Materializes the snapshot into a live chunk (clean, art cache
    /// invalid).
    #[must_use]
    pub fn into_chunk(self) -> Chunk {
        let mut chunk = *self.chunk;
        chunk.revision = self.revision;
        chunk.dirty = false;
        chunk.autotile_computed = false;
        chunk
    }

    /// Encodes to a standalone buffer (persistence path).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(8192);
        encode_chunk_snapshot(&mut w, self);
        w.into_bytes()
    }

    /// Decodes from a standalone buffer (persistence path).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = ByteReader::new(bytes);
        decode_chunk_snapshot(&mut r)
    }
}

/// Writes a chunk snapshot body.
pub(super) fn encode_chunk_snapshot(w: &mut ByteWriter, snapshot: &ChunkSnapshot) {
    let chunk = &snapshot.chunk;
    w.put_i32(snapshot.cx);
    w.put_i32(snapshot.cy);
    w.put_u32(snapshot.revision);
    w.put_bytes(&chunk.terrain);
    w.put_bytes(&chunk.detail);
    w.put_bytes(&chunk.collision);
    for v in &chunk.blend_base {
        w.put_u16(*v);
    }
    for stack in &chunk.blend_layers {
        for v in stack {
            w.put_u16(*v);
        }
    }
    w.put_bytes(&chunk.subgrid);
    w.put_bytes(&chunk.height_grid);
    w.put_bytes(&chunk.road_grid);
}

/// Reads a chunk snapshot body.
pub(super) fn decode_chunk_snapshot(
    r: &mut ByteReader<'_>,
) -> Result<ChunkSnapshot, ProtocolError> {
    let cx = r.get_i32()?;
    let cy = r.get_i32()?;
    let revision = r.get_u32()?;

    let mut chunk = Box::new(Chunk::new());
    chunk.terrain.copy_from_slice(r.get_bytes(TILES_PER_CHUNK)?);
    chunk.detail.copy_from_slice(r.get_bytes(TILES_PER_CHUNK)?);
    chunk.collision.copy_from_slice(r.get_bytes(TILES_PER_CHUNK)?);
    for v in &mut chunk.blend_base {
        *v = r.get_u16()?;
    }
    for stack in &mut chunk.blend_layers {
        for v in stack.iter_mut() {
            *v = r.get_u16()?;
        }
    }
    chunk
        .subgrid
        .copy_from_slice(r.get_bytes(SUBGRID_DIM * SUBGRID_DIM)?);
    chunk
        .height_grid
        .copy_from_slice(r.get_bytes(TILES_PER_CHUNK)?);
    chunk
        .road_grid
        .copy_from_slice(r.get_bytes(TILES_PER_CHUNK)?);
    chunk.revision = revision;
    chunk.dirty = false;

    Ok(ChunkSnapshot { cx, cy, revision, chunk })
}

/// Serialized size of one snapshot: header plus the fixed arrays.
pub const CHUNK_SNAPSHOT_SIZE: usize = 12
    + TILES_PER_CHUNK * 3
    + TILES_PER_CHUNK * 2
    + TILES_PER_CHUNK * MAX_BLEND_LAYERS * 2
    + SUBGRID_DIM * SUBGRID_DIM
    + TILES_PER_CHUNK * 2;

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::tile::Terrain;
    use tessera_procedural::generator::{Generator, NaturalGenerator};
    use tessera_procedural::noise::WorldSeed;

    #[test]
    fn test_snapshot_roundtrip() {
        let generator = NaturalGenerator::new(WorldSeed::new(11));
        let mut chunk = Chunk::new();
        let pos = ChunkPos::new(3, -2);
        generator.generate(&mut chunk, pos);
        chunk.set_terrain(4, 4, Terrain::Stone);
        chunk.set_height(1, 2, 3);
        chunk.push_blend_layer(0, 0, 42);

        let snapshot = ChunkSnapshot::capture(pos, &chunk);
        let bytes = snapshot.to_bytes();
        assert_eq!(bytes.len(), CHUNK_SNAPSHOT_SIZE);

        let decoded = ChunkSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.cx, 3);
        assert_eq!(decoded.cy, -2);
        assert_eq!(decoded.revision, chunk.revision);

        let restored = decoded.into_chunk();
        assert_eq!(restored.terrain, chunk.terrain);
        assert_eq!(restored.collision, chunk.collision);
        assert_eq!(restored.subgrid, chunk.subgrid);
        assert_eq!(restored.blend_layers, chunk.blend_layers);
        assert_eq!(restored.height_grid, chunk.height_grid);
        assert!(!restored.dirty, "restored chunks are clean");
    }

    #[test]
    fn test_truncated_snapshot_rejected() {
        let snapshot = ChunkSnapshot::capture(ChunkPos::new(0, 0), &Chunk::new());
        let bytes = snapshot.to_bytes();
        assert!(ChunkSnapshot::from_bytes(&bytes[..100]).is_err());
    }
}
