//! The chunk store: the realm's single source of world-tile truth.
//!
//! Single-threaded within a tick by design; the realm owns its store and
//! never shares it across workers.

use std::collections::HashMap;

use tessera_core::tile::{CollisionFlags, Terrain};
use tessera_core::{CHUNK_SIZE, SUBGRID_DIM};

use crate::chunk::{Chunk, ChunkPos};
use crate::generator::Generator;

/// Subgrid samples per chunk axis, minus the shared edge.
const SUBGRID_STRIDE: i32 = (SUBGRID_DIM - 1) as i32;

/// A sparse map of loaded chunks with editor entry points that keep
/// revisions, collision and seam caches coherent.
#[derive(Default)]
pub struct ChunkStore {
    chunks: HashMap<ChunkPos, Chunk>,
}

impl ChunkStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { chunks: HashMap::new() }
    }

    /// Number of loaded chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True if no chunks are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Looks up a loaded chunk.
    #[must_use]
    pub fn get(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.chunks.get(&pos)
    }

    /// Looks up a loaded chunk mutably. Callers must go through the typed
    /// mutators (or `touch`) for any content change.
    pub fn get_mut(&mut self, pos: ChunkPos) -> Option<&mut Chunk> {
        self.chunks.get_mut(&pos)
    }

    /// Inserts a chunk (e.g. restored from persistence).
    pub fn put(&mut self, pos: ChunkPos, chunk: Chunk) {
        self.chunks.insert(pos, chunk);
    }

    /// Removes and returns a chunk.
    pub fn remove(&mut self, pos: ChunkPos) -> Option<Chunk> {
        self.chunks.remove(&pos)
    }

    /// Iterates over loaded chunks.
    pub fn entries(&self) -> impl Iterator<Item = (ChunkPos, &Chunk)> {
        self.chunks.iter().map(|(p, c)| (*p, c))
    }

    /// Iterates mutably over loaded chunks.
    pub fn entries_mut(&mut self) -> impl Iterator<Item = (ChunkPos, &mut Chunk)> {
        self.chunks.iter_mut().map(|(p, c)| (*p, c))
    }

    /// Returns the chunk at `pos`, generating it if missing.
    pub fn get_or_create(&mut self, pos: ChunkPos, generator: &dyn Generator) -> &mut Chunk {
        self.chunks.entry(pos).or_insert_with(|| {
            let mut chunk = Chunk::new();
            generator.generate(&mut chunk, pos);
            chunk
        })
    }

    // -----------------------------------------------------------------
    // Tile queries (global tile coordinates). Unloaded chunks report
    // inert defaults; the kernel treats those as open flat ground.
    // -----------------------------------------------------------------

    /// Collision flags at a global tile.
    #[must_use]
    pub fn collision_at(&self, tx: i32, ty: i32) -> CollisionFlags {
        let (pos, lx, ly) = Self::locate(tx, ty);
        self.chunks
            .get(&pos)
            .map_or(CollisionFlags::NONE, |c| {
                CollisionFlags(c.collision[Chunk::tile_index(lx, ly)])
            })
    }

    /// Elevation level at a global tile.
    #[must_use]
    pub fn height_at(&self, tx: i32, ty: i32) -> u8 {
        let (pos, lx, ly) = Self::locate(tx, ty);
        self.chunks
            .get(&pos)
            .map_or(0, |c| c.height_grid[Chunk::tile_index(lx, ly)])
    }

    /// Terrain at a global tile, if the chunk is loaded.
    #[must_use]
    pub fn terrain_at(&self, tx: i32, ty: i32) -> Option<Terrain> {
        let (pos, lx, ly) = Self::locate(tx, ty);
        self.chunks.get(&pos).map(|c| c.terrain_at(lx, ly))
    }

    /// Road code at a global tile, if the chunk is loaded.
    #[must_use]
    pub fn road_at(&self, tx: i32, ty: i32) -> Option<u8> {
        let (pos, lx, ly) = Self::locate(tx, ty);
        self.chunks
            .get(&pos)
            .map(|c| c.road_grid[Chunk::tile_index(lx, ly)])
    }

    // -----------------------------------------------------------------
    // Editors (global coordinates)
    // -----------------------------------------------------------------

    /// Edits terrain (and its implied collision) at a global tile,
    /// generating the chunk if needed.
    pub fn set_terrain_tile(&mut self, tx: i32, ty: i32, terrain: Terrain, generator: &dyn Generator) {
        let (pos, lx, ly) = Self::locate(tx, ty);
        self.get_or_create(pos, generator).set_terrain(lx, ly, terrain);
        self.invalidate_seam_neighbors(pos, lx, ly);
    }

    /// Edits the elevation level at a global tile.
    pub fn set_height(&mut self, tx: i32, ty: i32, height: u8, generator: &dyn Generator) {
        let (pos, lx, ly) = Self::locate(tx, ty);
        self.get_or_create(pos, generator).set_height(lx, ly, height);
        self.invalidate_seam_neighbors(pos, lx, ly);
    }

    /// Edits the road code at a global tile.
    pub fn set_road(&mut self, tx: i32, ty: i32, road: u8, generator: &dyn Generator) {
        let (pos, lx, ly) = Self::locate(tx, ty);
        self.get_or_create(pos, generator).set_road(lx, ly, road);
        self.invalidate_seam_neighbors(pos, lx, ly);
    }

    /// Edits the detail code at a global tile.
    pub fn set_detail(&mut self, tx: i32, ty: i32, detail: u8, generator: &dyn Generator) {
        let (pos, lx, ly) = Self::locate(tx, ty);
        self.get_or_create(pos, generator).set_detail(lx, ly, detail);
    }

    /// Writes a corner sample at global subgrid coordinates, writing
    /// through to every chunk that shares the sample (up to three
    /// neighbors), so sampling any owner yields the same value.
    pub fn set_corner(&mut self, gsx: i32, gsy: i32, value: u8, generator: &dyn Generator) {
        for (pos, lsx, lsy) in Self::corner_owners(gsx, gsy) {
            self.get_or_create(pos, generator).set_corner(lsx, lsy, value);
        }
    }

    /// Reads a corner sample from its primary owner.
    #[must_use]
    pub fn corner(&self, gsx: i32, gsy: i32) -> Option<u8> {
        let cx = gsx.div_euclid(SUBGRID_STRIDE);
        let cy = gsy.div_euclid(SUBGRID_STRIDE);
        let lsx = (gsx - cx * SUBGRID_STRIDE) as usize;
        let lsy = (gsy - cy * SUBGRID_STRIDE) as usize;
        self.chunks
            .get(&ChunkPos::new(cx, cy))
            .map(|c| c.corner(lsx, lsy))
    }

    /// Bumps every loaded chunk's revision without marking it dirty,
    /// forcing clients to resync while skipping a pointless flush.
    pub fn force_resync_all(&mut self) {
        for chunk in self.chunks.values_mut() {
            chunk.revision = chunk.revision.wrapping_add(1).max(1);
            chunk.autotile_computed = false;
        }
    }

    /// Positions eligible for eviction: not covered by any visible range
    /// and not dirty. The caller decides what to do with the chunks.
    #[must_use]
    pub fn evict_positions(&self, visible: &[(i32, i32, i32, i32)]) -> Vec<ChunkPos> {
        self.chunks
            .iter()
            .filter(|(pos, chunk)| {
                let covered = visible.iter().any(|&(x0, y0, x1, y1)| {
                    pos.x >= x0 && pos.x <= x1 && pos.y >= y0 && pos.y <= y1
                });
                !covered && !chunk.dirty
            })
            .map(|(pos, _)| *pos)
            .collect()
    }

    /// Unloads every chunk that no visible range covers and whose dirty
    /// bit is clear. Returns the evicted positions.
    pub fn evict_unused(&mut self, visible: &[(i32, i32, i32, i32)]) -> Vec<ChunkPos> {
        let mut evicted = Vec::new();
        self.chunks.retain(|pos, chunk| {
            let covered = visible.iter().any(|&(x0, y0, x1, y1)| {
                pos.x >= x0 && pos.x <= x1 && pos.y >= y0 && pos.y <= y1
            });
            if covered || chunk.dirty {
                true
            } else {
                evicted.push(*pos);
                false
            }
        });
        evicted
    }

    /// Positions of every dirty chunk.
    #[must_use]
    pub fn dirty_positions(&self) -> Vec<ChunkPos> {
        self.chunks
            .iter()
            .filter(|(_, c)| c.dirty)
            .map(|(p, _)| *p)
            .collect()
    }

    // -----------------------------------------------------------------

    /// Global tile to (chunk, local) coordinates.
    fn locate(tx: i32, ty: i32) -> (ChunkPos, usize, usize) {
        let pos = ChunkPos::from_tile(tx, ty);
        let lx = tx.rem_euclid(CHUNK_SIZE as i32) as usize;
        let ly = ty.rem_euclid(CHUNK_SIZE as i32) as usize;
        (pos, lx, ly)
    }

    /// Every (chunk, local-subgrid) owner of a global corner sample.
    ///
    /// A chunk owns local samples `0..=SUBGRID_STRIDE`; samples on the
    /// stride boundary are shared with the previous chunk on that axis.
    fn corner_owners(gsx: i32, gsy: i32) -> Vec<(ChunkPos, usize, usize)> {
        let cx = gsx.div_euclid(SUBGRID_STRIDE);
        let cy = gsy.div_euclid(SUBGRID_STRIDE);
        let lsx = gsx - cx * SUBGRID_STRIDE;
        let lsy = gsy - cy * SUBGRID_STRIDE;

        let mut x_owners = vec![(cx, lsx as usize)];
        if lsx == 0 {
            x_owners.push((cx - 1, SUBGRID_STRIDE as usize));
        }
        let mut y_owners = vec![(cy, lsy as usize)];
        if lsy == 0 {
            y_owners.push((cy - 1, SUBGRID_STRIDE as usize));
        }

        let mut owners = Vec::with_capacity(4);
        for &(ox, olsx) in &x_owners {
            for &(oy, olsy) in &y_owners {
                owners.push((ChunkPos::new(ox, oy), olsx, olsy));
            }
        }
        owners
    }

    /// Invalidates the autotile cache of loaded neighbors when an edit
    /// touches a shared boundary tile, so art recomputes across the seam.
    fn invalidate_seam_neighbors(&mut self, pos: ChunkPos, lx: usize, ly: usize) {
        let mut offsets: Vec<(i32, i32)> = Vec::with_capacity(3);
        let last = CHUNK_SIZE - 1;
        if lx == 0 {
            offsets.push((-1, 0));
        }
        if lx == last {
            offsets.push((1, 0));
        }
        if ly == 0 {
            offsets.push((0, -1));
        }
        if ly == last {
            offsets.push((0, 1));
        }
        // Corner tiles also touch the diagonal neighbor.
        if (lx == 0 || lx == last) && (ly == 0 || ly == last) {
            let ox = if lx == 0 { -1 } else { 1 };
            let oy = if ly == 0 { -1 } else { 1 };
            offsets.push((ox, oy));
        }
        for (ox, oy) in offsets {
            if let Some(neighbor) = self.chunks.get_mut(&ChunkPos::new(pos.x + ox, pos.y + oy)) {
                neighbor.autotile_computed = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::FlatGenerator;

    fn flat() -> FlatGenerator {
        FlatGenerator::default()
    }

    #[test]
    fn test_get_or_create_generates_once() {
        let mut store = ChunkStore::new();
        let generator = flat();
        let rev = store.get_or_create(ChunkPos::new(2, 2), &generator).revision;
        assert_eq!(rev, 1);
        store.get_or_create(ChunkPos::new(2, 2), &generator).set_height(0, 0, 1);
        // Second call returns the edited chunk, not a fresh one.
        assert_eq!(store.get_or_create(ChunkPos::new(2, 2), &generator).revision, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_edit_bumps_revision_via_store() {
        let mut store = ChunkStore::new();
        let generator = flat();
        store.set_terrain_tile(5, 5, Terrain::Stone, &generator);
        let chunk = store.get(ChunkPos::new(0, 0)).unwrap();
        assert_eq!(chunk.revision, 2); // 1 from generation, +1 from the edit
        assert!(chunk.dirty);
        assert!(store.collision_at(5, 5).is_solid());
    }

    #[test]
    fn test_corner_write_through_four_owners() {
        let mut store = ChunkStore::new();
        let generator = flat();
        // The corner at the intersection of chunks (0,0), (1,0), (0,1), (1,1).
        let gsx = SUBGRID_STRIDE;
        let gsy = SUBGRID_STRIDE;
        store.set_corner(gsx, gsy, 7, &generator);

        assert_eq!(store.len(), 4, "all four owners materialized");
        let s = SUBGRID_STRIDE as usize;
        assert_eq!(store.get(ChunkPos::new(0, 0)).unwrap().corner(s, s), 7);
        assert_eq!(store.get(ChunkPos::new(1, 0)).unwrap().corner(0, s), 7);
        assert_eq!(store.get(ChunkPos::new(0, 1)).unwrap().corner(s, 0), 7);
        assert_eq!(store.get(ChunkPos::new(1, 1)).unwrap().corner(0, 0), 7);
    }

    #[test]
    fn test_interior_corner_single_owner() {
        let mut store = ChunkStore::new();
        let generator = flat();
        store.set_corner(5, 9, 3, &generator);
        assert_eq!(store.len(), 1);
        assert_eq!(store.corner(5, 9), Some(3));
    }

    #[test]
    fn test_seam_edit_invalidates_neighbor_autotile() {
        let mut store = ChunkStore::new();
        let generator = flat();
        store.get_or_create(ChunkPos::new(0, 0), &generator);
        store.get_or_create(ChunkPos::new(1, 0), &generator);
        store.get_mut(ChunkPos::new(1, 0)).unwrap().autotile_computed = true;

        // Edit the east edge of chunk (0,0).
        store.set_terrain_tile(15, 5, Terrain::Sand, &generator);
        assert!(!store.get(ChunkPos::new(1, 0)).unwrap().autotile_computed);
    }

    #[test]
    fn test_eviction_skips_visible_and_dirty() {
        let mut store = ChunkStore::new();
        let generator = flat();
        store.get_or_create(ChunkPos::new(0, 0), &generator);
        store.get_or_create(ChunkPos::new(5, 5), &generator);
        store.set_terrain_tile(9 * 16, 9 * 16, Terrain::Stone, &generator); // chunk (9,9), dirty

        let evicted = store.evict_unused(&[(0, 0, 1, 1)]);
        assert_eq!(evicted, vec![ChunkPos::new(5, 5)]);
        assert!(store.get(ChunkPos::new(0, 0)).is_some(), "visible stays");
        assert!(store.get(ChunkPos::new(9, 9)).is_some(), "dirty stays");
    }

    #[test]
    fn test_force_resync_bumps_without_dirty() {
        let mut store = ChunkStore::new();
        let generator = flat();
        store.get_or_create(ChunkPos::new(0, 0), &generator);
        store.force_resync_all();
        let chunk = store.get(ChunkPos::new(0, 0)).unwrap();
        assert_eq!(chunk.revision, 2);
        assert!(!chunk.dirty);
    }
}
