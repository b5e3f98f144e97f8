//! The chunk: a fixed 16x16 tile square with parallel per-tile arrays and
//! a revision counter.
//!
//! Every mutator bumps `revision` and sets `dirty`. Equal revisions imply
//! identical content; the sync layer relies on this to skip resends.

use tessera_core::tile::Terrain;
use tessera_core::{CHUNK_SIZE, MAX_BLEND_LAYERS, MAX_TILE_HEIGHT, SUBGRID_DIM, TILES_PER_CHUNK};

/// Chunk coordinates in the world grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    /// X coordinate in chunks.
    pub x: i32,
    /// Y coordinate in chunks.
    pub y: i32,
}

impl ChunkPos {
    /// Creates a new chunk position.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The chunk containing a tile coordinate.
    #[inline]
    #[must_use]
    pub const fn from_tile(tx: i32, ty: i32) -> Self {
        Self {
            x: tx.div_euclid(CHUNK_SIZE as i32),
            y: ty.div_euclid(CHUNK_SIZE as i32),
        }
    }

    /// The tile coordinate of this chunk's northwest corner.
    #[inline]
    #[must_use]
    pub const fn origin_tile(self) -> (i32, i32) {
        (self.x * CHUNK_SIZE as i32, self.y * CHUNK_SIZE as i32)
    }

    /// The persistence key, `"cx,cy"`.
    #[must_use]
    pub fn key(self) -> String {
        format!("{},{}", self.x, self.y)
    }
}

impl std::fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// One chunk of world data.
///
/// All per-tile arrays are `TILES_PER_CHUNK` long, indexed `ly * 16 + lx`.
/// The subgrid is `SUBGRID_DIM`² corner samples; boundary samples are
/// duplicated into neighboring chunks by the store's write-through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Terrain codes per tile.
    pub terrain: [u8; TILES_PER_CHUNK],
    /// Detail codes per tile.
    pub detail: [u8; TILES_PER_CHUNK],
    /// Collision flags per tile (kept in lockstep with terrain).
    pub collision: [u8; TILES_PER_CHUNK],
    /// Base blend reference per tile.
    pub blend_base: [u16; TILES_PER_CHUNK],
    /// Packed overlay stack per tile, fixed slot count.
    pub blend_layers: [[u16; MAX_BLEND_LAYERS]; TILES_PER_CHUNK],
    /// Corner samples for the art blending system.
    pub subgrid: [u8; SUBGRID_DIM * SUBGRID_DIM],
    /// Elevation level per tile (0..=3).
    pub height_grid: [u8; TILES_PER_CHUNK],
    /// Road-type codes per tile.
    pub road_grid: [u8; TILES_PER_CHUNK],

    /// Monotonically increasing content revision.
    pub revision: u32,
    /// Needs a persistence flush.
    pub dirty: bool,
    /// The autotile art cache for this chunk is valid.
    pub autotile_computed: bool,
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunk {
    /// An all-grass, flat, revisionless chunk.
    #[must_use]
    pub fn new() -> Self {
        Self {
            terrain: [Terrain::Grass as u8; TILES_PER_CHUNK],
            detail: [0; TILES_PER_CHUNK],
            collision: [0; TILES_PER_CHUNK],
            blend_base: [0; TILES_PER_CHUNK],
            blend_layers: [[0; MAX_BLEND_LAYERS]; TILES_PER_CHUNK],
            subgrid: [0; SUBGRID_DIM * SUBGRID_DIM],
            height_grid: [0; TILES_PER_CHUNK],
            road_grid: [0; TILES_PER_CHUNK],
            revision: 0,
            dirty: false,
            autotile_computed: false,
        }
    }

    /// Tile array index for local coordinates.
    #[inline]
    #[must_use]
    pub const fn tile_index(lx: usize, ly: usize) -> usize {
        ly * CHUNK_SIZE + lx
    }

    /// Subgrid array index for local corner coordinates.
    #[inline]
    #[must_use]
    pub const fn corner_index(lsx: usize, lsy: usize) -> usize {
        lsy * SUBGRID_DIM + lsx
    }

    /// Marks a content change: bumps the revision, sets dirty, and
    /// invalidates the local autotile cache.
    pub fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1).max(1);
        self.dirty = true;
        self.autotile_computed = false;
    }

    /// Terrain at local coordinates.
    #[must_use]
    pub fn terrain_at(&self, lx: usize, ly: usize) -> Terrain {
        Terrain::from_u8(self.terrain[Self::tile_index(lx, ly)]).unwrap_or_default()
    }

    /// Writes terrain and its implied collision in one operation.
    pub fn set_terrain(&mut self, lx: usize, ly: usize, terrain: Terrain) {
        let i = Self::tile_index(lx, ly);
        self.terrain[i] = terrain as u8;
        self.collision[i] = terrain.collision().0;
        self.touch();
    }

    /// Writes a detail code.
    pub fn set_detail(&mut self, lx: usize, ly: usize, detail: u8) {
        self.detail[Self::tile_index(lx, ly)] = detail;
        self.touch();
    }

    /// Writes an elevation level, clamped to the valid range.
    pub fn set_height(&mut self, lx: usize, ly: usize, height: u8) {
        self.height_grid[Self::tile_index(lx, ly)] = height.min(MAX_TILE_HEIGHT);
        self.touch();
    }

    /// Writes a road code.
    pub fn set_road(&mut self, lx: usize, ly: usize, road: u8) {
        self.road_grid[Self::tile_index(lx, ly)] = road;
        self.touch();
    }

    /// Writes a corner sample. Boundary write-through is the store's job;
    /// this only touches the local array.
    pub fn set_corner(&mut self, lsx: usize, lsy: usize, value: u8) {
        self.subgrid[Self::corner_index(lsx, lsy)] = value;
        self.touch();
    }

    /// Reads a corner sample.
    #[must_use]
    pub fn corner(&self, lsx: usize, lsy: usize) -> u8 {
        self.subgrid[Self::corner_index(lsx, lsy)]
    }

    /// Pushes a blend layer onto a tile's overlay stack. Returns false if
    /// all slots are occupied (slot 0 is the bottom of the stack).
    pub fn push_blend_layer(&mut self, lx: usize, ly: usize, layer: u16) -> bool {
        let stack = &mut self.blend_layers[Self::tile_index(lx, ly)];
        for slot in stack.iter_mut() {
            if *slot == 0 {
                *slot = layer;
                self.touch();
                return true;
            }
        }
        false
    }

    /// Clears terrain back to grass and removes blend state. Keeps heights
    /// and roads.
    pub fn clear_terrain(&mut self) {
        self.terrain = [Terrain::Grass as u8; TILES_PER_CHUNK];
        self.collision = [0; TILES_PER_CHUNK];
        self.detail = [0; TILES_PER_CHUNK];
        self.blend_base = [0; TILES_PER_CHUNK];
        self.blend_layers = [[0; MAX_BLEND_LAYERS]; TILES_PER_CHUNK];
        self.subgrid = [Terrain::Grass as u8; SUBGRID_DIM * SUBGRID_DIM];
        self.touch();
    }

    /// Clears every road tile.
    pub fn clear_roads(&mut self) {
        self.road_grid = [0; TILES_PER_CHUNK];
        self.touch();
    }
}
