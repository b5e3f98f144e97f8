//! Chunk-bucketed spatial index for entities and props.
//!
//! Maps chunk coordinates to the ids whose AABB overlaps that chunk.
//! Invariant: the bucket set of an id always equals the chunk range of its
//! last reported AABB.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

use crate::math::Aabb;

/// A chunk-bucketed AABB index keyed by an id type.
///
/// Used with [`crate::EntityId`] for entities and [`crate::PropId`] for
/// props.
#[derive(Clone, Debug)]
pub struct SpatialIndex<K> {
    buckets: HashMap<(i32, i32), Vec<K>>,
    extents: HashMap<K, (i32, i32, i32, i32)>,
}

impl<K: Copy + Eq + Hash> Default for SpatialIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash> SpatialIndex<K> {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self { buckets: HashMap::new(), extents: HashMap::new() }
    }

    /// Number of indexed ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extents.len()
    }

    /// True if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Inserts an id with its current AABB. Re-inserting relocates.
    pub fn insert(&mut self, id: K, aabb: &Aabb) {
        let range = aabb.chunk_range();
        match self.extents.entry(id) {
            Entry::Occupied(mut e) => {
                let old = *e.get();
                if old == range {
                    return;
                }
                e.insert(range);
                Self::remove_from_buckets(&mut self.buckets, id, old);
            }
            Entry::Vacant(e) => {
                e.insert(range);
            }
        }
        let (cx0, cy0, cx1, cy1) = range;
        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                self.buckets.entry((cx, cy)).or_default().push(id);
            }
        }
    }

    /// Moves an id to a new AABB, re-bucketing only if the chunk range
    /// changed.
    pub fn relocate(&mut self, id: K, new_aabb: &Aabb) {
        self.insert(id, new_aabb);
    }

    /// Removes an id from the index.
    pub fn remove(&mut self, id: K) {
        if let Some(range) = self.extents.remove(&id) {
            Self::remove_from_buckets(&mut self.buckets, id, range);
        }
    }

    fn remove_from_buckets(
        buckets: &mut HashMap<(i32, i32), Vec<K>>,
        id: K,
        (cx0, cy0, cx1, cy1): (i32, i32, i32, i32),
    ) {
        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                if let Some(bucket) = buckets.get_mut(&(cx, cy)) {
                    bucket.retain(|k| *k != id);
                    if bucket.is_empty() {
                        buckets.remove(&(cx, cy));
                    }
                }
            }
        }
    }

    /// Ids whose AABB overlaps the inclusive chunk range, deduplicated.
    #[must_use]
    pub fn query_range(&self, min_cx: i32, min_cy: i32, max_cx: i32, max_cy: i32) -> Vec<K> {
        let mut out = Vec::new();
        for cy in min_cy..=max_cy {
            for cx in min_cx..=max_cx {
                if let Some(bucket) = self.buckets.get(&(cx, cy)) {
                    for id in bucket {
                        if !out.contains(id) {
                            out.push(*id);
                        }
                    }
                }
            }
        }
        out
    }

    /// Ids whose chunk range overlaps the box's chunk range.
    #[must_use]
    pub fn query_aabb(&self, aabb: &Aabb) -> Vec<K> {
        let (cx0, cy0, cx1, cy1) = aabb.chunk_range();
        self.query_range(cx0, cy0, cx1, cy1)
    }

    /// The recorded chunk range for an id, if indexed.
    #[must_use]
    pub fn extent_of(&self, id: K) -> Option<(i32, i32, i32, i32)> {
        self.extents.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;

    #[test]
    fn test_insert_query_remove() {
        let mut index = SpatialIndex::new();
        // One chunk is 256px wide.
        index.insert(EntityId(1), &Aabb::new(10.0, 10.0, 20.0, 20.0));
        index.insert(EntityId(2), &Aabb::new(300.0, 10.0, 310.0, 20.0));

        assert_eq!(index.query_range(0, 0, 0, 0), vec![EntityId(1)]);
        assert_eq!(index.query_range(1, 0, 1, 0), vec![EntityId(2)]);
        let both = index.query_range(0, 0, 1, 0);
        assert_eq!(both.len(), 2);

        index.remove(EntityId(1));
        assert!(index.query_range(0, 0, 0, 0).is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_straddling_box_dedup() {
        let mut index = SpatialIndex::new();
        // Straddles the chunk 0/1 boundary at x=256.
        index.insert(EntityId(7), &Aabb::new(250.0, 10.0, 260.0, 20.0));
        assert_eq!(index.extent_of(EntityId(7)), Some((0, 0, 1, 0)));
        // Query covering both chunks returns the id once.
        assert_eq!(index.query_range(0, 0, 1, 0), vec![EntityId(7)]);
    }

    #[test]
    fn test_relocate_rebuckets_only_on_range_change() {
        let mut index = SpatialIndex::new();
        index.insert(EntityId(1), &Aabb::new(10.0, 10.0, 20.0, 20.0));
        // Small move within the chunk: still found.
        index.relocate(EntityId(1), &Aabb::new(30.0, 30.0, 40.0, 40.0));
        assert_eq!(index.query_range(0, 0, 0, 0), vec![EntityId(1)]);

        // Move to the next chunk: old bucket drained, new bucket filled.
        index.relocate(EntityId(1), &Aabb::new(300.0, 30.0, 310.0, 40.0));
        assert!(index.query_range(0, 0, 0, 0).is_empty());
        assert_eq!(index.query_range(1, 0, 1, 0), vec![EntityId(1)]);
    }
}
