//! The realm registry: the catalog of worlds.
//!
//! Records are persisted separately from world content (the `worlds`
//! collection); live player counts are derived from the session manager
//! and broadcast to lobby-state sessions as they change.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use tessera_core::tile::Terrain;
use tessera_procedural::generator::{FlatGenerator, Generator, NaturalGenerator};
use tessera_procedural::noise::WorldSeed;

/// Generation strategy of a world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldType {
    /// Noise-driven terrain.
    Natural,
    /// Flat grass (lobby/testing worlds).
    Flat,
}

/// One persisted world record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldRecord {
    /// Registry id.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Generation seed.
    pub seed: u64,
    /// Generation strategy.
    pub world_type: WorldType,
    /// Creation time (unix seconds).
    pub created_at: u64,
    /// Last join time (unix seconds).
    pub last_played_at: u64,
}

impl WorldRecord {
    /// Builds the generator strategy for this record.
    #[must_use]
    pub fn make_generator(&self) -> Box<dyn Generator> {
        match self.world_type {
            WorldType::Natural => Box::new(NaturalGenerator::new(WorldSeed::new(self.seed))),
            WorldType::Flat => Box::new(FlatGenerator::new(Terrain::Grass)),
        }
    }
}

/// In-memory registry, hydrated from and flushed to the `worlds`
/// collection.
#[derive(Default)]
pub struct RealmRegistry {
    records: HashMap<u64, WorldRecord>,
    next_id: u64,
}

impl RealmRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { records: HashMap::new(), next_id: 1 }
    }

    /// Hydrates from persisted records.
    pub fn hydrate(&mut self, records: Vec<WorldRecord>) {
        for record in records {
            self.next_id = self.next_id.max(record.id + 1);
            self.records.insert(record.id, record);
        }
    }

    /// Lists worlds, ascending by id.
    #[must_use]
    pub fn list_worlds(&self) -> Vec<&WorldRecord> {
        let mut list: Vec<&WorldRecord> = self.records.values().collect();
        list.sort_by_key(|r| r.id);
        list
    }

    /// Creates a world and returns its record.
    pub fn create_world(
        &mut self,
        name: &str,
        world_type: WorldType,
        seed: u64,
        now_secs: u64,
    ) -> &WorldRecord {
        let id = self.next_id;
        self.next_id += 1;
        self.records.insert(
            id,
            WorldRecord {
                id,
                name: name.to_owned(),
                seed,
                world_type,
                created_at: now_secs,
                last_played_at: now_secs,
            },
        );
        &self.records[&id]
    }

    /// Looks up a world.
    #[must_use]
    pub fn get_world(&self, id: u64) -> Option<&WorldRecord> {
        self.records.get(&id)
    }

    /// Renames a world. Returns false if it does not exist.
    pub fn rename_world(&mut self, id: u64, name: &str) -> bool {
        if let Some(record) = self.records.get_mut(&id) {
            record.name = name.to_owned();
            true
        } else {
            false
        }
    }

    /// Deletes a world record. Content cleanup is the caller's business.
    pub fn delete_world(&mut self, id: u64) -> Option<WorldRecord> {
        self.records.remove(&id)
    }

    /// Stamps the last-played time.
    pub fn update_last_played(&mut self, id: u64, now_secs: u64) {
        if let Some(record) = self.records.get_mut(&id) {
            record.last_played_at = now_secs;
        }
    }

    /// Finds a world by exact name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&WorldRecord> {
        self.records.values().find(|r| r.name == name)
    }
}
