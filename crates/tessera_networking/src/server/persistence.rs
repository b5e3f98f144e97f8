//! Key/value-by-collection persistence with a background flusher.
//!
//! Layout under the data dir:
//! - `worlds.db` - world registry records (JSON values)
//! - `profiles.db` - per-client profiles (JSON values)
//! - `worlds/<id>/chunks.db` - chunk snapshots keyed `"cx,cy"`
//!
//! Each `.db` file is one LZ4-compressed key/value table written
//! atomically (temp + rename). The simulation never blocks on writes: it
//! hands dirty records to the flusher thread, which batches, retries with
//! exponential backoff on failure, and marks the store degraded when the
//! disk stays broken.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Table file magic.
const TABLE_MAGIC: &[u8; 4] = b"TSDB";
/// Table format version.
const TABLE_VERSION: u32 = 1;

/// Backoff ceiling between failed flush attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Consecutive failures before the store refuses new writes.
const DEGRADED_REFUSAL_THRESHOLD: u32 = 8;

/// Persistence failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure.
    #[error("persistence io: {0}")]
    Io(#[from] io::Error),
    /// A table file exists but cannot be understood.
    #[error("corrupt table {0}")]
    Corrupt(PathBuf),
}

/// One key/value table (a `.db` file's in-memory image).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KvTable {
    entries: HashMap<String, Vec<u8>>,
}

impl KvTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Writes a value.
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.entries.insert(key.into(), value);
    }

    /// Deletes a value.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Iterates entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(TABLE_MAGIC);
        raw.extend_from_slice(&TABLE_VERSION.to_le_bytes());
        raw.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        // Sorted for stable files (useful in tests and diffs).
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        for key in keys {
            let value = &self.entries[key];
            raw.extend_from_slice(&(key.len() as u16).to_le_bytes());
            raw.extend_from_slice(key.as_bytes());
            raw.extend_from_slice(&(value.len() as u32).to_le_bytes());
            raw.extend_from_slice(value);
        }
        lz4_flex::compress_prepend_size(&raw)
    }

    fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self, PersistenceError> {
        let raw = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|_| PersistenceError::Corrupt(path.to_owned()))?;
        let corrupt = || PersistenceError::Corrupt(path.to_owned());
        if raw.len() < 12 || &raw[0..4] != TABLE_MAGIC {
            return Err(corrupt());
        }
        let version = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if version != TABLE_VERSION {
            return Err(corrupt());
        }
        let count = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]) as usize;
        let mut entries = HashMap::with_capacity(count);
        let mut at = 12usize;
        for _ in 0..count {
            if raw.len() < at + 2 {
                return Err(corrupt());
            }
            let key_len = u16::from_le_bytes([raw[at], raw[at + 1]]) as usize;
            at += 2;
            if raw.len() < at + key_len + 4 {
                return Err(corrupt());
            }
            let key = String::from_utf8(raw[at..at + key_len].to_vec()).map_err(|_| corrupt())?;
            at += key_len;
            let val_len =
                u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]) as usize;
            at += 4;
            if raw.len() < at + val_len {
                return Err(corrupt());
            }
            entries.insert(key, raw[at..at + val_len].to_vec());
            at += val_len;
        }
        Ok(Self { entries })
    }
}

/// Filesystem layout and synchronous table I/O.
pub struct PersistenceStore {
    root: PathBuf,
}

impl PersistenceStore {
    /// Creates a store rooted at the data dir.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<data-dir>/worlds.db`
    #[must_use]
    pub fn worlds_path(&self) -> PathBuf {
        self.root.join("worlds.db")
    }

    /// `<data-dir>/profiles.db`
    #[must_use]
    pub fn profiles_path(&self) -> PathBuf {
        self.root.join("profiles.db")
    }

    /// `<data-dir>/worlds/<id>/chunks.db`
    #[must_use]
    pub fn chunks_path(&self, world_id: u64) -> PathBuf {
        self.root.join("worlds").join(world_id.to_string()).join("chunks.db")
    }

    /// Loads a table; a missing file is an empty table, a broken file is
    /// an error the caller treats as a cache miss.
    pub fn load_table(&self, path: &Path) -> Result<KvTable, PersistenceError> {
        let mut file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(KvTable::new()),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        KvTable::from_bytes(&bytes, path)
    }

    /// Writes a table atomically: temp file in the same directory, then
    /// rename over the target.
    pub fn save_table(&self, path: &Path, table: &KvTable) -> Result<(), PersistenceError> {
        let parent = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent)?;
        let tmp = path.with_extension("db.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&table.to_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Work handed to the flusher thread.
pub enum FlushCmd {
    /// Upsert a chunk snapshot into a world's chunk table.
    Chunk {
        /// Owning world.
        world_id: u64,
        /// `"cx,cy"` key.
        key: String,
        /// Encoded `ChunkSnapshot`.
        bytes: Vec<u8>,
    },
    /// Upsert a world registry record.
    World {
        /// Record key (the id, stringified).
        key: String,
        /// JSON record.
        bytes: Vec<u8>,
    },
    /// Delete a world registry record (content dir untouched).
    DeleteWorld {
        /// Record key.
        key: String,
    },
    /// Upsert a client profile.
    Profile {
        /// Client id, stringified.
        key: String,
        /// JSON profile.
        bytes: Vec<u8>,
    },
    /// Flush everything and stop.
    Shutdown,
}

/// Handle to the background flusher.
pub struct Flusher {
    tx: Sender<FlushCmd>,
    degraded: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    /// Spawns the flusher thread over a store.
    #[must_use]
    pub fn spawn(store: PersistenceStore) -> Self {
        let (tx, rx) = unbounded();
        let degraded = Arc::new(AtomicBool::new(false));
        let worker_flag = Arc::clone(&degraded);
        let handle = std::thread::Builder::new()
            .name("tessera-flusher".into())
            .spawn(move || flusher_main(store, &rx, &worker_flag))
            .expect("spawn flusher thread");
        Self { tx, degraded, handle: Some(handle) }
    }

    /// Queues work. Refused (and logged) while the store is degraded past
    /// the refusal threshold.
    pub fn submit(&self, cmd: FlushCmd) {
        if self.degraded.load(Ordering::Relaxed) {
            warn!("persistence degraded; write refused, in-memory state remains authoritative");
            return;
        }
        let _ = self.tx.send(cmd);
    }

    /// True when flushes are failing.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Requests a final flush and joins the thread.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(FlushCmd::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct FlusherState {
    store: PersistenceStore,
    worlds: KvTable,
    profiles: KvTable,
    chunk_tables: HashMap<u64, KvTable>,
    dirty_worlds: bool,
    dirty_profiles: bool,
    dirty_chunks: Vec<u64>,
}

fn flusher_main(store: PersistenceStore, rx: &Receiver<FlushCmd>, degraded: &AtomicBool) {
    let worlds = store.load_table(&store.worlds_path()).unwrap_or_else(|e| {
        warn!(error = %e, "worlds table unreadable, starting empty");
        KvTable::new()
    });
    let profiles = store.load_table(&store.profiles_path()).unwrap_or_else(|e| {
        warn!(error = %e, "profiles table unreadable, starting empty");
        KvTable::new()
    });
    let mut state = FlusherState {
        store,
        worlds,
        profiles,
        chunk_tables: HashMap::new(),
        dirty_worlds: false,
        dirty_profiles: false,
        dirty_chunks: Vec::new(),
    };

    let mut failures: u32 = 0;
    loop {
        // Batch: block briefly, then drain whatever else arrived.
        let first = rx.recv_timeout(Duration::from_millis(500));
        let mut stop = false;
        match first {
            Ok(cmd) => stop |= apply_cmd(&mut state, cmd),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => stop = true,
        }
        while let Ok(cmd) = rx.try_recv() {
            stop |= apply_cmd(&mut state, cmd);
        }

        match flush_dirty(&mut state) {
            Ok(()) => {
                if failures > 0 {
                    debug!("persistence recovered");
                }
                failures = 0;
                degraded.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                failures += 1;
                error!(error = %e, failures, "flush failed, backing off");
                if failures >= DEGRADED_REFUSAL_THRESHOLD {
                    degraded.store(true, Ordering::Relaxed);
                }
                let backoff = Duration::from_millis(250 << failures.min(5));
                std::thread::sleep(backoff.min(MAX_BACKOFF));
            }
        }

        if stop {
            if let Err(e) = flush_dirty(&mut state) {
                error!(error = %e, "final flush failed; dirty data lost");
            }
            return;
        }
    }
}

fn apply_cmd(state: &mut FlusherState, cmd: FlushCmd) -> bool {
    match cmd {
        FlushCmd::Chunk { world_id, key, bytes } => {
            let table = state.chunk_tables.entry(world_id).or_insert_with(|| {
                let path = state.store.chunks_path(world_id);
                state.store.load_table(&path).unwrap_or_else(|e| {
                    warn!(error = %e, world_id, "chunk table unreadable, starting empty");
                    KvTable::new()
                })
            });
            table.put(key, bytes);
            if !state.dirty_chunks.contains(&world_id) {
                state.dirty_chunks.push(world_id);
            }
        }
        FlushCmd::World { key, bytes } => {
            state.worlds.put(key, bytes);
            state.dirty_worlds = true;
        }
        FlushCmd::DeleteWorld { key } => {
            state.worlds.delete(&key);
            state.dirty_worlds = true;
        }
        FlushCmd::Profile { key, bytes } => {
            state.profiles.put(key, bytes);
            state.dirty_profiles = true;
        }
        FlushCmd::Shutdown => return true,
    }
    false
}

fn flush_dirty(state: &mut FlusherState) -> Result<(), PersistenceError> {
    if state.dirty_worlds {
        let path = state.store.worlds_path();
        state.store.save_table(&path, &state.worlds)?;
        state.dirty_worlds = false;
    }
    if state.dirty_profiles {
        let path = state.store.profiles_path();
        state.store.save_table(&path, &state.profiles)?;
        state.dirty_profiles = false;
    }
    while let Some(world_id) = state.dirty_chunks.pop() {
        if let Some(table) = state.chunk_tables.get(&world_id) {
            let path = state.store.chunks_path(world_id);
            if let Err(e) = state.store.save_table(&path, table) {
                state.dirty_chunks.push(world_id);
                return Err(e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_roundtrip_via_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());

        let mut table = KvTable::new();
        table.put("0,0", vec![1, 2, 3]);
        table.put("-3,7", vec![0; 4096]);
        let path = store.chunks_path(5);
        store.save_table(&path, &table).unwrap();

        let loaded = store.load_table(&path).unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_missing_table_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());
        let table = store.load_table(&store.worlds_path()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_corrupt_table_is_error_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path());
        let path = store.worlds_path();
        std::fs::write(&path, b"garbage").unwrap();
        assert!(matches!(
            store.load_table(&path),
            Err(PersistenceError::Corrupt(_))
        ));
    }

    #[test]
    fn test_flusher_writes_and_survives_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let flusher = Flusher::spawn(PersistenceStore::new(dir.path()));
        flusher.submit(FlushCmd::Chunk {
            world_id: 1,
            key: "2,-2".into(),
            bytes: vec![9; 128],
        });
        flusher.submit(FlushCmd::World { key: "1".into(), bytes: b"{}".to_vec() });
        flusher.shutdown();

        let store = PersistenceStore::new(dir.path());
        let chunks = store.load_table(&store.chunks_path(1)).unwrap();
        assert_eq!(chunks.get("2,-2"), Some(&[9u8; 128][..]));
        let worlds = store.load_table(&store.worlds_path()).unwrap();
        assert_eq!(worlds.get("1"), Some(&b"{}"[..]));
    }
}
