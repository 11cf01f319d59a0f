use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::lattice::{LatticeType, LatticeValue, ALL_LATTICE_TYPES};
use crate::protocol::Key;

/// Storage backing for one lattice kind.
///
/// The two variants differ only in where the merged state lives; both expose
/// the same `get`/`put`/`remove` contract. `put` is idempotent under repeat
/// delivery and commutative across peers because it merges before persisting,
/// and it reports the post-merge size so key properties can be kept current.
#[derive(Debug)]
pub enum Serializer {
    Memory(MemoryStore),
    Disk(DiskStore),
}

impl Serializer {
    pub fn kind(&self) -> LatticeType {
        match self {
            Serializer::Memory(store) => store.kind,
            Serializer::Disk(store) => store.kind,
        }
    }

    /// The stored state in serialized form, or `None` for an unknown key.
    pub fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        match self {
            Serializer::Memory(store) => store.get(key),
            Serializer::Disk(store) => store.get(key),
        }
    }

    /// Merge a serialized lattice state into the stored one and persist the
    /// result. Returns the post-merge size in bytes.
    pub fn put(&mut self, key: &Key, serialized: &[u8]) -> Result<usize> {
        match self {
            Serializer::Memory(store) => store.put(key, serialized),
            Serializer::Disk(store) => store.put(key, serialized),
        }
    }

    pub fn remove(&mut self, key: &Key) -> Result<()> {
        match self {
            Serializer::Memory(store) => store.remove(key),
            Serializer::Disk(store) => store.remove(key),
        }
    }
}

fn decode(kind: LatticeType, serialized: &[u8]) -> Result<LatticeValue> {
    let value: LatticeValue =
        bincode::deserialize(serialized).context("undecodable lattice payload")?;
    if value.kind() != kind {
        bail!("payload is a {} lattice, store holds {}", value.kind(), kind);
    }
    Ok(value)
}

/// Heap-backed store for one lattice kind.
#[derive(Debug)]
pub struct MemoryStore {
    kind: LatticeType,
    entries: HashMap<Key, LatticeValue>,
}

impl MemoryStore {
    pub fn new(kind: LatticeType) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        match self.entries.get(key) {
            Some(value) => Ok(Some(bincode::serialize(value)?)),
            None => Ok(None),
        }
    }

    fn put(&mut self, key: &Key, serialized: &[u8]) -> Result<usize> {
        let incoming = decode(self.kind, serialized)?;
        let merged = match self.entries.remove(key) {
            Some(mut existing) => {
                existing.merge(incoming);
                existing
            }
            None => incoming,
        };
        let size = merged.size_bytes();
        self.entries.insert(key.clone(), merged);
        Ok(size)
    }

    fn remove(&mut self, key: &Key) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// File-backed store for one lattice kind. Files live under
/// `<data_dir>/<tid>/<kind>/`, one per key, so sibling worker threads never
/// alias each other's state.
#[derive(Debug)]
pub struct DiskStore {
    kind: LatticeType,
    root: PathBuf,
}

impl DiskStore {
    pub fn new(data_dir: &Path, tid: u32, kind: LatticeType) -> Result<Self> {
        let root = data_dir.join(tid.to_string()).join(kind.to_string());
        fs::create_dir_all(&root)
            .with_context(|| format!("unable to create store directory {}", root.display()))?;
        Ok(Self { kind, root })
    }

    fn path_for(&self, key: &Key) -> PathBuf {
        self.root.join(hex::encode(key.as_bytes()))
    }

    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).context("unable to read stored value"),
        }
    }

    fn put(&mut self, key: &Key, serialized: &[u8]) -> Result<usize> {
        let incoming = decode(self.kind, serialized)?;
        let merged = match self.get(key)? {
            Some(existing) => {
                let mut existing = decode(self.kind, &existing)?;
                existing.merge(incoming);
                existing
            }
            None => incoming,
        };
        let size = merged.size_bytes();
        fs::write(self.path_for(key), bincode::serialize(&merged)?)
            .context("unable to persist merged value")?;
        Ok(size)
    }

    fn remove(&mut self, key: &Key) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context("unable to remove stored value"),
        }
    }
}

/// One serializer per lattice kind, all sharing the tier's backing choice.
#[derive(Debug)]
pub struct SerializerMap {
    inner: HashMap<LatticeType, Serializer>,
}

impl SerializerMap {
    /// Memory-tier backing: every kind stored on the heap.
    pub fn memory() -> Self {
        let inner = ALL_LATTICE_TYPES
            .iter()
            .map(|kind| (*kind, Serializer::Memory(MemoryStore::new(*kind))))
            .collect();
        Self { inner }
    }

    /// Disk-tier backing: every kind stored under `data_dir`, namespaced by
    /// the owning worker thread.
    pub fn disk(data_dir: &Path, tid: u32) -> Result<Self> {
        let mut inner = HashMap::new();
        for kind in ALL_LATTICE_TYPES {
            inner.insert(kind, Serializer::Disk(DiskStore::new(data_dir, tid, kind)?));
        }
        Ok(Self { inner })
    }

    pub fn get(&self, kind: LatticeType) -> &Serializer {
        &self.inner[&kind]
    }

    pub fn get_mut(&mut self, kind: LatticeType) -> &mut Serializer {
        self.inner.get_mut(&kind).expect("every lattice kind has a serializer")
    }
}
