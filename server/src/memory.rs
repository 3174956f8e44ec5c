//! Sparse, growable shared memory blocks
//!
//! A block is a byte buffer addressed by offset. Reading past the end yields
//! zeros and leaves the block untouched; writing past the end zero-extends it
//! first. Blocks never shrink.
//!
//! Three scopes use the same contract:
//! - `GLOB`: [`GlobalStore`], keyed by sub-type
//! - `GLRG`: [`RegionStore`], keyed by region then sub-type
//! - `PCSA`/`PCIN`/`PCOU`/`PCQK`: a `BlockMap<Tag>` inside each player record

use std::collections::HashMap;
use std::hash::Hash;

/// Highest end address (`addr + len`) a client may touch in any block.
pub const MAX_BLOCK_SIZE: usize = 1 << 20;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedBlock {
    bytes: Vec<u8>,
}

impl SharedBlock {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns `len` bytes from `addr`, zero-filled beyond the current end.
    pub fn read(&self, addr: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0; len];
        if addr < self.bytes.len() {
            let end = addr.saturating_add(len).min(self.bytes.len());
            out[..end - addr].copy_from_slice(&self.bytes[addr..end]);
        }
        out
    }

    /// Overwrites `[addr, addr + data.len())`, growing the block as needed.
    pub fn write(&mut self, addr: usize, data: &[u8]) {
        let end = addr + data.len();
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[addr..end].copy_from_slice(data);
    }
}

/// Blocks indexed by key, created on first write.
#[derive(Debug, Clone)]
pub struct BlockMap<K> {
    blocks: HashMap<K, SharedBlock>,
}

impl<K: Eq + Hash + Copy> BlockMap<K> {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
        }
    }

    pub fn from_snapshot(snapshot: HashMap<K, Vec<u8>>) -> Self {
        Self {
            blocks: snapshot
                .into_iter()
                .map(|(key, bytes)| (key, SharedBlock::from_bytes(bytes)))
                .collect(),
        }
    }

    /// Copies every block out for persistence.
    pub fn snapshot(&self) -> HashMap<K, Vec<u8>> {
        self.blocks
            .iter()
            .map(|(key, block)| (*key, block.as_bytes().to_vec()))
            .collect()
    }

    pub fn get(&self, key: K) -> Option<&SharedBlock> {
        self.blocks.get(&key)
    }

    pub fn read(&self, key: K, addr: usize, len: usize) -> Vec<u8> {
        match self.blocks.get(&key) {
            Some(block) => block.read(addr, len),
            None => vec![0; len],
        }
    }

    pub fn write(&mut self, key: K, addr: usize, data: &[u8]) {
        self.blocks.entry(key).or_default().write(addr, data);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl<K: Eq + Hash> PartialEq for BlockMap<K> {
    fn eq(&self, other: &Self) -> bool {
        self.blocks == other.blocks
    }
}

impl<K: Eq + Hash> Eq for BlockMap<K> {}

impl<K: Eq + Hash + Copy> Default for BlockMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// `GLOB` data: leaderboards and other world-wide tables.
pub type GlobalStore = BlockMap<u32>;

/// `GLRG` data: per-region objects, one [`BlockMap`] per region.
#[derive(Debug, Clone, Default)]
pub struct RegionStore {
    regions: HashMap<u32, BlockMap<u32>>,
}

impl RegionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_region(&mut self, region: u32, blocks: BlockMap<u32>) {
        self.regions.insert(region, blocks);
    }

    pub fn read(&self, region: u32, subtype: u32, addr: usize, len: usize) -> Vec<u8> {
        match self.regions.get(&region) {
            Some(blocks) => blocks.read(subtype, addr, len),
            None => vec![0; len],
        }
    }

    pub fn write(&mut self, region: u32, subtype: u32, addr: usize, data: &[u8]) {
        self.regions
            .entry(region)
            .or_default()
            .write(subtype, addr, data);
    }

    pub fn regions(&self) -> impl Iterator<Item = (u32, &BlockMap<u32>)> {
        self.regions.iter().map(|(region, blocks)| (*region, blocks))
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
