//! Persistent storage behind a small load/save contract
//!
//! The world is hydrated from storage once at startup and flushed once at
//! shutdown; player blocks are loaded when a session starts and saved when it
//! ends. Saves only stage data; nothing is durable until [`Storage::flush`].
//! Anything that can answer these calls can back the server.

use log::info;
use protocol::Tag;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Stable account identity: the login username.
pub type Identity = String;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage snapshot is corrupt: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Load/save contract the server needs from a persistence backend.
///
/// Saves upsert per key: keys absent from the map keep their stored value.
/// Callers batch saves and then call `flush` once.
pub trait Storage: Send {
    fn check_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Identity>, StorageError>;

    fn load_global(&self) -> Result<HashMap<u32, Vec<u8>>, StorageError>;

    fn load_regions(&self) -> Result<BTreeSet<u32>, StorageError>;

    fn load_region_data(&self, region: u32) -> Result<HashMap<u32, Vec<u8>>, StorageError>;

    fn load_player_data(&self, identity: &str) -> Result<HashMap<Tag, Vec<u8>>, StorageError>;

    fn save_global(&mut self, data: &HashMap<u32, Vec<u8>>) -> Result<(), StorageError>;

    fn save_region_data(
        &mut self,
        region: u32,
        data: &HashMap<u32, Vec<u8>>,
    ) -> Result<(), StorageError>;

    fn save_player_data(
        &mut self,
        identity: &str,
        data: &HashMap<Tag, Vec<u8>>,
    ) -> Result<(), StorageError>;

    /// Makes every staged save durable.
    fn flush(&mut self) -> Result<(), StorageError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    logins: BTreeMap<String, String>,
    global: BTreeMap<u32, Vec<u8>>,
    regions: BTreeMap<u32, BTreeMap<u32, Vec<u8>>>,
    players: BTreeMap<String, BTreeMap<[u8; 4], Vec<u8>>>,
}

/// Keeps the whole persisted world in one `bincode` snapshot file.
///
/// Saves update the in-memory snapshot. A flush rewrites the file through a
/// temporary sibling and a rename, so a crash mid-write leaves the previous
/// snapshot intact.
#[derive(Debug)]
pub struct SnapshotStorage {
    path: Option<PathBuf>,
    snapshot: Snapshot,
}

impl SnapshotStorage {
    /// Opens the snapshot at `path`; a missing file is an empty world.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let snapshot = match fs::read(&path) {
            Ok(bytes) => bincode::deserialize(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No database at {}, starting with an empty world", path.display());
                Snapshot::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path),
            snapshot,
        })
    }

    /// Storage that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            snapshot: Snapshot::default(),
        }
    }

    /// Creates or replaces a login.
    pub fn add_login(&mut self, username: &str, password: &str) -> Result<(), StorageError> {
        self.snapshot
            .logins
            .insert(username.to_string(), password.to_string());
        self.flush()
    }

}

impl Storage for SnapshotStorage {
    fn check_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Identity>, StorageError> {
        Ok(self
            .snapshot
            .logins
            .get(username)
            .filter(|stored| stored.as_str() == password)
            .map(|_| username.to_string()))
    }

    fn load_global(&self) -> Result<HashMap<u32, Vec<u8>>, StorageError> {
        Ok(self
            .snapshot
            .global
            .iter()
            .map(|(key, data)| (*key, data.clone()))
            .collect())
    }

    fn load_regions(&self) -> Result<BTreeSet<u32>, StorageError> {
        Ok(self.snapshot.regions.keys().copied().collect())
    }

    fn load_region_data(&self, region: u32) -> Result<HashMap<u32, Vec<u8>>, StorageError> {
        Ok(self
            .snapshot
            .regions
            .get(&region)
            .map(|blocks| {
                blocks
                    .iter()
                    .map(|(key, data)| (*key, data.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn load_player_data(&self, identity: &str) -> Result<HashMap<Tag, Vec<u8>>, StorageError> {
        Ok(self
            .snapshot
            .players
            .get(identity)
            .map(|blocks| {
                blocks
                    .iter()
                    .map(|(tag, data)| (Tag(*tag), data.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn save_global(&mut self, data: &HashMap<u32, Vec<u8>>) -> Result<(), StorageError> {
        self.snapshot
            .global
            .extend(data.iter().map(|(key, bytes)| (*key, bytes.clone())));
        Ok(())
    }

    fn save_region_data(
        &mut self,
        region: u32,
        data: &HashMap<u32, Vec<u8>>,
    ) -> Result<(), StorageError> {
        self.snapshot
            .regions
            .entry(region)
            .or_default()
            .extend(data.iter().map(|(key, bytes)| (*key, bytes.clone())));
        Ok(())
    }

    fn save_player_data(
        &mut self,
        identity: &str,
        data: &HashMap<Tag, Vec<u8>>,
    ) -> Result<(), StorageError> {
        self.snapshot
            .players
            .entry(identity.to_string())
            .or_default()
            .extend(data.iter().map(|(tag, bytes)| (tag.0, bytes.clone())));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = bincode::serialize(&self.snapshot)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
