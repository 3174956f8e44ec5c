use crate::memory::{BlockMap, GlobalStore, RegionStore};
use crate::session::{PlayerRecord, SessionId, SessionRegistry, TokenRegistry};
use crate::storage::{Storage, StorageError};
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// All mutable server state. Owned by the server loop and touched by nothing
/// else, so none of it needs a lock.
pub struct World {
    pub global: GlobalStore,
    pub regions: RegionStore,
    pub tokens: TokenRegistry,
    pub sessions: SessionRegistry,
    pub storage: Box<dyn Storage>,
    pub rng: StdRng,
    pub motd: String,
}

impl World {
    /// Hydrates the global and region stores from `storage`.
    pub fn load(storage: Box<dyn Storage>, motd: String) -> Result<Self, StorageError> {
        let global = BlockMap::from_snapshot(storage.load_global()?);

        let mut regions = RegionStore::new();
        for region in storage.load_regions()? {
            regions.insert_region(region, BlockMap::from_snapshot(storage.load_region_data(region)?));
        }

        info!(
            "Loaded {} global blocks and {} regions",
            global.len(),
            regions.len()
        );

        Ok(Self {
            global,
            regions,
            tokens: TokenRegistry::new(),
            sessions: SessionRegistry::new(),
            storage,
            rng: StdRng::from_entropy(),
            motd,
        })
    }

    /// Hydrates `identity`'s player record and registers it under a new
    /// session id.
    pub fn start_session(&mut self, identity: &str) -> Result<SessionId, StorageError> {
        let blocks = self.storage.load_player_data(identity)?;
        let record = PlayerRecord::new(identity.to_string(), blocks);
        let id = self.sessions.allocate(record, &mut self.rng);

        info!("Session {} started for {}", id, identity);
        Ok(id)
    }

    /// Removes a session and writes its player blocks back to storage.
    pub fn end_session(&mut self, id: SessionId) -> Option<PlayerRecord> {
        let record = self.sessions.remove(id)?;

        let saved = self
            .storage
            .save_player_data(&record.identity, &record.persisted_blocks())
            .and_then(|()| self.storage.flush());
        if let Err(e) = saved {
            error!("Failed to save player {}: {}", record.identity, e);
        }

        info!("Session {} ended for {}", id, record.identity);
        Some(record)
    }

    /// Flushes the global and region stores and forgets all tokens.
    pub fn persist(&mut self) {
        self.tokens.clear();

        if let Err(e) = self.storage.save_global(&self.global.snapshot()) {
            error!("Failed to save global blocks: {}", e);
        }

        for (region, blocks) in self.regions.regions() {
            if let Err(e) = self.storage.save_region_data(region, &blocks.snapshot()) {
                error!("Failed to save region {}: {}", region, e);
            }
        }

        if let Err(e) = self.storage.flush() {
            error!("Failed to flush world to storage: {}", e);
        }

        info!(
            "Persisted {} global blocks and {} regions",
            self.global.len(),
            self.regions.len()
        );
    }
}
