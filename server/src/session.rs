//! Login tokens, live sessions and the per-player record they carry
//!
//! This module tracks every identity between launcher login and disconnect:
//! - A successful `LAUP` credential check issues a short-lived login token
//! - A `DSIT` world-join redeems the token and opens a session with a fresh
//!   random session id and a [`PlayerRecord`] hydrated from storage
//! - Closing the connection ends the session; its record goes back to storage
//!
//! Both registries are plain maps owned by the server loop. Token expiry is a
//! timestamp comparison made on every lookup; nothing runs on a timer.

use crate::memory::BlockMap;
use crate::storage::Identity;
use log::debug;
use protocol::{tags, Tag};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Ephemeral identifier naming an active player in the world.
pub type SessionId = u32;

/// Number of character slots per account.
pub const SLOT_COUNT: usize = 4;

/// How long a login token stays redeemable.
pub const TOKEN_TTL: Duration = Duration::from_secs(60);

/// Session ids are drawn from `[1, SESSION_ID_LIMIT)`.
pub const SESSION_ID_LIMIT: u32 = 0x7FFF_FFFF;

const TOKEN_LEN: usize = 16;

/// Player-scoped block tags that are persisted with the account.
pub const PLAYER_BLOCKS: [Tag; 4] = [tags::PCSA, tags::PCIN, tags::PCOU, tags::PCQK];

/// Everything the server knows about one in-world player
///
/// The tagged blocks (`PCSA` save data and the `PCIN`/`PCOU`/`PCQK` queues)
/// are loaded from storage when the session starts and written back when it
/// ends. The slot fields, seeds and position live only as long as the session.
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    /// Account this record belongs to
    pub identity: Identity,
    /// Persisted player blocks keyed by tag
    pub blocks: BlockMap<Tag>,
    /// Selected character slot, always below [`SLOT_COUNT`]
    pub slot: usize,
    /// Permission level per slot
    pub perms: [u8; SLOT_COUNT],
    /// Non-zero when the slot holds a character
    pub flags: [u32; SLOT_COUNT],
    /// Character name per slot
    pub names: [String; SLOT_COUNT],
    /// Dice seed per slot
    pub seeds: [u32; SLOT_COUNT],
    /// Last reported map position
    pub position: (u32, u32),
    /// Region the player last reported being in
    pub region: u32,
}

impl PlayerRecord {
    /// Creates a record for `identity` with default slot data and the given
    /// persisted blocks.
    pub fn new(identity: Identity, blocks: HashMap<Tag, Vec<u8>>) -> Self {
        Self {
            identity,
            blocks: BlockMap::from_snapshot(blocks),
            slot: 0,
            perms: [1; SLOT_COUNT],
            flags: [1, 0, 0, 0],
            names: [
                "Larry".to_string(),
                String::new(),
                String::new(),
                String::new(),
            ],
            seeds: [0; SLOT_COUNT],
            position: (0, 0),
            region: 0,
        }
    }

    pub fn selected_name(&self) -> &str {
        &self.names[self.slot]
    }

    pub fn set_position(&mut self, x: u32, y: u32, region: u32) {
        self.position = (x, y);
        self.region = region;
    }

    /// Stores a character name, marking the slot occupied when non-empty.
    pub fn set_name(&mut self, slot: usize, name: String) {
        self.flags[slot] = u32::from(!name.is_empty());
        self.names[slot] = name;
    }

    /// Advances the slot's seed: the RNG is seeded with the old value and
    /// drawn from once.
    pub fn roll_seed(&mut self, slot: usize) -> u32 {
        let mut rng = StdRng::seed_from_u64(u64::from(self.seeds[slot]));
        self.seeds[slot] = rng.gen_range(0..u32::MAX);
        self.seeds[slot]
    }

    /// Copies the persisted blocks out for storage.
    pub fn persisted_blocks(&self) -> HashMap<Tag, Vec<u8>> {
        self.blocks.snapshot()
    }
}

#[derive(Debug, Clone)]
struct LoginToken {
    identity: Identity,
    issued_at: Instant,
}

/// Login tokens bridging a launcher login to a world-join
///
/// Redeeming a token does not consume it; it stays valid until it is older
/// than [`TOKEN_TTL`]. Expired tokens are purged whenever the registry is
/// consulted.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: HashMap<String, LoginToken>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh random token for `identity`.
    pub fn issue<R: Rng + ?Sized>(&mut self, identity: Identity, now: Instant, rng: &mut R) -> String {
        self.purge_expired(now);

        let token = loop {
            let candidate: String = (0..TOKEN_LEN)
                .map(|_| rng.sample(Alphanumeric) as char)
                .collect();
            if !self.tokens.contains_key(&candidate) {
                break candidate;
            }
        };

        self.tokens.insert(
            token.clone(),
            LoginToken {
                identity,
                issued_at: now,
            },
        );
        token
    }

    /// Looks up the identity behind `token` if it has not expired.
    pub fn redeem(&mut self, token: &str, now: Instant) -> Option<Identity> {
        self.purge_expired(now);
        self.tokens.get(token).map(|t| t.identity.clone())
    }

    /// Drops every token older than [`TOKEN_TTL`].
    pub fn purge_expired(&mut self, now: Instant) {
        let before = self.tokens.len();
        self.tokens
            .retain(|_, t| now.saturating_duration_since(t.issued_at) <= TOKEN_TTL);
        let purged = before - self.tokens.len();
        if purged > 0 {
            debug!("Purged {} expired login tokens", purged);
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }
}

/// Player records of every live session, keyed by session id
///
/// Session ids are drawn uniformly at random and never collide with an id
/// that is currently in use. An id is free again once its session is removed.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, PlayerRecord>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `record` under a newly drawn session id.
    pub fn allocate<R: Rng + ?Sized>(&mut self, record: PlayerRecord, rng: &mut R) -> SessionId {
        let id = loop {
            let candidate = rng.gen_range(1..SESSION_ID_LIMIT);
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        self.sessions.insert(id, record);
        id
    }

    pub fn remove(&mut self, id: SessionId) -> Option<PlayerRecord> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&PlayerRecord> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut PlayerRecord> {
        self.sessions.get_mut(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Finds the live session of `identity`, if any.
    pub fn find_by_identity(&self, identity: &str) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, record)| record.identity == identity)
            .map(|(id, _)| *id)
    }

    /// Sessions whose player last reported being in `region`, in id order.
    pub fn ids_in_region(&self, region: u32) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, record)| record.region == region)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
