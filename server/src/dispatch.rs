//! Command dispatch: one handler per request tag
//!
//! [`dispatch`] splits the tag off a decoded payload, looks it up in a fixed
//! table and runs the handler to completion against the [`World`]. Handlers
//! validate the body exactly; anything malformed is a [`ProtocolError`] and
//! costs the sender its connection, never the process.

use crate::memory::MAX_BLOCK_SIZE;
use crate::session::{PlayerRecord, SessionId, PLAYER_BLOCKS, SLOT_COUNT};
use crate::storage::StorageError;
use crate::utils::{debug_dump, unix_time, year_offsets};
use crate::world::World;
use log::{debug, info, warn};
use protocol::{split_tag, tags, CodecError, PayloadBuilder, PayloadReader, Tag};
use std::time::Instant;
use thiserror::Error;
use time::OffsetDateTime;

/// Reply sent when a launcher login is refused.
pub const LOGIN_DENIED: &str = "Invalid username or password.";

/// Request content the server refuses to act on. Fatal to the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("payload of {len} bytes has no command tag")]
    MissingTag { len: usize },
    #[error("slot index {0} out of range")]
    SlotOutOfRange(u32),
    #[error("{command} does not support block {block}")]
    UnsupportedBlock { command: Tag, block: Tag },
    #[error("block {block} does not take indices ({idx1}, {idx2})")]
    BadIndex { block: Tag, idx1: u32, idx2: u32 },
    #[error("write key must be 0, got {0}")]
    NonZeroKey(u32),
    #[error("write declares {declared} bytes but carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("block access ends at {end}, past the 1 MiB limit")]
    BlockTooLarge { end: u64 },
    #[error("{0} requires an active session")]
    NotInSession(Tag),
}

/// A reply payload and whether it may be sent compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub payload: Vec<u8>,
    pub compress: bool,
}

impl Response {
    pub fn packed(payload: Vec<u8>) -> Self {
        Self {
            payload,
            compress: true,
        }
    }

    pub fn raw(payload: Vec<u8>) -> Self {
        Self {
            payload,
            compress: false,
        }
    }
}

/// What the connection does after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(Response),
    Silent,
    Close,
}

/// Per-packet view of the server: the world plus the sender's session slot.
pub struct Context<'a> {
    pub world: &'a mut World,
    pub session: &'a mut Option<SessionId>,
    pub now: Instant,
}

impl Context<'_> {
    fn session_id(&self, command: Tag) -> Result<SessionId, ProtocolError> {
        self.session.ok_or(ProtocolError::NotInSession(command))
    }

    fn player_mut(&mut self, command: Tag) -> Result<&mut PlayerRecord, ProtocolError> {
        let id = self.session_id(command)?;
        self.world
            .sessions
            .get_mut(id)
            .ok_or(ProtocolError::NotInSession(command))
    }
}

type Handler = fn(&mut Context<'_>, PayloadReader<'_>) -> Result<Outcome, ProtocolError>;

const COMMANDS: &[(Tag, Handler)] = &[
    (tags::LAHI, launcher_info),
    (tags::LAUP, launcher_login),
    (tags::DSIT, join_world),
    (tags::DSLG, client_log),
    (tags::DSSL, ping),
    (tags::DSNS, select_slot),
    (tags::DSPS, set_position),
    (tags::DSDT, host_date),
    (tags::DSRS, read_seed),
    (tags::DSRL, roll_seed),
    (tags::DSNM, check_name),
    (tags::DSRI, region_info),
    (tags::DSRD, read_block),
    (tags::DSWQ, write_shared),
    (tags::DSWT, write_player),
];

/// Runs the handler for one decoded `tag + body` payload.
pub fn dispatch(ctx: &mut Context<'_>, payload: &[u8]) -> Result<Outcome, ProtocolError> {
    let (tag, body) = split_tag(payload).ok_or(ProtocolError::MissingTag {
        len: payload.len(),
    })?;

    match COMMANDS.iter().find(|(known, _)| *known == tag) {
        Some((_, handler)) => handler(ctx, PayloadReader::new(body)),
        None => {
            debug!("Ignoring unknown command {} ({} bytes)", tag, body.len());
            debug_dump(body);
            Ok(Outcome::Silent)
        }
    }
}

fn slot_index(value: u32) -> Result<usize, ProtocolError> {
    match value as usize {
        slot if slot < SLOT_COUNT => Ok(slot),
        _ => Err(ProtocolError::SlotOutOfRange(value)),
    }
}

fn check_span(addr: u32, len: usize) -> Result<(), ProtocolError> {
    let end = u64::from(addr) + len as u64;
    if end > MAX_BLOCK_SIZE as u64 {
        return Err(ProtocolError::BlockTooLarge { end });
    }
    Ok(())
}

/// `dsIN`: the session id followed by the player's slot table.
pub fn slot_results(id: SessionId, player: &PlayerRecord) -> Vec<u8> {
    let mut reply = PayloadBuilder::new(tags::DS_IN).u32(id);
    for perm in player.perms {
        reply = reply.u8(perm);
    }
    reply = reply.string(player.selected_name());
    for (flag, name) in player.flags.iter().zip(&player.names) {
        reply = reply.u32(*flag).string(name);
    }
    reply.u32(std::process::id()).build()
}

fn launcher_info(ctx: &mut Context<'_>, body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    body.finish()?;

    let banner = format!(
        "{}\r\nTotal players online: {}",
        ctx.world.motd,
        ctx.world.sessions.len()
    );
    Ok(Outcome::Reply(Response::raw(
        PayloadBuilder::new(tags::LA_HI).string(&banner).build(),
    )))
}

fn launcher_login(ctx: &mut Context<'_>, mut body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let username = body.string()?;
    let password = body.string()?;
    body.finish()?;

    let world = &mut *ctx.world;
    let reply = match world.storage.check_credentials(&username, &password)? {
        Some(identity) => {
            let token = world.tokens.issue(identity, ctx.now, &mut world.rng);
            info!("Issued login token for {}", username);
            PayloadBuilder::new(tags::LA_OK).string(&token).build()
        }
        None => {
            info!("Denied login for {}", username);
            PayloadBuilder::new(tags::LA_NO).string(LOGIN_DENIED).build()
        }
    };
    Ok(Outcome::Reply(Response::raw(reply)))
}

fn join_world(ctx: &mut Context<'_>, mut body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let token = body.string()?;
    body.finish()?;

    let Some(identity) = ctx.world.tokens.redeem(&token, ctx.now) else {
        info!("Rejected unknown or expired login token");
        return Ok(Outcome::Close);
    };

    if ctx.session.is_some() || ctx.world.sessions.find_by_identity(&identity).is_some() {
        info!("{} is already logged in", identity);
        return Ok(Outcome::Reply(Response::raw(
            PayloadBuilder::new(tags::DS_NI).build(),
        )));
    }

    let id = ctx.world.start_session(&identity)?;
    *ctx.session = Some(id);
    let player = ctx.player_mut(tags::DSIT)?;
    Ok(Outcome::Reply(Response::packed(slot_results(id, player))))
}

fn client_log(_ctx: &mut Context<'_>, mut body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let message = body.string()?;
    body.finish()?;

    debug!("Client log: {}", message);
    Ok(Outcome::Silent)
}

fn ping(_ctx: &mut Context<'_>, body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    body.finish()?;

    Ok(Outcome::Reply(Response::packed(
        PayloadBuilder::new(tags::DS_SL).u32(unix_time()).build(),
    )))
}

fn select_slot(ctx: &mut Context<'_>, mut body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let slot = slot_index(body.u32()?)?;
    body.finish()?;

    let id = ctx.session_id(tags::DSNS)?;
    let player = ctx.player_mut(tags::DSNS)?;
    player.slot = slot;
    debug!("Session {} selected slot {}", id, slot);

    Ok(Outcome::Reply(Response::packed(slot_results(id, player))))
}

fn set_position(ctx: &mut Context<'_>, mut body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let session = body.u32()?;
    let kind = body.u32()?;
    let x = body.u32()?;
    let y = body.u32()?;
    let region = body.u32()?;
    body.finish()?;

    ctx.player_mut(tags::DSPS)?.set_position(x, y, region);
    debug!(
        "Session {} moved to ({}, {}) in region {}",
        session, x, y, region
    );

    let reply = PayloadBuilder::new(tags::DS_PS)
        .u32(session)
        .u32(1)
        .u32(session)
        .u32(kind)
        .u32(x)
        .u32(y)
        .u32(region)
        .build();
    Ok(Outcome::Reply(Response::packed(reply)))
}

fn host_date(_ctx: &mut Context<'_>, mut body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    body.u32()?;
    body.finish()?;

    let (seconds, days) = year_offsets(OffsetDateTime::now_utc());
    Ok(Outcome::Reply(Response::packed(
        PayloadBuilder::new(tags::DS_DT).u32(seconds).u32(days).build(),
    )))
}

fn read_seed(ctx: &mut Context<'_>, mut body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let session = body.u32()?;
    let raw_slot = body.u32()?;
    let slot = slot_index(raw_slot)?;
    body.finish()?;

    let seed = ctx.player_mut(tags::DSRS)?.seeds[slot];
    Ok(Outcome::Reply(Response::packed(
        PayloadBuilder::new(tags::DS_RS)
            .u32(session)
            .u32(raw_slot)
            .u32(seed)
            .build(),
    )))
}

fn roll_seed(ctx: &mut Context<'_>, mut body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let session = body.u32()?;
    let raw_slot = body.u32()?;
    let slot = slot_index(raw_slot)?;
    body.finish()?;

    let seed = ctx.player_mut(tags::DSRL)?.roll_seed(slot);
    Ok(Outcome::Reply(Response::packed(
        PayloadBuilder::new(tags::DS_RL)
            .u32(session)
            .u32(raw_slot)
            .u32(seed)
            .build(),
    )))
}

fn check_name(ctx: &mut Context<'_>, mut body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let raw_slot = body.u32()?;
    let slot = slot_index(raw_slot)?;
    let name = body.string()?;
    body.finish()?;

    let reply = PayloadBuilder::new(tags::DS_NM)
        .u32(raw_slot)
        .string(&name)
        .build();
    ctx.player_mut(tags::DSNM)?.set_name(slot, name);
    Ok(Outcome::Reply(Response::packed(reply)))
}

fn region_info(ctx: &mut Context<'_>, mut body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let session = body.u32()?;
    let region = body.u32()?;
    body.finish()?;

    let ids = ctx.world.sessions.ids_in_region(region);
    debug!("{} players in region {}: {:?}", ids.len(), region, ids);

    let mut reply = PayloadBuilder::new(tags::DS_RI)
        .u32(session)
        .u32(region)
        .i32(-(ids.len() as i32));
    for id in ids {
        reply = reply.u32(id);
    }
    Ok(Outcome::Reply(Response::packed(reply.build())))
}

fn read_block(ctx: &mut Context<'_>, mut body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let session = body.u32()?;
    let block = body.tag()?;
    let idx1 = body.u32()?;
    let idx2 = body.u32()?;
    let addr = body.u32()?;
    let len = body.u32()?;
    body.finish()?;

    let span = len as usize;
    check_span(addr, span)?;
    let start = addr as usize;
    let bad_index = ProtocolError::BadIndex { block, idx1, idx2 };

    let data = match block {
        tags::GLOB if idx2 == 0 => ctx.world.global.read(idx1, start, span),
        tags::GLRG => ctx.world.regions.read(idx1, idx2, start, span),
        tags::PCSA if idx1 == 0 && idx2 == 0 => {
            ctx.player_mut(tags::DSRD)?.blocks.read(block, start, span)
        }
        tags::PCIN | tags::PCOU | tags::PCQK if idx2 == 0 => {
            let target = match idx1 {
                0 => ctx.session_id(tags::DSRD)?,
                other => other,
            };
            match ctx.world.sessions.get(target) {
                Some(player) => player.blocks.read(block, start, span),
                None => {
                    debug!("Read of {} from absent session {}", block, target);
                    vec![0; span]
                }
            }
        }
        tags::GLOB | tags::PCSA | tags::PCIN | tags::PCOU | tags::PCQK => return Err(bad_index),
        _ => {
            return Err(ProtocolError::UnsupportedBlock {
                command: tags::DSRD,
                block,
            })
        }
    };

    let reply = PayloadBuilder::new(tags::DS_RD)
        .u32(session)
        .tag(block)
        .u32(idx1)
        .u32(idx2)
        .u32(1)
        .u32(addr)
        .u32(len)
        .bytes(&data)
        .build();
    Ok(Outcome::Reply(Response::packed(reply)))
}

struct WriteRequest<'a> {
    session: u32,
    block: Tag,
    idx1: u32,
    idx2: u32,
    addr: u32,
    data: &'a [u8],
}

impl<'a> WriteRequest<'a> {
    fn parse(mut body: PayloadReader<'a>) -> Result<Self, ProtocolError> {
        let session = body.u32()?;
        let block = body.tag()?;
        let idx1 = body.u32()?;
        let idx2 = body.u32()?;
        let key = body.u32()?;
        let addr = body.u32()?;
        let declared = body.u32()? as usize;
        let data = body.rest();

        if key != 0 {
            return Err(ProtocolError::NonZeroKey(key));
        }
        if declared != data.len() {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }
        check_span(addr, data.len())?;

        Ok(Self {
            session,
            block,
            idx1,
            idx2,
            addr,
            data,
        })
    }

    fn bad_index(&self) -> ProtocolError {
        ProtocolError::BadIndex {
            block: self.block,
            idx1: self.idx1,
            idx2: self.idx2,
        }
    }
}

fn write_shared(ctx: &mut Context<'_>, body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let req = WriteRequest::parse(body)?;
    let addr = req.addr as usize;

    match req.block {
        tags::GLOB if req.idx2 == 0 => ctx.world.global.write(req.idx1, addr, req.data),
        tags::GLOB => return Err(req.bad_index()),
        tags::GLRG => ctx.world.regions.write(req.idx1, req.idx2, addr, req.data),
        block => {
            return Err(ProtocolError::UnsupportedBlock {
                command: tags::DSWQ,
                block,
            })
        }
    }
    debug!(
        "Session {} wrote {} bytes to {} ({}, {}) at {}",
        req.session,
        req.data.len(),
        req.block,
        req.idx1,
        req.idx2,
        req.addr
    );

    let reply = PayloadBuilder::new(tags::DS_WT)
        .u32(req.session)
        .tag(req.block)
        .u32(req.idx1)
        .u32(req.idx2)
        .u32(1)
        .u32(req.data.len() as u32)
        .build();
    Ok(Outcome::Reply(Response::packed(reply)))
}

fn write_player(ctx: &mut Context<'_>, body: PayloadReader<'_>) -> Result<Outcome, ProtocolError> {
    let req = WriteRequest::parse(body)?;
    let addr = req.addr as usize;

    if !PLAYER_BLOCKS.contains(&req.block) {
        debug!("Ignoring write to unsupported block {}", req.block);
        debug_dump(req.data);
        return Ok(Outcome::Silent);
    }

    let target = match (req.block, req.idx1, req.idx2) {
        (_, 0, 0) => ctx.session_id(tags::DSWT)?,
        (tags::PCSA, _, _) => return Err(req.bad_index()),
        (_, other, 0) => other,
        _ => return Err(req.bad_index()),
    };

    match ctx.world.sessions.get_mut(target) {
        Some(player) => player.blocks.write(req.block, addr, req.data),
        None => warn!(
            "Dropped write of {} bytes to {} of absent session {}",
            req.data.len(),
            req.block,
            target
        ),
    }
    Ok(Outcome::Silent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SnapshotStorage;
    use std::collections::HashMap;
    use std::time::Duration;

    fn world() -> World {
        let mut storage = SnapshotStorage::in_memory();
        storage.add_login("alice", "secret").unwrap();
        storage.add_login("bob", "hunter2").unwrap();
        World::load(Box::new(storage), "Welcome".to_string()).unwrap()
    }

    fn run(world: &mut World, session: &mut Option<SessionId>, payload: &[u8]) -> Outcome {
        try_run(world, session, payload).unwrap()
    }

    fn try_run(
        world: &mut World,
        session: &mut Option<SessionId>,
        payload: &[u8],
    ) -> Result<Outcome, ProtocolError> {
        let mut ctx = Context {
            world,
            session,
            now: Instant::now(),
        };
        dispatch(&mut ctx, payload)
    }

    fn reply(outcome: Outcome) -> Response {
        match outcome {
            Outcome::Reply(response) => response,
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    fn body_of(response: &Response, tag: Tag) -> PayloadReader<'_> {
        let (got, body) = split_tag(&response.payload).unwrap();
        assert_eq!(got, tag);
        PayloadReader::new(body)
    }

    fn login(world: &mut World, user: &str, pass: &str) -> String {
        let payload = PayloadBuilder::new(tags::LAUP)
            .string(user)
            .string(pass)
            .build();
        let response = reply(run(world, &mut None, &payload));
        body_of(&response, tags::LA_OK).string().unwrap()
    }

    fn join(world: &mut World, user: &str, pass: &str) -> (Option<SessionId>, Response) {
        let token = login(world, user, pass);
        let mut session = None;
        let payload = PayloadBuilder::new(tags::DSIT).string(&token).build();
        let response = reply(run(world, &mut session, &payload));
        (session, response)
    }

    fn write_request(tag: Tag, block: Tag, idx1: u32, idx2: u32, addr: u32, data: &[u8]) -> Vec<u8> {
        PayloadBuilder::new(tag)
            .u32(0)
            .tag(block)
            .u32(idx1)
            .u32(idx2)
            .u32(0)
            .u32(addr)
            .u32(data.len() as u32)
            .bytes(data)
            .build()
    }

    fn read_request(block: Tag, idx1: u32, idx2: u32, addr: u32, len: u32) -> Vec<u8> {
        PayloadBuilder::new(tags::DSRD)
            .u32(0)
            .tag(block)
            .u32(idx1)
            .u32(idx2)
            .u32(addr)
            .u32(len)
            .build()
    }

    fn read_data(world: &mut World, session: &mut Option<SessionId>, payload: &[u8]) -> Vec<u8> {
        let response = reply(run(world, session, payload));
        let mut body = body_of(&response, tags::DS_RD);
        for _ in 0..7 {
            body.u32().unwrap();
        }
        body.rest().to_vec()
    }

    #[test]
    fn test_launcher_info_counts_players() {
        let mut world = world();
        join(&mut world, "alice", "secret");

        let response = reply(run(&mut world, &mut None, b"LAHI"));
        assert!(!response.compress);
        assert_eq!(
            body_of(&response, tags::LA_HI).string().unwrap(),
            "Welcome\r\nTotal players online: 1"
        );
    }

    #[test]
    fn test_login_accepted_and_denied() {
        let mut world = world();
        let token = login(&mut world, "alice", "secret");
        assert!(!token.is_empty());
        assert_eq!(world.tokens.len(), 1);

        let payload = PayloadBuilder::new(tags::LAUP)
            .string("alice")
            .string("nope")
            .build();
        let response = reply(run(&mut world, &mut None, &payload));
        assert!(!response.compress);
        assert_eq!(
            body_of(&response, tags::LA_NO).string().unwrap(),
            LOGIN_DENIED
        );
    }

    #[test]
    fn test_join_returns_default_slots() {
        let mut world = world();
        let (session, response) = join(&mut world, "alice", "secret");
        let id = session.unwrap();

        let mut body = body_of(&response, tags::DS_IN);
        assert_eq!(body.u32().unwrap(), id);
        assert_eq!(body.u32().unwrap().to_le_bytes(), [1, 1, 1, 1]);
        assert_eq!(body.string().unwrap(), "Larry");
        assert_eq!(body.u32().unwrap(), 1);
        assert_eq!(body.string().unwrap(), "Larry");
        for _ in 1..SLOT_COUNT {
            assert_eq!(body.u32().unwrap(), 0);
            assert_eq!(body.string().unwrap(), "");
        }
        assert_eq!(body.u32().unwrap(), std::process::id());
        body.finish().unwrap();
    }

    #[test]
    fn test_join_with_bad_token_closes() {
        let mut world = world();
        let mut session = None;
        let payload = PayloadBuilder::new(tags::DSIT).string("bogus").build();

        assert_eq!(run(&mut world, &mut session, &payload), Outcome::Close);
        assert!(session.is_none());
        assert!(world.sessions.is_empty());
    }

    #[test]
    fn test_join_with_expired_token_closes() {
        let mut world = world();
        let token = login(&mut world, "alice", "secret");
        let mut session = None;
        let mut ctx = Context {
            world: &mut world,
            session: &mut session,
            now: Instant::now() + Duration::from_secs(61),
        };
        let payload = PayloadBuilder::new(tags::DSIT).string(&token).build();

        assert_eq!(dispatch(&mut ctx, &payload).unwrap(), Outcome::Close);
    }

    #[test]
    fn test_second_join_for_same_identity_is_refused() {
        let mut world = world();
        join(&mut world, "alice", "secret");
        let (session, response) = join(&mut world, "alice", "secret");

        assert!(session.is_none());
        assert!(!response.compress);
        assert_eq!(response.payload, b"dsNI".to_vec());
        assert_eq!(world.sessions.len(), 1);
    }

    #[test]
    fn test_ping_and_log() {
        let mut world = world();
        let response = reply(run(&mut world, &mut None, b"DSSL"));
        assert!(body_of(&response, tags::DS_SL).u32().unwrap() > 1_700_000_000);

        let log = PayloadBuilder::new(tags::DSLG).string("hello").build();
        assert_eq!(run(&mut world, &mut None, &log), Outcome::Silent);

        assert!(matches!(
            try_run(&mut world, &mut None, b"DSSL\x00"),
            Err(ProtocolError::Codec(CodecError::TrailingBytes { extra: 1 }))
        ));
    }

    #[test]
    fn test_select_slot_and_name() {
        let mut world = world();
        let (mut session, _) = join(&mut world, "alice", "secret");

        let name = PayloadBuilder::new(tags::DSNM).u32(2).string("Sorak").build();
        let response = reply(run(&mut world, &mut session, &name));
        let mut body = body_of(&response, tags::DS_NM);
        assert_eq!(body.u32().unwrap(), 2);
        assert_eq!(body.string().unwrap(), "Sorak");

        let select = PayloadBuilder::new(tags::DSNS).u32(2).build();
        let response = reply(run(&mut world, &mut session, &select));
        let mut body = body_of(&response, tags::DS_IN);
        body.u32().unwrap();
        body.u32().unwrap();
        assert_eq!(body.string().unwrap(), "Sorak");

        let player = world.sessions.get(session.unwrap()).unwrap();
        assert_eq!(player.slot, 2);
        assert_eq!(player.flags, [1, 0, 1, 0]);
    }

    #[test]
    fn test_slot_out_of_range_is_fatal() {
        let mut world = world();
        let (mut session, _) = join(&mut world, "alice", "secret");
        let select = PayloadBuilder::new(tags::DSNS).u32(4).build();

        assert!(matches!(
            try_run(&mut world, &mut session, &select),
            Err(ProtocolError::SlotOutOfRange(4))
        ));
    }

    #[test]
    fn test_session_commands_need_a_session() {
        let mut world = world();
        let select = PayloadBuilder::new(tags::DSNS).u32(1).build();

        assert!(matches!(
            try_run(&mut world, &mut None, &select),
            Err(ProtocolError::NotInSession(tags::DSNS))
        ));
    }

    #[test]
    fn test_position_and_region_info() {
        let mut world = world();
        let (mut a, _) = join(&mut world, "alice", "secret");
        let (mut b, _) = join(&mut world, "bob", "hunter2");

        for session in [&mut a, &mut b] {
            let payload = PayloadBuilder::new(tags::DSPS)
                .u32(session.unwrap())
                .u32(3)
                .u32(10)
                .u32(20)
                .u32(5)
                .build();
            let response = reply(run(&mut world, session, &payload));
            let mut body = body_of(&response, tags::DS_PS);
            assert_eq!(body.u32().unwrap(), session.unwrap());
            assert_eq!(body.u32().unwrap(), 1);
        }

        let payload = PayloadBuilder::new(tags::DSRI).u32(a.unwrap()).u32(5).build();
        let response = reply(run(&mut world, &mut a, &payload));
        let mut body = body_of(&response, tags::DS_RI);
        assert_eq!(body.u32().unwrap(), a.unwrap());
        assert_eq!(body.u32().unwrap(), 5);
        assert_eq!(body.i32().unwrap(), -2);

        let mut expected = vec![a.unwrap(), b.unwrap()];
        expected.sort_unstable();
        assert_eq!(vec![body.u32().unwrap(), body.u32().unwrap()], expected);
        body.finish().unwrap();
    }

    #[test]
    fn test_seed_read_and_roll() {
        let mut world = world();
        let (mut session, _) = join(&mut world, "alice", "secret");
        let id = session.unwrap();

        let read = PayloadBuilder::new(tags::DSRS).u32(id).u32(1).build();
        let response = reply(run(&mut world, &mut session, &read));
        let mut body = body_of(&response, tags::DS_RS);
        assert_eq!((body.u32().unwrap(), body.u32().unwrap()), (id, 1));
        assert_eq!(body.u32().unwrap(), 0);

        let mut expected = PlayerRecord::new("x".to_string(), HashMap::new());
        let roll = PayloadBuilder::new(tags::DSRL).u32(id).u32(1).build();
        let response = reply(run(&mut world, &mut session, &roll));
        let mut body = body_of(&response, tags::DS_RL);
        body.u32().unwrap();
        body.u32().unwrap();
        assert_eq!(body.u32().unwrap(), expected.roll_seed(1));
    }

    #[test]
    fn test_host_date_fields() {
        let mut world = world();
        let payload = PayloadBuilder::new(tags::DSDT).u32(0).build();
        let response = reply(run(&mut world, &mut None, &payload));
        let mut body = body_of(&response, tags::DS_DT);

        assert!(body.u32().unwrap() < 86_400);
        assert!(body.u32().unwrap() < 366);
    }

    #[test]
    fn test_shared_write_then_read() {
        let mut world = world();
        let write = write_request(tags::DSWQ, tags::GLRG, 7, 2, 10, b"rock");
        let response = reply(run(&mut world, &mut None, &write));

        let mut body = body_of(&response, tags::DS_WT);
        assert_eq!(body.u32().unwrap(), 0);
        assert_eq!(body.tag().unwrap(), tags::GLRG);
        assert_eq!((body.u32().unwrap(), body.u32().unwrap()), (7, 2));
        assert_eq!(body.u32().unwrap(), 1, "key is always echoed as 1");
        assert_eq!(body.u32().unwrap(), 4);

        let read = read_request(tags::GLRG, 7, 2, 8, 8);
        assert_eq!(
            read_data(&mut world, &mut None, &read),
            b"\0\0rock\0\0".to_vec()
        );
    }

    #[test]
    fn test_global_read_of_fresh_block_is_zeros() {
        let mut world = world();
        let read = read_request(tags::GLOB, 3, 0, 100, 16);
        assert_eq!(read_data(&mut world, &mut None, &read), vec![0; 16]);
        assert!(world.global.is_empty());
    }

    #[test]
    fn test_write_validation() {
        let mut world = world();

        let mut keyed = write_request(tags::DSWQ, tags::GLOB, 1, 0, 0, b"ab");
        keyed[20] = 9;
        assert!(matches!(
            try_run(&mut world, &mut None, &keyed),
            Err(ProtocolError::NonZeroKey(9))
        ));

        let mut short = write_request(tags::DSWQ, tags::GLOB, 1, 0, 0, b"ab");
        short.pop();
        assert!(matches!(
            try_run(&mut world, &mut None, &short),
            Err(ProtocolError::LengthMismatch {
                declared: 2,
                actual: 1
            })
        ));

        let player_block = write_request(tags::DSWQ, tags::PCSA, 0, 0, 0, b"ab");
        assert!(matches!(
            try_run(&mut world, &mut None, &player_block),
            Err(ProtocolError::UnsupportedBlock { .. })
        ));

        let far = write_request(tags::DSWQ, tags::GLOB, 1, 0, MAX_BLOCK_SIZE as u32, b"a");
        assert!(matches!(
            try_run(&mut world, &mut None, &far),
            Err(ProtocolError::BlockTooLarge { .. })
        ));
        assert!(world.global.is_empty());
    }

    #[test]
    fn test_player_save_write_and_read() {
        let mut world = world();
        let (mut session, _) = join(&mut world, "alice", "secret");

        let write = write_request(tags::DSWT, tags::PCSA, 0, 0, 0, &[1, 2, 3, 4]);
        assert_eq!(run(&mut world, &mut session, &write), Outcome::Silent);

        let read = read_request(tags::PCSA, 0, 0, 0, 6);
        assert_eq!(
            read_data(&mut world, &mut session, &read),
            vec![1, 2, 3, 4, 0, 0]
        );

        let indexed = write_request(tags::DSWT, tags::PCSA, 1, 0, 0, &[1]);
        assert!(matches!(
            try_run(&mut world, &mut session, &indexed),
            Err(ProtocolError::BadIndex { .. })
        ));
    }

    #[test]
    fn test_mailbox_write_to_other_session() {
        let mut world = world();
        let (mut a, _) = join(&mut world, "alice", "secret");
        let (mut b, _) = join(&mut world, "bob", "hunter2");

        let write = write_request(tags::DSWT, tags::PCIN, b.unwrap(), 0, 0, b"mail");
        assert_eq!(run(&mut world, &mut a, &write), Outcome::Silent);

        let own = read_request(tags::PCIN, 0, 0, 0, 4);
        assert_eq!(read_data(&mut world, &mut b, &own), b"mail".to_vec());

        let remote = read_request(tags::PCIN, b.unwrap(), 0, 0, 4);
        assert_eq!(read_data(&mut world, &mut a, &remote), b"mail".to_vec());
    }

    #[test]
    fn test_mailbox_to_absent_session_is_dropped() {
        let mut world = world();
        let (mut a, _) = join(&mut world, "alice", "secret");
        let absent = a.unwrap().wrapping_add(1);

        let write = write_request(tags::DSWT, tags::PCOU, absent, 0, 0, b"lost");
        assert_eq!(run(&mut world, &mut a, &write), Outcome::Silent);

        let read = read_request(tags::PCOU, absent, 0, 0, 4);
        assert_eq!(read_data(&mut world, &mut a, &read), vec![0; 4]);
    }

    #[test]
    fn test_player_write_to_unknown_block_is_ignored() {
        let mut world = world();
        let (mut session, _) = join(&mut world, "alice", "secret");

        let write = write_request(tags::DSWT, Tag::new(b"XXXX"), 0, 0, 0, b"junk");
        assert_eq!(run(&mut world, &mut session, &write), Outcome::Silent);

        let read = read_request(Tag::new(b"XXXX"), 0, 0, 0, 4);
        assert!(matches!(
            try_run(&mut world, &mut session, &read),
            Err(ProtocolError::UnsupportedBlock { .. })
        ));
    }

    #[test]
    fn test_unknown_and_untagged_packets() {
        let mut world = world();
        assert_eq!(run(&mut world, &mut None, b"ZZZZ\x01\x02"), Outcome::Silent);
        assert!(matches!(
            try_run(&mut world, &mut None, b"DS"),
            Err(ProtocolError::MissingTag { len: 2 })
        ));
    }
}
