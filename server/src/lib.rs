//! # DSO Server Library
//!
//! This library implements the TEN/DSO game server: a TCP service that logs
//! players in, keeps the shared world state in memory, and answers the fixed
//! set of binary commands the game client speaks.
//!
//! ## Core Responsibilities
//!
//! ### Authentication
//! A launcher login (`LAUP`) is checked against storage and answered with a
//! short-lived login token. The game client then redeems that token (`DSIT`)
//! to open a world session with a random session id. Tokens stay valid for 60
//! seconds and an account can hold only one live session.
//!
//! ### Shared Memory
//! The game keeps most of its state in byte blocks that clients read and write
//! by address:
//! - `GLOB`: world-wide tables such as leaderboards
//! - `GLRG`: per-region objects
//! - `PCSA`, `PCIN`, `PCOU`, `PCQK`: per-player save data and mailboxes
//!
//! Blocks grow on write and read as zeros past their end. The server never
//! interprets their contents.
//!
//! ### Persistence
//! Global and region blocks are loaded at startup and saved at shutdown.
//! Player blocks are loaded when a session starts and saved when it ends.
//!
//! ## Architecture Design
//!
//! ### Single Owner Event Loop
//! One task owns the whole [`world::World`] and processes events one at a time,
//! each to completion. Reader tasks only assemble frames and writer tasks only
//! flush bytes, so no state is shared and nothing needs a lock. Two clients
//! writing the same block see last-writer-wins in arrival order.
//!
//! ### Wire Protocol
//! Framing and the run-length codec live in the `protocol` crate. Replies are
//! compressed only when that makes them smaller.
//!
//! ## Module Organization
//!
//! ### Memory Module (`memory`)
//! Sparse growable blocks and the global and region stores.
//!
//! ### Session Module (`session`)
//! Player records, login tokens and the live session registry.
//!
//! ### Storage Module (`storage`)
//! The load/save contract and a snapshot file backend.
//!
//! ### Dispatch Module (`dispatch`)
//! The command table and one handler per request tag.
//!
//! ### Connection and Network Modules (`connection`, `network`)
//! Per-socket reader/writer tasks and the accept loop that drives everything.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use server::storage::SnapshotStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = SnapshotStorage::open("server.db")?;
//!     let server = Server::bind(ServerConfig::default(), Box::new(storage)).await?;
//!
//!     // Serve until Ctrl-C, then close every connection and save the world
//!     server
//!         .run_until(async {
//!             tokio::signal::ctrl_c().await.ok();
//!         })
//!         .await;
//!
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod dispatch;
pub mod memory;
pub mod network;
pub mod session;
pub mod storage;
pub mod utils;
pub mod world;
