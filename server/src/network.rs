//! Server network layer: TCP accept loop and the task that owns the world

use crate::connection::{ConnectionEvent, ConnectionHandle, ConnectionId};
use crate::dispatch::{dispatch, Context, Outcome, Response};
use crate::storage::Storage;
use crate::world::World;
use log::{error, info, warn};
use protocol::{tags, PayloadBuilder};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Banner shown by the launcher when no message is configured.
pub const DEFAULT_MOTD: &str = "==TEN TWO==\r\n\r\nDSO server";

/// Runtime settings for [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, e.g. `0.0.0.0:14902`
    pub bind_addr: String,
    /// Launcher banner text
    pub motd: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:14902".to_string(),
            motd: DEFAULT_MOTD.to_string(),
        }
    }
}

/// Main server: accepts connections and runs every command against the world
///
/// All state lives in this struct and is only touched from [`Server::run_until`],
/// one event at a time. Connection tasks do nothing but move bytes.
pub struct Server {
    listener: TcpListener,
    world: World,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    next_conn: ConnectionId,

    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Server {
    /// Loads the world from `storage` and binds the listen socket.
    pub async fn bind(
        config: ServerConfig,
        storage: Box<dyn Storage>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let world = World::load(storage, config.motd)?;
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            world,
            connections: HashMap::new(),
            next_conn: 1,
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves clients until `shutdown` completes or accepting fails, then
    /// closes every connection and persists the world.
    pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            break;
                        }
                    }
                },

                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                },

                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        self.shutdown();
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_conn;
        self.next_conn += 1;

        info!("Accepted connection {} from {}", id, addr);
        let handle = ConnectionHandle::spawn(id, stream, addr, self.event_tx.clone());
        self.connections.insert(id, handle);
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Packet { conn, payload } => self.handle_packet(conn, &payload),
            ConnectionEvent::Closed { conn, result } => {
                if let Err(e) = result {
                    warn!("Connection {} dropped: {}", conn, e);
                }
                self.close_connection(conn);
            }
        }
    }

    /// Runs one command to completion for `conn`.
    fn handle_packet(&mut self, conn: ConnectionId, payload: &[u8]) {
        // packets still in flight from a connection we already closed
        let Some(handle) = self.connections.get_mut(&conn) else {
            return;
        };

        let mut ctx = Context {
            world: &mut self.world,
            session: &mut handle.session,
            now: Instant::now(),
        };

        match dispatch(&mut ctx, payload) {
            Ok(Outcome::Reply(response)) => {
                if let Err(e) = handle.send(&response) {
                    warn!("Cannot frame reply for connection {}: {}", conn, e);
                    self.close_connection(conn);
                }
            }
            Ok(Outcome::Silent) => {}
            Ok(Outcome::Close) => self.close_connection(conn),
            Err(e) => {
                warn!("Protocol violation from {}: {}", handle.addr, e);
                self.close_connection(conn);
            }
        }
    }

    /// Drops `conn`, telling everyone in the world when it held a session.
    fn close_connection(&mut self, conn: ConnectionId) {
        let Some(handle) = self.connections.remove(&conn) else {
            return;
        };

        if let Some(id) = handle.session {
            let notice = Response::packed(PayloadBuilder::new(tags::DS_CL).u32(id).build());
            let in_world = self
                .connections
                .values()
                .filter(|other| other.session.is_some());

            for other in in_world.chain(std::iter::once(&handle)) {
                if let Err(e) = other.send(&notice) {
                    warn!("Failed to queue close notice for {}: {}", other.addr, e);
                }
            }
            self.world.end_session(id);
        }

        info!("Closed connection {} from {}", conn, handle.addr);
        handle.close();
    }

    fn shutdown(mut self) {
        let open: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for conn in open {
            self.close_connection(conn);
        }

        self.world.persist();
        info!("Server stopped");
    }
}
