use crate::dispatch::Response;
use crate::session::SessionId;
use log::debug;
use protocol::{encode_frame, CodecError, FrameError, FrameReader};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub type ConnectionId = u64;

const READ_CHUNK: usize = 4096;

/// Why a connection's read side stopped, when it was not a clean hang-up.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("socket read failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("peer hung up {wanted} bytes short of a complete frame")]
    Truncated { wanted: usize },
}

/// Sent from reader tasks to the server loop, in arrival order per connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    Packet {
        conn: ConnectionId,
        payload: Vec<u8>,
    },
    Closed {
        conn: ConnectionId,
        result: Result<(), ReadError>,
    },
}

/// Reads frames off `reader` until it hits EOF or an error, forwarding each
/// decoded payload and finally the close reason.
pub async fn read_frames<R: AsyncRead + Unpin>(
    conn: ConnectionId,
    mut reader: R,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let result = pump_frames(conn, &mut reader, &events).await;
    // the loop may already be gone during shutdown
    let _ = events.send(ConnectionEvent::Closed { conn, result });
}

async fn pump_frames<R: AsyncRead + Unpin>(
    conn: ConnectionId,
    reader: &mut R,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
) -> Result<(), ReadError> {
    let mut frames = FrameReader::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut ready = Vec::new();

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            if frames.is_mid_frame() {
                return Err(ReadError::Truncated {
                    wanted: frames.wanted(),
                });
            }
            return Ok(());
        }

        // frames completed ahead of a bad header still reach the loop
        let pushed = frames.push(&buf[..n], &mut ready);
        for frame in ready.drain(..) {
            let payload = frame.into_payload()?;
            if events
                .send(ConnectionEvent::Packet { conn, payload })
                .is_err()
            {
                return Ok(());
            }
        }
        pushed?;
    }
}

/// Writes queued frames in order. Returns once every sender is dropped, after
/// shutting the write side down.
pub async fn write_frames<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) -> io::Result<()> {
    while let Some(frame) = outbound.recv().await {
        writer.write_all(&frame).await?;
    }
    writer.shutdown().await
}

/// The server loop's side of one client connection
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    /// Set once the client has joined the world
    pub session: Option<SessionId>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: AbortHandle,
}

impl ConnectionHandle {
    /// Splits `stream` into a reader task feeding `events` and a writer task.
    pub fn spawn(
        id: ConnectionId,
        stream: TcpStream,
        addr: SocketAddr,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound, queued) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_frames(id, read_half, events)).abort_handle();
        tokio::spawn(async move {
            if let Err(e) = write_frames(write_half, queued).await {
                debug!("Write to connection {} failed: {}", id, e);
            }
        });

        Self {
            id,
            addr,
            session: None,
            outbound,
            reader,
        }
    }

    /// Frames and queues `response`.
    pub fn send(&self, response: &Response) -> Result<(), FrameError> {
        let frame = encode_frame(&response.payload, response.compress)?;
        if self.outbound.send(frame).is_err() {
            debug!("Connection {} writer already gone", self.id);
        }
        Ok(())
    }

    /// Stops reading. Queued frames are still flushed before the socket closes.
    pub fn close(self) {
        self.reader.abort();
    }
}
