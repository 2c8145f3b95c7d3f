//! Transport session: line-oriented records over the frame codec.
//!
//! The wire carries one JSON envelope per text frame. The read side runs in
//! its own task so the owning event loop can `select!` without ever
//! cancelling a partially read frame; decoded events arrive over a bounded
//! channel. The write side stays with the state machine, which also answers
//! protocol pings surfaced by the reader.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::ws::frame::{self, FrameError, OpCode};

/// Depth of the inbound event channel; the reader blocks (backpressure)
/// when the state machine falls behind.
const EVENT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("text frame is not valid utf-8")]
    Utf8,
    #[error("unexpected binary frame")]
    Binary,
    #[error("record of {len} bytes exceeds frame cap {cap}")]
    Oversize { len: usize, cap: usize },
}

/// Decoded inbound traffic, in wire order.
#[derive(Debug)]
pub enum WireEvent {
    /// One JSON envelope.
    Record(String),
    /// Protocol ping; the state machine must echo the payload in a pong.
    Ping(Vec<u8>),
    /// Protocol pong (transport-level liveness).
    Pong,
    /// Clean close from the peer.
    Closed,
    /// Read-side failure; the connection is dead.
    Failed(SessionError),
}

// ---------------------------------------------------------------------------
// Write side
// ---------------------------------------------------------------------------

/// Owns the write half of the upgraded stream.
pub struct Session<W> {
    writer: W,
    max_frame: usize,
}

impl<W: AsyncWrite + Unpin> Session<W> {
    pub fn new(writer: W, max_frame: usize) -> Self {
        Self { writer, max_frame }
    }

    /// Send one envelope as a masked text frame.
    pub async fn send_record(&mut self, text: &str) -> Result<(), SessionError> {
        if text.len() > self.max_frame {
            return Err(SessionError::Oversize {
                len: text.len(),
                cap: self.max_frame,
            });
        }
        let wire = frame::encode(OpCode::Text, text.as_bytes(), rand::random());
        self.writer.write_all(&wire).await?;
        Ok(())
    }

    /// Echo a protocol ping.
    pub async fn send_pong(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let wire = frame::encode(OpCode::Pong, payload, rand::random());
        self.writer.write_all(&wire).await?;
        Ok(())
    }

    /// Best-effort close frame; the socket is dropped right after.
    pub async fn send_close(&mut self) {
        let wire = frame::encode(OpCode::Close, &[], rand::random());
        let _ = self.writer.write_all(&wire).await;
    }
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

/// Spawn the frame reader for one connection.
///
/// The task forwards decoded events until the peer closes, a protocol error
/// occurs, or the receiving side is dropped (which is how teardown stops a
/// stale reader). Exactly one terminal event (`Closed` or `Failed`) is sent.
pub fn spawn_reader<R>(
    mut reader: R,
    max_frame: usize,
) -> (mpsc::Receiver<WireEvent>, tokio::task::JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let handle = tokio::spawn(async move {
        loop {
            let event = match frame::read_frame(&mut reader, max_frame).await {
                Ok(f) => match f.opcode {
                    OpCode::Text => match String::from_utf8(f.payload) {
                        Ok(text) => WireEvent::Record(text),
                        Err(_) => WireEvent::Failed(SessionError::Utf8),
                    },
                    OpCode::Ping => WireEvent::Ping(f.payload),
                    OpCode::Pong => WireEvent::Pong,
                    OpCode::Close => WireEvent::Closed,
                    OpCode::Binary => WireEvent::Failed(SessionError::Binary),
                    // read_frame already rejects continuations.
                    OpCode::Continuation => WireEvent::Failed(SessionError::Frame(
                        FrameError::Fragmented,
                    )),
                },
                Err(FrameError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    WireEvent::Closed
                }
                Err(e) => WireEvent::Failed(e.into()),
            };

            let terminal = matches!(event, WireEvent::Closed | WireEvent::Failed(_));
            if tx.send(event).await.is_err() || terminal {
                break;
            }
        }
    });
    (rx, handle)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
