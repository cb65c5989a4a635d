//! One command session per accepted TCP connection.
//!
//! The session loops `ReadingRequest → Dispatching → WritingResponse` until
//! the peer closes, a socket error occurs, or the session is cancelled. A
//! malformed request or an unknown command is a protocol violation: it is
//! logged and closes this session only.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::dispatch::HandlerTable;
use crate::error::{FrameError, ProtocolError};
use crate::framing::{read_value, write_value_timeout};
use crate::request::Request;

/// Where a session is in its request loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    ReadingRequest,
    Dispatching,
    WritingResponse,
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    PeerClosed,
    Cancelled,
    Violation(ProtocolError),
    BadFrame(FrameError),
    Transport(FrameError),
}

pub struct CommandSession<S> {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
    number: u64,
    table: Arc<HandlerTable<S>>,
    state: Arc<S>,
    phase: SessionState,
}

impl<S: Send + Sync + 'static> CommandSession<S> {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        number: u64,
        table: Arc<HandlerTable<S>>,
        state: Arc<S>,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            peer,
            number,
            table,
            state,
            phase: SessionState::Accepted,
        }
    }

    pub fn phase(&self) -> SessionState {
        self.phase
    }

    fn transition(&mut self, next: SessionState) {
        trace!(session = self.number, from = ?self.phase, to = ?next, "Session transition");
        self.phase = next;
    }

    /// Serves requests until the connection ends.
    pub async fn run(mut self, cancel: CancellationToken) -> SessionEnd {
        debug!(session = self.number, peer = %self.peer, "Session accepted");
        let end = self.serve(&cancel).await;
        self.transition(SessionState::Closed);

        match &end {
            SessionEnd::Violation(e) => {
                warn!(
                    session = self.number,
                    peer = %self.peer,
                    error = %e,
                    "Protocol violation, closing session"
                );
            }
            SessionEnd::BadFrame(e) => {
                warn!(
                    session = self.number,
                    peer = %self.peer,
                    error = %e,
                    "Bad frame, closing session"
                );
            }
            SessionEnd::Transport(e) => {
                debug!(
                    session = self.number,
                    peer = %self.peer,
                    error = %e,
                    "Session transport error"
                );
            }
            SessionEnd::PeerClosed | SessionEnd::Cancelled => {
                debug!(session = self.number, peer = %self.peer, "Session closed");
            }
        }
        end
    }

    async fn serve(&mut self, cancel: &CancellationToken) -> SessionEnd {
        loop {
            self.transition(SessionState::ReadingRequest);
            let read = tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                result = read_value(&mut self.reader) => result,
            };
            let value = match read {
                Ok(value) => value,
                Err(FrameError::Closed) => return SessionEnd::PeerClosed,
                Err(e @ (FrameError::Malformed | FrameError::TooLarge { .. })) => {
                    return SessionEnd::BadFrame(e)
                }
                Err(e) => return SessionEnd::Transport(e),
            };

            let request = match Request::from_value(value) {
                Ok(request) => request,
                Err(e) => return SessionEnd::Violation(e),
            };
            let command = request.command.clone();

            self.transition(SessionState::Dispatching);
            debug!(
                session = self.number,
                command = %command,
                args = request.arguments.len(),
                "Dispatching"
            );
            let Some(response) = self.table.dispatch(Arc::clone(&self.state), request).await else {
                return SessionEnd::Violation(ProtocolError::UnknownCommand(command));
            };

            self.transition(SessionState::WritingResponse);
            let reply = response.to_value(&command);
            if let Err(e) = write_value_timeout(&mut self.writer, &reply).await {
                return SessionEnd::Transport(e);
            }
        }
    }
}
