//! TCP command server shared by the registry and every node.
//!
//! The server:
//! - Listens on a TCP port for command sessions
//! - Spawns a [`CommandSession`] for each accepted connection
//! - Shares one [`HandlerTable`] and one service state across sessions
//! - Stops accepting when its CancellationToken fires, then waits (bounded)
//!   for open sessions to finish their current request
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CommandServer  │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ CommandSession  │────▶│  HandlerTable   │──▶ service state
//! │  (per client)   │     │  (by name)      │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the loop continues
//! - A failing session never affects other sessions

mod session;

pub use session::{CommandSession, SessionEnd, SessionState};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::HandlerTable;
use crate::error::ServerError;

/// How long shutdown waits for sessions to finish an in-flight request.
pub const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts command sessions for one service.
pub struct CommandServer<S> {
    /// Name used in log lines ("registry", node name, ...)
    service: String,

    listener: TcpListener,

    local_addr: SocketAddr,

    table: Arc<HandlerTable<S>>,

    state: Arc<S>,

    /// Connection counter for session numbering
    connection_counter: AtomicU64,
}

impl<S: Send + Sync + 'static> CommandServer<S> {
    /// Binds the listening socket. Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(
        service: impl Into<String>,
        addr: SocketAddr,
        table: HandlerTable<S>,
        state: Arc<S>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))?;

        Ok(Self {
            service: service.into(),
            listener,
            local_addr,
            table: Arc::new(table),
            state,
            connection_counter: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts sessions until `cancel` fires.
    ///
    /// Sessions receive child tokens, so cancelling the server also ends
    /// every open session at its next read. A request already being
    /// handled still gets its reply; sessions still busy after
    /// [`SESSION_DRAIN_TIMEOUT`] are aborted.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            service = %self.service,
            addr = %self.local_addr,
            commands = self.table.len(),
            "Command server listening"
        );

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(service = %self.service, "Command server shutdown requested");
                    break;
                }

                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let number = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.spawn_session(
                                &mut sessions,
                                stream,
                                peer,
                                number,
                                cancel.child_token(),
                            );
                        }
                        Err(e) => {
                            error!(
                                service = %self.service,
                                error = %e,
                                "Failed to accept connection"
                            );
                        }
                    }
                }
            }
        }

        self.drain(sessions).await;
    }

    async fn drain(&self, mut sessions: JoinSet<()>) {
        if sessions.is_empty() {
            return;
        }
        debug!(service = %self.service, open = sessions.len(), "Waiting for sessions");
        let drained = timeout(SESSION_DRAIN_TIMEOUT, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                service = %self.service,
                open = sessions.len(),
                "Sessions still busy at shutdown, aborting"
            );
            sessions.abort_all();
        }
    }

    /// Runs the accept loop on a background task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    fn spawn_session(
        &self,
        sessions: &mut JoinSet<()>,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        number: u64,
        cancel: CancellationToken,
    ) {
        let session = CommandSession::new(
            stream,
            peer,
            number,
            Arc::clone(&self.table),
            Arc::clone(&self.state),
        );
        let service = self.service.clone();

        sessions.spawn(async move {
            let end = session.run(cancel).await;
            debug!(service = %service, session = number, end = ?end, "Session finished");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let table: HandlerTable<()> = HandlerTable::new();
        let server = CommandServer::bind(
            "test",
            "127.0.0.1:0".parse().unwrap(),
            table,
            Arc::new(()),
        )
        .await
        .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_error() {
        let first = CommandServer::bind(
            "a",
            "127.0.0.1:0".parse().unwrap(),
            HandlerTable::<()>::new(),
            Arc::new(()),
        )
        .await
        .unwrap();
        let err = CommandServer::bind(
            "b",
            first.local_addr(),
            HandlerTable::<()>::new(),
            Arc::new(()),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let server = CommandServer::bind(
            "test",
            "127.0.0.1:0".parse().unwrap(),
            HandlerTable::<()>::new(),
            Arc::new(()),
        )
        .await
        .unwrap();
        let cancel = CancellationToken::new();
        let handle = server.spawn(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
