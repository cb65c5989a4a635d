//! Locating a running registry.
//!
//! A [`RegistryLocator`] answers "where is the registry's command port?".
//! [`wait_for_registry`] polls a locator with exponential backoff until it
//! answers, the discovery timeout passes, or the node is cancelled.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nimo_core::{Connection, TransportType};

use crate::error::DiscoveryError;

/// Delay before the second probe.
const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Cap on the delay between probes.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

/// Multiplier for exponential backoff.
const RETRY_MULTIPLIER: u32 = 2;

/// Upper bound on a single TCP probe.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Finds the registry's command port.
#[async_trait]
pub trait RegistryLocator: Send + Sync {
    /// One attempt; no retrying.
    async fn locate(&self) -> Result<Connection, DiscoveryError>;

    /// Human-readable description for log lines.
    fn describe(&self) -> String;
}

/// A registry at a configured address, confirmed by a TCP probe.
#[derive(Debug, Clone)]
pub struct StaticLocator {
    addr: SocketAddrV4,
}

impl StaticLocator {
    pub fn new(addr: SocketAddrV4) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl RegistryLocator for StaticLocator {
    async fn locate(&self) -> Result<Connection, DiscoveryError> {
        let addr = SocketAddr::V4(self.addr);
        let unreachable = |error: String| DiscoveryError::Unreachable { addr, error };

        // The probe session is dropped straight away; the registry sees a
        // session that closes without a request.
        timeout(PROBE_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| unreachable("probe timed out".to_string()))?
            .map_err(|e| unreachable(e.to_string()))?;

        Ok(Connection::new(*self.addr.ip(), self.addr.port(), TransportType::Tcp))
    }

    fn describe(&self) -> String {
        format!("registry at {}", self.addr)
    }
}

/// Polls `locator` until it answers, `wait` elapses, or `cancel` fires.
///
/// # Errors
///
/// - `DiscoveryError::NotFound` once `wait` has passed
/// - `DiscoveryError::Cancelled` when `cancel` fires first
pub async fn wait_for_registry(
    locator: &dyn RegistryLocator,
    wait: Duration,
    cancel: &CancellationToken,
) -> Result<Connection, DiscoveryError> {
    let started = Instant::now();
    let deadline = started + wait;
    let mut delay = RETRY_INITIAL_DELAY;
    let mut attempt = 0u32;

    info!(target_registry = %locator.describe(), timeout = ?wait, "Waiting for registry");

    loop {
        attempt = attempt.saturating_add(1);

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
            result = locator.locate() => result,
        };

        match result {
            Ok(connection) => {
                info!(attempt, registry = %connection, "Registry found");
                return Ok(connection);
            }
            Err(e) => debug!(attempt, error = %e, "Registry probe failed"),
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(waited = ?wait, attempts = attempt, "Registry not found");
            return Err(DiscoveryError::NotFound { waited: wait });
        }
        let pause = delay.min(deadline - now);

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Registry discovery cancelled");
                return Err(DiscoveryError::Cancelled);
            }
            _ = sleep(pause) => {
                delay = (delay * RETRY_MULTIPLIER).min(RETRY_MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails a fixed number of times, then answers.
    struct FlakyLocator {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl RegistryLocator for FlakyLocator {
        async fn locate(&self) -> Result<Connection, DiscoveryError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(DiscoveryError::Unreachable {
                    addr: "127.0.0.1:1".parse().unwrap(),
                    error: "refused".to_string(),
                });
            }
            Ok(Connection::new(Ipv4Addr::LOCALHOST, 1954, TransportType::Tcp))
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    fn flaky(failures: u32) -> FlakyLocator {
        FlakyLocator {
            failures_left: AtomicU32::new(failures),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_found() {
        let locator = flaky(3);
        let cancel = CancellationToken::new();
        let connection = wait_for_registry(&locator, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert_eq!(connection.port, 1954);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let locator = flaky(u32::MAX);
        let cancel = CancellationToken::new();
        let err = wait_for_registry(&locator, Duration::from_secs(2), &cancel)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DiscoveryError::NotFound {
                waited: Duration::from_secs(2)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unblocks_wait() {
        let locator = flaky(u32::MAX);
        let cancel = CancellationToken::new();
        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                wait_for_registry(&locator, Duration::from_secs(3600), &cancel).await
            })
        };
        sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Err(DiscoveryError::Cancelled));
    }

    #[tokio::test]
    async fn test_static_locator_probes_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = match listener.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        let connection = StaticLocator::new(addr).locate().await.unwrap();
        assert_eq!(connection.socket_addr(), addr);

        drop(listener);
        assert!(matches!(
            StaticLocator::new(addr).locate().await,
            Err(DiscoveryError::Unreachable { .. })
        ));
    }
}
