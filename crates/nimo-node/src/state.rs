//! State shared by a node's command handlers and its owner.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use nimo_core::{ChannelInfo, Connection, TransportModes, TransportType};

use crate::channel::{Channel, ChannelReceiver, ChannelSender, ChannelState, PreparedEndpoint};
use crate::error::ChannelError;
use crate::launcher::{AppCatalogue, ProcessLauncher};

/// Catalogue plus the facility that starts its entries.
#[derive(Clone)]
pub struct LauncherRole {
    pub catalogue: AppCatalogue,
    pub launcher: Arc<dyn ProcessLauncher>,
}

/// Everything a node's command port can act on.
pub struct NodeState {
    name: String,

    /// Address written into channel endpoints.
    advertise: Ipv4Addr,

    channels: Mutex<BTreeMap<String, Channel>>,

    /// Fired by `stopNode`.
    stop: CancellationToken,

    launcher: Option<LauncherRole>,
}

impl NodeState {
    pub fn new(
        name: impl Into<String>,
        advertise: Ipv4Addr,
        stop: CancellationToken,
        launcher: Option<LauncherRole>,
    ) -> Self {
        Self {
            name: name.into(),
            advertise,
            channels: Mutex::new(BTreeMap::new()),
            stop,
            launcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn advertise(&self) -> Ipv4Addr {
        self.advertise
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn launcher(&self) -> Option<&LauncherRole> {
        self.launcher.as_ref()
    }

    // ------------------------------------------------------------------------
    // Channel table
    // ------------------------------------------------------------------------

    pub async fn add_input(
        &self,
        path: &str,
        data_type: &str,
        modes: TransportModes,
    ) -> Result<(ChannelInfo, ChannelReceiver), ChannelError> {
        let mut channels = self.channels.lock().await;
        if channels.contains_key(path) {
            return Err(ChannelError::AlreadyExists {
                path: path.to_string(),
            });
        }
        let (channel, receiver) = Channel::input(&self.name, path, data_type, modes);
        let info = channel.info();
        channels.insert(path.to_string(), channel);
        Ok((info, receiver))
    }

    pub async fn add_output(
        &self,
        path: &str,
        data_type: &str,
        modes: TransportModes,
    ) -> Result<(ChannelInfo, ChannelSender), ChannelError> {
        let mut channels = self.channels.lock().await;
        if channels.contains_key(path) {
            return Err(ChannelError::AlreadyExists {
                path: path.to_string(),
            });
        }
        let channel = Channel::output(&self.name, path, data_type, modes);
        let info = channel.info();
        let sender = channel.sender()?;
        channels.insert(path.to_string(), channel);
        Ok((info, sender))
    }

    /// Drops a channel, stopping it first.
    pub async fn remove_channel(&self, path: &str) -> Result<(), ChannelError> {
        self.channels
            .lock()
            .await
            .remove(path)
            .map(drop)
            .ok_or_else(|| not_found(path))
    }

    pub async fn channel_state(&self, path: &str) -> Option<ChannelState> {
        self.channels.lock().await.get(path).map(Channel::state)
    }

    pub async fn channel_paths(&self) -> Vec<String> {
        self.channels.lock().await.keys().cloned().collect()
    }

    // ------------------------------------------------------------------------
    // Channel operations
    // ------------------------------------------------------------------------

    /// Binds an input endpoint for `path`.
    ///
    /// The channel table is only locked to check and install, never while
    /// a socket is being opened.
    pub async fn set_up_input(
        &self,
        path: &str,
        mode: TransportType,
    ) -> Result<Connection, ChannelError> {
        self.with_channel(path, |channel| channel.check_input_set_up(mode))
            .await?;
        let prepared = PreparedEndpoint::input(mode, self.advertise).await?;
        self.with_channel(path, |channel| channel.install(prepared))
            .await
    }

    /// Opens an output endpoint for `path` toward `peer`; a TCP connect
    /// runs without holding the channel table.
    pub async fn set_up_output(
        &self,
        path: &str,
        peer: Connection,
    ) -> Result<Connection, ChannelError> {
        self.with_channel(path, |channel| channel.check_output_set_up(peer))
            .await?;
        let prepared = PreparedEndpoint::output(peer, self.advertise).await?;
        self.with_channel(path, |channel| channel.install(prepared))
            .await
    }

    pub async fn start_channel(
        &self,
        path: &str,
        filter: Option<Connection>,
    ) -> Result<(), ChannelError> {
        self.with_channel(path, |channel| channel.start(filter))
            .await
    }

    pub async fn stop_channel(&self, path: &str) -> Result<(), ChannelError> {
        self.with_channel(path, |channel| {
            channel.stop();
            Ok(())
        })
        .await
    }

    async fn with_channel<T>(
        &self,
        path: &str,
        f: impl FnOnce(&mut Channel) -> Result<T, ChannelError>,
    ) -> Result<T, ChannelError> {
        let mut channels = self.channels.lock().await;
        let channel = channels.get_mut(path).ok_or_else(|| not_found(path))?;
        f(channel)
    }

    /// Stops every channel; returns how many there were.
    pub async fn stop_all(&self) -> usize {
        let mut channels = self.channels.lock().await;
        for channel in channels.values_mut() {
            channel.stop();
        }
        info!(node = %self.name, channels = channels.len(), "All channels stopped");
        channels.len()
    }
}

fn not_found(path: &str) -> ChannelError {
    ChannelError::NotFound {
        path: path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> NodeState {
        NodeState::new("n", Ipv4Addr::LOCALHOST, CancellationToken::new(), None)
    }

    #[tokio::test]
    async fn test_duplicate_path_rejected() {
        let state = state();
        state.add_input("/in", "t", TransportModes::ANY).await.unwrap();
        let err = state
            .add_output("/in", "t", TransportModes::ANY)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ChannelError::AlreadyExists {
                path: "/in".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_operations_on_missing_channel() {
        let state = state();
        assert!(matches!(
            state.stop_channel("/x").await,
            Err(ChannelError::NotFound { .. })
        ));
        assert!(matches!(
            state.start_channel("/x", None).await,
            Err(ChannelError::NotFound { .. })
        ));
        assert!(state.channel_state("/x").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_all() {
        let state = state();
        state.add_input("/in", "t", TransportModes::ANY).await.unwrap();
        state.set_up_input("/in", TransportType::Udp).await.unwrap();
        state.start_channel("/in", None).await.unwrap();
        assert_eq!(state.stop_all().await, 1);
        assert_eq!(state.channel_state("/in").await, Some(ChannelState::Stopped));
    }

    #[tokio::test]
    async fn test_slow_connect_does_not_block_other_channels() {
        let state = Arc::new(state());
        state.add_output("/slow", "t", TransportModes::ANY).await.unwrap();
        state.add_input("/other", "t", TransportModes::ANY).await.unwrap();

        // TEST-NET-1 is never routed, so the connect hangs or fails.
        let peer = Connection::new(Ipv4Addr::new(192, 0, 2, 1), 9, TransportType::Tcp);
        let connecting = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.set_up_output("/slow", peer).await })
        };
        tokio::task::yield_now().await;

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            state.set_up_input("/other", TransportType::Udp).await.unwrap();
            state.stop_channel("/other").await.unwrap();
        })
        .await
        .expect("channel table was held during a connect");
        connecting.abort();
    }

    #[tokio::test]
    async fn test_install_rechecks_state() {
        let state = state();
        state.add_input("/in", "t", TransportModes::ANY).await.unwrap();
        let late = PreparedEndpoint::input(TransportType::Udp, Ipv4Addr::LOCALHOST)
            .await
            .unwrap();
        state.set_up_input("/in", TransportType::Udp).await.unwrap();

        let err = state
            .with_channel("/in", |channel| channel.install(late))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidState { .. }));
        assert_eq!(state.channel_state("/in").await, Some(ChannelState::SetUp));
    }
}
