//! Device connection façade and heartbeat scheduler.

use crate::error::TetherError;
use crate::local::LocalTransport;
use crate::remote::RemoteTransport;
use crate::reply::{CommandOutcome, PendingReply, ReplySlot};
use crate::state::{LocalEndpoint, StateMachine, TetherEvent};
use reqwest::Client;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tether_wire::CommandMessage;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct TetherConfig {
    /// Relay base URL.
    pub relay_base_url: String,
    /// Heartbeat period in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Delay before the first heartbeat, leaving the caller room to
    /// subscribe before the first event can fire.
    pub first_heartbeat_delay_ms: u64,
    /// Hard timeout for direct local requests in milliseconds.
    pub local_timeout_ms: u64,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            relay_base_url: "http://relay.tether.dev".to_string(),
            heartbeat_interval_ms: 8_000,
            first_heartbeat_delay_ms: 100,
            local_timeout_ms: 1_000,
        }
    }
}

/// A connection to a device over its relay channel, with opportunistic
/// upgrade to the device's local endpoint.
///
/// Commands route through the relay until a heartbeat learns a local
/// endpoint and verifies it; they fall back to the relay when the local
/// link degrades. Must be opened from within a Tokio runtime.
pub struct DeviceConnection {
    channel_name: String,
    config: TetherConfig,
    state: Arc<StateMachine>,
    remote: RemoteTransport,
    local: LocalTransport,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceConnection {
    /// Open a connection on the given relay channel with defaults.
    pub fn open(channel_name: &str) -> Arc<Self> {
        Self::open_with_config(channel_name, TetherConfig::default())
    }

    /// Open a connection with explicit configuration.
    ///
    /// Spawns the recurring heartbeat task. The first probe fires after
    /// `first_heartbeat_delay_ms`, so a caller that subscribes right after
    /// opening sees every event from the first attempt on.
    pub fn open_with_config(channel_name: &str, config: TetherConfig) -> Arc<Self> {
        let client = Client::new();
        let connection = Arc::new(Self {
            channel_name: channel_name.to_string(),
            state: Arc::new(StateMachine::new(channel_name)),
            remote: RemoteTransport::new(client.clone(), &config.relay_base_url, channel_name),
            local: LocalTransport::new(client, Duration::from_millis(config.local_timeout_ms)),
            heartbeat: Mutex::new(None),
            config,
        });

        let handle = tokio::spawn(heartbeat_loop(
            Arc::downgrade(&connection),
            Duration::from_millis(connection.config.first_heartbeat_delay_ms),
            Duration::from_millis(connection.config.heartbeat_interval_ms),
        ));
        *connection.heartbeat.lock().expect("lock poisoned") = Some(handle);

        info!(channel = %connection.channel_name, "connection opened");
        connection
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TetherEvent> {
        self.state.subscribe()
    }

    /// The relay channel this connection is bound to.
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// The configuration the connection was opened with.
    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    /// Whether a relay heartbeat round-trip has succeeded.
    pub async fn is_remote_connected(&self) -> bool {
        self.state.is_remote_connected().await
    }

    /// Whether a direct heartbeat round-trip has succeeded.
    pub async fn is_local_connected(&self) -> bool {
        self.state.is_local_connected().await
    }

    /// The device endpoint learned from the last relay heartbeat, if any.
    pub async fn local_endpoint(&self) -> Option<LocalEndpoint> {
        self.state.local_endpoint().await
    }

    /// Send a command, routed over the local path when it is up, else
    /// through the relay.
    ///
    /// The returned reply resolves exactly once; awaiting it is optional.
    pub async fn send_command(
        &self,
        message: CommandMessage,
        wait_for_response: bool,
    ) -> PendingReply {
        self.dispatch(message, wait_for_response, false).await
    }

    /// Send a command forced onto the direct local path.
    pub async fn send_command_direct(
        &self,
        message: CommandMessage,
        wait_for_response: bool,
    ) -> PendingReply {
        self.dispatch(message, wait_for_response, true).await
    }

    /// Fetch the device's current configuration.
    pub async fn get_config(&self) -> CommandOutcome {
        self.send_command(CommandMessage::get_config(), true)
            .await
            .outcome()
            .await
    }

    /// Push a new configuration to the device.
    ///
    /// True only when the reply acknowledges with `Status: "Success"`.
    pub async fn set_config(&self, config: serde_json::Value) -> bool {
        let outcome = self
            .send_command(CommandMessage::set_config(config), true)
            .await
            .outcome()
            .await;
        outcome.success && outcome.status() == Some("Success")
    }

    /// Stop the heartbeat and force the disconnected state.
    ///
    /// Idempotent; the handle is inert afterwards. In-flight requests may
    /// still resolve their replies, but no further lifecycle events fire.
    pub async fn kill(&self) {
        let handle = self.heartbeat.lock().expect("lock poisoned").take();
        let Some(handle) = handle else {
            debug!(channel = %self.channel_name, "kill on an already killed connection");
            return;
        };
        handle.abort();
        self.state.kill().await;
        info!(channel = %self.channel_name, "connection killed");
    }

    async fn dispatch(
        &self,
        message: CommandMessage,
        wait_for_response: bool,
        force_local: bool,
    ) -> PendingReply {
        let (slot, reply) = ReplySlot::new();
        if force_local || self.state.is_local_connected().await {
            match self.state.local_endpoint().await {
                Some(endpoint) => {
                    self.local
                        .send(Arc::clone(&self.state), endpoint, message, slot)
                        .await;
                }
                None => {
                    // A relay drop clears the endpoint while the local flag
                    // can still be set; without an address this is a
                    // local-path failure.
                    warn!(channel = %self.channel_name, "local send with no known endpoint");
                    self.state.local_down().await;
                    slot.resolve(CommandOutcome::error(
                        &TetherError::NoLocalEndpoint.to_string(),
                    ))
                    .await;
                }
            }
        } else {
            self.remote
                .send(Arc::clone(&self.state), message, wait_for_response, slot)
                .await;
        }
        reply
    }

    /// One heartbeat pass.
    ///
    /// Probes the relay while the local path is down; once a relay probe
    /// succeeds and advertises an endpoint, re-enters immediately in
    /// local-attempt mode rather than waiting a full period. A local
    /// failure clears the local flag, so the next tick resumes relay
    /// probing.
    async fn heartbeat(&self, force_local: bool) {
        if self.state.is_killed().await {
            return;
        }
        if !self.state.is_local_connected().await && !force_local {
            self.state.begin_remote_attempt().await;
            let (slot, reply) = ReplySlot::new();
            self.remote
                .send(
                    Arc::clone(&self.state),
                    CommandMessage::heartbeat(),
                    true,
                    slot,
                )
                .await;
            let outcome = reply.outcome().await;
            if outcome.success {
                let endpoint = outcome.payload.as_ref().and_then(LocalEndpoint::from_heartbeat);
                self.state.remote_up(endpoint).await;
                Box::pin(self.heartbeat(true)).await;
            }
            // Failures already drove the remote-down transition.
        } else if let Some(endpoint) = self.state.begin_local_attempt().await {
            let (slot, reply) = ReplySlot::new();
            self.local
                .send(
                    Arc::clone(&self.state),
                    endpoint,
                    CommandMessage::heartbeat(),
                    slot,
                )
                .await;
            if reply.outcome().await.success {
                self.state.local_up().await;
            }
        }
    }
}

/// Recurring heartbeat driver: one early kick, then a fixed cadence.
///
/// Each tick spawns its probe so a held long-poll never delays the next
/// tick. The loop holds only a weak handle; it winds down on its own when
/// every strong handle to the connection is gone.
async fn heartbeat_loop(connection: Weak<DeviceConnection>, first_delay: Duration, period: Duration) {
    tokio::time::sleep(first_delay).await;
    if !spawn_probe(&connection) {
        return;
    }
    let mut ticker = interval(period);
    ticker.tick().await; // the first tick completes immediately
    loop {
        ticker.tick().await;
        if !spawn_probe(&connection) {
            return;
        }
    }
}

fn spawn_probe(connection: &Weak<DeviceConnection>) -> bool {
    let Some(connection) = connection.upgrade() else {
        return false;
    };
    tokio::spawn(async move {
        connection.heartbeat(false).await;
    });
    true
}
