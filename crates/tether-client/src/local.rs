//! Direct local transport.

use crate::error::{TetherError, TetherResult};
use crate::reply::{CommandOutcome, ReplySlot};
use crate::state::{LocalEndpoint, StateMachine};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tether_wire::CommandMessage;
use tracing::{debug, warn};

/// Transport that bypasses the relay and posts straight to the device.
pub(crate) struct LocalTransport {
    client: Client,
    timeout: Duration,
}

impl LocalTransport {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Post the command to the device's command endpoint.
    ///
    /// The request carries a hard timeout so a dead local link cannot hold
    /// a probe open. Any failure on this path marks the local link down;
    /// the heartbeat re-establishes it through the relay.
    pub async fn send(
        &self,
        state: Arc<StateMachine>,
        endpoint: LocalEndpoint,
        message: CommandMessage,
        slot: Arc<ReplySlot>,
    ) {
        let client = self.client.clone();
        let timeout = self.timeout;
        let url = format!("http://{}:{}/api/v1/command", endpoint.ip, endpoint.port);
        tokio::spawn(async move {
            match post_once(&client, &url, timeout, &message).await {
                Ok(payload) => {
                    debug!(url = %url, command = %message.command, "direct command delivered");
                    slot.resolve(CommandOutcome::success(Some(payload))).await;
                }
                Err(e) => {
                    warn!(url = %url, command = %message.command, error = %e, "direct command failed");
                    state.local_down().await;
                    slot.resolve(CommandOutcome::error(&e.to_string())).await;
                }
            }
        });
    }
}

/// Single request/response against the device; the reply comes back
/// directly with no envelope.
async fn post_once(
    client: &Client,
    url: &str,
    timeout: Duration,
    message: &CommandMessage,
) -> TetherResult<serde_json::Value> {
    let response = client
        .post(url)
        .timeout(timeout)
        .json(message)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(TetherError::Status(status));
    }

    Ok(response.json().await?)
}
