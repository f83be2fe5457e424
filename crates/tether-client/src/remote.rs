//! Relay-mediated transport: fire POST plus long-poll reply correlation.

use crate::error::{TetherError, TetherResult};
use crate::reply::{next_response_code, CommandOutcome, ReplySlot};
use crate::state::StateMachine;
use reqwest::Client;
use std::sync::Arc;
use tether_wire::{CommandMessage, PollEnvelope};
use tracing::{debug, warn};

/// Outcome of one long-poll round.
enum PollReply {
    NewData(serde_json::Value),
    Expired,
}

/// Transport that reaches the device through the relay.
pub(crate) struct RemoteTransport {
    client: Client,
    relay_base_url: String,
    channel_name: String,
}

impl RemoteTransport {
    pub fn new(client: Client, relay_base_url: &str, channel_name: &str) -> Self {
        Self {
            client,
            relay_base_url: relay_base_url.trim_end_matches('/').to_string(),
            channel_name: channel_name.to_string(),
        }
    }

    /// Fire the command at the relay and, when a reply is expected, race a
    /// long-poll for it into the same slot.
    ///
    /// Both requests run as independent tasks; each failure path drives the
    /// remote-down transition and resolves the slot, which keeps delivery
    /// at-most-once no matter which side settles first.
    pub async fn send(
        &self,
        state: Arc<StateMachine>,
        mut message: CommandMessage,
        wait_for_response: bool,
        slot: Arc<ReplySlot>,
    ) {
        let code = if wait_for_response {
            let code = next_response_code();
            message.response_code = Some(code);
            Some(code)
        } else {
            None
        };

        let body = match message.to_json() {
            Ok(body) => body,
            Err(e) => {
                warn!(channel = %self.channel_name, error = %e, "failed to encode command");
                slot.resolve(CommandOutcome::error(&e.to_string())).await;
                return;
            }
        };

        self.spawn_fire(Arc::clone(&state), body, wait_for_response, Arc::clone(&slot));
        if let Some(code) = code {
            self.spawn_long_poll(state, code, slot);
        }
    }

    fn spawn_fire(
        &self,
        state: Arc<StateMachine>,
        body: String,
        wait_for_response: bool,
        slot: Arc<ReplySlot>,
    ) {
        let client = self.client.clone();
        let url = format!("{}/ingest", self.relay_base_url);
        let key = format!("{}Poll", self.channel_name);
        let channel = self.channel_name.clone();
        tokio::spawn(async move {
            match fire_once(&client, &url, &key, &body, wait_for_response).await {
                Ok(ack) => {
                    debug!(channel = %channel, "relay accepted command");
                    if !wait_for_response {
                        slot.resolve(CommandOutcome::success(ack)).await;
                    }
                }
                Err(e) => {
                    warn!(channel = %channel, error = %e, "relay ingest failed");
                    state.remote_down().await;
                    slot.resolve(CommandOutcome::error(&e.to_string())).await;
                }
            }
        });
    }

    fn spawn_long_poll(&self, state: Arc<StateMachine>, code: u64, slot: Arc<ReplySlot>) {
        let client = self.client.clone();
        let url = format!("{}/longpoll", self.relay_base_url);
        let key = format!("{}_resp{}", self.channel_name, code);
        let channel = self.channel_name.clone();
        tokio::spawn(async move {
            match poll_once(&client, &url, &key).await {
                Ok(PollReply::NewData(payload)) => {
                    debug!(channel = %channel, code = code, "long-poll reply received");
                    slot.resolve(CommandOutcome::success(Some(payload))).await;
                }
                Ok(PollReply::Expired) => {
                    debug!(channel = %channel, code = code, "long-poll expired with no reply");
                    state.remote_down().await;
                    slot.resolve(CommandOutcome::disconnected()).await;
                }
                Err(e) => {
                    warn!(channel = %channel, code = code, error = %e, "long-poll failed");
                    state.remote_down().await;
                    slot.resolve(CommandOutcome::error(&e.to_string())).await;
                }
            }
        });
    }
}

/// Submit the command to the relay ingestion endpoint.
///
/// Returns the relay's ack body (parsed as JSON when possible) for
/// fire-and-forget sends; correlated sends take their reply from the
/// long-poll instead.
async fn fire_once(
    client: &Client,
    url: &str,
    key: &str,
    body: &str,
    wait_for_response: bool,
) -> TetherResult<Option<serde_json::Value>> {
    let response = client
        .post(url)
        .query(&[("key", key), ("data", body)])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(TetherError::Status(status));
    }

    if wait_for_response {
        return Ok(None);
    }

    let text = response.text().await?;
    Ok(serde_json::from_str(&text).ok())
}

/// Hold a long-poll open against the relay reply endpoint.
///
/// No client-side timeout here: the relay owns the hold window and answers
/// with a non-NewData status when it expires.
async fn poll_once(client: &Client, url: &str, key: &str) -> TetherResult<PollReply> {
    let response = client.get(url).query(&[("key", key)]).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(TetherError::Status(status));
    }

    let envelope: PollEnvelope = response.json().await?;
    if !envelope.has_new_data() {
        return Ok(PollReply::Expired);
    }

    Ok(PollReply::NewData(envelope.decode_data()?))
}
