//! Connection state machine with edge-triggered lifecycle events.
//!
//! The remote and local paths carry independent connected flags; remote
//! stays up as the fallback while the local path is active. All flag
//! mutation goes through the guarded transitions here, which emit an event
//! only when a flag actually changes, so a heartbeat that fires every cycle
//! while already connected stays silent.

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// A direct device endpoint learned from a remote heartbeat reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEndpoint {
    pub ip: String,
    pub port: String,
}

impl LocalEndpoint {
    /// Extract the endpoint advertised in a heartbeat reply, if any.
    ///
    /// The device reports `LocalIp` and `LocalPort`; the port may arrive as
    /// a string or a number. A missing or empty ip means no direct path is
    /// available.
    pub fn from_heartbeat(payload: &serde_json::Value) -> Option<Self> {
        let ip = payload.get("LocalIp")?.as_str()?.trim();
        if ip.is_empty() {
            return None;
        }
        let port = match payload.get("LocalPort") {
            Some(serde_json::Value::String(port)) if !port.is_empty() => port.clone(),
            Some(serde_json::Value::Number(port)) => port.to_string(),
            _ => return None,
        };
        Some(Self {
            ip: ip.to_string(),
            port,
        })
    }
}

/// Lifecycle events emitted on connection transitions.
///
/// Remote-path events carry empty ip/port; local-path events carry the
/// learned endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TetherEvent {
    /// A connection attempt started on the given path.
    Connecting { local: bool, ip: String, port: String },
    /// A heartbeat round-trip succeeded on the given path.
    Connected { local: bool, ip: String, port: String },
    /// The given path was lost.
    Disconnected { local: bool },
}

#[derive(Debug, Default)]
struct LinkFlags {
    remote_connected: bool,
    local_connected: bool,
    local_endpoint: Option<LocalEndpoint>,
    killed: bool,
}

/// Shared connection state, mutated only through guarded transitions.
pub(crate) struct StateMachine {
    channel_name: String,
    flags: RwLock<LinkFlags>,
    events: broadcast::Sender<TetherEvent>,
}

impl StateMachine {
    pub fn new(channel_name: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            channel_name: channel_name.to_string(),
            flags: RwLock::new(LinkFlags::default()),
            events,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TetherEvent> {
        self.events.subscribe()
    }

    pub async fn is_remote_connected(&self) -> bool {
        self.flags.read().await.remote_connected
    }

    pub async fn is_local_connected(&self) -> bool {
        self.flags.read().await.local_connected
    }

    pub async fn local_endpoint(&self) -> Option<LocalEndpoint> {
        self.flags.read().await.local_endpoint.clone()
    }

    pub async fn is_killed(&self) -> bool {
        self.flags.read().await.killed
    }

    /// Announce a relay probe. Silent while the relay path is already up.
    pub async fn begin_remote_attempt(&self) {
        {
            let flags = self.flags.read().await;
            if flags.killed || flags.remote_connected {
                return;
            }
        }
        debug!(channel = %self.channel_name, "attempting relay connection");
        let _ = self.events.send(TetherEvent::Connecting {
            local: false,
            ip: String::new(),
            port: String::new(),
        });
    }

    /// Record a successful relay heartbeat.
    ///
    /// The advertised endpoint is refreshed on every success; the Connected
    /// event fires only on the down-to-up edge.
    pub async fn remote_up(&self, endpoint: Option<LocalEndpoint>) {
        {
            let mut flags = self.flags.write().await;
            if flags.killed {
                return;
            }
            flags.local_endpoint = endpoint;
            if flags.remote_connected {
                return;
            }
            flags.remote_connected = true;
        }
        info!(channel = %self.channel_name, "relay connection established");
        let _ = self.events.send(TetherEvent::Connected {
            local: false,
            ip: String::new(),
            port: String::new(),
        });
    }

    /// Record a relay-path failure.
    ///
    /// Clears the learned endpoint (the local path cannot be re-verified
    /// without a fresh remote heartbeat); the local flag is left for a local
    /// failure to clear.
    pub async fn remote_down(&self) {
        {
            let mut flags = self.flags.write().await;
            if flags.killed {
                return;
            }
            flags.local_endpoint = None;
            if !flags.remote_connected {
                return;
            }
            flags.remote_connected = false;
        }
        info!(channel = %self.channel_name, "relay connection lost");
        let _ = self.events.send(TetherEvent::Disconnected { local: false });
    }

    /// Announce a direct probe and return the endpoint to hit.
    ///
    /// None when no direct path is known. Silent while the local path is
    /// already up.
    pub async fn begin_local_attempt(&self) -> Option<LocalEndpoint> {
        let (endpoint, announce) = {
            let flags = self.flags.read().await;
            if flags.killed {
                return None;
            }
            (flags.local_endpoint.clone()?, !flags.local_connected)
        };
        if announce {
            debug!(
                channel = %self.channel_name,
                ip = %endpoint.ip,
                port = %endpoint.port,
                "attempting direct connection"
            );
            let _ = self.events.send(TetherEvent::Connecting {
                local: true,
                ip: endpoint.ip.clone(),
                port: endpoint.port.clone(),
            });
        }
        Some(endpoint)
    }

    /// Record a successful direct heartbeat.
    pub async fn local_up(&self) {
        let endpoint = {
            let mut flags = self.flags.write().await;
            if flags.killed || flags.local_connected {
                return;
            }
            // The endpoint can vanish mid-probe when the relay path drops;
            // without one there is nothing to report as connected.
            let Some(endpoint) = flags.local_endpoint.clone() else {
                return;
            };
            flags.local_connected = true;
            endpoint
        };
        info!(
            channel = %self.channel_name,
            ip = %endpoint.ip,
            port = %endpoint.port,
            "direct connection established"
        );
        let _ = self.events.send(TetherEvent::Connected {
            local: true,
            ip: endpoint.ip,
            port: endpoint.port,
        });
    }

    /// Record a direct-path failure.
    pub async fn local_down(&self) {
        {
            let mut flags = self.flags.write().await;
            if flags.killed || !flags.local_connected {
                return;
            }
            flags.local_connected = false;
        }
        info!(channel = %self.channel_name, "direct connection lost");
        let _ = self.events.send(TetherEvent::Disconnected { local: true });
    }

    /// Force the relay-down transition, then make every further transition
    /// a no-op. Late completions from in-flight requests land silently.
    pub async fn kill(&self) {
        self.remote_down().await;
        self.flags.write().await.killed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> LocalEndpoint {
        LocalEndpoint {
            ip: "10.0.0.5".to_string(),
            port: "8080".to_string(),
        }
    }

    #[tokio::test]
    async fn remote_probe_announces_until_connected() {
        let machine = StateMachine::new("den");
        let mut events = machine.subscribe();

        machine.begin_remote_attempt().await;
        machine.begin_remote_attempt().await;
        assert_eq!(
            events.try_recv().unwrap(),
            TetherEvent::Connecting {
                local: false,
                ip: String::new(),
                port: String::new()
            }
        );
        // Still disconnected, so every attempt announces.
        assert!(events.try_recv().is_ok());

        machine.remote_up(None).await;
        events.try_recv().unwrap(); // Connected
        machine.begin_remote_attempt().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn remote_up_fires_once_and_stores_endpoint() {
        let machine = StateMachine::new("den");
        let mut events = machine.subscribe();

        machine.remote_up(Some(endpoint())).await;
        machine.remote_up(Some(endpoint())).await;

        assert_eq!(
            events.try_recv().unwrap(),
            TetherEvent::Connected {
                local: false,
                ip: String::new(),
                port: String::new()
            }
        );
        assert!(events.try_recv().is_err());
        assert!(machine.is_remote_connected().await);
        assert_eq!(machine.local_endpoint().await, Some(endpoint()));
    }

    #[tokio::test]
    async fn remote_down_clears_endpoint_and_fires_once() {
        let machine = StateMachine::new("den");
        machine.remote_up(Some(endpoint())).await;
        let mut events = machine.subscribe();

        machine.remote_down().await;
        machine.remote_down().await;

        assert_eq!(
            events.try_recv().unwrap(),
            TetherEvent::Disconnected { local: false }
        );
        assert!(events.try_recv().is_err());
        assert_eq!(machine.local_endpoint().await, None);
    }

    #[tokio::test]
    async fn remote_down_on_fresh_machine_is_silent() {
        let machine = StateMachine::new("den");
        let mut events = machine.subscribe();

        machine.remote_down().await;

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn remote_down_leaves_local_flag_for_local_failure() {
        let machine = StateMachine::new("den");
        machine.remote_up(Some(endpoint())).await;
        machine.begin_local_attempt().await;
        machine.local_up().await;
        let mut events = machine.subscribe();

        machine.remote_down().await;

        assert_eq!(
            events.try_recv().unwrap(),
            TetherEvent::Disconnected { local: false }
        );
        assert!(machine.is_local_connected().await);

        machine.local_down().await;
        assert_eq!(
            events.try_recv().unwrap(),
            TetherEvent::Disconnected { local: true }
        );
    }

    #[tokio::test]
    async fn local_attempt_requires_learned_endpoint() {
        let machine = StateMachine::new("den");
        let mut events = machine.subscribe();

        assert_eq!(machine.begin_local_attempt().await, None);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn local_path_events_carry_the_endpoint() {
        let machine = StateMachine::new("den");
        machine.remote_up(Some(endpoint())).await;
        let mut events = machine.subscribe();

        let probed = machine.begin_local_attempt().await.unwrap();
        assert_eq!(probed, endpoint());
        assert_eq!(
            events.try_recv().unwrap(),
            TetherEvent::Connecting {
                local: true,
                ip: "10.0.0.5".to_string(),
                port: "8080".to_string()
            }
        );

        machine.local_up().await;
        machine.local_up().await;
        assert_eq!(
            events.try_recv().unwrap(),
            TetherEvent::Connected {
                local: true,
                ip: "10.0.0.5".to_string(),
                port: "8080".to_string()
            }
        );
        assert!(events.try_recv().is_err());

        // Once up, further probes stay silent.
        machine.begin_local_attempt().await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn kill_forces_remote_down_then_silences_everything() {
        let machine = StateMachine::new("den");
        machine.remote_up(Some(endpoint())).await;
        let mut events = machine.subscribe();

        machine.kill().await;
        assert_eq!(
            events.try_recv().unwrap(),
            TetherEvent::Disconnected { local: false }
        );

        machine.remote_up(Some(endpoint())).await;
        machine.begin_remote_attempt().await;
        machine.local_down().await;
        machine.kill().await;
        assert!(events.try_recv().is_err());
        assert!(!machine.is_remote_connected().await);
    }

    #[test]
    fn endpoint_from_heartbeat_accepts_string_or_number_port() {
        let from_string =
            LocalEndpoint::from_heartbeat(&json!({"LocalIp": "10.0.0.5", "LocalPort": "8080"}));
        assert_eq!(from_string, Some(endpoint()));

        let from_number =
            LocalEndpoint::from_heartbeat(&json!({"LocalIp": "10.0.0.5", "LocalPort": 8080}));
        assert_eq!(from_number, Some(endpoint()));
    }

    #[test]
    fn endpoint_from_heartbeat_rejects_incomplete_replies() {
        assert_eq!(
            LocalEndpoint::from_heartbeat(&json!({"Status": "Success"})),
            None
        );
        assert_eq!(
            LocalEndpoint::from_heartbeat(&json!({"LocalIp": "", "LocalPort": "8080"})),
            None
        );
        assert_eq!(
            LocalEndpoint::from_heartbeat(&json!({"LocalIp": "10.0.0.5"})),
            None
        );
        assert_eq!(
            LocalEndpoint::from_heartbeat(&json!({"LocalIp": "10.0.0.5", "LocalPort": ""})),
            None
        );
    }
}
