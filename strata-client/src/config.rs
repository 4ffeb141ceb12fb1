use serde::Deserialize;
use std::time::Duration;
use strata_core::model::IceServerConfig;

pub const DEFAULT_STUN_ADDR: &str = "stun:stun.l.google.com:19302";

/// ICE configuration applied to peer connections.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig {
                urls: vec![DEFAULT_STUN_ADDR.to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Health-check request period while the channel is open.
    pub keepalive_interval: Duration,
    pub join_timeout: Duration,
    /// Silence after which the channel is closed as unhealthy.
    pub unhealthy_timeout: Duration,
    pub migration_timeout: Duration,
    pub rpc_max_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let keepalive_interval = Duration::from_secs(27);
        Self {
            keepalive_interval,
            join_timeout: Duration::from_secs(5),
            unhealthy_timeout: keepalive_interval + Duration::from_secs(5),
            migration_timeout: Duration::from_secs(10),
            rpc_max_retries: 5,
        }
    }
}

/// Resolution limits (longer side) below which simulcast layers are dropped.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimulcastThresholds {
    pub single_layer_max: u32,
    pub two_layer_max: u32,
}

impl Default for SimulcastThresholds {
    fn default() -> Self {
        Self {
            single_layer_max: 320,
            two_layer_max: 640,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub ice_restart_delay: Duration,
    pub dtx_enabled: bool,
    pub red_enabled: bool,
    /// Strip every non-preferred codec from published media sections.
    pub pin_single_codec: bool,
    pub simulcast: SimulcastThresholds,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_restart_delay: Duration::from_millis(2500),
            dtx_enabled: true,
            red_enabled: true,
            pin_single_codec: false,
            simulcast: SimulcastThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub ping_interval: Duration,
    /// Silence after which a connection counts as failed.
    pub connection_check_timeout: Duration,
    pub initial_connect_timeout: Duration,
    /// Delay before an unhealthy transition is published.
    pub unhealthy_grace: Duration,
    pub online_retry_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let ping_interval = Duration::from_secs(25);
        Self {
            ping_interval,
            connection_check_timeout: ping_interval + Duration::from_secs(10),
            initial_connect_timeout: Duration::from_secs(15),
            unhealthy_grace: Duration::from_secs(5),
            online_retry_interval: Duration::from_millis(10),
        }
    }
}
