use std::time::Duration;

use mxs_transport::{LinkDeviceType, NetDevice, StreamParams, MAX_PACKET_SIZE};
use serde::Deserialize;

use crate::media::adts::AdtsConfig;
use crate::media::TimeBase;
use crate::queue::QueuePolicy;
use crate::relay::RelayMode;

pub const CONFIG_VERSION: u32 = 1;

/// Default UDP port of the loopback relay.
pub const DEFAULT_RELAY_PORT: u16 = 11001;

// ─── Input ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfigInput {
    pub version: u32,
    pub server: String,
    pub device_id: String,
    pub stream_key: String,
    pub connect_timeout_ms: Option<u64>,
    pub net_devices: Vec<NetDeviceInput>,
    pub send: SendConfigInput,
    pub receive: ReceiveConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetDeviceInput {
    pub name: String,
    #[serde(rename = "type")]
    pub link_type: LinkDeviceType,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SendConfigInput {
    pub max_packet_size: Option<usize>,
    pub send_timeout_ms: Option<u64>,
    pub again_retries: Option<u32>,
    pub again_backoff_ms: Option<u64>,
    pub header_interval: Option<u32>,
    pub time_base_den: Option<i32>,
    pub adts: AdtsConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdtsConfigInput {
    pub profile: Option<u8>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReceiveConfigInput {
    pub receive_timeout_ms: Option<u64>,
    pub again_backoff_ms: Option<u64>,
    pub relay: Option<RelayInput>,
    pub queue_policy: Option<String>,
    pub queue_capacity: Option<usize>,
    pub probe_timeout_ms: Option<u64>,
    pub receive_buffer: Option<usize>,
}

/// `relay = "memory"`, `relay = "udp"` or `relay = { udp_port = 12000 }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RelayInput {
    Named(String),
    Udp { udp_port: u16 },
}

// ─── Resolved ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SendConfig {
    /// Upper bound of every chunk handed to the session.
    pub max_packet_size: usize,
    pub send_timeout: Duration,
    /// Extra attempts for a chunk refused with `Again`.
    pub again_retries: u32,
    pub again_backoff: Duration,
    /// Stream table repeated at least every this many units.
    pub header_interval: u32,
    /// Container time base all timestamps are rescaled into.
    pub time_base: TimeBase,
    pub adts: AdtsConfig,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            send_timeout: Duration::ZERO,
            again_retries: 5,
            again_backoff: Duration::from_millis(2),
            header_interval: 50,
            time_base: TimeBase::MPEG,
            adts: AdtsConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceiveConfig {
    /// Per-call receive timeout; never above one second so stop stays prompt.
    pub receive_timeout: Duration,
    pub again_backoff: Duration,
    pub relay: RelayMode,
    pub queue_policy: QueuePolicy,
    /// Give up probing after this long without a stream table.
    pub probe_timeout: Duration,
    /// Initial receive buffer; grows on `BufferNotEnough`.
    pub receive_buffer: usize,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(1000),
            again_backoff: Duration::from_millis(10),
            relay: RelayMode::Memory,
            queue_policy: QueuePolicy::Unbounded,
            probe_timeout: Duration::from_secs(10),
            receive_buffer: MAX_PACKET_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub version: u32,
    pub stream: StreamParams,
    pub send: SendConfig,
    pub receive: ReceiveConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            stream: StreamParams::new("", "", ""),
            send: SendConfig::default(),
            receive: ReceiveConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Defaults with the given stream identity.
    pub fn for_stream(server: &str, device_id: &str, stream_key: &str) -> Self {
        Self {
            stream: StreamParams::new(server, device_id, stream_key),
            ..Default::default()
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(BridgeConfig::default());
        }
        let parsed: BridgeConfigInput =
            toml::from_str(input).map_err(|e| format!("Invalid config TOML: {}", e))?;
        parsed.resolve()
    }
}

impl BridgeConfigInput {
    pub fn resolve(self) -> Result<BridgeConfig, String> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(format!("Unsupported config version {}", version));
        }

        let mut stream = StreamParams::new(
            self.server.trim(),
            self.device_id.trim(),
            self.stream_key.trim(),
        );
        if let Some(ms) = self.connect_timeout_ms {
            if ms == 0 {
                return Err("connect_timeout_ms must be positive".into());
            }
            stream.connect_timeout = Duration::from_millis(ms);
        }
        stream.net_devices = self
            .net_devices
            .into_iter()
            .filter_map(|d| {
                let name = d.name.trim();
                (!name.is_empty()).then(|| NetDevice::new(name, d.link_type))
            })
            .collect();
        stream.net_devices = stream.unique_devices();

        let send = self.send.resolve()?;
        let receive = self.receive.resolve()?;

        Ok(BridgeConfig {
            version,
            stream,
            send,
            receive,
        })
    }
}

impl SendConfigInput {
    fn resolve(self) -> Result<SendConfig, String> {
        let d = SendConfig::default();
        let den = self.time_base_den.unwrap_or(d.time_base.den);
        if den <= 0 {
            return Err(format!("time_base_den must be positive, got {}", den));
        }
        let adts = AdtsConfig {
            profile: self.adts.profile.unwrap_or(d.adts.profile),
            sample_rate: self.adts.sample_rate.unwrap_or(d.adts.sample_rate),
            channels: self.adts.channels.unwrap_or(d.adts.channels),
        };
        if adts.frequency_index().is_none() {
            return Err(format!(
                "adts sample_rate {} has no ADTS frequency index",
                adts.sample_rate
            ));
        }
        Ok(SendConfig {
            max_packet_size: self
                .max_packet_size
                .unwrap_or(d.max_packet_size)
                .clamp(1, MAX_PACKET_SIZE),
            send_timeout: self
                .send_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(d.send_timeout),
            again_retries: self.again_retries.unwrap_or(d.again_retries),
            again_backoff: self
                .again_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(d.again_backoff),
            header_interval: self.header_interval.unwrap_or(d.header_interval).max(1),
            time_base: TimeBase::new(1, den),
            adts,
        })
    }
}

impl ReceiveConfigInput {
    fn resolve(self) -> Result<ReceiveConfig, String> {
        let d = ReceiveConfig::default();
        let relay = match self.relay {
            None => d.relay,
            Some(RelayInput::Named(name)) => match name.trim().to_ascii_lowercase().as_str() {
                "memory" => RelayMode::Memory,
                "udp" => RelayMode::Udp {
                    port: DEFAULT_RELAY_PORT,
                },
                other => return Err(format!("Unknown relay '{}'", other)),
            },
            Some(RelayInput::Udp { udp_port }) => {
                if udp_port < 10_000 {
                    return Err(format!("relay udp_port {} outside 10000-65535", udp_port));
                }
                RelayMode::Udp { port: udp_port }
            }
        };

        let capacity = self.queue_capacity.unwrap_or(512).max(1);
        let queue_policy = match self.queue_policy.as_deref().map(str::trim) {
            None | Some("unbounded") => QueuePolicy::Unbounded,
            Some("drop_oldest") => QueuePolicy::DropOldest(capacity),
            Some("block") => QueuePolicy::BlockProducer(capacity),
            Some(other) => return Err(format!("Unknown queue_policy '{}'", other)),
        };

        Ok(ReceiveConfig {
            receive_timeout: Duration::from_millis(
                self.receive_timeout_ms
                    .unwrap_or(d.receive_timeout.as_millis() as u64)
                    .clamp(1, 1000),
            ),
            again_backoff: self
                .again_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(d.again_backoff),
            relay,
            queue_policy,
            probe_timeout: self
                .probe_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(d.probe_timeout),
            receive_buffer: self
                .receive_buffer
                .unwrap_or(d.receive_buffer)
                .max(MAX_PACKET_SIZE),
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
