//! # Stream Parameters
//!
//! Identity of a stream on the remote service and the set of local network
//! devices a session may bond across.

use std::time::Duration;

use serde::Deserialize;

use crate::error::TransportError;

/// Default wait for the server to accept a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Direction of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

/// Physical link type of a bound network device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDeviceType {
    #[default]
    Unknown,
    Cable,
    #[serde(alias = "wi-fi")]
    Wifi,
    Cellular,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetDevice {
    /// OS interface name (e.g. `eth0`, `wwan0`).
    pub name: String,
    pub link_type: LinkDeviceType,
}

impl NetDevice {
    pub fn new(name: impl Into<String>, link_type: LinkDeviceType) -> Self {
        Self {
            name: name.into(),
            link_type,
        }
    }
}

/// Everything needed to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub server_url: String,
    pub device_id: String,
    pub stream_key: String,
    /// Devices to bond across; empty means "let the service choose".
    pub net_devices: Vec<NetDevice>,
    pub connect_timeout: Duration,
}

impl StreamParams {
    pub fn new(
        server_url: impl Into<String>,
        device_id: impl Into<String>,
        stream_key: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            device_id: device_id.into(),
            stream_key: stream_key.into(),
            net_devices: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_net_devices(mut self, devices: Vec<NetDevice>) -> Self {
        self.net_devices = devices;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Reject empty identifiers, unnamed devices and a zero connect timeout.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.server_url.trim().is_empty()
            || self.device_id.trim().is_empty()
            || self.stream_key.trim().is_empty()
        {
            return Err(TransportError::InvalidArgs);
        }
        if self.net_devices.iter().any(|d| d.name.trim().is_empty()) {
            return Err(TransportError::InvalidArgs);
        }
        if self.connect_timeout.is_zero() {
            return Err(TransportError::InvalidArgs);
        }
        Ok(())
    }

    /// Device list with duplicate names collapsed; the last entry for a name wins.
    pub fn unique_devices(&self) -> Vec<NetDevice> {
        let mut out: Vec<NetDevice> = Vec::with_capacity(self.net_devices.len());
        for dev in &self.net_devices {
            let name = dev.name.trim();
            match out.iter_mut().find(|d| d.name == name) {
                Some(existing) => existing.link_type = dev.link_type,
                None => out.push(NetDevice::new(name, dev.link_type)),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_identity() {
        assert!(StreamParams::new("https://h", "d1", "k1").validate().is_ok());
        assert_eq!(
            StreamParams::new("https://h", "d1", "").validate(),
            Err(TransportError::InvalidArgs)
        );
        assert_eq!(
            StreamParams::new(" ", "d1", "k1").validate(),
            Err(TransportError::InvalidArgs)
        );
        assert_eq!(
            StreamParams::new("https://h", "d1", "k1")
                .with_connect_timeout(Duration::ZERO)
                .validate(),
            Err(TransportError::InvalidArgs)
        );
    }

    #[test]
    fn validate_rejects_unnamed_device() {
        let params = StreamParams::new("https://h", "d1", "k1")
            .with_net_devices(vec![NetDevice::new("", LinkDeviceType::Cable)]);
        assert_eq!(params.validate(), Err(TransportError::InvalidArgs));
    }

    #[test]
    fn duplicate_devices_collapse_last_wins() {
        let params = StreamParams::new("https://h", "d1", "k1").with_net_devices(vec![
            NetDevice::new("wlan0", LinkDeviceType::Unknown),
            NetDevice::new("eth0", LinkDeviceType::Cable),
            NetDevice::new("wlan0", LinkDeviceType::Wifi),
        ]);
        let devices = params.unique_devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0], NetDevice::new("wlan0", LinkDeviceType::Wifi));
        assert_eq!(devices[1].link_type, LinkDeviceType::Cable);
    }
}
