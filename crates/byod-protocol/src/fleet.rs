//! Fleet synchronisation payload.

use serde::{Deserialize, Serialize};

use crate::device::DeviceRecord;

/// Operating system family of the host running the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    Macos,
    Linux,
    Windows,
}

impl HostType {
    /// Host family of the running binary.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Self::Macos,
            "linux" => Self::Linux,
            _ => Self::Windows,
        }
    }
}

/// Point-in-time report of host identity plus devices, posted to the scheduler.
///
/// Heartbeats (`is_sync_host == true`) carry the full tracked set; deltas
/// carry a single changed device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub is_sync_host: bool,
    pub host_ip: String,
    pub host_port: u16,
    pub discovery_tunnel_identifier: String,
    pub host_type: HostType,
    pub host_user_id: String,
    pub dedicated_org: String,
    pub devices: Vec<DeviceRecord>,
}
