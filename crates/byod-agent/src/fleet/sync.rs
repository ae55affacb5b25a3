//! Snapshot building and the heartbeat loop.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use byod_protocol::{DeviceRecord, FleetSnapshot, HostType, UserDetails};
use log::{info, warn};
use tokio::net::UdpSocket;

use super::client::FleetApi;
use super::error::{FleetError, FleetResult};
use super::tunnel::TunnelIdentity;
use crate::discovery::TrackedDevices;
use crate::supervisor::TaskSupervisor;

const TUNNEL_ID_TASK: &str = "tunnel-id";

/// Local address used for outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only selects the route.
pub async fn outbound_ip() -> FleetResult<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(("8.8.8.8", 80)).await?;
    Ok(socket.local_addr()?.ip())
}

/// Builds snapshots for the host owner and posts them.
pub struct FleetSync {
    api: Arc<dyn FleetApi>,
    tunnel: Arc<dyn TunnelIdentity>,
    host_user_id: String,
    dedicated_org: String,
    host_port: u16,
    id_retries: u32,
    id_retry_delay: Duration,
    supervisor: TaskSupervisor,
}

impl FleetSync {
    pub fn new(
        api: Arc<dyn FleetApi>,
        tunnel: Arc<dyn TunnelIdentity>,
        owner: &UserDetails,
        host_port: u16,
        id_retries: u32,
        id_retry_delay: Duration,
        supervisor: TaskSupervisor,
    ) -> Self {
        Self {
            api,
            tunnel,
            host_user_id: owner.id.to_string(),
            dedicated_org: owner.org_id().to_string(),
            host_port,
            id_retries,
            id_retry_delay,
            supervisor,
        }
    }

    /// Resolve the tunnel identifier, retrying a bounded number of times.
    pub async fn tunnel_identifier(&self) -> FleetResult<String> {
        let mut retries_left = self.id_retries;
        loop {
            match self.tunnel.identifier().await {
                Ok(id) => return Ok(id),
                Err(e) if retries_left > 0 => {
                    warn!(
                        "Tunnel id not found ({}), retrying in {:?}, {} retries left",
                        e,
                        self.id_retry_delay,
                        retries_left - 1
                    );
                    self.supervisor.record_retry(TUNNEL_ID_TASK);
                    retries_left -= 1;
                    tokio::time::sleep(self.id_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn snapshot(
        &self,
        is_sync_host: bool,
        devices: Vec<DeviceRecord>,
    ) -> FleetResult<FleetSnapshot> {
        let discovery_tunnel_identifier = self.tunnel_identifier().await?;
        let host_ip = match outbound_ip().await {
            Ok(ip) => ip.to_string(),
            Err(e) => {
                warn!("No outbound route ({}), reporting loopback address", e);
                Ipv4Addr::LOCALHOST.to_string()
            }
        };
        Ok(FleetSnapshot {
            is_sync_host,
            host_ip,
            host_port: self.host_port,
            discovery_tunnel_identifier,
            host_type: HostType::current(),
            host_user_id: self.host_user_id.clone(),
            dedicated_org: self.dedicated_org.clone(),
            devices,
        })
    }

    async fn send(&self, is_sync_host: bool, devices: Vec<DeviceRecord>) -> FleetResult<()> {
        for device in &devices {
            info!("sync: marking {} {:?}", device.udid, device.status);
        }
        let snapshot = self.snapshot(is_sync_host, devices).await?;
        self.api.sync(&snapshot).await
    }

    /// Report a single device transition.
    pub async fn delta(&self, device: DeviceRecord) -> FleetResult<()> {
        self.send(false, vec![device]).await
    }

    /// Report the full tracked set.
    pub async fn heartbeat(&self, devices: Vec<DeviceRecord>) -> FleetResult<()> {
        self.send(true, devices).await
    }

    /// Heartbeat with no devices, sent at startup and at shutdown.
    pub async fn announce_empty(&self) {
        match self.heartbeat(Vec::new()).await {
            Ok(()) => info!("Host sync sent"),
            Err(FleetError::TunnelUnavailable(reason)) => {
                warn!("Host sync skipped, tunnel id not found: {}", reason)
            }
            Err(e) => warn!("Host sync failed: {}", e),
        }
    }
}

/// Post the full tracked set every `interval` until cancelled.
pub async fn run_heartbeat(
    sync: Arc<FleetSync>,
    devices: TrackedDevices,
    interval: Duration,
) -> Result<()> {
    info!("Starting heartbeat every {:?}", interval);
    loop {
        tokio::time::sleep(interval).await;
        if let Err(e) = sync.heartbeat(devices.snapshot().await).await {
            warn!("Heartbeat failed: {}", e);
        }
    }
}
