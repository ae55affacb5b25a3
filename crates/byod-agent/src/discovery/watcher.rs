//! The discovery loop: poll, diff, dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use byod_protocol::{DeviceRecord, DeviceStatus, Platform};
use log::{info, warn};
use tokio::sync::RwLock;

use super::backend::DeviceBackend;
use crate::fleet::FleetSync;
use crate::lease::PortRegistry;
use crate::supervisor::TaskSupervisor;

/// Devices seen by the most recent poll, keyed by udid.
#[derive(Debug, Clone, Default)]
pub struct TrackedDevices {
    inner: Arc<RwLock<HashMap<String, DeviceRecord>>>,
}

impl TrackedDevices {
    /// All tracked devices, ordered by udid.
    pub async fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self.inner.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.udid.cmp(&b.udid));
        devices
    }

    pub async fn get(&self, udid: &str) -> Option<DeviceRecord> {
        self.inner.read().await.get(udid).cloned()
    }

    pub async fn replace(&self, devices: HashMap<String, DeviceRecord>) {
        *self.inner.write().await = devices;
    }

    async fn current(&self) -> HashMap<String, DeviceRecord> {
        self.inner.read().await.clone()
    }
}

/// A change between two consecutive polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Gone since the last poll; the record carries `disconnected`.
    Detached(DeviceRecord),
    /// New since the last poll.
    Attached(DeviceRecord),
    /// An Android device whose status changed.
    StatusChanged(DeviceRecord),
}

/// Compare two polls. Detachments come first, then the rest ordered by udid.
pub fn diff(
    previous: &HashMap<String, DeviceRecord>,
    current: &HashMap<String, DeviceRecord>,
) -> Vec<Transition> {
    let mut detached: Vec<&DeviceRecord> = previous
        .iter()
        .filter(|(udid, _)| !current.contains_key(*udid))
        .map(|(_, record)| record)
        .collect();
    detached.sort_by(|a, b| a.udid.cmp(&b.udid));

    let mut present: Vec<&DeviceRecord> = current.values().collect();
    present.sort_by(|a, b| a.udid.cmp(&b.udid));

    let mut transitions: Vec<Transition> = detached
        .into_iter()
        .map(|record| Transition::Detached(record.clone().with_status(DeviceStatus::Disconnected)))
        .collect();

    for record in present {
        match previous.get(&record.udid) {
            None => transitions.push(Transition::Attached(record.clone())),
            Some(old) if old.os == Platform::Android && old.status != record.status => {
                transitions.push(Transition::StatusChanged(record.clone()))
            }
            Some(_) => {}
        }
    }
    transitions
}

/// Polls every backend and reports changes to the fleet.
pub struct DeviceWatcher {
    backends: Vec<Arc<dyn DeviceBackend>>,
    tracked: TrackedDevices,
    leases: PortRegistry,
    sync: Arc<FleetSync>,
    supervisor: TaskSupervisor,
}

impl DeviceWatcher {
    pub fn new(
        backends: Vec<Arc<dyn DeviceBackend>>,
        tracked: TrackedDevices,
        leases: PortRegistry,
        sync: Arc<FleetSync>,
        supervisor: TaskSupervisor,
    ) -> Self {
        Self {
            backends,
            tracked,
            leases,
            sync,
            supervisor,
        }
    }

    fn backend(&self, platform: Platform) -> Option<&Arc<dyn DeviceBackend>> {
        self.backends.iter().find(|b| b.platform() == platform)
    }

    /// One poll. A failing backend counts as zero devices for this poll.
    /// Nothing is polled while the tunnel id is unavailable, so the tracked
    /// set only advances once its deltas can be reported.
    pub async fn tick(&self) {
        if let Err(e) = self.sync.tunnel_identifier().await {
            warn!("Skipping device poll, tunnel id not found: {}", e);
            return;
        }

        let mut current = HashMap::new();
        for backend in &self.backends {
            match backend.list().await {
                Ok(records) => {
                    for record in records {
                        current.insert(record.udid.clone(), record);
                    }
                }
                Err(e) => warn!("Failed to list {} devices: {:#}", backend.platform(), e),
            }
        }

        let previous = self.tracked.current().await;
        for transition in diff(&previous, &current) {
            match transition {
                Transition::Detached(record) => {
                    info!("Disconnected: {}", record.udid);
                    if let Some(backend) = self.backend(record.os) {
                        backend.forget(&record.udid).await;
                    }
                    self.dispatch_delta(record);
                }
                Transition::Attached(record) => {
                    info!("Connected: {} ({})", record.udid, record.os);
                    if let Err(e) = self.leases.allocate(&record.udid).await {
                        warn!("Port lease for {} failed: {:#}", record.udid, e);
                    }
                    if let Some(backend) = self.backend(record.os) {
                        let backend = Arc::clone(backend);
                        let udid = record.udid.clone();
                        self.supervisor.spawn_once("device-attached", async move {
                            backend.on_attached(&udid).await
                        });
                    }
                    self.dispatch_delta(record);
                }
                Transition::StatusChanged(record) => {
                    info!("Status of {} is now {:?}", record.udid, record.status);
                    self.dispatch_delta(record);
                }
            }
        }

        self.tracked.replace(current).await;
    }

    fn dispatch_delta(&self, record: DeviceRecord) {
        let sync = Arc::clone(&self.sync);
        self.supervisor.spawn_once("sync-delta", async move {
            sync.delta(record).await.map_err(anyhow::Error::from)
        });
    }

    /// Poll forever at `interval`.
    pub async fn run(self: Arc<Self>, interval: Duration) -> Result<()> {
        info!("Watching devices every {:?}", interval);
        loop {
            self.tick().await;
            tokio::time::sleep(interval).await;
        }
    }
}
