//! The agent context: every shared component, built once at startup.

use std::sync::Arc;

use anyhow::{Context, Result};
use byod_protocol::UserDetails;
use log::info;

use crate::api::{HttpClient, ProxyCache, SessionRouter, http_client};
use crate::auth::{AccountsApi, AuthCache, run_bearer_flush};
use crate::automation::ProcessManager;
use crate::config::AgentConfig;
use crate::db::Database;
use crate::discovery::{
    AndroidBackend, DeviceBackend, DeviceWatcher, DiskImages, IosBackend, IosTunnel,
    TrackedDevices,
};
use crate::fleet::{FleetApi, FleetSync, TunnelIdentity, run_heartbeat};
use crate::lease::PortRegistry;
use crate::paths::{AgentPaths, expand_path};
use crate::supervisor::TaskSupervisor;
use crate::tools::{Adb, Appium, DeviceTools, GoIos, Lsof};

/// Remote services the agent talks to.
pub struct Remotes {
    pub accounts: Arc<dyn AccountsApi>,
    pub fleet: Arc<dyn FleetApi>,
    pub tunnel: Arc<dyn TunnelIdentity>,
}

pub struct AgentContext {
    pub config: AgentConfig,
    pub paths: AgentPaths,
    /// Host owner, validated at startup.
    pub owner: UserDetails,
    pub leases: PortRegistry,
    pub processes: ProcessManager,
    pub devices: Arc<DeviceTools>,
    pub tracked: TrackedDevices,
    pub supervisor: TaskSupervisor,
    pub auth: Arc<AuthCache>,
    pub fleet: Arc<FleetSync>,
    pub sessions: Arc<SessionRouter>,
    pub ios_tunnel: IosTunnel,
    /// Client for file downloads.
    pub http: reqwest::Client,
    /// Client for proxied WebDriver traffic.
    pub http_client: HttpClient,
}

impl AgentContext {
    pub fn new(
        config: AgentConfig,
        paths: AgentPaths,
        db: &Database,
        owner: UserDetails,
        remotes: Remotes,
    ) -> Result<Self> {
        let limit = config.tools.command_timeout();
        let adb = match &config.tools.adb {
            Some(path) => expand_path(path)?,
            None => paths.default_adb(),
        };
        let go_ios = match &config.tools.go_ios {
            Some(path) => expand_path(path)?,
            None => paths.default_go_ios(),
        };
        let go_ios = GoIos::new(go_ios);
        let devices = Arc::new(DeviceTools::new(Adb::new(adb), go_ios.clone(), limit));

        let leases = PortRegistry::new(db, config.automation.base_port);
        let processes = ProcessManager::new(
            leases.clone(),
            Appium::new(expand_path(&config.tools.appium)?, &config.server.base_path),
            Lsof::new(expand_path(&config.tools.lsof)?),
            paths.clone(),
            config.automation.settle_delay(),
            limit,
        );

        let supervisor = TaskSupervisor::new();
        let auth = Arc::new(AuthCache::new(remotes.accounts, owner.org_id()));
        let fleet = Arc::new(FleetSync::new(
            remotes.fleet,
            remotes.tunnel,
            &owner,
            config.fleet.host_port,
            config.tunnel.id_retries,
            config.tunnel.id_retry_delay(),
            supervisor.clone(),
        ));

        let http = reqwest::Client::builder()
            .build()
            .context("building download client")?;
        let http_client = http_client();
        let sessions = Arc::new(SessionRouter::new(ProxyCache::new(http_client.clone())));

        Ok(Self {
            ios_tunnel: IosTunnel::new(go_ios, limit),
            config,
            paths,
            owner,
            leases,
            processes,
            devices,
            tracked: TrackedDevices::default(),
            supervisor,
            auth,
            fleet,
            sessions,
            http,
            http_client,
        })
    }

    /// Device watcher over the iOS and Android backends.
    pub fn watcher(&self) -> DeviceWatcher {
        let limit = self.devices.command_timeout();
        let disk_images = DiskImages::new(
            &self.paths.disk_images,
            self.config.discovery.assets_url.clone(),
            self.http.clone(),
        );
        let backends: Vec<Arc<dyn DeviceBackend>> = vec![
            Arc::new(IosBackend::new(
                self.devices.go_ios.clone(),
                disk_images,
                self.paths.runner_bundle(),
                limit,
            )),
            Arc::new(AndroidBackend::new(self.devices.adb.clone(), limit)),
        ];
        DeviceWatcher::new(
            backends,
            self.tracked.clone(),
            self.leases.clone(),
            Arc::clone(&self.fleet),
            self.supervisor.clone(),
        )
    }

    /// Start discovery, heartbeat and bearer-cache flushing under the
    /// supervisor.
    pub fn spawn_background(&self) {
        let watcher = Arc::new(self.watcher());
        self.supervisor
            .spawn_loop("discovery", watcher.run(self.config.discovery.interval()));
        self.supervisor.spawn_loop(
            "heartbeat",
            run_heartbeat(
                Arc::clone(&self.fleet),
                self.tracked.clone(),
                self.config.fleet.heartbeat_interval(),
            ),
        );
        self.supervisor.spawn_loop(
            "jwt-flush",
            run_bearer_flush(Arc::clone(&self.auth), self.config.auth.jwt_flush_interval()),
        );
        info!("Background tasks started");
    }
}
