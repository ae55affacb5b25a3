//! Process lifecycle for Appium servers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::lease::PortRegistry;
use crate::paths::AgentPaths;
use crate::tools::{Appium, Lsof, kill_pid};

/// Handle to a running automation server.
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    pub port: u16,
    /// When the settle delay after spawning elapses.
    ready_at: Instant,
    child: Child,
}

impl ProcessHandle {
    pub fn new(child: Child, port: u16, ready_at: Instant) -> Option<Self> {
        let pid = child.id()?;
        Some(Self {
            pid,
            port,
            ready_at,
            child,
        })
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the process and wait for it to be reaped.
    pub async fn kill(&mut self) -> Result<()> {
        if let Err(e) = self.child.kill().await
            && self.is_running()
        {
            return Err(anyhow::anyhow!("failed to kill process: {}", e));
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                warn!("Error waiting for process {}: {:?}", self.pid, e);
                Ok(())
            }
            Err(_) => {
                warn!("Timeout waiting for process {} to exit", self.pid);
                Ok(())
            }
        }
    }
}

/// Spawns and stops one automation server per device.
///
/// Cloning shares the underlying process table.
#[derive(Debug, Clone)]
pub struct ProcessManager {
    processes: Arc<Mutex<HashMap<String, ProcessHandle>>>,
    leases: PortRegistry,
    appium: Appium,
    lsof: Lsof,
    paths: AgentPaths,
    settle_delay: Duration,
    command_timeout: Duration,
}

impl ProcessManager {
    pub fn new(
        leases: PortRegistry,
        appium: Appium,
        lsof: Lsof,
        paths: AgentPaths,
        settle_delay: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            processes: Arc::new(Mutex::new(HashMap::new())),
            leases,
            appium,
            lsof,
            paths,
            settle_delay,
            command_timeout,
        }
    }

    /// Ensure an automation server runs for `udid` and return its port.
    ///
    /// A second call while the server is up returns the same port without
    /// spawning again. Every caller returns only after the settle delay that
    /// followed the spawn has elapsed.
    pub async fn start(&self, udid: &str, test_id: &str) -> Result<u16> {
        let (port, ready_at) = {
            let mut processes = self.processes.lock().await;

            let existing = match processes.get_mut(udid) {
                Some(handle) => {
                    if handle.is_running() {
                        Some((handle.port, handle.ready_at))
                    } else {
                        warn!(
                            "Automation server for {} (PID {}) exited, respawning",
                            udid, handle.pid
                        );
                        processes.remove(udid);
                        None
                    }
                }
                None => None,
            };

            match existing {
                Some(found) => found,
                None => {
                    let port = self.leases.allocate(udid).await?;
                    let log_file = self.paths.appium_log(test_id);
                    remove_stale_log(&log_file)?;

                    info!("Starting automation server for {} on port {}", udid, port);
                    let child = self
                        .appium
                        .server(port, &log_file)
                        .spawn()
                        .context("spawning automation server")?;
                    let ready_at = Instant::now() + self.settle_delay;
                    let handle = ProcessHandle::new(child, port, ready_at)
                        .ok_or_else(|| anyhow::anyhow!("failed to get PID for automation server"))?;
                    info!("Automation server for {} has PID {}", udid, handle.pid);
                    processes.insert(udid.to_string(), handle);
                    (port, ready_at)
                }
            }
        };

        tokio::time::sleep_until(ready_at).await;
        Ok(port)
    }

    /// Stop the automation server for `udid`.
    ///
    /// Whatever still listens on the device's leased port is killed too,
    /// except this agent itself. Failures are logged, never returned.
    pub async fn stop(&self, udid: &str) {
        let handle = self.processes.lock().await.remove(udid);
        if let Some(mut handle) = handle {
            debug!("Killing automation server for {} (PID {})", udid, handle.pid);
            if let Err(e) = handle.kill().await {
                warn!(
                    "Failed to kill automation server for {} (PID {}): {:?}",
                    udid, handle.pid, e
                );
            }
        }

        let port = match self.leases.lookup(udid).await {
            Ok(Some(port)) => port,
            Ok(None) => return,
            Err(e) => {
                warn!("Port lookup for {} failed: {:#}", udid, e);
                return;
            }
        };
        self.kill_port_owners(port).await;
    }

    async fn kill_port_owners(&self, port: u16) {
        // lsof exits non-zero when nothing holds the port.
        let listing = match self.lsof.port_pids(port).run(self.command_timeout).await {
            Ok(listing) => listing,
            Err(e) => {
                debug!("No process found on port {}: {:#}", port, e);
                return;
            }
        };

        let own_pid = std::process::id();
        for pid in Lsof::parse_pids(&listing) {
            if pid == own_pid {
                continue;
            }
            info!("Killing PID {} still holding port {}", pid, port);
            if let Err(e) = kill_pid(pid).run(self.command_timeout).await {
                warn!("Failed to kill PID {} on port {}: {:#}", pid, port, e);
            }
        }
    }

    /// Stop every tracked automation server.
    pub async fn stop_all(&self) {
        let udids: Vec<String> = self.processes.lock().await.keys().cloned().collect();
        for udid in udids {
            self.stop(&udid).await;
        }
    }

    /// Port of the running server for `udid`, if any. Test hook: the agent
    /// itself only goes through `start` and `stop`.
    pub async fn running_port(&self, udid: &str) -> Option<u16> {
        let mut processes = self.processes.lock().await;
        match processes.get_mut(udid) {
            Some(handle) => {
                if handle.is_running() {
                    Some(handle.port)
                } else {
                    None
                }
            }
            None => None,
        }
    }
}

fn remove_stale_log(path: &std::path::Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing stale log {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        spawn_log: PathBuf,
        paths: AgentPaths,
        manager: ProcessManager,
    }

    async fn fixture(lsof_body: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let paths = AgentPaths::new(dir.path().join("work"));
        paths.ensure().unwrap();

        let spawn_log = dir.path().join("spawns");
        let appium = write_tool(
            dir.path(),
            "appium",
            &format!("echo \"$@\" >> {}\nexec sleep 60", spawn_log.display()),
        );
        let lsof = write_tool(dir.path(), "lsof", lsof_body);

        let db = Database::in_memory().await.unwrap();
        let manager = ProcessManager::new(
            PortRegistry::new(&db, 4724),
            Appium::new(appium, "/wd/hub"),
            Lsof::new(lsof),
            paths.clone(),
            Duration::from_millis(50),
            Duration::from_secs(5),
        );

        Fixture {
            _dir: dir,
            spawn_log,
            paths,
            manager,
        }
    }

    fn spawn_count(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    async fn wait_for_spawns(path: &Path, expected: usize) {
        for _ in 0..50 {
            if spawn_count(path) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_start_twice_spawns_once() {
        let fx = fixture("exit 1").await;

        let first = fx.manager.start("X", "t1").await.unwrap();
        let second = fx.manager.start("X", "t2").await.unwrap();
        assert_eq!(first, 4724);
        assert_eq!(first, second);

        wait_for_spawns(&fx.spawn_log, 1).await;
        assert_eq!(spawn_count(&fx.spawn_log), 1);
        let args = std::fs::read_to_string(&fx.spawn_log).unwrap();
        assert!(args.contains("--base-path /wd/hub -p 4724 --log"));
        assert!(args.contains("t1.log"));

        fx.manager.stop("X").await;
    }

    #[tokio::test]
    async fn test_concurrent_starts_converge() {
        let fx = fixture("exit 1").await;

        let (a, b) = tokio::join!(fx.manager.start("X", "t1"), fx.manager.start("X", "t1"));
        assert_eq!(a.unwrap(), b.unwrap());

        wait_for_spawns(&fx.spawn_log, 1).await;
        assert_eq!(spawn_count(&fx.spawn_log), 1);
        fx.manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_keeps_lease() {
        let fx = fixture("exit 1").await;

        let port = fx.manager.start("X", "t1").await.unwrap();
        assert_eq!(fx.manager.running_port("X").await, Some(port));

        fx.manager.stop("X").await;
        assert_eq!(fx.manager.running_port("X").await, None);

        // A new device gets a fresh port; X keeps its old one.
        assert_eq!(fx.manager.start("Y", "t2").await.unwrap(), port + 1);
        assert_eq!(fx.manager.start("X", "t3").await.unwrap(), port);
        fx.manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_start_removes_stale_log() {
        let fx = fixture("exit 1").await;
        let log = fx.paths.appium_log("t1");
        std::fs::write(&log, "old run").unwrap();

        fx.manager.start("X", "t1").await.unwrap();
        // The fake server never writes its log, so the old file must be gone.
        assert!(!log.exists());
        fx.manager.stop("X").await;
    }

    #[tokio::test]
    async fn test_stop_never_kills_own_process() {
        let own_pid = std::process::id();
        let fx = fixture(&format!("echo {own_pid}")).await;

        fx.manager.start("X", "t1").await.unwrap();
        fx.manager.stop("X").await;
        // Still alive to assert.
        assert_eq!(fx.manager.running_port("X").await, None);
    }

    #[tokio::test]
    async fn test_stop_unknown_device_is_noop() {
        let fx = fixture("exit 1").await;
        fx.manager.stop("nobody").await;
        assert_eq!(fx.manager.running_port("nobody").await, None);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AgentPaths::new(dir.path());
        paths.ensure().unwrap();
        let db = Database::in_memory().await.unwrap();
        let manager = ProcessManager::new(
            PortRegistry::new(&db, 4724),
            Appium::new("/nonexistent/appium", "/wd/hub"),
            Lsof::new("/nonexistent/lsof"),
            paths,
            Duration::ZERO,
            Duration::from_secs(1),
        );
        assert!(manager.start("X", "t1").await.is_err());
        assert_eq!(manager.running_port("X").await, None);
    }
}
