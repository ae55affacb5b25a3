//! Typed invocations of the external tools the agent drives.
//!
//! Each adapter builds an [`Invocation`] (program plus argument vector); no
//! command line ever passes through a shell.

pub mod adb;
pub mod go_ios;
mod host;

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use byod_protocol::{AppInfo, Platform};
use log::debug;
use tokio::process::{Child, Command};
use tokio::time::timeout;

pub use adb::Adb;
pub use go_ios::{GoIos, IosDeviceValues};
pub use host::{Appium, Lsof, TunnelBinary, kill_pid, pkill};

/// A single external program call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arg_list(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        cmd
    }

    /// Run to completion and return trimmed stdout.
    ///
    /// A non-zero exit fails with the tool's stderr (or stdout when stderr is
    /// empty) as the error message.
    pub async fn run(&self, limit: Duration) -> Result<String> {
        debug!("exec: {}", self);
        let output = timeout(limit, self.command().stdin(Stdio::null()).output())
            .await
            .with_context(|| format!("{} timed out after {:?}", self, limit))?
            .with_context(|| format!("running {}", self))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let detail = if !stderr.is_empty() { stderr } else { stdout };
            bail!("{} failed ({}): {}", self, output.status, detail);
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .trim_end_matches(['\n', '\r'])
            .to_string())
    }

    /// Start without waiting. The child is killed if its handle is dropped.
    pub fn spawn(&self) -> Result<Child> {
        debug!("spawn: {}", self);
        self.command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawning {}", self))
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Per-platform device tooling used by app management and validation.
#[derive(Debug, Clone)]
pub struct DeviceTools {
    pub adb: Adb,
    pub go_ios: GoIos,
    limit: Duration,
}

impl DeviceTools {
    pub fn new(adb: Adb, go_ios: GoIos, limit: Duration) -> Self {
        Self { adb, go_ios, limit }
    }

    pub fn command_timeout(&self) -> Duration {
        self.limit
    }

    pub async fn install_app(&self, platform: Platform, udid: &str, path: &Path) -> Result<()> {
        let invocation = match platform {
            Platform::Android => self.adb.install(udid, path),
            Platform::Ios => self.go_ios.install(udid, path),
        };
        invocation.run(self.limit).await.map(drop)
    }

    pub async fn uninstall_app(&self, platform: Platform, udid: &str, package: &str) -> Result<()> {
        let invocation = match platform {
            Platform::Android => self.adb.uninstall(udid, package),
            Platform::Ios => self.go_ios.uninstall(udid, package),
        };
        invocation.run(self.limit).await.map(drop)
    }

    pub async fn launch_app(&self, platform: Platform, udid: &str, package: &str) -> Result<()> {
        let invocation = match platform {
            Platform::Android => self.adb.launch(udid, package),
            Platform::Ios => self.go_ios.launch(udid, package),
        };
        invocation.run(self.limit).await.map(drop)
    }

    pub async fn kill_app(&self, platform: Platform, udid: &str, package: &str) -> Result<()> {
        let invocation = match platform {
            Platform::Android => self.adb.force_stop(udid, package),
            Platform::Ios => self.go_ios.kill(udid, package),
        };
        invocation.run(self.limit).await.map(drop)
    }

    /// Installed user applications.
    pub async fn list_apps(&self, platform: Platform, udid: &str) -> Result<Vec<AppInfo>> {
        match platform {
            Platform::Android => {
                let listing = self.adb.third_party_packages(udid).run(self.limit).await?;
                let mut apps = Vec::new();
                for package in adb::parse_packages(&listing) {
                    let version = match self.adb.dumpsys_package(udid, &package).run(self.limit).await {
                        Ok(dump) => adb::parse_version_name(&dump).unwrap_or_default(),
                        Err(e) => {
                            debug!("no version for {}: {:#}", package, e);
                            String::new()
                        }
                    };
                    apps.push(AppInfo {
                        name: String::new(),
                        package,
                        version,
                    });
                }
                Ok(apps)
            }
            Platform::Ios => {
                let listing = self.go_ios.apps(udid).run(self.limit).await?;
                Ok(go_ios::parse_app_list(&listing))
            }
        }
    }

    /// Network address of the device, as seen from the host.
    pub async fn device_ip(&self, platform: Platform, udid: &str) -> Result<String> {
        match platform {
            Platform::Android => {
                let routes = self.adb.ip_route(udid).run(self.limit).await?;
                adb::parse_route_ip(&routes)
                    .with_context(|| format!("no route output for device {udid}"))
            }
            Platform::Ios => bail!("device IP not found for iOS device {udid}"),
        }
    }

    /// Process id of a running app on an Android device.
    pub async fn app_pid(&self, udid: &str, package: &str) -> Result<String> {
        let pid = self.adb.pidof(udid, package).run(self.limit).await?;
        let pid = pid.trim();
        if pid.is_empty() {
            bail!("{package} is not running on {udid}");
        }
        Ok(pid.to_string())
    }
}
