//! On-disk layout under the agent's working directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).with_context(|| format!("expanding path {text}"))?;
    Ok(PathBuf::from(expanded.to_string()))
}

/// Resolved directories the agent reads from and writes to.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    pub work_dir: PathBuf,
    pub assets: PathBuf,
    pub tests: PathBuf,
    pub videos: PathBuf,
    pub command_logs: PathBuf,
    pub appium_logs: PathBuf,
    pub binary_logs: PathBuf,
    pub screenshots: PathBuf,
    pub applications: PathBuf,
    pub disk_images: PathBuf,
}

impl AgentPaths {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let assets = work_dir.join("assets");
        Self {
            tests: work_dir.join("tests"),
            videos: work_dir.join("videos"),
            command_logs: work_dir.join("commandlogs"),
            appium_logs: work_dir.join("appiumlogs"),
            binary_logs: work_dir.join("binarylogs"),
            screenshots: work_dir.join("screenshots"),
            applications: work_dir.join("applications"),
            disk_images: assets.join("diskimages"),
            assets,
            work_dir,
        }
    }

    /// Create every directory in the layout.
    pub fn ensure(&self) -> Result<()> {
        for dir in self.all() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }
        Ok(())
    }

    fn all(&self) -> [&Path; 10] {
        [
            &self.work_dir,
            &self.assets,
            &self.tests,
            &self.videos,
            &self.command_logs,
            &self.appium_logs,
            &self.binary_logs,
            &self.screenshots,
            &self.applications,
            &self.disk_images,
        ]
    }

    /// Port registry database, recreated on every boot.
    pub fn lease_db(&self) -> PathBuf {
        self.work_dir.join("byod.db")
    }

    pub fn test_placeholder(&self, test_id: &str) -> PathBuf {
        self.tests.join(format!("{test_id}.json"))
    }

    pub fn appium_log(&self, test_id: &str) -> PathBuf {
        self.appium_logs.join(format!("{test_id}.log"))
    }

    /// WebDriverAgent runner bundle installed on new iOS devices.
    pub fn runner_bundle(&self) -> PathBuf {
        self.assets.join("WebDriverAgentRunner-Runner.app")
    }

    pub fn default_adb(&self) -> PathBuf {
        self.assets.join("adb")
    }

    pub fn default_go_ios(&self) -> PathBuf {
        self.assets.join("go-ios")
    }
}
