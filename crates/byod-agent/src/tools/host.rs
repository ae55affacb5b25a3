//! Host-side programs: automation server, tunnel helper and process utilities.

use std::path::{Path, PathBuf};

use super::Invocation;

/// Appium automation server, one per device.
#[derive(Debug, Clone)]
pub struct Appium {
    binary: PathBuf,
    base_path: String,
}

impl Appium {
    pub fn new(binary: impl Into<PathBuf>, base_path: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            base_path: base_path.into(),
        }
    }

    pub fn server(&self, port: u16, log_file: &Path) -> Invocation {
        Invocation::new(&self.binary)
            .args(["--base-path", self.base_path.as_str()])
            .args(["-p".to_string(), port.to_string()])
            .arg("--log")
            .arg(log_file)
    }
}

/// LT tunnel helper binary.
#[derive(Debug, Clone)]
pub struct TunnelBinary {
    binary: PathBuf,
}

impl TunnelBinary {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn start(&self, user: &str, key: &str, info_port: u16, stage: bool) -> Invocation {
        let invocation = Invocation::new(&self.binary)
            .args(["--user", user, "--key", key])
            .arg("--infoAPIPort")
            .arg(info_port.to_string());
        if stage {
            invocation.args(["--env", "stage"])
        } else {
            invocation
        }
    }
}

/// Port owner lookup.
#[derive(Debug, Clone)]
pub struct Lsof {
    binary: PathBuf,
}

impl Lsof {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn port_pids(&self, port: u16) -> Invocation {
        Invocation::new(&self.binary)
            .args(["-t", "-i"])
            .arg(format!(":{port}"))
    }

    /// `lsof -t` prints one pid per line.
    pub fn parse_pids(output: &str) -> Vec<u32> {
        output
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }
}

/// Send SIGTERM to every process named `name`.
pub fn pkill(name: &str) -> Invocation {
    Invocation::new("pkill").args(["-SIGTERM", name])
}

pub fn kill_pid(pid: u32) -> Invocation {
    Invocation::new("kill").arg(pid.to_string())
}
