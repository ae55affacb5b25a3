//! go-ios tunnel needed by devices on iOS 17 and later.

use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::process::Child;
use tokio::sync::Mutex;

use crate::tools::{GoIos, pkill};

/// Processes left over from a previous run that would hold the tunnel.
const STALE_PROCESSES: [&str; 2] = ["remoted", "go-ios"];

#[derive(Debug)]
pub struct IosTunnel {
    go_ios: GoIos,
    limit: Duration,
    child: Mutex<Option<Child>>,
}

impl IosTunnel {
    pub fn new(go_ios: GoIos, limit: Duration) -> Self {
        Self {
            go_ios,
            limit,
            child: Mutex::new(None),
        }
    }

    /// Stop stale tunnel processes, then start a fresh tunnel.
    pub async fn start(&self) -> Result<()> {
        self.stop_stale().await;
        self.launch().await
    }

    async fn stop_stale(&self) {
        for name in STALE_PROCESSES {
            // pkill exits non-zero when nothing matched.
            if let Err(e) = pkill(name).run(self.limit).await {
                debug!("pkill {}: {:#}", name, e);
            }
        }
    }

    async fn launch(&self) -> Result<()> {
        let child = self
            .go_ios
            .tunnel_start()
            .spawn()
            .context("starting go-ios tunnel")?;
        info!("go-ios tunnel started, PID {:?}", child.id());
        *self.child.lock().await = Some(child);
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub async fn kill(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        info!("Killing go-ios tunnel");
        if let Err(e) = child.kill().await {
            warn!("Error killing go-ios tunnel: {}", e);
        }
    }
}
