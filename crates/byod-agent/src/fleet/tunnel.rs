//! LT tunnel helper: launch, identity lookup and teardown.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use byod_protocol::TunnelInfo;
use log::{info, warn};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::sync::{Mutex, OnceCell};

use super::error::{FleetError, FleetResult};
use crate::tools::TunnelBinary;

/// Source of the tunnel identifier reported with every snapshot.
#[async_trait]
pub trait TunnelIdentity: Send + Sync {
    async fn identifier(&self) -> FleetResult<String>;
}

/// Owns the tunnel helper process for the lifetime of the agent.
#[derive(Debug)]
pub struct TunnelManager {
    binary: TunnelBinary,
    info_port: u16,
    client: Client,
    identifier: OnceCell<String>,
    child: Mutex<Option<Child>>,
}

impl TunnelManager {
    pub fn new(binary: TunnelBinary, info_port: u16, timeout: Duration) -> FleetResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            binary,
            info_port,
            client,
            identifier: OnceCell::new(),
            child: Mutex::new(None),
        })
    }

    fn info_url(&self) -> String {
        format!("http://127.0.0.1:{}/api/v1.0/info", self.info_port)
    }

    /// Start the helper. Fails if something already listens on the info port.
    pub async fn launch(&self, user: &str, key: &str, stage: bool) -> Result<()> {
        let probe = tokio::time::timeout(
            Duration::from_secs(1),
            TcpStream::connect(("127.0.0.1", self.info_port)),
        )
        .await;
        if let Ok(Ok(_)) = probe {
            bail!(
                "port {} is busy, can't start the tunnel binary (ports 9090, 8000 and 4723 must be free)",
                self.info_port
            );
        }

        let child = self
            .binary
            .start(user, key, self.info_port, stage)
            .spawn()
            .context("starting tunnel binary")?;
        info!("Tunnel started, PID {:?}", child.id());
        *self.child.lock().await = Some(child);
        Ok(())
    }

    /// Query the helper's info endpoint once.
    pub async fn fetch_identifier(&self) -> FleetResult<String> {
        info!("Fetching tunnel info");
        let response = self.client.get(self.info_url()).send().await?;
        let body = response.text().await?;
        let tunnel: TunnelInfo = serde_json::from_str(&body)
            .map_err(|e| FleetError::ParseError(format!("tunnel info: {e}")))?;
        tunnel
            .identifier()
            .ok_or_else(|| FleetError::TunnelUnavailable(format!("status {:?}", tunnel.status)))
    }

    pub async fn kill(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            info!("Tunnel was not started");
            return;
        };
        info!("Killing tunnel");
        if let Err(e) = child.kill().await {
            warn!("Error killing tunnel process: {}", e);
        }
    }
}

#[async_trait]
impl TunnelIdentity for TunnelManager {
    /// The first successful lookup is cached for the rest of the run.
    async fn identifier(&self) -> FleetResult<String> {
        self.identifier
            .get_or_try_init(|| self.fetch_identifier())
            .await
            .cloned()
    }
}
