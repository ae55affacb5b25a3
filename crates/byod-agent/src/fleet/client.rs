//! Scheduler sync endpoint client.

use std::time::Duration;

use async_trait::async_trait;
use byod_protocol::{FleetSnapshot, UserDetails};
use log::debug;
use reqwest::Client;

use super::error::{FleetError, FleetResult};

/// Remote side of fleet synchronisation.
#[async_trait]
pub trait FleetApi: Send + Sync {
    /// Post one snapshot.
    async fn sync(&self, snapshot: &FleetSnapshot) -> FleetResult<()>;
}

/// HTTP client posting snapshots with the owner's credentials.
#[derive(Debug, Clone)]
pub struct HttpFleetClient {
    client: Client,
    sync_url: String,
    username: String,
    api_token: String,
}

impl HttpFleetClient {
    pub fn new(
        sync_url: impl Into<String>,
        username: impl Into<String>,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> FleetResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            sync_url: sync_url.into(),
            username: username.into(),
            api_token: api_token.into(),
        })
    }

    /// Authenticate as the validated host owner. The token issued by the
    /// accounts service is used, not the key given on the command line.
    pub fn for_owner(
        sync_url: impl Into<String>,
        owner: &UserDetails,
        timeout: Duration,
    ) -> FleetResult<Self> {
        Self::new(sync_url, &owner.username, &owner.api_token, timeout)
    }
}

#[async_trait]
impl FleetApi for HttpFleetClient {
    async fn sync(&self, snapshot: &FleetSnapshot) -> FleetResult<()> {
        let response = self
            .client
            .post(&self.sync_url)
            .basic_auth(&self.username, Some(&self.api_token))
            .json(snapshot)
            .send()
            .await?;

        let status = response.status();
        debug!("sync response status: {}", status);
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(FleetError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            })
        }
    }
}
