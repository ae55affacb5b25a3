//! Accounts service client.

use std::time::Duration;

use async_trait::async_trait;
use byod_protocol::{BearerUserDetails, UserDetails};
use reqwest::{Client, StatusCode, header};
use serde::Serialize;

use super::error::AuthError;

/// Remote credential validation.
#[async_trait]
pub trait AccountsApi: Send + Sync {
    /// Validate a username and access key.
    async fn validate_basic(&self, username: &str, token: &str) -> Result<UserDetails, AuthError>;

    /// Validate a bearer token. `authorization` is the full header value.
    async fn validate_bearer(&self, authorization: &str) -> Result<UserDetails, AuthError>;
}

#[derive(Debug, Serialize)]
struct BasicAuthRequest<'a> {
    username: &'a str,
    token: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpAccountsClient {
    client: Client,
    basic_url: String,
    bearer_url: Option<String>,
    /// Host owner's username and access key, sent with credential checks.
    owner: (String, String),
}

impl HttpAccountsClient {
    pub fn new(
        basic_url: impl Into<String>,
        bearer_url: Option<String>,
        owner_user: impl Into<String>,
        owner_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Remote(e.to_string()))?;
        Ok(Self {
            client,
            basic_url: basic_url.into(),
            bearer_url,
            owner: (owner_user.into(), owner_key.into()),
        })
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        who: &str,
    ) -> Result<T, AuthError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::InvalidCredentials(who.to_string()));
        }
        if !status.is_success() {
            return Err(AuthError::Remote(format!("status {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| AuthError::Remote(format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl AccountsApi for HttpAccountsClient {
    async fn validate_basic(&self, username: &str, token: &str) -> Result<UserDetails, AuthError> {
        let response = self
            .client
            .post(&self.basic_url)
            .basic_auth(&self.owner.0, Some(&self.owner.1))
            .json(&BasicAuthRequest { username, token })
            .send()
            .await
            .map_err(|e| AuthError::Remote(e.to_string()))?;

        let details: UserDetails = Self::parse(response, username).await?;
        Ok(details.normalized())
    }

    async fn validate_bearer(&self, authorization: &str) -> Result<UserDetails, AuthError> {
        let url = self
            .bearer_url
            .as_deref()
            .ok_or_else(|| AuthError::UnsupportedScheme("bearer".to_string()))?;
        let response = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, authorization)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::Remote(e.to_string()))?;

        let details: BearerUserDetails = Self::parse(response, "bearer token").await?;
        Ok(details.into())
    }
}
