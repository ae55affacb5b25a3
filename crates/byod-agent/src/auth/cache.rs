//! Credential cache in front of the accounts service.
//!
//! Basic credentials are validated once per run and kept. Bearer tokens are
//! kept until their own `exp` claim passes, and the whole bearer cache is
//! flushed on a fixed interval regardless. Only accounts in the host owner's
//! organization are accepted; rejected accounts are never cached.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use base64::{Engine, engine::general_purpose::STANDARD};
use byod_protocol::UserDetails;
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use log::{debug, info};
use serde::Deserialize;

use super::client::AccountsApi;
use super::error::AuthError;

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    #[serde(default)]
    exp: Option<f64>,
}

/// Whether `token` has passed its `exp` claim.
///
/// The signature is not checked; the token was verified by whoever issued
/// it. Tokens without `exp` never expire, unreadable tokens always have.
pub fn is_token_expired(token: &str) -> bool {
    let Ok(header) = decode_header(token) else {
        return true;
    };
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    match decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => match data.claims.exp {
            Some(exp) => (Utc::now().timestamp() as f64) > exp,
            None => false,
        },
        Err(e) => {
            debug!("Unreadable bearer token: {}", e);
            true
        }
    }
}

pub struct AuthCache {
    accounts: Arc<dyn AccountsApi>,
    owner_org: i64,
    basic: DashMap<(String, String), UserDetails>,
    bearer: DashMap<String, UserDetails>,
}

impl AuthCache {
    pub fn new(accounts: Arc<dyn AccountsApi>, owner_org: i64) -> Self {
        Self {
            accounts,
            owner_org,
            basic: DashMap::new(),
            bearer: DashMap::new(),
        }
    }

    /// Authenticate a raw `Authorization` header value.
    pub async fn authenticate(&self, header: &str) -> Result<UserDetails, AuthError> {
        let parts: Vec<&str> = header.split(' ').collect();
        if parts.len() < 2 {
            return Err(AuthError::InvalidAuthHeader);
        }
        match parts[0].to_lowercase().as_str() {
            "basic" => self.basic(parts[1]).await,
            "bearer" => self.bearer(header, parts[1]).await,
            other => Err(AuthError::UnsupportedScheme(other.to_string())),
        }
    }

    async fn basic(&self, encoded: &str) -> Result<UserDetails, AuthError> {
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|_| AuthError::InvalidAuthHeader)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidAuthHeader)?;
        let pair: Vec<&str> = decoded.split(':').collect();
        let [user, token] = pair.as_slice() else {
            return Err(AuthError::InvalidAuthHeader);
        };

        let key = (user.to_string(), token.to_string());
        if let Some(details) = self.basic.get(&key) {
            return Ok(details.clone());
        }

        let details = self.accounts.validate_basic(user, token).await?;
        self.check_org(&details)?;
        self.basic.insert(key, details.clone());
        Ok(details)
    }

    async fn bearer(&self, header: &str, token: &str) -> Result<UserDetails, AuthError> {
        if let Some(details) = self.bearer.get(token).map(|d| d.clone()) {
            if !is_token_expired(token) {
                return Ok(details);
            }
            debug!("Bearer token for {} expired", details.username);
            self.bearer.remove(token);
        }

        let details = self.accounts.validate_bearer(header).await?;
        self.check_org(&details)?;
        self.bearer.insert(token.to_string(), details.clone());
        Ok(details)
    }

    fn check_org(&self, details: &UserDetails) -> Result<(), AuthError> {
        if details.org_id() != self.owner_org {
            return Err(AuthError::OrganizationMismatch {
                expected: self.owner_org,
                found: details.org_id(),
            });
        }
        Ok(())
    }

    /// Drop every cached bearer token.
    pub fn flush_bearer(&self) {
        let flushed = self.cached_bearer_tokens();
        self.bearer.clear();
        if flushed > 0 {
            info!("Flushed {} cached bearer tokens", flushed);
        }
    }

    /// Number of cached bearer tokens. Also read by the integration tests.
    pub fn cached_bearer_tokens(&self) -> usize {
        self.bearer.len()
    }
}

/// Flush the bearer cache every `interval`.
pub async fn run_bearer_flush(cache: Arc<AuthCache>, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        cache.flush_bearer();
    }
}
