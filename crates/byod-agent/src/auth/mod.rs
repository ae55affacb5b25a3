//! Authentication module.
//!
//! Every request carries `Authorization: Basic <user:token>` or
//! `Authorization: Bearer <jwt>`. Credentials are checked against the remote
//! accounts service through [`AuthCache`] and must belong to the host owner's
//! organization.

mod cache;
mod client;
mod error;
mod middleware;

pub use cache::{AuthCache, is_token_expired, run_bearer_flush};
pub use client::{AccountsApi, HttpAccountsClient};
pub use error::{AuthError, AuthErrorResponse};
pub use middleware::{CurrentUser, auth_middleware};
