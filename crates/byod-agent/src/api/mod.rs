//! HTTP API module.
//!
//! Serves the WebDriver session endpoints, which are reverse-proxied to the
//! per-device automation servers, plus app management and element
//! validation. All routes require authentication.

mod apps;
mod error;
mod proxy;
mod routes;
mod session;
mod state;
mod validate;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use proxy::{HttpClient, ProxyCache, ReverseProxy, http_client};
pub use routes::create_router;
pub use session::{SessionRoute, SessionRouter, invalid_session, session_id_from_path};
pub use state::AppState;
