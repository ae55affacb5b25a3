//! Authentication middleware.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{Method, StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use byod_protocol::UserDetails;
use log::debug;

use super::{AuthCache, AuthError};

/// Authenticated account extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserDetails);

impl CurrentUser {
    pub fn username(&self) -> &str {
        &self.0.username
    }

    pub fn org_id(&self) -> i64 {
        self.0.org_id()
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

/// Authentication middleware.
///
/// Preflight `OPTIONS` requests are answered with 200 before any check.
/// Everything else needs a Basic or Bearer `Authorization` header accepted
/// by the [`AuthCache`]; the account is injected as [`CurrentUser`].
pub async fn auth_middleware(
    State(cache): State<Arc<AuthCache>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    if req.method() == Method::OPTIONS {
        return Ok(StatusCode::OK.into_response());
    }

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let details = cache.authenticate(header).await?;
    debug!("{} {} as {}", req.method(), req.uri().path(), details.username);
    req.extensions_mut().insert(CurrentUser(details));

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccountsApi;
    use async_trait::async_trait;
    use axum::{Router, body::Body, http::Request, middleware, routing::get};
    use base64::{Engine, engine::general_purpose::STANDARD};
    use byod_protocol::Organization;
    use tower::ServiceExt;

    struct OneOrg;

    #[async_trait]
    impl AccountsApi for OneOrg {
        async fn validate_basic(&self, username: &str, _token: &str) -> Result<UserDetails, AuthError> {
            Ok(UserDetails {
                username: username.to_string(),
                org_id: 501,
                organization: Organization {
                    id: 501,
                    ..Organization::default()
                },
                ..UserDetails::default()
            })
        }

        async fn validate_bearer(&self, _authorization: &str) -> Result<UserDetails, AuthError> {
            Err(AuthError::InvalidCredentials("bearer token".to_string()))
        }
    }

    fn app() -> Router {
        let cache = Arc::new(AuthCache::new(Arc::new(OneOrg), 501));
        Router::new()
            .route("/whoami", get(|user: CurrentUser| async move { user.username().to_string() }))
            .layer(middleware::from_fn_with_state(cache, auth_middleware))
    }

    #[tokio::test]
    async fn test_options_skips_auth() {
        let res = app()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/whoami")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let res = app()
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_current_user_injected() {
        let header = format!("Basic {}", STANDARD.encode("qa:secret"));
        let res = app()
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(AUTHORIZATION, header)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"qa");
    }

    #[tokio::test]
    async fn test_rejected_bearer_is_unauthorized() {
        let res = app()
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(AUTHORIZATION, "Bearer abc.def.ghi")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
