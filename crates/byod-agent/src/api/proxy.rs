//! Buffered HTTP reverse proxy to local automation servers.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, Uri, header, request},
    response::Response,
};
use bytes::Bytes;
use dashmap::DashMap;
use hyper::body::Incoming;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use log::{debug, error};

use super::error::{ApiError, ApiResult};

pub type HttpClient = Client<HttpConnector, Body>;

static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

pub fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Forwards requests to one backend base URL.
#[derive(Debug)]
pub struct ReverseProxy {
    target: String,
    host: HeaderValue,
    client: HttpClient,
}

impl ReverseProxy {
    pub fn new(client: HttpClient, target: impl Into<String>) -> ApiResult<Self> {
        let target = target.into().trim_end_matches('/').to_string();
        let uri: Uri = target
            .parse()
            .map_err(|e| ApiError::internal(format!("invalid proxy target {target}: {e}")))?;
        let authority = uri
            .authority()
            .ok_or_else(|| ApiError::internal(format!("proxy target {target} has no host")))?;
        let host = HeaderValue::from_str(authority.as_str())
            .map_err(|e| ApiError::internal(format!("invalid Host header value {authority}: {e}")))?;
        Ok(Self {
            target,
            host,
            client,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Forward with the inbound path and query unchanged.
    pub async fn forward(&self, parts: &request::Parts, body: Bytes) -> ApiResult<Response> {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        self.forward_to(parts, path_and_query, body).await
    }

    /// Forward to `path_and_query` on the target, keeping method and headers.
    pub async fn forward_to(
        &self,
        parts: &request::Parts,
        path_and_query: &str,
        body: Bytes,
    ) -> ApiResult<Response> {
        let target_uri = format!("{}{}", self.target, path_and_query);
        debug!("Proxying {} to {}", parts.method, target_uri);

        let uri: Uri = target_uri
            .parse()
            .map_err(|e| ApiError::internal(format!("invalid target URI {target_uri}: {e}")))?;

        let body_len = body.len();
        let mut forwarded = Request::builder()
            .method(parts.method.clone())
            .uri(uri)
            .body(Body::from(body))
            .map_err(|e| ApiError::internal(format!("failed to build proxy request: {e}")))?;

        let headers = forwarded.headers_mut();
        *headers = parts.headers.clone();
        if let Some(original) = parts.headers.get(header::HOST) {
            headers.insert(X_FORWARDED_HOST.clone(), original.clone());
        }
        headers.insert(header::HOST, self.host.clone());
        // The body was buffered, so it is always sent with a fixed length.
        headers.remove(header::TRANSFER_ENCODING);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body_len));

        let response: hyper::Response<Incoming> = self.client.request(forwarded).await.map_err(|e| {
            error!("Proxy request to {} failed: {:?}", self.target, e);
            ApiError::bad_gateway(format!("backend {} unreachable", self.target))
        })?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// One proxy per backend URL, created on first use.
#[derive(Debug, Clone)]
pub struct ProxyCache {
    client: HttpClient,
    proxies: Arc<DashMap<String, Arc<ReverseProxy>>>,
}

impl ProxyCache {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            proxies: Arc::new(DashMap::new()),
        }
    }

    pub fn get_or_create(&self, target: &str) -> ApiResult<Arc<ReverseProxy>> {
        if let Some(proxy) = self.proxies.get(target) {
            return Ok(Arc::clone(proxy.value()));
        }
        let proxy = Arc::new(ReverseProxy::new(self.client.clone(), target)?);
        Ok(Arc::clone(
            self.proxies
                .entry(target.to_string())
                .or_insert(proxy)
                .value(),
        ))
    }

    /// Proxy for the automation server listening on `port`.
    pub fn for_port(&self, port: u16) -> ApiResult<Arc<ReverseProxy>> {
        self.get_or_create(&format!("http://localhost:{port}"))
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
