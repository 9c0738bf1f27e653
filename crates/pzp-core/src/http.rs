//! HTTP base for REST-controlled instruments.
//!
//! Provides the `address` text parameter and a small request helper on top
//! of a shared hyper client. Request paths are joined as
//! `{address}{api_prefix}{path}`, and any status other than 200 becomes
//! [`PieceError::HttpStatus`].

use crate::error::{PieceError, PieceResult};
use crate::param;
use crate::parameter::Parameter;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use std::time::Duration;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Response with the body already collected.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body as text.
    pub body: String,
}

impl HttpResponse {
    /// Fail unless the status is 200.
    pub fn check(self) -> PieceResult<Self> {
        check_response(self.status, &self.body)?;
        Ok(self)
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> PieceResult<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Body text.
    pub fn text(&self) -> &str {
        &self.body
    }
}

/// Error unless `status` is 200 (OK).
pub fn check_response(status: u16, body: &str) -> PieceResult<()> {
    if status == StatusCode::OK.as_u16() {
        Ok(())
    } else {
        Err(PieceError::HttpStatus {
            status,
            body: body.to_string(),
        })
    }
}

/// Shared HTTP plumbing for a Piece.
#[derive(Clone, Debug)]
pub struct HttpBase {
    address: Parameter<String>,
    api_prefix: String,
    client: Client<HttpConnector>,
    timeout: Duration,
}

impl HttpBase {
    /// Create the base with the Piece's default address and API prefix.
    pub fn new(default_address: &str, api_prefix: &str) -> Self {
        Self {
            address: param::text("address", default_address),
            api_prefix: api_prefix.to_string(),
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The `address` parameter, for registration.
    pub fn address(&self) -> &Parameter<String> {
        &self.address
    }

    /// Full URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}{}{}",
            self.address.value().trim_end_matches('/'),
            self.api_prefix,
            path
        )
    }

    /// GET, checked.
    pub async fn get(&self, path: &str) -> PieceResult<HttpResponse> {
        self.send(Method::GET, path, Body::empty(), None).await?.check()
    }

    /// POST with an empty body, checked.
    pub async fn post(&self, path: &str) -> PieceResult<HttpResponse> {
        self.send(Method::POST, path, Body::empty(), None).await?.check()
    }

    /// PUT with a text body, checked.
    pub async fn put(&self, path: &str, body: impl Into<String>) -> PieceResult<HttpResponse> {
        let body: String = body.into();
        self.send(Method::PUT, path, Body::from(body), None)
            .await?
            .check()
    }

    /// PUT with a JSON body, checked.
    pub async fn put_json(&self, path: &str, body: &serde_json::Value) -> PieceResult<HttpResponse> {
        let body = serde_json::to_vec(body)?;
        self.send(Method::PUT, path, Body::from(body), Some("application/json"))
            .await?
            .check()
    }

    #[tracing::instrument(level = "debug", skip(self, body, content_type))]
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Body,
        content_type: Option<&str>,
    ) -> PieceResult<HttpResponse> {
        let url = self.url(path);
        let uri: hyper::Uri = url.parse().map_err(|e: hyper::http::uri::InvalidUri| {
            PieceError::InvalidAddress {
                address: url.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(hyper::header::CONTENT_TYPE, content_type);
        }
        let request = builder.body(body).map_err(|e| PieceError::InvalidAddress {
            address: url.clone(),
            reason: e.to_string(),
        })?;

        let exchange = async {
            let response = self.client.request(request).await?;
            let status = response.status().as_u16();
            let bytes = hyper::body::to_bytes(response.into_body()).await?;
            Ok::<_, PieceError>(HttpResponse {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            })
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| PieceError::Timeout(format!("HTTP response from {url}")))??;
        tracing::debug!(status = response.status, "HTTP response");
        Ok(response)
    }
}
