//! Port for calling other HTTP services.
//!
//! Bodies are JSON. Adapters retry network failures and `5xx` answers
//! only, bound the whole exchange by the caller's deadline and forward the
//! caller's trace position.
use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::define_port_error;
use crate::domain::CallContext;

define_port_error! {
    /// Errors surfaced by HTTP client adapters.
    pub enum HttpClientError {
        InvalidRequest { message: String } => "invalid outbound request: {message}",
        /// The caller's deadline or the client timeout elapsed.
        Timeout { url: String } => "request to {url} timed out",
        Cancelled { url: String } => "request to {url} was cancelled",
        /// Connection or protocol failure after all retries.
        Network { message: String } => "request failed: {message}",
        Decode { message: String } => "failed to decode response: {message}",
    }
}

impl From<HttpClientError> for crate::domain::Error {
    fn from(err: HttpClientError) -> Self {
        match err {
            HttpClientError::InvalidRequest { .. } => Self::internal(err.to_string()),
            HttpClientError::Timeout { .. } => Self::gateway_timeout(err.to_string()),
            HttpClientError::Cancelled { .. } => Self::service_unavailable(err.to_string()),
            HttpClientError::Network { .. } | HttpClientError::Decode { .. } => {
                Self::bad_gateway(err.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        })
    }
}

/// An outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Merged over the client's default headers; these win.
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A received response, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// # Errors
    /// [`HttpClientError::Decode`] when the body is not the expected JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpClientError> {
        serde_json::from_slice(&self.body).map_err(|err| HttpClientError::decode(err.to_string()))
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(
        &self,
        call: &CallContext,
        request: HttpRequest,
    ) -> Result<HttpResponse, HttpClientError>;
}

fn with_headers(mut request: HttpRequest, headers: &[(&str, &str)]) -> HttpRequest {
    request.headers.extend(
        headers
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned())),
    );
    request
}

/// Verb helpers over any [`HttpClient`].
#[async_trait]
pub trait HttpClientExt: HttpClient {
    async fn get(
        &self,
        call: &CallContext,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpClientError> {
        let request = with_headers(HttpRequest::new(HttpMethod::Get, url), headers);
        self.execute(call, request).await
    }

    async fn post(
        &self,
        call: &CallContext,
        url: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpClientError> {
        self.send(call, HttpMethod::Post, url, body, headers).await
    }

    async fn put(
        &self,
        call: &CallContext,
        url: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpClientError> {
        self.send(call, HttpMethod::Put, url, body, headers).await
    }

    async fn patch(
        &self,
        call: &CallContext,
        url: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpClientError> {
        self.send(call, HttpMethod::Patch, url, body, headers).await
    }

    async fn delete(
        &self,
        call: &CallContext,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpClientError> {
        self.send(call, HttpMethod::Delete, url, None, headers).await
    }

    async fn send(
        &self,
        call: &CallContext,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpClientError> {
        let mut request = with_headers(HttpRequest::new(method, url), headers);
        request.body = body;
        self.execute(call, request).await
    }
}

impl<C: HttpClient + ?Sized> HttpClientExt for C {}
