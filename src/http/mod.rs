//! HTTP delivery over two independent client stacks.
//!
//! Every outbound call is described by an [`HttpRequest`] and handed to a
//! [`DualTransport`], which tries the primary [`Transport`] once and, if that
//! attempt fails (network error, timeout, undecodable body), the secondary
//! once. There is no retry on the same stack and no backoff.
use async_trait::async_trait;
use futures::FutureExt;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{snippet, AttemptError, Error, TransportError};
use crate::fallback::FallbackChain;

#[cfg(any(test, feature = "testing"))]
mod scripted;

#[cfg(any(test, feature = "testing"))]
pub use scripted::{RecordedBody, RecordedRequest, Reply, ScriptedTransport};

/// Timeouts per call class.
pub mod timeouts {
    use std::time::Duration;

    pub const GENERATION: Duration = Duration::from_secs(600);
    pub const IMAGE: Duration = Duration::from_secs(120);
    pub const ASSET: Duration = Duration::from_secs(60);
    pub const PUBLISH: Duration = Duration::from_secs(60);
    pub const TOKEN: Duration = Duration::from_secs(30);
}

const USER_AGENT: &str = "wechat-writer/0.1";

/// A file sent as a single multipart field.
#[derive(Debug, Clone)]
pub struct MultipartFile {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(MultipartFile),
}

/// Transport-independent description of one call.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: Url, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout,
        }
    }

    pub fn post_json(url: Url, body: Value, timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: Vec::new(),
            body: RequestBody::Json(body),
            timeout,
        }
    }

    pub fn post_multipart(url: Url, file: MultipartFile, timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: Vec::new(),
            body: RequestBody::Multipart(file),
            timeout,
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.headers
            .push(("Authorization".into(), format!("Bearer {}", token)));
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn body_text(&self) -> String {
        snippet(&String::from_utf8_lossy(&self.body), 500)
    }
}

/// One networking stack.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, AttemptError>;
}

/// Which client configuration a [`ReqwestTransport`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stack {
    /// rustls, connection pooling, proxies ignored.
    Direct,
    /// HTTP/1.1 only, no idle pool, honours system proxy settings.
    Proxied,
}

pub struct ReqwestTransport {
    name: &'static str,
    http: Client,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    pub fn new(name: &'static str, stack: Stack) -> Result<Self, reqwest::Error> {
        let builder = Client::builder().user_agent(USER_AGENT);
        let http = match stack {
            Stack::Direct => builder.no_proxy().build()?,
            Stack::Proxied => builder.http1_only().pool_max_idle_per_host(0).build()?,
        };
        Ok(Self { name, http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, AttemptError> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Multipart(file) => {
                let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                    .file_name(file.file_name.clone())
                    .mime_str(&file.content_type)
                    .map_err(|e| AttemptError::Request(e.to_string()))?;
                builder.multipart(reqwest::multipart::Form::new().part(file.field.clone(), part))
            }
        };

        let res = builder
            .send()
            .await
            .map_err(|e| AttemptError::Network(e.to_string()))?;
        let status = res.status().as_u16();
        let body = res
            .bytes()
            .await
            .map_err(|e| AttemptError::Network(format!("failed to read body: {}", e)))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Primary transport with a single fallback to the secondary.
#[derive(Clone)]
pub struct DualTransport {
    primary: Arc<dyn Transport>,
    secondary: Arc<dyn Transport>,
}

impl fmt::Debug for DualTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualTransport")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .finish()
    }
}

impl DualTransport {
    pub fn new(primary: Arc<dyn Transport>, secondary: Arc<dyn Transport>) -> Self {
        Self { primary, secondary }
    }

    /// Production pair: direct rustls client first, proxied HTTP/1.1 second.
    pub fn from_defaults() -> Result<Self, reqwest::Error> {
        Ok(Self::new(
            Arc::new(ReqwestTransport::new("direct", Stack::Direct)?),
            Arc::new(ReqwestTransport::new("proxied", Stack::Proxied)?),
        ))
    }

    /// Send and decode a JSON body regardless of status code. Platform APIs
    /// report failures inside the body, so only transport-level and decode
    /// failures move on to the secondary stack.
    pub async fn send_json<T>(&self, request: &HttpRequest) -> Result<T, TransportError>
    where
        T: DeserializeOwned + Send,
    {
        self.send_with(request, decode_json::<T>).await
    }

    /// Send and return the raw body; non-success statuses count as failures.
    pub async fn send_bytes(&self, request: &HttpRequest) -> Result<Vec<u8>, TransportError> {
        self.send_with(request, ensure_success).await
    }

    async fn send_with<T, F>(&self, request: &HttpRequest, decode: F) -> Result<T, TransportError>
    where
        T: Send,
        F: Fn(HttpResponse) -> Result<T, AttemptError> + Sync,
    {
        let url = redact_url(&request.url);
        debug!(method = %request.method, %url, "sending request");
        let chain = FallbackChain::new(
            self.primary.name(),
            attempt(self.primary.as_ref(), request, &decode).boxed(),
        )
        .or_else(
            self.secondary.name(),
            attempt(self.secondary.as_ref(), request, &decode).boxed(),
        );
        chain.run().await.map_err(|exhausted| TransportError {
            url,
            transport: exhausted.label,
            source: exhausted.error,
        })
    }
}

async fn attempt<T, F>(
    transport: &dyn Transport,
    request: &HttpRequest,
    decode: &F,
) -> Result<T, AttemptError>
where
    F: Fn(HttpResponse) -> Result<T, AttemptError>,
{
    let response = transport.execute(request).await?;
    decode(response)
}

fn decode_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T, AttemptError> {
    serde_json::from_slice(&response.body).map_err(|e| AttemptError::Decode {
        status: response.status,
        reason: e.to_string(),
        body: response.body_text(),
    })
}

fn ensure_success(response: HttpResponse) -> Result<Vec<u8>, AttemptError> {
    if !response.is_success() {
        return Err(AttemptError::Status {
            status: response.status,
            body: response.body_text(),
        });
    }
    Ok(response.body)
}

/// Parse a base URL so that `join` appends to its path instead of replacing
/// the last segment.
pub fn base_url(raw: &str) -> Result<Url, Error> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    Url::parse(&with_slash).map_err(|e| Error::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Resolve `path` against a base produced by [`base_url`].
pub fn endpoint(base: &Url, path: &str) -> Result<Url, Error> {
    base.join(path.trim_start_matches('/'))
        .map_err(|e| Error::InvalidUrl {
            url: format!("{}{}", base, path),
            reason: e.to_string(),
        })
}

const SECRET_PARAMS: [&str; 3] = ["access_token", "secret", "appid"];

/// Render a URL for logs with credential query values masked.
pub fn redact_url(url: &Url) -> String {
    if url.query().is_none() {
        return url.to_string();
    }
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if SECRET_PARAMS.contains(&k.as_ref()) {
                "[REDACTED]".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
