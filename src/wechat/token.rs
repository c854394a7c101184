//! Process-local access-token cache for the platform API.
use reqwest::Url;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::model::TokenReply;
use crate::error::{Error, Result};
use crate::http::{redact_url, timeouts, DualTransport, HttpRequest};

/// Tokens are treated as expired this long before the platform says so.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct TokenCache {
    http: DualTransport,
    token_url: Url,
    app_id: String,
    app_secret: String,
    margin: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(http: DualTransport, token_url: Url, app_id: String, app_secret: String) -> Self {
        Self {
            http,
            token_url,
            app_id,
            app_secret,
            margin: SAFETY_MARGIN,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached token while it is fresh, otherwise fetch a new one.
    /// Concurrent callers wait on the same fetch.
    pub async fn get_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
            debug!("cached access token expired");
        }

        let (value, ttl) = self.fetch().await?;
        let expires_at = Instant::now() + ttl.saturating_sub(self.margin);
        info!(ttl_secs = ttl.as_secs(), "obtained access token");
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });
        Ok(value)
    }

    /// Drop the cached token so the next call refetches.
    pub async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            warn!("access token invalidated");
        }
    }

    async fn fetch(&self) -> Result<(String, Duration)> {
        let mut url = self.token_url.clone();
        url.query_pairs_mut()
            .append_pair("grant_type", "client_credential")
            .append_pair("appid", &self.app_id)
            .append_pair("secret", &self.app_secret);
        debug!(url = %redact_url(&url), "requesting access token");

        let req = HttpRequest::get(url, timeouts::TOKEN);
        match self.http.send_json::<TokenReply>(&req).await? {
            TokenReply::Issued {
                access_token,
                expires_in,
            } => Ok((access_token, Duration::from_secs(expires_in))),
            TokenReply::Other(raw) => Err(Error::Credential {
                raw: raw.to_string(),
            }),
        }
    }
}
