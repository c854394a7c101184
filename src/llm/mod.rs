//! Chat-completions client shared by the writing, digest and layout stages.
use reqwest::Url;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::http::{self, DualTransport, HttpRequest};

pub mod model;

use model::ChatResponse;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// One system + user exchange.
#[derive(Debug, Clone)]
pub struct Prompt<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub user: &'a str,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct ChatClient {
    http: DualTransport,
    endpoint: Url,
    api_key: String,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn new(http: DualTransport, api_base: &str, api_key: &str) -> Result<Self> {
        let base = http::base_url(api_base)?;
        let endpoint = http::endpoint(&base, "chat/completions")?;
        Ok(Self {
            http,
            endpoint,
            api_key: api_key.to_string(),
        })
    }

    /// Issue one completion and return the first choice's text.
    pub async fn complete(&self, prompt: &Prompt<'_>) -> Result<String> {
        let body = json!({
            "model": prompt.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": DEFAULT_TEMPERATURE,
            "max_tokens": prompt.max_tokens,
        });
        info!(model = prompt.model, max_tokens = prompt.max_tokens, "calling model");
        let req = HttpRequest::post_json(self.endpoint.clone(), body, prompt.timeout)
            .bearer(&self.api_key);
        let reply: ChatResponse = self.http.send_json(&req).await?;
        if let Some(err) = reply.error {
            return Err(Error::Generation(format!("model endpoint error: {}", err)));
        }
        let text = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(chars = text.chars().count(), "model replied");
        if text.trim().is_empty() {
            return Err(Error::Generation(format!(
                "model {} returned no content",
                prompt.model
            )));
        }
        Ok(text)
    }
}
