use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use super::{HttpRequest, HttpResponse, RequestBody, Transport};
use crate::error::AttemptError;

/// Canned outcome for a scripted route.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(HttpResponse),
    Fail(String),
}

impl Reply {
    pub fn json(body: Value) -> Self {
        Reply::Respond(HttpResponse {
            status: 200,
            body: body.to_string().into_bytes(),
        })
    }

    pub fn raw(status: u16, body: Vec<u8>) -> Self {
        Reply::Respond(HttpResponse { status, body })
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Reply::Fail(message.into())
    }
}

#[derive(Debug, Clone)]
pub enum RecordedBody {
    Empty,
    Json(Value),
    Multipart { field: String, file_name: String, len: usize },
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub path: String,
    pub body: RecordedBody,
}

impl RecordedRequest {
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            RecordedBody::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// In-process [`Transport`] that answers from replies keyed by URL path.
///
/// Replies queued for a path are consumed in order; the last one repeats.
/// Requests to unscripted paths fail with a network error.
#[derive(Debug)]
pub struct ScriptedTransport {
    name: String,
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn on(&self, path: &str, reply: Reply) {
        self.on_sequence(path, vec![reply]).await;
    }

    pub async fn on_sequence(&self, path: &str, replies: Vec<Reply>) {
        self.routes
            .lock()
            .await
            .entry(path.to_string())
            .or_default()
            .extend(replies);
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub async fn calls(&self, path: &str) -> usize {
        self.requests_to(path).await.len()
    }

    async fn next_reply(&self, path: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().await;
        let queue = routes.get_mut(path)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, AttemptError> {
        let path = request.url.path().to_string();
        let body = match &request.body {
            RequestBody::Empty => RecordedBody::Empty,
            RequestBody::Json(v) => RecordedBody::Json(v.clone()),
            RequestBody::Multipart(file) => RecordedBody::Multipart {
                field: file.field.clone(),
                file_name: file.file_name.clone(),
                len: file.bytes.len(),
            },
        };
        self.requests.lock().await.push(RecordedRequest {
            method: request.method.clone(),
            url: request.url.to_string(),
            path: path.clone(),
            body,
        });

        match self.next_reply(&path).await {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(message)) => Err(AttemptError::Network(message)),
            None => Err(AttemptError::Network(format!(
                "{}: no scripted reply for {}",
                self.name, path
            ))),
        }
    }
}
