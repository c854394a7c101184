//! Error taxonomy for the publishing pipeline.
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of a single delivery attempt on one transport.
#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response (HTTP {status}): {reason}; body: {body}")]
    Decode {
        status: u16,
        reason: String,
        body: String,
    },
    #[error("invalid request: {0}")]
    Request(String),
}

/// Every transport failed for a call. Only the last failure is carried.
#[derive(Debug, Clone, Error)]
#[error("all transports failed for {url} (last via {transport}): {source}")]
pub struct TransportError {
    pub url: String,
    pub transport: String,
    pub source: AttemptError,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("token issuance failed: {raw}")]
    Credential { raw: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no content generated: {0}")]
    Generation(String),
    #[error("image generation failed: {0}")]
    ImageGeneration(String),
    #[error("asset upload rejected: {message}")]
    Asset { code: Option<i64>, message: String },
    #[error("draft rejected: {message}")]
    Publication { code: Option<i64>, message: String },
    #[error("strategy document is empty: {}", .0.display())]
    MissingStrategy(PathBuf),
    #[error("queue error: {0}")]
    Queue(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl Error {
    /// Short prefix printed before a fatal error.
    pub fn label(&self) -> &'static str {
        match self {
            Error::Credential { .. } => "credential",
            Error::Transport(_) => "transport",
            Error::Generation(_) => "generation",
            Error::ImageGeneration(_) => "image",
            Error::Asset { .. } => "asset",
            Error::Publication { .. } => "publication",
            Error::MissingStrategy(_) => "strategy",
            Error::Queue(_) => "queue",
            Error::Io(_) => "io",
            Error::Client(_) => "client",
            Error::InvalidUrl { .. } => "config",
        }
    }
}

/// Truncate `text` to at most `max` characters for log and error output.
pub(crate) fn snippet(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}
