use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum digest length accepted by the draft endpoint, in characters.
pub const DIGEST_LIMIT: usize = 120;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum TokenReply {
    Issued { access_token: String, expires_in: u64 },
    Other(Value),
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum UploadReply {
    /// Material and media uploads return a durable id (and sometimes a URL).
    Stored {
        media_id: String,
        #[serde(default)]
        url: Option<String>,
    },
    /// Inline content-image uploads return a directly usable URL.
    Hosted { url: String },
    Rejected(ApiError),
    Other(Value),
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum DraftReply {
    Created { media_id: String },
    Rejected(ApiError),
    Other(Value),
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DraftArticle {
    pub title: String,
    pub author: String,
    pub content: String,
    pub digest: String,
    pub content_source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_media_id: Option<String>,
}

impl DraftArticle {
    /// Build the single-article payload. An empty or whitespace-only cover is
    /// dropped so that the field is absent from the serialized JSON.
    pub fn new(
        title: &str,
        author: &str,
        content: &str,
        digest: &str,
        thumb_media_id: Option<&str>,
    ) -> Self {
        Self {
            title: title.to_string(),
            author: author.to_string(),
            content: content.to_string(),
            digest: digest.chars().take(DIGEST_LIMIT).collect(),
            content_source_url: String::new(),
            thumb_media_id: thumb_media_id
                .filter(|id| !id.trim().is_empty())
                .map(str::to_string),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct DraftRequest<'a> {
    pub articles: &'a [DraftArticle],
}
