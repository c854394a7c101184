//! Client for the official-account platform: asset uploads and draft creation.
use reqwest::Url;
use std::fmt;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config;
use crate::error::{Error, Result};
use crate::http::{self, timeouts, DualTransport, HttpRequest, MultipartFile};

pub mod model;
pub mod token;

use model::{ApiError, DraftArticle, DraftReply, DraftRequest, UploadReply};
use token::TokenCache;

/// errcodes that mean the access token itself was rejected.
const TOKEN_REJECTED: [i64; 2] = [40001, 42001];

/// Platform asset classes, each with its own upload endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    /// Permanent material of type `thumb`; returns a durable `media_id`.
    PermanentThumb,
    /// Temporary media of type `thumb`; returns a short-lived `media_id`.
    TemporaryThumb,
    /// Inline article image; returns a URL usable in article HTML.
    ContentImage,
}

impl AssetClass {
    fn path(&self) -> &'static str {
        match self {
            AssetClass::PermanentThumb => "cgi-bin/material/add_material",
            AssetClass::TemporaryThumb => "cgi-bin/media/upload",
            AssetClass::ContentImage => "cgi-bin/media/uploadimg",
        }
    }

    fn media_type(&self) -> Option<&'static str> {
        match self {
            AssetClass::PermanentThumb | AssetClass::TemporaryThumb => Some("thumb"),
            AssetClass::ContentImage => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::PermanentThumb => "permanent thumb",
            AssetClass::TemporaryThumb => "temporary thumb",
            AssetClass::ContentImage => "content image",
        }
    }
}

pub struct WeChatClient {
    http: DualTransport,
    api_base: Url,
    author: String,
    tokens: TokenCache,
}

impl fmt::Debug for WeChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeChatClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl WeChatClient {
    pub fn new(cfg: &config::WeChat, http: DualTransport) -> Result<Self> {
        let api_base = http::base_url(&cfg.api_base)?;
        let token_url = http::endpoint(&api_base, "cgi-bin/token")?;
        let tokens = TokenCache::new(
            http.clone(),
            token_url,
            cfg.app_id.clone(),
            cfg.app_secret.clone(),
        );
        Ok(Self {
            http,
            api_base,
            author: cfg.author.clone(),
            tokens,
        })
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    async fn authorized(&self, path: &str) -> Result<Url> {
        let token = self.tokens.get_token().await?;
        let mut url = http::endpoint(&self.api_base, path)?;
        url.query_pairs_mut().append_pair("access_token", &token);
        Ok(url)
    }

    async fn note_rejection(&self, err: &ApiError) {
        if TOKEN_REJECTED.contains(&err.errcode) {
            self.tokens.invalidate().await;
        }
    }

    async fn upload(&self, file_path: &Path, class: AssetClass) -> Result<UploadReply> {
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image.png")
            .to_string();
        let bytes = fs::read(file_path).await?;

        let mut url = self.authorized(class.path()).await?;
        if let Some(media_type) = class.media_type() {
            url.query_pairs_mut().append_pair("type", media_type);
        }
        let file = MultipartFile {
            field: "media".into(),
            content_type: content_type(file_path).into(),
            file_name,
            bytes,
        };
        let req = HttpRequest::post_multipart(url, file, timeouts::ASSET);
        let reply: UploadReply = self.http.send_json(&req).await?;
        debug!(class = class.as_str(), ?reply, "upload response");
        if let UploadReply::Rejected(err) = &reply {
            self.note_rejection(err).await;
        }
        Ok(reply)
    }

    /// Upload a cover image and return its `media_id`.
    pub async fn upload_thumb(&self, file_path: &Path, class: AssetClass) -> Result<String> {
        match self.upload(file_path, class).await? {
            UploadReply::Stored { media_id, .. } => {
                info!(class = class.as_str(), "cover uploaded");
                Ok(media_id)
            }
            UploadReply::Rejected(err) => Err(asset_error(class, &err)),
            UploadReply::Hosted { .. } | UploadReply::Other(_) => Err(Error::Asset {
                code: None,
                message: format!("{} upload returned no media_id", class.as_str()),
            }),
        }
    }

    /// Upload an inline article image and return its hosted URL.
    pub async fn upload_content_image(&self, file_path: &Path) -> Result<String> {
        let class = AssetClass::ContentImage;
        match self.upload(file_path, class).await? {
            UploadReply::Hosted { url } | UploadReply::Stored { url: Some(url), .. } => Ok(url),
            UploadReply::Rejected(err) => Err(asset_error(class, &err)),
            UploadReply::Stored { url: None, .. } | UploadReply::Other(_) => Err(Error::Asset {
                code: None,
                message: "content image upload returned no url".into(),
            }),
        }
    }

    /// Create a single-article draft and return the draft `media_id`.
    pub async fn create_draft(
        &self,
        title: &str,
        html: &str,
        digest: &str,
        cover: Option<&str>,
    ) -> Result<String> {
        let articles = [DraftArticle::new(title, &self.author, html, digest, cover)];
        let body = serde_json::to_value(DraftRequest {
            articles: &articles,
        })
        .map_err(|e| Error::Publication {
            code: None,
            message: format!("failed to encode draft: {}", e),
        })?;
        if articles[0].thumb_media_id.is_none() {
            warn!("publishing draft without cover");
        }

        let url = self.authorized("cgi-bin/draft/add").await?;
        let req = HttpRequest::post_json(url, body, timeouts::PUBLISH);
        let reply: DraftReply = self.http.send_json(&req).await?;
        debug!(?reply, "draft response");
        match reply {
            DraftReply::Created { media_id } => {
                info!(%media_id, "draft created");
                Ok(media_id)
            }
            DraftReply::Rejected(err) => {
                self.note_rejection(&err).await;
                Err(publication_error(&err))
            }
            DraftReply::Other(raw) => Err(Error::Publication {
                code: None,
                message: format!("unexpected draft response: {}", raw),
            }),
        }
    }
}

fn asset_error(class: AssetClass, err: &ApiError) -> Error {
    Error::Asset {
        code: Some(err.errcode),
        message: format!(
            "{} upload failed: {} (errcode {})",
            class.as_str(),
            err.errmsg,
            err.errcode
        ),
    }
}

/// Translate draft errcodes into actionable messages.
pub fn publication_error(err: &ApiError) -> Error {
    let message = match err.errcode {
        -1 => format!("platform busy, retry later (errcode {})", err.errcode),
        615 => format!("malformed date in draft payload (errcode {})", err.errcode),
        40007 => format!(
            "cover thumb_media_id invalid or expired (errcode {})",
            err.errcode
        ),
        code => format!("{} (errcode {})", err.errmsg, code),
    };
    Error::Publication {
        code: Some(err.errcode),
        message,
    }
}

fn content_type(file_path: &Path) -> &'static str {
    match file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        _ => "image/jpeg",
    }
}
