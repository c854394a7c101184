//! Image generation, local storage and platform upload for the cover and
//! inline illustrations.
//!
//! Failures are isolated per image: a cover that cannot be produced or
//! uploaded leaves the article without a cover, an inline image that cannot be
//! produced leaves its slot empty, and neither stops the images after it.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config;
use crate::error::{snippet, Error, Result};
use crate::fallback::FallbackChain;
use crate::http::{timeouts, DualTransport, HttpRequest};
use crate::prompts;
use crate::wechat::{AssetClass, WeChatClient};

static ANY_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[IMAGE_PLACEHOLDER_\d+\]\n?").unwrap());

/// Where a generated image can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedImage {
    Url(String),
    Base64(String),
}

impl GeneratedImage {
    /// Directly usable reference, if the endpoint hosted the image itself.
    pub fn raw_url(&self) -> Option<&str> {
        match self {
            GeneratedImage::Url(url) => Some(url),
            GeneratedImage::Base64(_) => None,
        }
    }
}

/// Response shapes accepted from image endpoints.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ImageReply {
    Listed { data: Vec<ImageDatum> },
    Direct { url: String },
    Embedded { image_url: String },
    Failed { error: Value },
}

#[derive(Deserialize, Debug)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

impl ImageDatum {
    /// A blank `url` counts as absent so an accompanying payload is used.
    fn into_image(self) -> Option<GeneratedImage> {
        let present = |v: &String| !v.trim().is_empty();
        match (self.url.filter(present), self.b64_json.filter(present)) {
            (Some(url), _) => Some(GeneratedImage::Url(url)),
            (None, Some(data)) => Some(GeneratedImage::Base64(data)),
            (None, None) => None,
        }
    }
}

fn parse_reply(raw: &Value) -> Result<GeneratedImage> {
    let reply: ImageReply = serde_json::from_value(raw.clone()).map_err(|_| {
        Error::ImageGeneration(format!(
            "unrecognized response: {}",
            snippet(&raw.to_string(), 300)
        ))
    })?;
    let image = match reply {
        ImageReply::Listed { data } => match data.into_iter().next() {
            Some(datum) => datum.into_image().ok_or_else(|| {
                Error::ImageGeneration("response carried an empty image reference".into())
            })?,
            None => return Err(Error::ImageGeneration("response carried no images".into())),
        },
        ImageReply::Direct { url } | ImageReply::Embedded { image_url: url } => {
            GeneratedImage::Url(url)
        }
        ImageReply::Failed { error } => {
            return Err(Error::ImageGeneration(format!("endpoint error: {}", error)))
        }
    };
    match &image {
        GeneratedImage::Url(url) | GeneratedImage::Base64(url) if url.trim().is_empty() => Err(
            Error::ImageGeneration("response carried an empty image reference".into()),
        ),
        _ => Ok(image),
    }
}

#[derive(Clone)]
pub struct ImageGenerator {
    http: DualTransport,
    endpoint: Url,
    api_key: String,
    model: String,
    size: String,
}

impl fmt::Debug for ImageGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ImageGenerator {
    pub fn new(http: DualTransport, cfg: &config::Image, api_key: &str) -> Result<Self> {
        let endpoint = Url::parse(cfg.api_url.trim()).map_err(|e| Error::InvalidUrl {
            url: cfg.api_url.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            http,
            endpoint,
            api_key: api_key.to_string(),
            model: cfg.model.clone(),
            size: cfg.size.clone(),
        })
    }

    pub async fn generate(&self, prompt: &str) -> Result<GeneratedImage> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": self.size,
        });
        let req = HttpRequest::post_json(self.endpoint.clone(), body, timeouts::IMAGE)
            .bearer(&self.api_key);
        let raw: Value = self
            .http
            .send_json(&req)
            .await
            .map_err(|e| Error::ImageGeneration(e.to_string()))?;
        debug!(response = %snippet(&raw.to_string(), 300), "image endpoint replied");
        parse_reply(&raw)
    }
}

/// Platform references produced by the illustration stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Illustrations {
    /// Cover `media_id`, if any upload variant accepted it.
    pub cover: Option<String>,
    /// One entry per inline prompt, in prompt order.
    pub inline: Vec<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct Illustrator {
    generator: ImageGenerator,
    http: DualTransport,
    images_dir: PathBuf,
}

impl Illustrator {
    pub fn new(generator: ImageGenerator, http: DualTransport, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            generator,
            http,
            images_dir: images_dir.into(),
        }
    }

    /// Generate the cover and then each inline image strictly in order.
    pub async fn generate_and_upload(
        &self,
        wechat: &WeChatClient,
        cover_prompt: &str,
        inline_prompts: &[&str],
    ) -> Illustrations {
        let cover = self.cover(wechat, cover_prompt).await;
        let mut inline = Vec::with_capacity(inline_prompts.len());
        for (index, prompt) in inline_prompts.iter().enumerate() {
            inline.push(self.inline(wechat, index, prompt).await);
        }
        let hosted = inline.iter().filter(|r| r.is_some()).count();
        info!(
            cover = cover.is_some(),
            hosted,
            requested = inline_prompts.len(),
            "illustrations ready"
        );
        Illustrations { cover, inline }
    }

    async fn cover(&self, wechat: &WeChatClient, prompt: &str) -> Option<String> {
        let (path, _) = match self.fetch(prompt, "cover.png").await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(error = %e, "cover generation failed; publishing without cover");
                return None;
            }
        };
        let chain = FallbackChain::new(
            AssetClass::PermanentThumb.as_str(),
            wechat.upload_thumb(&path, AssetClass::PermanentThumb).boxed(),
        )
        .or_else(
            AssetClass::TemporaryThumb.as_str(),
            wechat.upload_thumb(&path, AssetClass::TemporaryThumb).boxed(),
        );
        match chain.run().await {
            Ok(media_id) => Some(media_id),
            Err(exhausted) => {
                warn!(error = %exhausted.error, "cover upload failed; publishing without cover");
                None
            }
        }
    }

    async fn inline(&self, wechat: &WeChatClient, index: usize, prompt: &str) -> Option<String> {
        let file_name = format!("illustration_{}.png", index);
        let (path, image) = match self.fetch(prompt, &file_name).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(index, error = %e, "illustration generation failed; leaving slot empty");
                return None;
            }
        };
        let raw_url = image.raw_url().map(str::to_string);
        let chain = FallbackChain::new(
            AssetClass::ContentImage.as_str(),
            wechat.upload_content_image(&path).boxed(),
        )
        .or_else(
            "raw generation url",
            async move {
                raw_url.ok_or_else(|| Error::Asset {
                    code: None,
                    message: "embedded image has no hosted url".into(),
                })
            }
            .boxed(),
        );
        match chain.run().await {
            Ok(reference) => Some(reference),
            Err(exhausted) => {
                warn!(index, error = %exhausted.error, "illustration unavailable; leaving slot empty");
                None
            }
        }
    }

    async fn fetch(&self, prompt: &str, file_name: &str) -> Result<(PathBuf, GeneratedImage)> {
        let image = self.generator.generate(prompt).await?;
        let bytes = match &image {
            GeneratedImage::Url(url) => self.download(url).await?,
            GeneratedImage::Base64(data) => decode_base64(data)?,
        };
        fs::create_dir_all(&self.images_dir).await?;
        let path = self.images_dir.join(file_name);
        fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "image saved");
        Ok((path, image))
    }

    async fn download(&self, raw: &str) -> Result<Vec<u8>> {
        let url = Url::parse(raw).map_err(|e| Error::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        let req = HttpRequest::get(url, timeouts::ASSET);
        Ok(self.http.send_bytes(&req).await?)
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let payload = match data.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => data,
    };
    BASE64
        .decode(payload.trim())
        .map_err(|e| Error::ImageGeneration(format!("invalid base64 image: {}", e)))
}

/// Replace each slot token with a markdown image, or drop it when the slot has
/// no reference. Tokens beyond `refs` are dropped as well.
pub fn substitute_placeholders(body: &str, refs: &[Option<String>]) -> String {
    let mut out = body.to_string();
    for (index, reference) in refs.iter().enumerate() {
        let token = prompts::placeholder(index);
        let replacement = match reference {
            Some(url) => format!("![]({})", url),
            None => String::new(),
        };
        out = out.replace(&token, &replacement);
    }
    ANY_PLACEHOLDER.replace_all(&out, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Reply, ScriptedTransport};
    use std::sync::Arc;
    use tempfile::TempDir;

    const GEN: &str = "/v1/images/generations";
    const TOKEN: &str = "/cgi-bin/token";
    const PERMANENT: &str = "/cgi-bin/material/add_material";
    const TEMPORARY: &str = "/cgi-bin/media/upload";
    const CONTENT: &str = "/cgi-bin/media/uploadimg";

    struct Rig {
        primary: Arc<ScriptedTransport>,
        wechat: WeChatClient,
        illustrator: Illustrator,
        dir: TempDir,
    }

    async fn rig() -> Rig {
        let primary = Arc::new(ScriptedTransport::new("primary"));
        primary
            .on(TOKEN, Reply::json(json!({"access_token": "tok", "expires_in": 7200})))
            .await;
        for name in ["cover", "i0", "i1", "i2"] {
            primary
                .on(&format!("/{}.png", name), Reply::raw(200, vec![0x89, b'P', b'N', b'G']))
                .await;
        }
        let http = DualTransport::new(primary.clone(), Arc::new(ScriptedTransport::new("secondary")));
        let wechat = WeChatClient::new(
            &config::WeChat {
                app_id: "wxapp".into(),
                app_secret: "secret".into(),
                api_base: "http://wx.test".into(),
                author: "AI Writer".into(),
            },
            http.clone(),
        )
        .unwrap();
        let generator = ImageGenerator::new(
            http.clone(),
            &config::Image {
                api_url: "http://img.test/v1/images/generations".into(),
                model: "image-model".into(),
                size: "1024x1024".into(),
            },
            "sk-img",
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let illustrator = Illustrator::new(generator, http, dir.path().join("images"));
        Rig {
            primary,
            wechat,
            illustrator,
            dir,
        }
    }

    fn hosted(name: &str) -> Reply {
        Reply::json(json!({"data": [{"url": format!("http://cdn.test/{}.png", name)}]}))
    }

    fn rejected(code: i64) -> Reply {
        Reply::json(json!({"errcode": code, "errmsg": "rejected"}))
    }

    const PROMPTS: [&str; 3] = ["one", "two", "three"];

    #[tokio::test]
    async fn cover_falls_back_to_temporary_thumb() {
        let r = rig().await;
        r.primary
            .on_sequence(GEN, vec![hosted("cover"), hosted("i0"), hosted("i1"), hosted("i2")])
            .await;
        r.primary.on(PERMANENT, rejected(45009)).await;
        r.primary.on(TEMPORARY, Reply::json(json!({"type": "thumb", "media_id": "tmp-1"}))).await;
        r.primary
            .on(CONTENT, Reply::json(json!({"url": "http://mmbiz.test/hosted.png"})))
            .await;

        let out = r.illustrator.generate_and_upload(&r.wechat, "cover", &PROMPTS).await;
        assert_eq!(out.cover.as_deref(), Some("tmp-1"));
        assert_eq!(out.inline.len(), 3);
        assert!(out.inline.iter().all(|u| u.as_deref() == Some("http://mmbiz.test/hosted.png")));
        assert!(r.dir.path().join("images/cover.png").exists());
        assert!(r.dir.path().join("images/illustration_2.png").exists());

        let upload = &r.primary.requests_to(TEMPORARY).await[0];
        assert!(upload.url.contains("type=thumb"));
        assert!(matches!(
            &upload.body,
            crate::http::RecordedBody::Multipart { field, file_name, .. }
                if field == "media" && file_name == "cover.png"
        ));
    }

    #[tokio::test]
    async fn failed_cover_does_not_block_inline_images() {
        let r = rig().await;
        r.primary
            .on_sequence(GEN, vec![hosted("cover"), hosted("i0"), hosted("i1"), hosted("i2")])
            .await;
        r.primary.on(PERMANENT, rejected(45009)).await;
        r.primary.on(TEMPORARY, rejected(45009)).await;
        r.primary
            .on_sequence(
                CONTENT,
                vec![
                    Reply::json(json!({"url": "http://mmbiz.test/a.png"})),
                    rejected(40009),
                    Reply::json(json!({"url": "http://mmbiz.test/c.png"})),
                ],
            )
            .await;

        let out = r.illustrator.generate_and_upload(&r.wechat, "cover", &PROMPTS).await;
        assert_eq!(out.cover, None);
        assert_eq!(
            out.inline,
            vec![
                Some("http://mmbiz.test/a.png".to_string()),
                Some("http://cdn.test/i1.png".to_string()),
                Some("http://mmbiz.test/c.png".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn generation_failure_isolated_to_its_slot() {
        let r = rig().await;
        r.primary
            .on_sequence(
                GEN,
                vec![
                    hosted("cover"),
                    Reply::json(json!({"error": {"message": "content policy"}})),
                    Reply::json(json!({"unexpected": true})),
                    Reply::json(json!({"image_url": "http://cdn.test/i2.png"})),
                ],
            )
            .await;
        r.primary.on(PERMANENT, Reply::json(json!({"media_id": "perm-1"}))).await;
        r.primary
            .on(CONTENT, Reply::json(json!({"url": "http://mmbiz.test/c.png"})))
            .await;

        let out = r.illustrator.generate_and_upload(&r.wechat, "cover", &PROMPTS).await;
        assert_eq!(out.cover.as_deref(), Some("perm-1"));
        assert_eq!(out.inline, vec![None, None, Some("http://mmbiz.test/c.png".to_string())]);
        assert_eq!(r.primary.calls(TEMPORARY).await, 0);
    }

    #[tokio::test]
    async fn base64_image_has_no_raw_url_fallback() {
        let r = rig().await;
        let encoded = BASE64.encode([1u8, 2, 3, 4]);
        r.primary
            .on(GEN, Reply::json(json!({"data": [{"b64_json": encoded}]})))
            .await;
        r.primary.on(PERMANENT, Reply::json(json!({"media_id": "perm-1"}))).await;
        r.primary.on(CONTENT, rejected(40009)).await;

        let out = r.illustrator.generate_and_upload(&r.wechat, "cover", &["only"]).await;
        assert_eq!(out.cover.as_deref(), Some("perm-1"));
        assert_eq!(out.inline, vec![None]);
        let saved = std::fs::read(r.dir.path().join("images/illustration_0.png")).unwrap();
        assert_eq!(saved, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn generation_request_shape() {
        let r = rig().await;
        r.primary.on(GEN, Reply::json(json!({"url": "http://cdn.test/cover.png"}))).await;
        let image = r.illustrator.generator.generate("a prompt").await.unwrap();
        assert_eq!(image, GeneratedImage::Url("http://cdn.test/cover.png".into()));
        let body = r.primary.requests_to(GEN).await[0].json().cloned().unwrap();
        assert_eq!(body, json!({"model": "image-model", "prompt": "a prompt", "n": 1, "size": "1024x1024"}));
    }

    #[test]
    fn parses_each_reply_shape() {
        assert_eq!(
            parse_reply(&json!({"data": [{"url": "u1"}]})).unwrap(),
            GeneratedImage::Url("u1".into())
        );
        assert_eq!(
            parse_reply(&json!({"data": [{"url": null, "b64_json": "QUJD"}]})).unwrap(),
            GeneratedImage::Base64("QUJD".into())
        );
        assert_eq!(
            parse_reply(&json!({"data": [{"url": "", "b64_json": "QUJD"}]})).unwrap(),
            GeneratedImage::Base64("QUJD".into())
        );
        assert!(matches!(
            parse_reply(&json!({"data": [{"url": "", "b64_json": null}]})),
            Err(Error::ImageGeneration(_))
        ));
        assert!(matches!(
            parse_reply(&json!({"data": []})),
            Err(Error::ImageGeneration(_))
        ));
        assert!(matches!(
            parse_reply(&json!({"url": ""})),
            Err(Error::ImageGeneration(_))
        ));
        assert!(matches!(
            parse_reply(&json!({"status": "queued"})),
            Err(Error::ImageGeneration(_))
        ));
    }

    #[test]
    fn substitutes_and_drops_placeholders() {
        let body = "一\n[IMAGE_PLACEHOLDER_0]\n二\n[IMAGE_PLACEHOLDER_1]\n三\n[IMAGE_PLACEHOLDER_2]\n四[IMAGE_PLACEHOLDER_7]";
        let refs = vec![Some("http://a/1.png".to_string()), None, Some("http://a/3.png".to_string())];
        let out = substitute_placeholders(body, &refs);
        assert_eq!(out, "一\n![](http://a/1.png)\n二\n\n三\n![](http://a/3.png)\n四");
    }

    #[test]
    fn data_uri_prefix_is_ignored() {
        assert_eq!(decode_base64("data:image/png;base64,AQID").unwrap(), vec![1, 2, 3]);
        assert!(decode_base64("%%%").is_err());
    }
}
