//! Digest extraction: a short push summary derived from the article body only.
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::error::Result;
use crate::http::timeouts;
use crate::llm::{ChatClient, Prompt};
use crate::wechat::model::DIGEST_LIMIT;

/// Bodies shorter than this (in characters) are not worth a model call.
pub const MIN_BODY_CHARS: usize = 100;
pub const DIGEST_MAX_TOKENS: u32 = 500;

/// Heading separating the topic/strategy scaffolding from the article text.
pub const BODY_HEADING: &str = "# 正文:";

const DEFAULT_PERSONA: &str = "你是一名资深的微信公众号编辑，擅长用简洁有力的语言提炼文章核心观点。";

static BODY_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)#\s*正文[:：]").unwrap());
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[IMAGE_PLACEHOLDER_\d+\]").unwrap());
static MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#*`>]|\[IMAGE_PLACEHOLDER_\d+\]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Templated digest used whenever the model path is skipped or fails.
pub fn fallback_digest(topic: &str) -> String {
    truncate(&format!("深度解析：{}", topic))
}

/// Text after the last body marker, or the whole text if there is none.
pub fn isolate_body(text: &str) -> &str {
    match BODY_MARKER.find_iter(text).last() {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

/// Strip markdown markers and placeholder tokens, collapse whitespace and
/// enforce the length limit.
pub fn clean_digest(raw: &str) -> String {
    let stripped = MARKUP.replace_all(raw, "");
    let collapsed = WHITESPACE.replace_all(&stripped, " ");
    truncate(collapsed.trim())
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= DIGEST_LIMIT {
        return text.to_string();
    }
    let mut out: String = text.chars().take(DIGEST_LIMIT - 3).collect();
    out.push_str("...");
    out
}

#[derive(Debug, Clone)]
pub struct Summarizer {
    chat: ChatClient,
    model: String,
    persona: String,
}

impl Summarizer {
    /// An empty `persona` uses a built-in editor persona.
    pub fn new(chat: ChatClient, model: impl Into<String>, persona: impl Into<String>) -> Self {
        let persona = persona.into();
        Self {
            chat,
            model: model.into(),
            persona: if persona.trim().is_empty() {
                DEFAULT_PERSONA.to_string()
            } else {
                persona
            },
        }
    }

    /// Never fails: short bodies and model errors both yield the fallback.
    pub async fn summarize(&self, topic: &str, body: &str) -> String {
        let pure = PLACEHOLDER.replace_all(isolate_body(body), "");
        let pure = pure.trim();
        if pure.chars().count() < MIN_BODY_CHARS {
            info!("body too short for summarization; using fallback digest");
            return fallback_digest(topic);
        }
        match self.ask(topic, pure).await {
            Ok(digest) if !digest.is_empty() => {
                info!(chars = digest.chars().count(), "digest generated");
                digest
            }
            Ok(_) => {
                warn!("model returned an empty digest; using fallback");
                fallback_digest(topic)
            }
            Err(e) => {
                warn!(error = %e, "digest generation degraded; using fallback");
                fallback_digest(topic)
            }
        }
    }

    async fn ask(&self, topic: &str, pure: &str) -> Result<String> {
        let user = format!(
            "请根据以下文章正文，生成 50-100 字的微信推送摘要。\n\n【文章标题】：{}\n【文章内容】：\n{}",
            topic, pure
        );
        let prompt = Prompt {
            model: &self.model,
            system: &self.persona,
            user: &user,
            max_tokens: DIGEST_MAX_TOKENS,
            timeout: timeouts::GENERATION,
        };
        let raw = self.chat.complete(&prompt).await?;
        Ok(clean_digest(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{DualTransport, Reply, ScriptedTransport};
    use serde_json::json;
    use std::sync::Arc;

    const PATH: &str = "/v1/chat/completions";

    async fn summarizer(reply: Reply) -> (Arc<ScriptedTransport>, Summarizer) {
        let primary = Arc::new(ScriptedTransport::new("primary"));
        primary.on(PATH, reply.clone()).await;
        let secondary = Arc::new(ScriptedTransport::new("secondary"));
        secondary.on(PATH, reply).await;
        let chat =
            ChatClient::new(DualTransport::new(primary.clone(), secondary), "http://llm.test/v1", "k")
                .unwrap();
        (primary, Summarizer::new(chat, "layout-model", ""))
    }

    fn chat_reply(text: &str) -> Reply {
        Reply::json(json!({"choices": [{"message": {"content": text}}]}))
    }

    fn long_body() -> String {
        "远程办公正在重塑团队协作的方式。".repeat(12)
    }

    #[tokio::test]
    async fn short_body_skips_model() {
        let (primary, s) = summarizer(chat_reply("unused")).await;
        assert_eq!(s.summarize("远程办公效率", "太短了").await, "深度解析：远程办公效率");
        assert_eq!(s.summarize("远程办公效率", "").await, "深度解析：远程办公效率");
        assert_eq!(primary.calls(PATH).await, 0);
    }

    #[tokio::test]
    async fn only_text_after_marker_is_sent() {
        let (primary, s) = summarizer(chat_reply("**远程办公**的关键在于 `节奏` 与信任。")).await;
        let scaffolded = format!(
            "# 主题: 远程办公效率\n# 账号定位: SECRET_STRATEGY\n{}\n{}[IMAGE_PLACEHOLDER_0]",
            BODY_HEADING,
            long_body()
        );
        let digest = s.summarize("远程办公效率", &scaffolded).await;
        assert_eq!(digest, "远程办公的关键在于 节奏 与信任。");

        let sent = primary.requests_to(PATH).await[0].json().cloned().unwrap();
        assert_eq!(sent["max_tokens"], DIGEST_MAX_TOKENS);
        let user = sent["messages"][1]["content"].as_str().unwrap();
        assert!(!user.contains("SECRET_STRATEGY"));
        assert!(!user.contains("IMAGE_PLACEHOLDER"));
        assert!(user.contains("【文章标题】：远程办公效率"));
        assert!(!sent["messages"][0]["content"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn long_model_output_is_truncated() {
        let (_, s) = summarizer(chat_reply(&"效".repeat(300))).await;
        let digest = s.summarize("t", &long_body()).await;
        assert_eq!(digest.chars().count(), DIGEST_LIMIT);
        assert!(digest.ends_with("..."));
    }

    #[tokio::test]
    async fn model_failure_falls_back() {
        let (_, s) = summarizer(Reply::fail("connection reset")).await;
        assert_eq!(s.summarize("远程办公效率", &long_body()).await, "深度解析：远程办公效率");
    }

    #[test]
    fn fallback_respects_limit() {
        let topic = "长".repeat(200);
        assert!(fallback_digest(&topic).chars().count() <= DIGEST_LIMIT);
    }

    #[test]
    fn marker_is_case_and_space_tolerant() {
        assert_eq!(isolate_body("intro #  正文: body"), " body");
        assert_eq!(isolate_body("no marker"), "no marker");
    }
}
