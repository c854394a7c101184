use tracing::info;

use crate::error::{Error, Result};
use crate::http::timeouts;
use crate::llm::{ChatClient, Prompt};
use crate::prompts;

pub const WRITER_MAX_TOKENS: u32 = 8000;

/// Long-form article generation bound to one topic.
#[derive(Debug, Clone)]
pub struct Writer {
    chat: ChatClient,
    model: String,
    slots: usize,
}

impl Writer {
    /// `slots` is the number of inline image placeholders the model is asked
    /// to leave in the body.
    pub fn new(chat: ChatClient, model: impl Into<String>, slots: usize) -> Self {
        Self {
            chat,
            model: model.into(),
            slots,
        }
    }

    pub fn system_prompt(&self, topic: &str, persona: &str, strategy: &str) -> String {
        let mut system = format!(
            "{persona}\n\n【最高优先级 - 账号定位必须严格遵守】\n{strategy}\n\n【本次写作主题】：{topic}\n\n你必须100%围绕主题「{topic}」写作，禁止偏离。字数1500字以上。"
        );
        if self.slots > 0 {
            let tokens: Vec<String> = (0..self.slots).map(prompts::placeholder).collect();
            system.push_str(&format!(
                "\n\n请在正文合适的段落之间依次插入以下配图占位符，每个占位符单独成行且只出现一次：{}。不要在第一段之前放置占位符。",
                tokens.join("、")
            ));
        }
        system
    }

    /// Generate the article body. Any failure ends the run.
    pub async fn generate(&self, topic: &str, persona: &str, strategy: &str) -> Result<String> {
        let system = self.system_prompt(topic, persona, strategy);
        let user = format!("主题：{}\n\n请直接输出正文，不要有任何开场白。", topic);
        info!(topic, model = %self.model, "writing article");
        let prompt = Prompt {
            model: &self.model,
            system: &system,
            user: &user,
            max_tokens: WRITER_MAX_TOKENS,
            timeout: timeouts::GENERATION,
        };
        let body = self.chat.complete(&prompt).await.map_err(|e| match e {
            Error::Transport(t) => Error::Generation(t.to_string()),
            other => other,
        })?;
        info!(chars = body.chars().count(), "article written");
        Ok(body.trim().to_string())
    }
}
