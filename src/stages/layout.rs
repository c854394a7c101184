//! Markdown to platform HTML via the layout model, followed by deterministic
//! cleanup that runs on every path, including the fallback.
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::http::timeouts;
use crate::llm::{ChatClient, Prompt};

pub const LAYOUT_MAX_TOKENS: u32 = 8000;

const DEFAULT_TEMPLATE: &str = "你是一名专业的微信公众号排版编辑，负责把 Markdown 文章转换为美观、易读的 HTML。";

const FORMAT_RULES: &str = "排版要求：\n\
1. 引用块使用 <blockquote>，左侧 4px #007AFF 边框，背景 #f8f9fa，圆角 8px，内边距适中。\n\
2. 段落 line-height: 1.85，letter-spacing: 1px，段落之间留出舒适间距。\n\
3. 图片按 3:2 比例展示，宽度 80% 居中，圆角 8px，带柔和阴影。\n\
4. 第一段文字之前不要放置任何图片。\n\
5. 不要输出 <h1>/<h2> 标题，标题由发布环节单独提供。\n\
6. 只输出一个 ```html 代码块，不要任何解释。";

static HTML_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```html\s*(.*?)(?:```|\z)").unwrap());
static HEADINGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h1[^>]*>.*?</h1>|<h2[^>]*>.*?</h2>").unwrap());
static SPACE_AFTER_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r">\s+").unwrap());
static SPACE_BEFORE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+<").unwrap());
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());
static EMPTY_QUOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<blockquote[^>]*>\s*</blockquote>").unwrap());

/// Interior of the first ```html fence (to the end of the response when the
/// fence is never closed), or the whole response.
pub fn extract_html(response: &str) -> &str {
    match HTML_FENCE.captures(response).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => response,
    }
}

/// Deterministic cleanup in fixed order: strip headings, collapse whitespace
/// around tags, collapse blank lines, trim, drop empty quote blocks.
pub fn postprocess(html: &str) -> String {
    let out = HEADINGS.replace_all(html, "");
    let out = SPACE_AFTER_TAG.replace_all(&out, ">");
    let out = SPACE_BEFORE_TAG.replace_all(&out, "<");
    let out = BLANK_LINES.replace_all(&out, "\n");
    let out = out.trim();
    EMPTY_QUOTE.replace_all(out, "").into_owned()
}

/// Minimal wrapper used when the model is unavailable.
pub fn fallback_html(title: &str, body: &str) -> String {
    format!("<h1>{}</h1>\n{}", title, body)
}

#[derive(Debug, Clone)]
pub struct Layouter {
    chat: ChatClient,
    model: String,
}

impl Layouter {
    pub fn new(chat: ChatClient, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }

    /// Never fails; a model error yields the cleaned fallback wrapper.
    pub async fn layout(&self, title: &str, markdown: &str, style_template: &str) -> String {
        let system = if style_template.trim().is_empty() {
            DEFAULT_TEMPLATE
        } else {
            style_template
        };
        let user = format!(
            "请将下面的 Markdown 文章转换为微信公众号 HTML。\n\n{}\n\n【文章标题】：{}\n【文章内容】：\n{}",
            FORMAT_RULES, title, markdown
        );
        let prompt = Prompt {
            model: &self.model,
            system,
            user: &user,
            max_tokens: LAYOUT_MAX_TOKENS,
            timeout: timeouts::GENERATION,
        };
        let raw = match self.chat.complete(&prompt).await {
            Ok(response) => extract_html(&response).to_string(),
            Err(e) => {
                warn!(error = %e, "layout model failed; using plain wrapper");
                fallback_html(title, markdown)
            }
        };
        let html = postprocess(&raw);
        info!(chars = html.chars().count(), "layout complete");
        html
    }
}
