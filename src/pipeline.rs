//! One publishing run: pick the next planned topic and drive it through
//! write, summarize, illustrate, lay out and publish.
//!
//! The queue row moves to `writing` before any model call and to `published`
//! only after the draft exists. A run that fails in between leaves the row in
//! `writing` for the operator (see `topics requeue-stale`).
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{self, Pool, Topic};
use crate::error::{Error, Result};
use crate::http::DualTransport;
use crate::llm::ChatClient;
use crate::prompts::{self, PromptLibrary, STRATEGY_FILE};
use crate::stages::digest::BODY_HEADING;
use crate::stages::illustration::substitute_placeholders;
use crate::stages::{Illustrations, Illustrator, ImageGenerator, Layouter, Summarizer, Writer};
use crate::wechat::WeChatClient;

pub const DEBUG_ARTICLE: &str = "debug_article.md";
pub const DEBUG_DIGEST: &str = "debug_digest.txt";
pub const DEBUG_HTML: &str = "debug_article.html";

/// Everything produced for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub topic: String,
    pub body: String,
    pub digest: String,
    pub illustrations: Illustrations,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic_id: i64,
    pub media_id: String,
    pub article: Article,
}

pub struct Pipeline {
    pool: Pool,
    prompts: PromptLibrary,
    style: String,
    debug_dir: PathBuf,
    writer: Writer,
    summarizer: Summarizer,
    illustrator: Illustrator,
    layouter: Layouter,
    wechat: WeChatClient,
}

impl Pipeline {
    pub fn new(cfg: &Config, pool: Pool, http: DualTransport) -> Result<Self> {
        let prompts = PromptLibrary::new(&cfg.app.prompts_dir);
        let writer_chat = ChatClient::new(http.clone(), cfg.llm.writer_base(), cfg.llm.writer_key())?;
        let chat = ChatClient::new(http.clone(), &cfg.llm.api_base, &cfg.llm.api_key)?;
        let generator = ImageGenerator::new(http.clone(), &cfg.image, &cfg.llm.api_key)?;

        Ok(Self {
            writer: Writer::new(
                writer_chat,
                &cfg.llm.writer_model,
                prompts::ILLUSTRATION_PROMPTS.len(),
            ),
            summarizer: Summarizer::new(chat.clone(), &cfg.llm.layout_model, prompts.summary_persona()),
            illustrator: Illustrator::new(generator, http.clone(), cfg.app.images_dir()),
            layouter: Layouter::new(chat, &cfg.llm.layout_model),
            wechat: WeChatClient::new(&cfg.wechat, http)?,
            style: cfg.app.style.clone(),
            debug_dir: cfg.app.debug_dir(),
            prompts,
            pool,
        })
    }

    /// Process the next planned topic. Returns `None` when the queue is empty.
    pub async fn run_next(&self) -> Result<Option<Published>> {
        let strategy = self.prompts.strategy();
        if strategy.is_empty() {
            return Err(Error::MissingStrategy(self.prompts.path(STRATEGY_FILE)));
        }

        let Some(topic) = db::next_pending(&self.pool).await? else {
            info!("no planned topics in queue");
            return Ok(None);
        };
        if !db::mark_writing(&self.pool, topic.id).await? {
            warn!(id = topic.id, "topic left planned state before it could be claimed");
            return Ok(None);
        }
        info!(id = topic.id, topic = %topic.topic, "topic claimed");

        self.run(&topic, &strategy).await.map(Some)
    }

    async fn run(&self, topic: &Topic, strategy: &str) -> Result<Published> {
        let title = topic.topic.as_str();
        let persona = self.prompts.writer_persona();
        let body = self.writer.generate(title, &persona, strategy).await?;

        let scaffolded = format!(
            "# 主题: {}\n# 账号定位: {}\n{}\n{}\n",
            title, strategy, BODY_HEADING, body
        );
        self.write_debug(DEBUG_ARTICLE, &scaffolded).await;

        let digest = self.summarizer.summarize(title, &scaffolded).await;
        self.write_debug(DEBUG_DIGEST, &digest).await;

        let illustrations = self
            .illustrator
            .generate_and_upload(
                &self.wechat,
                &prompts::cover_prompt(title),
                &prompts::ILLUSTRATION_PROMPTS,
            )
            .await;
        let markdown = substitute_placeholders(&body, &illustrations.inline);

        let template = self.prompts.style_template(&self.style);
        let html = self.layouter.layout(title, &markdown, &template).await;
        self.write_debug(DEBUG_HTML, &html).await;

        let media_id = self
            .wechat
            .create_draft(title, &html, &digest, illustrations.cover.as_deref())
            .await?;
        if !db::mark_published(&self.pool, topic.id, &media_id).await? {
            warn!(id = topic.id, "topic was no longer writing when the draft was created");
        }
        info!(id = topic.id, %media_id, "topic published");

        Ok(Published {
            topic_id: topic.id,
            media_id,
            article: Article {
                topic: topic.topic.clone(),
                body,
                digest,
                illustrations,
                html,
            },
        })
    }

    async fn write_debug(&self, name: &str, contents: &str) {
        if let Err(e) = write_file(&self.debug_dir, name, contents).await {
            warn!(file = name, error = %e, "failed to write debug copy");
        }
    }
}

async fn write_file(dir: &Path, name: &str, contents: &str) -> std::io::Result<()> {
    fs::create_dir_all(dir).await?;
    fs::write(dir.join(name), contents).await
}
