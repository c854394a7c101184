use chrono::NaiveDate;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tempfile::TempDir;
use wechat_writer::config::{self, Config};
use wechat_writer::db::{self, NewTopic, TopicStatus};
use wechat_writer::http::{DualTransport, Reply, ScriptedTransport};
use wechat_writer::pipeline::{Pipeline, DEBUG_ARTICLE, DEBUG_DIGEST, DEBUG_HTML};
use wechat_writer::Error;

const CHAT: &str = "/v1/chat/completions";
const IMAGES: &str = "/v1/images/generations";
const TOKEN: &str = "/cgi-bin/token";
const PERMANENT: &str = "/cgi-bin/material/add_material";
const CONTENT: &str = "/cgi-bin/media/uploadimg";
const DRAFT: &str = "/cgi-bin/draft/add";

const STRATEGY: &str = "账号定位：面向职场管理者，聚焦团队效率与组织协作。";

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn test_config(dir: &TempDir) -> Config {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.app.data_dir = dir.path().join("data").display().to_string();
    cfg.app.prompts_dir = dir.path().join("prompts").display().to_string();
    cfg.wechat.api_base = "http://wx.test".into();
    cfg.llm.api_base = "http://llm.test/v1".into();
    cfg.llm.writer_api_base = None;
    cfg.llm.writer_api_key = None;
    cfg.image.api_url = "http://img.test/v1/images/generations".into();
    cfg
}

fn write_prompts(dir: &TempDir, strategy: &str) {
    let prompts = dir.path().join("prompts");
    std::fs::create_dir_all(&prompts).unwrap();
    std::fs::write(prompts.join("writer_agent.md"), "你是一名资深的职场专栏作者。").unwrap();
    std::fs::write(prompts.join("account_strategy.md"), strategy).unwrap();
}

fn chat(text: &str) -> Reply {
    Reply::json(json!({"choices": [{"message": {"role": "assistant", "content": text}}]}))
}

fn article_body() -> String {
    let paragraph = "远程办公正在改变团队协作的节奏，管理者需要用清晰的目标和透明的沟通来替代面对面的监督。";
    let mut body = String::new();
    for slot in 0..3 {
        for _ in 0..12 {
            body.push_str(paragraph);
        }
        body.push_str(&format!("\n\n[IMAGE_PLACEHOLDER_{}]\n\n", slot));
    }
    body.push_str("结语：效率来自信任与节奏。");
    body
}

async fn enqueue_topic(pool: &sqlx::SqlitePool) -> i64 {
    db::enqueue(
        pool,
        &NewTopic {
            topic: "远程办公效率",
            reason: "读者关注",
            summary: "",
            target_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        },
    )
    .await
    .unwrap()
}

async fn scripted_platform() -> Arc<ScriptedTransport> {
    let primary = Arc::new(ScriptedTransport::new("primary"));
    primary
        .on(TOKEN, Reply::json(json!({"access_token": "tok", "expires_in": 7200})))
        .await;
    primary
        .on_sequence(
            IMAGES,
            ["cover", "i0", "i1", "i2"]
                .iter()
                .map(|n| Reply::json(json!({"data": [{"url": format!("http://cdn.test/{}.png", n)}]})))
                .collect(),
        )
        .await;
    for n in ["cover", "i0", "i1", "i2"] {
        primary
            .on(&format!("/{}.png", n), Reply::raw(200, vec![0x89, b'P', b'N', b'G']))
            .await;
    }
    primary.on(PERMANENT, Reply::json(json!({"media_id": "thumb-1"}))).await;
    primary
        .on_sequence(
            CONTENT,
            (0..3)
                .map(|i| Reply::json(json!({"url": format!("http://mmbiz.test/{}.png", i)})))
                .collect(),
        )
        .await;
    primary
}

fn pipeline(cfg: &Config, pool: sqlx::SqlitePool, primary: Arc<ScriptedTransport>) -> Pipeline {
    let http = DualTransport::new(primary, Arc::new(ScriptedTransport::new("secondary")));
    Pipeline::new(cfg, pool, http).unwrap()
}

#[tokio::test]
async fn planned_topic_is_published_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(&dir);
    write_prompts(&dir, STRATEGY);
    let pool = setup_pool().await;
    let id = enqueue_topic(&pool).await;

    let primary = scripted_platform().await;
    let body = article_body();
    assert!(body.chars().count() >= 1500);
    primary
        .on_sequence(
            CHAT,
            vec![
                chat(&body),
                chat("远程办公的效率，取决于目标是否清晰、沟通是否透明，以及团队之间能否建立信任。"),
                chat("```html\n<h1>远程办公效率</h1>\n<section><p>正文</p><img src=\"http://mmbiz.test/0.png\"></section>\n<blockquote> </blockquote>\n```"),
            ],
        )
        .await;
    primary.on(DRAFT, Reply::json(json!({"media_id": "abc123"}))).await;

    let published = pipeline(&cfg, pool.clone(), primary.clone())
        .run_next()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(published.topic_id, id);
    assert_eq!(published.media_id, "abc123");
    assert_eq!(published.article.illustrations.cover.as_deref(), Some("thumb-1"));
    assert_eq!(published.article.illustrations.inline.iter().flatten().count(), 3);
    assert!(published.article.digest.chars().count() <= 120);

    let row = db::get_topic(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, TopicStatus::Published);
    assert_eq!(row.media_id.as_deref(), Some("abc123"));

    let chats = primary.requests_to(CHAT).await;
    assert_eq!(chats.len(), 3);
    let digest_user = chats[1].json().unwrap()["messages"][1]["content"].as_str().unwrap().to_string();
    assert!(!digest_user.contains("账号定位"));
    let layout_user = chats[2].json().unwrap()["messages"][1]["content"].as_str().unwrap().to_string();
    for i in 0..3 {
        assert!(layout_user.contains(&format!("![](http://mmbiz.test/{}.png)", i)));
    }
    assert!(!layout_user.contains("IMAGE_PLACEHOLDER"));

    let draft = &primary.requests_to(DRAFT).await[0];
    let article = &draft.json().unwrap()["articles"][0];
    assert_eq!(article["title"], "远程办公效率");
    assert_eq!(article["thumb_media_id"], "thumb-1");
    assert_eq!(article["content"], "<section><p>正文</p><img src=\"http://mmbiz.test/0.png\"></section>");

    let debug = dir.path().join("data").join("debug");
    let md = std::fs::read_to_string(debug.join(DEBUG_ARTICLE)).unwrap();
    assert!(md.starts_with("# 主题: 远程办公效率"));
    assert!(md.contains("# 正文:"));
    assert!(debug.join(DEBUG_DIGEST).exists());
    assert!(debug.join(DEBUG_HTML).exists());
}

#[tokio::test]
async fn empty_strategy_aborts_before_claiming() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(&dir);
    write_prompts(&dir, "");
    let pool = setup_pool().await;
    let id = enqueue_topic(&pool).await;
    let primary = Arc::new(ScriptedTransport::new("primary"));

    let err = pipeline(&cfg, pool.clone(), primary.clone())
        .run_next()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingStrategy(_)));
    assert_eq!(err.label(), "strategy");
    assert!(primary.requests().await.is_empty());
    let row = db::get_topic(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, TopicStatus::Planned);
}

#[tokio::test]
async fn empty_queue_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(&dir);
    write_prompts(&dir, STRATEGY);
    let primary = Arc::new(ScriptedTransport::new("primary"));
    let outcome = pipeline(&cfg, setup_pool().await, primary.clone())
        .run_next()
        .await
        .unwrap();
    assert!(outcome.is_none());
    assert!(primary.requests().await.is_empty());
}

#[tokio::test]
async fn generation_failure_leaves_topic_writing() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(&dir);
    write_prompts(&dir, STRATEGY);
    let pool = setup_pool().await;
    let id = enqueue_topic(&pool).await;
    let primary = scripted_platform().await;
    primary.on(CHAT, Reply::json(json!({"choices": []}))).await;

    let err = pipeline(&cfg, pool.clone(), primary.clone())
        .run_next()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Generation(_)));
    assert_eq!(primary.calls(DRAFT).await, 0);
    let row = db::get_topic(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, TopicStatus::Writing);
}

#[tokio::test]
async fn rejected_draft_leaves_topic_writing() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(&dir);
    write_prompts(&dir, STRATEGY);
    let pool = setup_pool().await;
    let id = enqueue_topic(&pool).await;
    let primary = scripted_platform().await;
    primary
        .on_sequence(CHAT, vec![chat(&article_body()), chat("摘要"), chat("<p>ok</p>")])
        .await;
    primary
        .on(DRAFT, Reply::json(json!({"errcode": 40007, "errmsg": "invalid media_id"})))
        .await;

    let err = pipeline(&cfg, pool.clone(), primary)
        .run_next()
        .await
        .unwrap_err();
    match err {
        Error::Publication { code, message } => {
            assert_eq!(code, Some(40007));
            assert!(message.contains("40007"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    let row = db::get_topic(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, TopicStatus::Writing);
    assert_eq!(row.media_id, None);
}
