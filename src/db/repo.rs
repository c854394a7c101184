use super::model::{NewTopic, Topic, TopicStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

pub type Pool = SqlitePool;

const TOPIC_COLUMNS: &str =
    "id, topic, reason, summary, target_date, status, media_id, created_at, updated_at";

/// Open the queue database, creating the file if needed. WAL with full sync
/// so every committed status change survives a crash.
pub async fn init_pool(database_url: &str) -> sqlx::Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    SqlitePool::connect_with(options).await
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{}?{}", expanded_path, q),
        None => format!("sqlite://{}", expanded_path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

fn row_to_topic(row: &SqliteRow) -> sqlx::Result<Topic> {
    let status: String = row.try_get("status")?;
    let status = TopicStatus::parse_status(&status).map_err(|e| sqlx::Error::ColumnDecode {
        index: "status".into(),
        source: Box::new(e),
    })?;
    Ok(Topic {
        id: row.try_get("id")?,
        topic: row.try_get("topic")?,
        reason: row.try_get("reason")?,
        summary: row.try_get("summary")?,
        target_date: row.try_get("target_date")?,
        status,
        media_id: row.try_get("media_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a topic as `planned`, or overwrite the existing row with the same
/// topic text (resetting it to `planned`). Returns the row id.
#[instrument(skip_all, fields(topic = new.topic))]
pub async fn enqueue(pool: &Pool, new: &NewTopic<'_>) -> sqlx::Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO article_plans (topic, reason, summary, target_date, status, updated_at) \
         VALUES (?, ?, ?, ?, 'planned', CURRENT_TIMESTAMP) \
         ON CONFLICT(topic) DO UPDATE SET \
           reason = excluded.reason, \
           summary = excluded.summary, \
           target_date = excluded.target_date, \
           status = 'planned', \
           media_id = NULL, \
           updated_at = CURRENT_TIMESTAMP \
         RETURNING id",
    )
    .bind(new.topic)
    .bind(new.reason)
    .bind(new.summary)
    .bind(new.target_date)
    .fetch_one(pool)
    .await?;
    info!(id, "topic enqueued");
    Ok(id)
}

/// The `planned` topic with the earliest target date, if any.
#[instrument(skip_all)]
pub async fn next_pending(pool: &Pool) -> sqlx::Result<Option<Topic>> {
    let sql = format!(
        "SELECT {} FROM article_plans WHERE status = ? ORDER BY target_date ASC, id ASC LIMIT 1",
        TOPIC_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(TopicStatus::Planned.as_str())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_topic).transpose()
}

#[instrument(skip_all)]
pub async fn get_topic(pool: &Pool, id: i64) -> sqlx::Result<Option<Topic>> {
    let sql = format!("SELECT {} FROM article_plans WHERE id = ?", TOPIC_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(row_to_topic).transpose()
}

#[instrument(skip_all)]
pub async fn find_by_topic(pool: &Pool, topic: &str) -> sqlx::Result<Option<Topic>> {
    let sql = format!("SELECT {} FROM article_plans WHERE topic = ?", TOPIC_COLUMNS);
    let row = sqlx::query(&sql).bind(topic).fetch_optional(pool).await?;
    row.as_ref().map(row_to_topic).transpose()
}

/// All topics ordered by target date.
#[instrument(skip_all)]
pub async fn list_topics(pool: &Pool) -> sqlx::Result<Vec<Topic>> {
    let sql = format!(
        "SELECT {} FROM article_plans ORDER BY target_date ASC, id ASC",
        TOPIC_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(row_to_topic).collect()
}

/// `planned -> writing`. Returns false if the row was not `planned`.
#[instrument(skip_all)]
pub async fn mark_writing(pool: &Pool, id: i64) -> sqlx::Result<bool> {
    let res = sqlx::query(
        "UPDATE article_plans SET status = 'writing', updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND status = 'planned'",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// `writing -> published`, recording the platform draft id. Returns false if
/// the row was not `writing`.
#[instrument(skip_all)]
pub async fn mark_published(pool: &Pool, id: i64, media_id: &str) -> sqlx::Result<bool> {
    let res = sqlx::query(
        "UPDATE article_plans SET status = 'published', media_id = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND status = 'writing'",
    )
    .bind(media_id)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn delete_topic(pool: &Pool, id: i64) -> sqlx::Result<bool> {
    let res = sqlx::query("DELETE FROM article_plans WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn count_pending(pool: &Pool) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM article_plans WHERE status = 'planned'")
        .fetch_one(pool)
        .await
}

/// Operator recovery: move rows stuck in `writing` for at least `older_than`
/// back to `planned`. Returns the number of rows moved.
#[instrument(skip_all)]
pub async fn requeue_stale_writing(pool: &Pool, older_than: Duration) -> sqlx::Result<u64> {
    let modifier = format!("-{} seconds", older_than.as_secs());
    let res = sqlx::query(
        "UPDATE article_plans SET status = 'planned', updated_at = CURRENT_TIMESTAMP \
         WHERE status = 'writing' AND datetime(updated_at) <= datetime('now', ?)",
    )
    .bind(modifier)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}
