use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use wechat_writer::config;
use wechat_writer::db::{self, NewTopic};

#[derive(Debug, Parser)]
#[command(author, version, about = "Inspect and edit the topic queue")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add a topic, or reset an existing one back to planned
    Add {
        topic: String,
        #[arg(long, default_value = "")]
        reason: String,
        #[arg(long, default_value = "")]
        summary: String,
        /// Target date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List every topic ordered by target date
    List,
    /// Delete a topic by id
    Delete { id: i64 },
    /// Print the number of planned topics
    Pending,
    /// Move topics stuck in writing back to planned
    RequeueStale {
        #[arg(long, default_value = "60")]
        older_than_minutes: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.default_database_url());
    let pool = db::init_pool(&database_url)
        .await
        .with_context(|| format!("failed to open {}", database_url))?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Add {
            topic,
            reason,
            summary,
            date,
        } => {
            let topic = topic.trim();
            if topic.is_empty() {
                bail!("topic must be non-empty");
            }
            let target_date = date.unwrap_or_else(|| Local::now().date_naive());
            let id = db::enqueue(
                &pool,
                &NewTopic {
                    topic,
                    reason: &reason,
                    summary: &summary,
                    target_date,
                },
            )
            .await?;
            println!("{}\t{}\t{}", id, target_date, topic);
        }
        Command::List => {
            for t in db::list_topics(&pool).await? {
                let date = t
                    .target_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    t.id,
                    date,
                    t.status.as_str(),
                    t.topic,
                    t.media_id.as_deref().unwrap_or("")
                );
            }
        }
        Command::Delete { id } => {
            if !db::delete_topic(&pool, id).await? {
                bail!("no topic with id {}", id);
            }
            info!(id, "topic deleted");
        }
        Command::Pending => {
            println!("{}", db::count_pending(&pool).await?);
        }
        Command::RequeueStale { older_than_minutes } => {
            let moved = db::requeue_stale_writing(
                &pool,
                Duration::from_secs(older_than_minutes.saturating_mul(60)),
            )
            .await?;
            info!(moved, older_than_minutes, "stale topics requeued");
            println!("{}", moved);
        }
    }
    Ok(())
}
