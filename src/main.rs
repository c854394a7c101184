use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use wechat_writer::config::{self, Config};
use wechat_writer::db;
use wechat_writer::http::DualTransport;
use wechat_writer::pipeline::Pipeline;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Write, illustrate and publish the next planned topic as a draft"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = match config::load(Some(&args.config)) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("[config] {}", err);
            return ExitCode::FAILURE;
        }
    };

    match run(&cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("[{}] {}", err.label(), err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: &Config) -> wechat_writer::Result<()> {
    cfg.ensure_dirs()?;
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.default_database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| wechat_writer::Error::Queue(e.into()))?;

    let pipeline = Pipeline::new(cfg, pool.clone(), DualTransport::from_defaults()?)?;
    match pipeline.run_next().await? {
        Some(published) => info!(
            topic = %published.article.topic,
            media_id = %published.media_id,
            "draft created"
        ),
        None => info!("nothing to publish"),
    }
    let pending = db::count_pending(&pool).await?;
    info!(pending, "topics still planned");
    Ok(())
}
