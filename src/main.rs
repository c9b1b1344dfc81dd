use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::info;

use release_watchbot::auth::SpotifyOAuth;
use release_watchbot::catalog::{AdmissionGate, CatalogClient};
use release_watchbot::config;
use release_watchbot::db;
use release_watchbot::driver;
use release_watchbot::model::{CatchupWindow, RunMode};
use release_watchbot::notify::Notifier;
use release_watchbot::playlist::PlaylistMirror;
use release_watchbot::sync::SyncEngine;
use release_watchbot::telegram::TelegramChat;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Announce new releases from followed artists to every registered user"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// First day (inclusive, YYYY-MM-DD) of a catch-up run
    #[arg(long, requires = "catchup_end")]
    catchup_start: Option<NaiveDate>,

    /// Last day (inclusive, YYYY-MM-DD) of a catch-up run
    #[arg(long, requires = "catchup_start")]
    catchup_end: Option<NaiveDate>,
}

impl Args {
    fn run_mode(&self) -> Result<RunMode> {
        match (self.catchup_start, self.catchup_end) {
            (Some(start), Some(end)) => Ok(RunMode::Catchup(CatchupWindow::new(start, end)?)),
            _ => Ok(RunMode::Normal),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mode = args.run_mode()?;
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let today = Local::now().date_naive();
    let day_reset = driver::day_boundary(&pool, &mode, today).await?;

    let chat = Arc::new(TelegramChat::new(
        Bot::new(cfg.telegram.bot_token.clone()),
        cfg.telegram.groups.clone(),
    ));
    let notifier = Arc::new(Notifier::new(
        chat.clone(),
        chat,
        pool.clone(),
        cfg.telegram.operator.clone(),
    ));

    let gate = AdmissionGate::new();
    let catalog = CatalogClient::from_config(&cfg, gate).context("failed to build catalog client")?;
    let tokens = Arc::new(SpotifyOAuth::from_config(&cfg)?);

    let mut engine = SyncEngine::new(catalog.clone(), tokens, pool.clone(), notifier, mode, today)
        .with_day_reset(day_reset);
    if cfg.playlist.enabled {
        engine = engine.with_mirror(PlaylistMirror::new(catalog, pool.clone(), &cfg.playlist));
    }

    info!(?mode, %today, day_reset, "starting release sync");
    let summary = driver::run_all(&engine, &pool).await?;
    info!(?summary, "release sync done");
    Ok(())
}
