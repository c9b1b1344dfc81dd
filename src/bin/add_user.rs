use anyhow::{anyhow, Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use release_watchbot::auth::{SpotifyOAuth, TokenProvider};
use release_watchbot::config;
use release_watchbot::db::{self, NewUser};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Register a listener: authorize with Spotify and store the refresh token"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Display name used in logs and reports
    #[arg(long)]
    username: String,

    /// Telegram username the reports go to
    #[arg(long)]
    chat_handle: String,
}

/// Accept either the bare code or the full redirect URL the browser landed on.
fn extract_code(input: &str, expected_state: &str) -> Result<String> {
    let input = input.trim();
    let Ok(url) = Url::parse(input) else {
        if input.is_empty() {
            return Err(anyhow!("no authorization code given"));
        }
        return Ok(input.to_string());
    };

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(anyhow!("authorization failed: {value}")),
            _ => {}
        }
    }
    if state.as_deref() != Some(expected_state) {
        return Err(anyhow!("state mismatch in redirect URL"));
    }
    code.ok_or_else(|| anyhow!("redirect URL has no code parameter"))
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

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let handle = NewUser::normalize_handle(&args.chat_handle);
    if db::find_user_by_handle(&pool, &handle).await?.is_some() {
        return Err(anyhow!("a user with chat handle {handle} is already registered"));
    }

    let oauth = SpotifyOAuth::from_config(&cfg)?;
    let user_id = uuid::Uuid::new_v4().to_string();
    let auth_url = oauth.authorization_url(&user_id)?;

    println!("Open this URL and approve access:\n\n{auth_url}\n");
    println!("Then paste the URL you were redirected to (or just the code):");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let input = lines
        .next_line()
        .await
        .context("failed to read from stdin")?
        .unwrap_or_default();
    let code = extract_code(&input, &user_id)?;

    let tokens = oauth.exchange_code(&code).await?;
    let refresh_token = tokens
        .refresh_token
        .ok_or_else(|| anyhow!("token endpoint returned no refresh token"))?;

    db::insert_user(
        &pool,
        &NewUser {
            id: user_id.clone(),
            username: args.username.clone(),
            chat_handle: handle.clone(),
            refresh_token,
        },
    )
    .await?;

    info!(user_id = %user_id, "registered user");
    println!(
        "Registered {} with Telegram handle @{}. Ask them to message the bot once so it can reach them.",
        args.username, handle
    );
    Ok(())
}
