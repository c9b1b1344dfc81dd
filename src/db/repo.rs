use super::model::NewUser;
use crate::dedup;
use crate::model::User;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::instrument;

pub type Pool = SqlitePool;

const LAST_SYNC_DAY_KEY: &str = "last_sync_day";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. In-memory URLs pass
/// through untouched.
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

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let id: String = row.get("id");
    let raw_ids: String = row.get("notified_ids");
    let notified_ids = dedup::decode(&raw_ids)
        .with_context(|| format!("corrupt notified_ids for user {id}"))?;
    Ok(User {
        username: row.get("username"),
        chat_handle: row.get("chat_handle"),
        chat_id: row.get("chat_id"),
        refresh_token: row.get("refresh_token"),
        playlist_id: row.get("playlist_id"),
        notified_ids,
        id,
    })
}

#[instrument(skip_all)]
pub async fn insert_user(pool: &Pool, user: &NewUser) -> Result<()> {
    sqlx::query(
        "INSERT INTO users (id, username, chat_handle, refresh_token) VALUES (?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(NewUser::normalize_handle(&user.chat_handle))
    .bind(&user.refresh_token)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn list_users(pool: &Pool) -> Result<Vec<User>> {
    let rows = sqlx::query(
        "SELECT id, username, chat_handle, chat_id, refresh_token, playlist_id, notified_ids FROM users ORDER BY created_at, id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(user_from_row).collect()
}

#[instrument(skip_all)]
pub async fn get_user(pool: &Pool, id: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, username, chat_handle, chat_id, refresh_token, playlist_id, notified_ids FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(user_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn find_user_by_handle(pool: &Pool, handle: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, username, chat_handle, chat_id, refresh_token, playlist_id, notified_ids FROM users WHERE chat_handle = ? LIMIT 1",
    )
    .bind(NewUser::normalize_handle(handle))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(user_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn update_refresh_token(pool: &Pool, user_id: &str, refresh_token: &str) -> Result<()> {
    sqlx::query("UPDATE users SET refresh_token = ? WHERE id = ?")
        .bind(refresh_token)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_chat_id(pool: &Pool, user_id: &str, chat_id: i64) -> Result<()> {
    sqlx::query("UPDATE users SET chat_id = ? WHERE id = ?")
        .bind(chat_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_playlist_id(pool: &Pool, user_id: &str, playlist_id: &str) -> Result<()> {
    sqlx::query("UPDATE users SET playlist_id = ? WHERE id = ?")
        .bind(playlist_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Overwrite the user's notified set. Last write wins.
#[instrument(skip_all)]
pub async fn save_notified_ids(pool: &Pool, user_id: &str, ids: &HashSet<String>) -> Result<()> {
    sqlx::query("UPDATE users SET notified_ids = ? WHERE id = ?")
        .bind(dedup::encode(ids).context("failed to encode notified ids")?)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record `today` as the last sync day and report whether it is a new day.
///
/// Called once per normal run; the answer is the day-boundary flag for every
/// user processed by that run.
#[instrument(skip_all)]
pub async fn begin_sync_day(pool: &Pool, today: NaiveDate) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let last: Option<String> = sqlx::query_scalar("SELECT value FROM sync_meta WHERE key = ?")
        .bind(LAST_SYNC_DAY_KEY)
        .fetch_optional(&mut *tx)
        .await?;
    let today_str = today.format("%Y-%m-%d").to_string();
    let new_day = last.as_deref() != Some(today_str.as_str());
    if new_day {
        sqlx::query(
            "INSERT INTO sync_meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(LAST_SYNC_DAY_KEY)
        .bind(&today_str)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(new_day)
}
