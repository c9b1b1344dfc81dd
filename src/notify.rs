//! Report rendering, chunking and chat delivery.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::borrow::Cow;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::Operator;
use crate::db::{self, Pool};
use crate::model::{NewReleaseBatch, RunMode, User};

/// Chunk size kept below the transport limit so a header never tips over it.
pub const MAX_CHUNK_CHARS: usize = 1900;
const TRUNCATION_MARKER: &str = "…";

/// Sends pre-chunked text to a numeric chat identity.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// Resolves a chat handle to a numeric chat identity.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    async fn lookup(&self, handle: &str) -> Result<Option<i64>>;
}

/// Split `text` on line boundaries into chunks of at most `max` characters.
///
/// Rejoining the chunks with `\n` gives back the input, except that a line
/// longer than `max` on its own is cut and ends with a marker.
pub fn chunk(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut started = false;

    for line in text.split('\n') {
        let line = truncate_line(line, max);
        let line_len = line.chars().count();
        if started {
            if current_len + 1 + line_len <= max {
                current.push('\n');
                current.push_str(&line);
                current_len += 1 + line_len;
                continue;
            }
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(&line);
        current_len = line_len;
        started = true;
    }
    if started {
        chunks.push(current);
    }
    chunks
}

fn truncate_line(line: &str, max: usize) -> Cow<'_, str> {
    if line.chars().count() <= max {
        return Cow::Borrowed(line);
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    let keep = max.saturating_sub(marker_len);
    let mut cut: String = line.chars().take(keep).collect();
    if max >= marker_len {
        cut.push_str(TRUNCATION_MARKER);
    }
    Cow::Owned(cut)
}

/// Human-readable report for one cycle.
pub fn render_report(batch: &NewReleaseBatch, mode: &RunMode, today: NaiveDate) -> String {
    let mut out = String::new();
    let header = match mode {
        RunMode::Normal => today.format("%m/%d").to_string(),
        RunMode::Catchup(window) => format!(
            "{} - {}",
            window.start().format("%m/%d"),
            window.end().format("%m/%d")
        ),
    };

    if batch.is_empty() {
        match mode {
            RunMode::Normal => {
                let _ = writeln!(out, "No new releases today! {header}");
            }
            RunMode::Catchup(_) => {
                let _ = writeln!(out, "No releases found for {header}");
            }
        }
        return out;
    }

    let _ = writeln!(out, "New Releases! {header}");
    let mut artists: Vec<_> = batch.artists().collect();
    artists.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));
    for (artist, items) in artists {
        let _ = writeln!(out);
        let _ = writeln!(out, "{artist}");
        let mut items: Vec<_> = items.values().collect();
        items.sort_by(|a, b| b.release_date.cmp(&a.release_date).then(a.name.cmp(&b.name)));
        for item in items {
            let _ = writeln!(out, "• {} ({})", item.name, item.link);
        }
    }
    out
}

/// Delivers reports to users and escalations to the operator.
pub struct Notifier {
    transport: Arc<dyn ChatTransport>,
    directory: Arc<dyn ChatDirectory>,
    pool: Pool,
    operator: Option<Operator>,
    max_chunk: usize,
}

impl Notifier {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        directory: Arc<dyn ChatDirectory>,
        pool: Pool,
        operator: Option<Operator>,
    ) -> Self {
        Self {
            transport,
            directory,
            pool,
            operator,
            max_chunk: MAX_CHUNK_CHARS,
        }
    }

    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk;
        self
    }

    /// Send `text` to `user`, resolving and persisting the chat id on first
    /// use. Failures are logged and swallowed.
    #[instrument(skip_all, fields(user = %user.username))]
    pub async fn deliver(&self, user: &mut User, text: &str) {
        let chat_id = match self.resolve(user).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(handle = %user.chat_handle, "no chat identity found for user");
                return;
            }
            Err(err) => {
                warn!(?err, handle = %user.chat_handle, "chat identity lookup failed");
                return;
            }
        };
        if let Err(err) = self.send_chunks(chat_id, text).await {
            warn!(?err, chat_id, "failed to deliver message");
        }
    }

    /// Report a problem to the operator. Never fails and never escalates its
    /// own failures.
    pub async fn escalate(&self, message: &str) {
        warn!(%message, "escalating to operator");
        let Some(operator) = &self.operator else {
            return;
        };
        let chat_id = match operator.chat_id {
            Some(id) => Some(id),
            None => match operator.handle.as_deref() {
                Some(handle) => self.lookup_operator(handle).await,
                None => None,
            },
        };
        let Some(chat_id) = chat_id else {
            warn!("operator chat identity unknown; escalation dropped");
            return;
        };
        if let Err(err) = self.send_chunks(chat_id, &format!("Error: {message}")).await {
            warn!(?err, "failed to deliver escalation");
        }
    }

    async fn lookup_operator(&self, handle: &str) -> Option<i64> {
        match db::find_user_by_handle(&self.pool, handle).await {
            Ok(Some(User {
                chat_id: Some(id), ..
            })) => return Some(id),
            Ok(_) => {}
            Err(err) => warn!(?err, "operator record lookup failed"),
        }
        match self.directory.lookup(handle).await {
            Ok(found) => found,
            Err(err) => {
                warn!(?err, "operator directory lookup failed");
                None
            }
        }
    }

    async fn resolve(&self, user: &mut User) -> Result<Option<i64>> {
        if let Some(id) = user.chat_id {
            return Ok(Some(id));
        }
        let Some(id) = self.directory.lookup(&user.chat_handle).await? else {
            return Ok(None);
        };
        db::set_chat_id(&self.pool, &user.id, id).await?;
        info!(chat_id = id, "resolved chat identity");
        user.chat_id = Some(id);
        Ok(Some(id))
    }

    async fn send_chunks(&self, chat_id: i64, text: &str) -> Result<()> {
        for part in chunk(text, self.max_chunk) {
            if part.trim().is_empty() {
                continue;
            }
            self.transport.send(chat_id, &part).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::{Artist, CatalogItem, Category};
    use crate::model::CatchupWindow;

    fn rejoin(chunks: &[String]) -> String {
        chunks.join("\n")
    }

    #[test]
    fn chunk_round_trips_and_respects_max() {
        let text = (0..200)
            .map(|i| format!("line number {i} with some padding"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk(&text, 100);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
        assert_eq!(rejoin(&chunks), text);
    }

    #[test]
    fn chunk_keeps_blank_lines_and_trailing_newline() {
        let text = "a\n\nb\n";
        let chunks = chunk(text, 1900);
        assert_eq!(chunks, vec!["a\n\nb\n".to_string()]);

        let chunks = chunk("ab\n\ncd\n", 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 3));
        assert_eq!(rejoin(&chunks), "ab\n\ncd\n");
    }

    #[test]
    fn chunk_truncates_single_long_line() {
        let long = "x".repeat(50);
        let text = format!("short\n{long}\nend");
        let chunks = chunk(&text, 10);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks, vec!["short", "xxxxxxxxx…", "end"]);
    }

    #[test]
    fn chunk_counts_characters_not_bytes() {
        let text = "é".repeat(10);
        assert_eq!(chunk(&text, 10), vec![text.clone()]);
    }

    fn item(id: &str, name: &str, artist: &str) -> CatalogItem {
        CatalogItem {
            id: id.into(),
            name: name.into(),
            release_date: NaiveDate::from_ymd_opt(2024, 1, 10),
            link: format!("https://open.spotify.com/album/{id}"),
            category: Category::Album,
            artist: Artist {
                id: format!("{artist}-id"),
                name: artist.into(),
            },
        }
    }

    #[test]
    fn report_groups_by_artist() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let mut batch = NewReleaseBatch::default();
        batch.insert("Beta", item("b1", "Second", "Beta"));
        batch.insert("Alpha", item("a1", "First", "Alpha"));

        let report = render_report(&batch, &RunMode::Normal, today);
        assert_eq!(
            report,
            "New Releases! 01/10\n\nAlpha\n• First (https://open.spotify.com/album/a1)\n\nBeta\n• Second (https://open.spotify.com/album/b1)\n"
        );
    }

    #[test]
    fn report_without_releases() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let batch = NewReleaseBatch::default();
        assert_eq!(
            render_report(&batch, &RunMode::Normal, today),
            "No new releases today! 03/05\n"
        );

        let window = CatchupWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 12).unwrap(),
        )
        .unwrap();
        assert_eq!(
            render_report(&batch, &RunMode::Catchup(window), today),
            "No releases found for 01/10 - 01/12\n"
        );
    }
}
