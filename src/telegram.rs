//! Telegram implementation of the chat seams.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use teloxide::prelude::*;
use teloxide::types::UpdateKind;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::NewUser;
use crate::notify::{ChatDirectory, ChatTransport};

/// Bot handle plus a username -> user id cache.
///
/// Bots cannot enumerate Telegram users, so the directory is filled from the
/// senders of pending updates (anyone who messaged the bot) and from the
/// administrators of the configured group chats.
pub struct TelegramChat {
    bot: Bot,
    groups: Vec<i64>,
    known: Mutex<HashMap<String, i64>>,
}

impl TelegramChat {
    pub fn new(bot: Bot, groups: Vec<i64>) -> Self {
        Self {
            bot,
            groups,
            known: Mutex::new(HashMap::new()),
        }
    }

    async fn refresh_directory(&self) -> Result<()> {
        let mut found = Vec::new();

        let updates = self
            .bot
            .get_updates()
            .await
            .context("failed to fetch pending updates")?;
        for update in &updates {
            if let UpdateKind::Message(msg) = &update.kind {
                if let Some(user) = msg.from() {
                    if let Some(username) = &user.username {
                        found.push((NewUser::normalize_handle(username), user.id.0 as i64));
                    }
                }
            }
        }

        for group in &self.groups {
            match self.bot.get_chat_administrators(ChatId(*group)).await {
                Ok(members) => {
                    for member in members {
                        if let Some(username) = &member.user.username {
                            found.push((
                                NewUser::normalize_handle(username),
                                member.user.id.0 as i64,
                            ));
                        }
                    }
                }
                Err(err) => warn!(?err, group, "failed to list group members"),
            }
        }

        debug!(entries = found.len(), "refreshed chat directory");
        self.known.lock().await.extend(found);
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for TelegramChat {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .disable_web_page_preview(true)
            .await
            .context("telegram send failed")?;
        Ok(())
    }
}

#[async_trait]
impl ChatDirectory for TelegramChat {
    async fn lookup(&self, handle: &str) -> Result<Option<i64>> {
        let key = NewUser::normalize_handle(handle);
        if let Some(id) = self.known.lock().await.get(&key) {
            return Ok(Some(*id));
        }
        self.refresh_directory().await?;
        Ok(self.known.lock().await.get(&key).copied())
    }
}
