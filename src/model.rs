use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::catalog::model::CatalogItem;

/// A registered listener as stored in the `users` table.
///
/// The access token never lives here: it is minted per cycle and passed
/// around as [`crate::auth::AccessToken`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub chat_handle: String,
    pub chat_id: Option<i64>,
    pub refresh_token: String,
    pub playlist_id: Option<String>,
    pub notified_ids: HashSet<String>,
}

/// Inclusive date range used to backfill missed notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchupWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl CatchupWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> anyhow::Result<Self> {
        if start > end {
            anyhow::bail!("catch-up window start {start} is after end {end}");
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Normal,
    Catchup(CatchupWindow),
}

impl RunMode {
    pub fn is_catchup(&self) -> bool {
        matches!(self, RunMode::Catchup(_))
    }
}

/// New items found in one cycle, grouped by artist display name.
#[derive(Debug, Clone, Default)]
pub struct NewReleaseBatch {
    by_artist: HashMap<String, BTreeMap<String, CatalogItem>>,
}

impl NewReleaseBatch {
    pub fn insert(&mut self, artist_name: &str, item: CatalogItem) {
        self.by_artist
            .entry(artist_name.to_string())
            .or_default()
            .insert(item.id.clone(), item);
    }

    pub fn extend(&mut self, artist_name: &str, items: impl IntoIterator<Item = CatalogItem>) {
        for item in items {
            self.insert(artist_name, item);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_artist.values().all(|items| items.is_empty())
    }

    pub fn len(&self) -> usize {
        self.by_artist.values().map(BTreeMap::len).sum()
    }

    pub fn artists(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, CatalogItem>)> {
        self.by_artist
            .iter()
            .filter(|(_, items)| !items.is_empty())
            .map(|(name, items)| (name.as_str(), items))
    }

    pub fn items(&self) -> impl Iterator<Item = &CatalogItem> {
        self.by_artist.values().flat_map(|items| items.values())
    }

    pub fn item_ids(&self) -> HashSet<&str> {
        self.items().map(|item| item.id.as_str()).collect()
    }
}
