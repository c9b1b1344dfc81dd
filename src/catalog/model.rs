//! Typed views of the Spotify Web API payloads the bot reads.
//!
//! Every field the bot does not strictly need is optional so that a sparse or
//! partially populated response still decodes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Album,
    Single,
    AppearsOn,
    Compilation,
}

impl Category {
    /// Categories checked for new releases. Compilations are noise.
    pub const TRACKED: [Category; 3] = [Category::Album, Category::Single, Category::AppearsOn];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Album => "album",
            Category::Single => "single",
            Category::AppearsOn => "appears_on",
            Category::Compilation => "compilation",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalUrls {
    #[serde(default)]
    pub spotify: Option<String>,
}

/// Album object as returned by `/v1/artists/{id}/albums`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumObject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub release_date_precision: Option<String>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    #[serde(default)]
    pub album_group: Option<Category>,
    #[serde(default)]
    pub uri: Option<String>,
}

/// One release as the rest of the bot sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    /// `None` when the provider only knows the year or month.
    pub release_date: Option<NaiveDate>,
    pub link: String,
    pub category: Category,
    pub artist: Artist,
}

impl CatalogItem {
    pub fn from_album(album: AlbumObject, requested: Category, artist: &Artist) -> Self {
        let release_date = album
            .release_date
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok());
        let link = album
            .external_urls
            .spotify
            .unwrap_or_else(|| format!("https://open.spotify.com/album/{}", album.id));
        Self {
            id: album.id,
            name: album.name,
            release_date,
            link,
            category: album.album_group.unwrap_or(requested),
            artist: artist.clone(),
        }
    }

    pub fn released_on(&self, day: NaiveDate) -> bool {
        self.release_date == Some(day)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cursors {
    #[serde(default)]
    pub after: Option<String>,
}

/// Spotify paging object. Covers both the cursor shape (`cursors.after`)
/// and the link shape (`next`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub cursors: Option<Cursors>,
    #[serde(default)]
    pub total: Option<u64>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next: None,
            cursors: None,
            total: None,
        }
    }
}

impl<T> Page<T> {
    /// Cursor for the next cursor-paginated request; empty strings end the walk.
    pub fn after_cursor(&self) -> Option<&str> {
        self.cursors
            .as_ref()
            .and_then(|c| c.after.as_deref())
            .filter(|after| !after.is_empty())
    }
}

/// `/v1/me/following?type=artist` wraps its page in an `artists` key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FollowedArtists {
    #[serde(default)]
    pub artists: Page<Artist>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotResponse {
    #[serde(default)]
    pub snapshot_id: Option<String>,
}
