//! Keeps a managed playlist per user and appends newly found tracks to it.

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::collections::HashSet;
use tracing::{info, instrument};

use crate::auth::AccessToken;
use crate::catalog::model::{CurrentUser, Page, PlaylistObject, SnapshotResponse, TrackObject};
use crate::catalog::CatalogClient;
use crate::config;
use crate::db::{self, Pool};
use crate::model::{NewReleaseBatch, User};

/// Provider cap on URIs per append request.
pub const APPEND_BATCH_SIZE: usize = 100;
const PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone)]
pub struct PlaylistMirror {
    catalog: CatalogClient,
    pool: Pool,
    name: String,
    description: String,
    batch_size: usize,
}

impl PlaylistMirror {
    pub fn new(catalog: CatalogClient, pool: Pool, cfg: &config::Playlist) -> Self {
        Self {
            catalog,
            pool,
            name: cfg.name.clone(),
            description: cfg.description.clone(),
            batch_size: APPEND_BATCH_SIZE,
        }
    }

    /// Return the user's playlist id, creating the playlist when none is
    /// stored or the stored one no longer exists.
    #[instrument(skip_all, fields(user = %user.username))]
    pub async fn ensure_exists(&self, token: &AccessToken, user: &mut User) -> Result<String> {
        if let Some(stored) = user.playlist_id.clone() {
            if self.owns_playlist(token, &stored).await? {
                return Ok(stored);
            }
            info!(playlist_id = %stored, "stored playlist is gone; creating a new one");
        }

        let me: CurrentUser = self
            .catalog
            .request(token, "v1/me", &[])
            .await
            .context("failed to fetch provider profile")?;
        if me.id.is_empty() {
            return Err(anyhow!("provider profile has no id"));
        }
        let created: PlaylistObject = self
            .catalog
            .post(
                token,
                &format!("v1/users/{}/playlists", me.id),
                json!({
                    "name": self.name,
                    "description": self.description,
                    "public": true,
                }),
            )
            .await
            .context("failed to create playlist")?;
        if created.id.is_empty() {
            return Err(anyhow!("playlist creation returned no id"));
        }

        db::set_playlist_id(&self.pool, &user.id, &created.id).await?;
        info!(playlist_id = %created.id, "created managed playlist");
        user.playlist_id = Some(created.id.clone());
        Ok(created.id)
    }

    async fn owns_playlist(&self, token: &AccessToken, playlist_id: &str) -> Result<bool> {
        let first: Page<PlaylistObject> = self
            .catalog
            .request(token, "v1/me/playlists", &[("limit", PAGE_SIZE.to_string())])
            .await
            .context("failed to list playlists")?;
        // The provider always reports `total`; a bare page means the listing
        // gave up after repeated rate limiting, not that the playlist is gone.
        if first.items.is_empty() && first.next.is_none() && first.total.is_none() {
            return Err(anyhow!("playlist listing returned no data; keeping {playlist_id}"));
        }
        let playlists = self
            .catalog
            .follow_pages(token, first)
            .await
            .context("failed to page through playlists")?;
        Ok(playlists.iter().any(|p| p.id == playlist_id))
    }

    /// Append every track of every distinct item in `batch` to the managed
    /// playlist.
    #[instrument(skip_all, fields(user = %user.username, items = batch.len()))]
    pub async fn add(
        &self,
        token: &AccessToken,
        user: &mut User,
        batch: &NewReleaseBatch,
    ) -> Result<usize> {
        let playlist_id = self.ensure_exists(token, user).await?;

        // A collaboration can sit under several artists; mirror it once.
        let mut uris = Vec::new();
        let mut seen = HashSet::new();
        for item in batch.items() {
            if !seen.insert(item.id.as_str()) {
                continue;
            }
            uris.extend(self.track_uris(token, &item.id).await?);
        }
        self.append(token, &playlist_id, &uris).await?;
        info!(tracks = uris.len(), "mirrored new releases into playlist");
        Ok(uris.len())
    }

    async fn track_uris(&self, token: &AccessToken, album_id: &str) -> Result<Vec<String>> {
        let first: Page<TrackObject> = self
            .catalog
            .request(
                token,
                &format!("v1/albums/{album_id}/tracks"),
                &[("limit", PAGE_SIZE.to_string())],
            )
            .await
            .with_context(|| format!("failed to list tracks of {album_id}"))?;
        let tracks = self.catalog.follow_pages(token, first).await?;
        Ok(tracks.into_iter().filter_map(|t| t.uri).collect())
    }

    /// Submit `uris` in provider-sized batches. Returns the number of requests.
    pub async fn append(
        &self,
        token: &AccessToken,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<usize> {
        let endpoint = format!("v1/playlists/{playlist_id}/tracks");
        let mut requests = 0;
        for batch in uris.chunks(self.batch_size) {
            let _: SnapshotResponse = self
                .catalog
                .post(token, &endpoint, json!({ "uris": batch }))
                .await
                .context("failed to append tracks")?;
            requests += 1;
        }
        Ok(requests)
    }
}
