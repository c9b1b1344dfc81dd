//! One user's release-sync cycle.
//!
//! `TokenRefresh -> ListArtists -> FanOutFetch -> FilterAndPersist ->
//! PlaylistMirror -> Render`. Delivery is left to the run driver.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::auth::{AccessToken, TokenProvider};
use crate::catalog::model::{Artist, CatalogItem, Category};
use crate::catalog::{is_fatal, AlbumQuery, CatalogClient, CatalogError};
use crate::db::{self, Pool};
use crate::dedup::DedupState;
use crate::model::{NewReleaseBatch, RunMode, User};
use crate::notify::{render_report, Notifier};
use crate::playlist::PlaylistMirror;

#[derive(Debug)]
pub struct CycleOutcome {
    pub batch: NewReleaseBatch,
    pub report: String,
    pub artists: usize,
    pub failed_artists: usize,
}

pub struct SyncEngine {
    catalog: CatalogClient,
    tokens: Arc<dyn TokenProvider>,
    pool: Pool,
    notifier: Arc<Notifier>,
    mirror: Option<PlaylistMirror>,
    mode: RunMode,
    today: NaiveDate,
    day_reset: bool,
}

impl SyncEngine {
    pub fn new(
        catalog: CatalogClient,
        tokens: Arc<dyn TokenProvider>,
        pool: Pool,
        notifier: Arc<Notifier>,
        mode: RunMode,
        today: NaiveDate,
    ) -> Self {
        Self {
            catalog,
            tokens,
            pool,
            notifier,
            mirror: None,
            mode,
            today,
            day_reset: false,
        }
    }

    pub fn with_mirror(mut self, mirror: PlaylistMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Whether this run is the first of a new calendar day. Ignored in
    /// catch-up mode, which never clears the notified set.
    pub fn with_day_reset(mut self, day_reset: bool) -> Self {
        self.day_reset = day_reset;
        self
    }

    pub fn mode(&self) -> &RunMode {
        &self.mode
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn start_notice(&self) -> String {
        match &self.mode {
            RunMode::Normal => "Finding new releases for the day".to_string(),
            RunMode::Catchup(window) => format!(
                "Catching up on releases from {} to {}",
                window.start(),
                window.end()
            ),
        }
    }

    #[instrument(skip_all, fields(user = %user.username))]
    pub async fn run_cycle(&self, user: &mut User) -> Result<CycleOutcome> {
        let token = self.refresh_token(user).await?;

        let listing = self
            .catalog
            .followed_artists(&token)
            .await
            .context("failed to list followed artists")?;
        if let Some(err) = &listing.interrupted {
            self.notifier
                .escalate(&format!(
                    "artist listing for {} stopped after {} artists: {err}",
                    user.username,
                    listing.items.len()
                ))
                .await;
        }
        let artists = listing.items;

        let reset = self.day_reset && !self.mode.is_catchup();
        if reset {
            info!("first cycle of the day; clearing notified set");
        }
        let dedup = DedupState::begin(user.notified_ids.clone(), reset);

        let fetches = artists
            .iter()
            .map(|artist| self.fetch_artist(&token, artist, &dedup));
        let results = try_join_all(fetches).await?;

        let mut batch = NewReleaseBatch::default();
        let mut failed_artists = 0;
        for (artist, result) in artists.iter().zip(results) {
            match result {
                Some(items) => batch.extend(&artist.name, items),
                None => failed_artists += 1,
            }
        }

        let ids = dedup.into_current();
        db::save_notified_ids(&self.pool, &user.id, &ids)
            .await
            .context("failed to persist notified set")?;
        user.notified_ids = ids;

        if !batch.is_empty() {
            if let Some(mirror) = &self.mirror {
                if let Err(err) = mirror.add(&token, user, &batch).await {
                    if is_fatal(&err) {
                        return Err(err);
                    }
                    self.notifier
                        .escalate(&format!(
                            "playlist mirror failed for {}: {err:#}",
                            user.username
                        ))
                        .await;
                }
            }
        }

        info!(
            artists = artists.len(),
            failed_artists,
            new_items = batch.len(),
            "cycle complete"
        );
        let report = render_report(&batch, &self.mode, self.today);
        Ok(CycleOutcome {
            batch,
            report,
            artists: artists.len(),
            failed_artists,
        })
    }

    async fn refresh_token(&self, user: &mut User) -> Result<AccessToken> {
        let tokens = self
            .tokens
            .refresh(&user.refresh_token)
            .await
            .context("token refresh failed")?;
        if let Some(rotated) = tokens.refresh_token {
            if rotated != user.refresh_token {
                db::update_refresh_token(&self.pool, &user.id, &rotated).await?;
                debug!("stored rotated refresh token");
                user.refresh_token = rotated;
            }
        }
        Ok(tokens.access_token)
    }

    /// Fetch and filter one artist. `Ok(None)` is an isolated failure that
    /// was already escalated; `Err` is fatal for the whole run.
    async fn fetch_artist(
        &self,
        token: &AccessToken,
        artist: &Artist,
        dedup: &DedupState,
    ) -> Result<Option<Vec<CatalogItem>>> {
        let fetched = match &self.mode {
            RunMode::Normal => self.fetch_latest(token, artist).await,
            RunMode::Catchup(_) => self.fetch_history(token, artist).await,
        };
        let candidates = match fetched {
            Ok(items) => items,
            Err(err) if err.is_fatal() => {
                return Err(anyhow::Error::from(err)
                    .context(format!("fetching releases for {}", artist.name)));
            }
            Err(err) => {
                warn!(artist = %artist.name, error = %err, "artist fetch failed");
                self.notifier
                    .escalate(&format!("Error processing artist {}: {err}", artist.name))
                    .await;
                return Ok(None);
            }
        };

        let kept: Vec<CatalogItem> = match &self.mode {
            RunMode::Normal => candidates
                .into_iter()
                .filter(|item| item.released_on(self.today) && dedup.claim(&item.id))
                .collect(),
            RunMode::Catchup(window) => candidates
                .into_iter()
                .filter(|item| item.release_date.is_some_and(|d| window.contains(d)))
                .inspect(|item| dedup.record(&item.id))
                .collect(),
        };
        if !kept.is_empty() {
            debug!(artist = %artist.name, kept = kept.len(), "found releases");
        }
        Ok(Some(kept))
    }

    async fn fetch_latest(
        &self,
        token: &AccessToken,
        artist: &Artist,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        let mut items = Vec::new();
        for category in Category::TRACKED {
            let query = AlbumQuery::latest(category);
            items.extend(self.catalog.latest_items(token, artist, &query).await?);
        }
        Ok(items)
    }

    async fn fetch_history(
        &self,
        token: &AccessToken,
        artist: &Artist,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        let mut items = Vec::new();
        for category in Category::TRACKED {
            let query = AlbumQuery::history(category);
            items.extend(self.catalog.item_history(token, artist, &query).await?);
        }
        Ok(items)
    }
}
