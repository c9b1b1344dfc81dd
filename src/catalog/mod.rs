//! Spotify catalog client.
//!
//! Every request goes through [`CatalogClient::execute`], which owns the
//! retry policy and the admission gate:
//!
//! - at most [`MAX_ATTEMPTS`] attempts per logical call;
//! - `429` sleeps for `Retry-After` (1s when missing) and retries, unless the
//!   wait exceeds the configured threshold, which is fatal;
//! - `401` is fatal and never retried;
//! - any other failure is returned straight away;
//! - exhausting the attempts yields the empty (default) result.

use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::auth::AccessToken;
use crate::config::Config;

pub mod error;
pub mod gate;
pub mod model;
pub mod transport;

pub use error::{is_fatal, CatalogError};
pub use gate::AdmissionGate;
pub use transport::{HttpTransport, Method, ProviderRequest, ProviderResponse, Transport};

use model::{AlbumObject, Artist, CatalogItem, Category, FollowedArtists, Page};

pub const MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

const FOLLOWING_PAGE_SIZE: u32 = 50;
const LATEST_PAGE_SIZE: u32 = 5;
const HISTORY_PAGE_SIZE: u32 = 50;

/// Query for `/v1/artists/{id}/albums`, built fresh at each call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumQuery {
    pub category: Category,
    pub limit: u32,
}

impl AlbumQuery {
    pub fn latest(category: Category) -> Self {
        Self {
            category,
            limit: LATEST_PAGE_SIZE,
        }
    }

    pub fn history(category: Category) -> Self {
        Self {
            category,
            limit: HISTORY_PAGE_SIZE,
        }
    }

    fn params(&self, market: &str) -> Vec<(&'static str, String)> {
        vec![
            ("include_groups", self.category.as_str().to_string()),
            ("limit", self.limit.to_string()),
            ("market", market.to_string()),
        ]
    }
}

/// Result of a listing that may stop early on a non-fatal error.
#[derive(Debug)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub interrupted: Option<CatalogError>,
}

#[derive(Clone)]
pub struct CatalogClient {
    transport: Arc<dyn Transport>,
    gate: AdmissionGate,
    base_url: Url,
    market: String,
    max_retry_wait: Duration,
}

impl fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogClient")
            .field("base_url", &self.base_url)
            .field("market", &self.market)
            .finish_non_exhaustive()
    }
}

impl CatalogClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        gate: AdmissionGate,
        base_url: Url,
        market: impl Into<String>,
        max_retry_wait: Duration,
    ) -> Self {
        Self {
            transport,
            gate,
            base_url,
            market: market.into(),
            max_retry_wait,
        }
    }

    pub fn from_config(cfg: &Config, gate: AdmissionGate) -> Result<Self, CatalogError> {
        let base_url = parse_url(&cfg.spotify.api_base)?;
        Ok(Self::new(
            Arc::new(HttpTransport::new()?),
            gate,
            base_url,
            cfg.spotify.market.clone(),
            Duration::from_secs(cfg.spotify.max_retry_wait_seconds),
        ))
    }

    /// GET `endpoint` (relative to the API base) with query `params`.
    pub async fn request<T>(
        &self,
        token: &AccessToken,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, CatalogError>
    where
        T: DeserializeOwned + Default,
    {
        let mut url = self.endpoint(endpoint)?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        self.execute(token, Method::Get, url, None).await
    }

    /// GET a full follow-up URL taken from a page's `next` field.
    pub async fn request_following<T>(
        &self,
        token: &AccessToken,
        next: &str,
    ) -> Result<T, CatalogError>
    where
        T: DeserializeOwned + Default,
    {
        let url = parse_url(next)?;
        self.execute(token, Method::Get, url, None).await
    }

    /// POST a JSON body to `endpoint`.
    pub async fn post<T>(
        &self,
        token: &AccessToken,
        endpoint: &str,
        body: Value,
    ) -> Result<T, CatalogError>
    where
        T: DeserializeOwned + Default,
    {
        let url = self.endpoint(endpoint)?;
        self.execute(token, Method::Post, url, Some(body)).await
    }

    fn endpoint(&self, endpoint: &str) -> Result<Url, CatalogError> {
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| CatalogError::Url {
                url: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    #[instrument(skip_all, fields(method = ?method, url = %url.path()))]
    async fn execute<T>(
        &self,
        token: &AccessToken,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<T, CatalogError>
    where
        T: DeserializeOwned + Default,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let request = ProviderRequest {
                method,
                url: url.clone(),
                bearer: token.secret().to_string(),
                body: body.clone(),
            };
            let response = {
                let _permit = self.gate.admit().await?;
                debug!(attempt, "sending provider request");
                self.transport.send(request).await?
            };

            match response.status {
                status if status.is_success() => {
                    if response.body.trim().is_empty() {
                        return Ok(T::default());
                    }
                    return Ok(serde_json::from_str(&response.body)?);
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let wait = retry_after(response.retry_after.as_deref());
                    if wait > self.max_retry_wait {
                        return Err(CatalogError::RateLimitExceeded {
                            wait_secs: wait.as_secs(),
                            limit_secs: self.max_retry_wait.as_secs(),
                        });
                    }
                    if attempt == MAX_ATTEMPTS {
                        break;
                    }
                    warn!(attempt, wait_secs = wait.as_secs(), "rate limited; backing off");
                    tokio::time::sleep(wait).await;
                }
                StatusCode::UNAUTHORIZED => {
                    return Err(CatalogError::Unauthorized {
                        body: response.body,
                    });
                }
                status => {
                    return Err(CatalogError::Status {
                        status,
                        body: response.body,
                    });
                }
            }
        }

        warn!(attempts = MAX_ATTEMPTS, "provider kept rate limiting; returning empty result");
        Ok(T::default())
    }

    /// Walk `next` links starting after `first`, concatenating items.
    pub async fn follow_pages<T>(
        &self,
        token: &AccessToken,
        first: Page<T>,
    ) -> Result<Vec<T>, CatalogError>
    where
        T: DeserializeOwned,
    {
        let mut items = first.items;
        let mut next = first.next;
        while let Some(link) = next {
            let page: Page<T> = self.request_following(token, &link).await?;
            items.extend(page.items);
            next = page.next;
        }
        Ok(items)
    }

    /// All followed artists, by cursor pagination.
    ///
    /// A non-fatal failure stops the walk and keeps what was gathered so far;
    /// only fatal errors are returned as `Err`.
    #[instrument(skip_all)]
    pub async fn followed_artists(
        &self,
        token: &AccessToken,
    ) -> Result<Listing<Artist>, CatalogError> {
        let mut artists = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut params = vec![
                ("type", "artist".to_string()),
                ("limit", FOLLOWING_PAGE_SIZE.to_string()),
            ];
            if let Some(cursor) = &after {
                params.push(("after", cursor.clone()));
            }
            let page: FollowedArtists = match self.request(token, "v1/me/following", &params).await
            {
                Ok(page) => page,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(error = %err, gathered = artists.len(), "artist listing interrupted");
                    return Ok(Listing {
                        items: artists,
                        interrupted: Some(err),
                    });
                }
            };
            after = page.artists.after_cursor().map(str::to_owned);
            artists.extend(page.artists.items);
            if after.is_none() {
                break;
            }
        }
        debug!(count = artists.len(), "listed followed artists");
        Ok(Listing {
            items: artists,
            interrupted: None,
        })
    }

    /// One bounded page of the artist's most recent items in `query.category`.
    pub async fn latest_items(
        &self,
        token: &AccessToken,
        artist: &Artist,
        query: &AlbumQuery,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        let endpoint = format!("v1/artists/{}/albums", artist.id);
        let page: Page<AlbumObject> = self
            .request(token, &endpoint, &query.params(&self.market))
            .await?;
        Ok(page
            .items
            .into_iter()
            .map(|album| CatalogItem::from_album(album, query.category, artist))
            .collect())
    }

    /// The artist's entire history in `query.category`, following `next`
    /// links to exhaustion.
    pub async fn item_history(
        &self,
        token: &AccessToken,
        artist: &Artist,
        query: &AlbumQuery,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        let endpoint = format!("v1/artists/{}/albums", artist.id);
        let first: Page<AlbumObject> = self
            .request(token, &endpoint, &query.params(&self.market))
            .await?;
        let albums = self.follow_pages(token, first).await?;
        Ok(albums
            .into_iter()
            .map(|album| CatalogItem::from_album(album, query.category, artist))
            .collect())
    }
}

fn parse_url(raw: &str) -> Result<Url, CatalogError> {
    Url::parse(raw).map_err(|e| CatalogError::Url {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Seconds from a `Retry-After` header; missing or non-numeric means 1s.
pub fn retry_after(header: Option<&str>) -> Duration {
    let secs = header
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    Duration::from_secs(secs)
}
