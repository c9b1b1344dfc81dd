#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use release_watchbot::auth::{AccessToken, TokenProvider, TokenSet};
use release_watchbot::catalog::{
    AdmissionGate, CatalogClient, CatalogError, Method, ProviderRequest, ProviderResponse,
    Transport,
};
use release_watchbot::config::{self, Operator};
use release_watchbot::db::{self, NewUser, Pool};
use release_watchbot::model::{RunMode, User};
use release_watchbot::notify::{ChatDirectory, ChatTransport, Notifier};
use release_watchbot::playlist::PlaylistMirror;
use release_watchbot::sync::SyncEngine;
use reqwest::{StatusCode, Url};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const BASE: &str = "http://provider.test/";
pub const OPERATOR_CHAT: i64 = 999;

pub async fn setup_pool() -> Pool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn token() -> AccessToken {
    AccessToken::new("access-token")
}

pub fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

pub fn ok_json(value: Value) -> ProviderResponse {
    ProviderResponse::new(StatusCode::OK, value.to_string())
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub method: Method,
    pub url: Url,
    pub body: Option<Value>,
    pub started: Instant,
    pub finished: Instant,
}

type Handler = dyn Fn(&ProviderRequest) -> ProviderResponse + Send + Sync;

/// Transport double: answers with `handler`, records every exchange and
/// tracks how many exchanges are in flight at once.
pub struct FakeProvider {
    handler: Box<Handler>,
    latency: Duration,
    calls: Mutex<Vec<CallRecord>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeProvider {
    pub fn new(handler: impl Fn(&ProviderRequest) -> ProviderResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path_fragment: &str) -> Vec<CallRecord> {
        self.calls()
            .into_iter()
            .filter(|c| c.url.path().contains(path_fragment))
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeProvider {
    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse, CatalogError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let started = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let response = (self.handler)(&request);
        let finished = Instant::now();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(CallRecord {
            method: request.method,
            url: request.url,
            body: request.body,
            started,
            finished,
        });
        Ok(response)
    }
}

pub fn catalog_client(provider: Arc<FakeProvider>, gate: AdmissionGate) -> CatalogClient {
    CatalogClient::new(
        provider,
        gate,
        Url::parse(BASE).unwrap(),
        "US",
        Duration::from_secs(60),
    )
}

/// In-memory Spotify: followed artists, per-category albums, playlists.
#[derive(Default)]
pub struct SpotifyFake {
    pub artists: Vec<(String, String)>,
    pub albums: HashMap<(String, String), Vec<Value>>,
    /// Artist ids whose album requests fail with 500.
    pub broken_artists: HashSet<String>,
    /// Artist ids whose album requests are rejected with 401.
    pub revoked_artists: HashSet<String>,
    pub tracks_per_album: usize,
    pub playlists: Mutex<Vec<String>>,
    pub created_playlists: AtomicUsize,
    pub appended: Mutex<Vec<(String, Vec<String>)>>,
}

impl SpotifyFake {
    pub fn new() -> Self {
        Self {
            tracks_per_album: 2,
            ..Default::default()
        }
    }

    pub fn follow(&mut self, id: &str, name: &str) {
        self.artists.push((id.to_string(), name.to_string()));
    }

    pub fn release(&mut self, artist_id: &str, category: &str, id: &str, date: &str) {
        self.albums
            .entry((artist_id.to_string(), category.to_string()))
            .or_default()
            .push(album(id, &format!("Release {id}"), date));
    }

    pub fn appended(&self) -> Vec<(String, Vec<String>)> {
        self.appended.lock().unwrap().clone()
    }

    pub fn respond(&self, req: &ProviderRequest) -> ProviderResponse {
        let path = req.url.path().to_string();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match (req.method, segments.as_slice()) {
            (Method::Get, ["v1", "me", "following"]) => self.following(&req.url),
            (Method::Get, ["v1", "artists", artist_id, "albums"]) => {
                if self.revoked_artists.contains(*artist_id) {
                    return ProviderResponse::new(StatusCode::UNAUTHORIZED, "token revoked");
                }
                if self.broken_artists.contains(*artist_id) {
                    return ProviderResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom");
                }
                let category = query_param(&req.url, "include_groups").unwrap_or_default();
                let albums = self
                    .albums
                    .get(&(artist_id.to_string(), category))
                    .cloned()
                    .unwrap_or_default();
                ok_json(offset_page(&req.url, albums))
            }
            (Method::Get, ["v1", "albums", album_id, "tracks"]) => {
                let tracks: Vec<Value> = (0..self.tracks_per_album)
                    .map(|i| json!({ "id": format!("{album_id}-{i}"), "uri": format!("spotify:track:{album_id}-{i}") }))
                    .collect();
                ok_json(offset_page(&req.url, tracks))
            }
            (Method::Get, ["v1", "me"]) => ok_json(json!({ "id": "spotify-user" })),
            (Method::Get, ["v1", "me", "playlists"]) => {
                let playlists: Vec<Value> = self
                    .playlists
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|id| json!({ "id": id, "name": id }))
                    .collect();
                ok_json(offset_page(&req.url, playlists))
            }
            (Method::Post, ["v1", "users", "spotify-user", "playlists"]) => {
                let n = self.created_playlists.fetch_add(1, Ordering::SeqCst) + 1;
                let id = format!("pl-{n}");
                self.playlists.lock().unwrap().push(id.clone());
                ProviderResponse::new(StatusCode::CREATED, json!({ "id": id }).to_string())
            }
            (Method::Post, ["v1", "playlists", playlist_id, "tracks"]) => {
                if !self.playlists.lock().unwrap().iter().any(|p| p.as_str() == *playlist_id) {
                    return ProviderResponse::new(StatusCode::NOT_FOUND, "no such playlist");
                }
                let uris: Vec<String> = req
                    .body
                    .as_ref()
                    .and_then(|b| b.get("uris"))
                    .and_then(|u| serde_json::from_value(u.clone()).ok())
                    .unwrap_or_default();
                self.appended
                    .lock()
                    .unwrap()
                    .push((playlist_id.to_string(), uris));
                ProviderResponse::new(
                    StatusCode::CREATED,
                    json!({ "snapshot_id": "snap" }).to_string(),
                )
            }
            _ => ProviderResponse::new(StatusCode::NOT_FOUND, format!("no route for {path}")),
        }
    }

    fn following(&self, url: &Url) -> ProviderResponse {
        let limit: usize = query_param(url, "limit")
            .and_then(|l| l.parse().ok())
            .unwrap_or(20);
        let start: usize = query_param(url, "after")
            .and_then(|a| a.parse().ok())
            .unwrap_or(0);
        let end = (start + limit).min(self.artists.len());
        let items: Vec<Value> = self.artists[start.min(end)..end]
            .iter()
            .map(|(id, name)| json!({ "id": id, "name": name }))
            .collect();
        let after = if end < self.artists.len() {
            Value::String(end.to_string())
        } else {
            Value::Null
        };
        ok_json(json!({
            "artists": { "items": items, "cursors": { "after": after }, "total": self.artists.len() }
        }))
    }
}

pub fn album(id: &str, name: &str, date: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "release_date": date,
        "release_date_precision": "day",
        "external_urls": { "spotify": format!("https://open.spotify.com/album/{id}") }
    })
}

/// Spotify-style offset paging with a full `next` URL.
pub fn offset_page(url: &Url, all: Vec<Value>) -> Value {
    let limit: usize = query_param(url, "limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(20);
    let offset: usize = query_param(url, "offset")
        .and_then(|o| o.parse().ok())
        .unwrap_or(0);
    let end = (offset + limit).min(all.len());
    let items = all[offset.min(end)..end].to_vec();
    let next = if end < all.len() {
        let mut next = url.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "offset" && k != "limit")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        next.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("offset", &end.to_string())
            .append_pair("limit", &limit.to_string());
        Value::String(next.to_string())
    } else {
        Value::Null
    };
    json!({ "items": items, "next": next, "total": all.len() })
}

pub fn spotify_provider(fake: Arc<SpotifyFake>) -> FakeProvider {
    FakeProvider::new(move |req| fake.respond(req))
}

#[derive(Default)]
pub struct StaticTokens {
    pub rotate_to: Option<String>,
    pub fail: bool,
    pub refreshed: Mutex<Vec<String>>,
}

#[async_trait]
impl TokenProvider for StaticTokens {
    fn authorization_url(&self, state: &str) -> Result<Url> {
        Ok(Url::parse(&format!("http://accounts.test/authorize?state={state}"))?)
    }

    async fn exchange_code(&self, _code: &str) -> Result<TokenSet> {
        Ok(TokenSet {
            access_token: token(),
            refresh_token: Some("refresh-from-code".into()),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        self.refreshed.lock().unwrap().push(refresh_token.to_string());
        if self.fail {
            return Err(anyhow!("refresh token revoked"));
        }
        Ok(TokenSet {
            access_token: token(),
            refresh_token: self.rotate_to.clone(),
        })
    }
}

/// Chat double: records deliveries and resolves handles from a fixed map.
#[derive(Default)]
pub struct RecordingChat {
    pub directory: HashMap<String, i64>,
    pub unreachable: HashSet<i64>,
    pub sent: Mutex<Vec<(i64, String)>>,
    pub lookups: AtomicUsize,
}

impl RecordingChat {
    pub fn with_directory(entries: &[(&str, i64)]) -> Self {
        Self {
            directory: entries.iter().map(|(h, id)| (h.to_string(), *id)).collect(),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingChat {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        if self.unreachable.contains(&chat_id) {
            return Err(anyhow!("bot was blocked by the user"));
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ChatDirectory for RecordingChat {
    async fn lookup(&self, handle: &str) -> Result<Option<i64>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.directory.get(handle).copied())
    }
}

pub fn notifier(chat: Arc<RecordingChat>, pool: &Pool) -> Arc<Notifier> {
    Arc::new(Notifier::new(
        chat.clone(),
        chat,
        pool.clone(),
        Some(Operator {
            chat_id: Some(OPERATOR_CHAT),
            handle: None,
        }),
    ))
}

pub struct Harness {
    pub pool: Pool,
    pub fake: Arc<SpotifyFake>,
    pub provider: Arc<FakeProvider>,
    pub chat: Arc<RecordingChat>,
    pub tokens: Arc<StaticTokens>,
    pub gate: AdmissionGate,
}

impl Harness {
    pub async fn new(fake: SpotifyFake) -> Self {
        Self::with_provider(fake, Duration::ZERO).await
    }

    pub async fn with_provider(fake: SpotifyFake, latency: Duration) -> Self {
        let fake = Arc::new(fake);
        let provider = Arc::new(spotify_provider(fake.clone()).with_latency(latency));
        Self {
            pool: setup_pool().await,
            fake,
            provider,
            chat: Arc::new(RecordingChat::with_directory(&[("alice", 101), ("bob", 202)])),
            tokens: Arc::new(StaticTokens::default()),
            gate: AdmissionGate::new(),
        }
    }

    pub fn catalog(&self) -> CatalogClient {
        catalog_client(self.provider.clone(), self.gate.clone())
    }

    pub fn engine(&self, mode: RunMode, today: NaiveDate, day_reset: bool) -> SyncEngine {
        SyncEngine::new(
            self.catalog(),
            self.tokens.clone(),
            self.pool.clone(),
            notifier(self.chat.clone(), &self.pool),
            mode,
            today,
        )
        .with_day_reset(day_reset)
    }

    pub fn engine_with_mirror(&self, mode: RunMode, today: NaiveDate, day_reset: bool) -> SyncEngine {
        let cfg = config::Playlist::default();
        self.engine(mode, today, day_reset)
            .with_mirror(PlaylistMirror::new(self.catalog(), self.pool.clone(), &cfg))
    }

    pub async fn add_user(&self, id: &str, handle: &str) -> User {
        db::insert_user(
            &self.pool,
            &NewUser {
                id: id.into(),
                username: handle.into(),
                chat_handle: handle.into(),
                refresh_token: format!("refresh-{id}"),
            },
        )
        .await
        .unwrap();
        self.user(id).await
    }

    pub async fn user(&self, id: &str) -> User {
        db::get_user(&self.pool, id).await.unwrap().unwrap()
    }
}
