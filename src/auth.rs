//! OAuth2 authorization-code client for the Spotify accounts service.
//!
//! The bot never owns credentials: users grant a refresh token once through
//! `add_user`, and every sync cycle trades it for a short-lived access token.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::config::Config;

pub const SCOPES: &str =
    "user-follow-read playlist-modify-public playlist-modify-private playlist-read-private";

/// Short-lived bearer token. Held in memory for one cycle; there is no way
/// to persist it through the store API.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: AccessToken,
    /// Present on code exchange, and on refresh when the provider rotates it.
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    fn authorization_url(&self, state: &str) -> Result<Url>;

    async fn exchange_code(&self, code: &str) -> Result<TokenSet>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet>;
}

#[derive(Clone)]
pub struct SpotifyOAuth {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    accounts_base: Url,
}

impl fmt::Debug for SpotifyOAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyOAuth")
            .field("client_id", &self.client_id)
            .field("accounts_base", &self.accounts_base)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl SpotifyOAuth {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let accounts_base =
            Url::parse(&cfg.spotify.accounts_base).context("invalid spotify.accounts_base")?;
        let http = Client::builder()
            .user_agent("release-watchbot/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build token client")?;
        Ok(Self {
            http,
            client_id: cfg.spotify.client_id.clone(),
            client_secret: cfg.spotify.client_secret.clone(),
            redirect_uri: cfg.spotify.redirect_uri.clone(),
            accounts_base,
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet> {
        let url = self
            .accounts_base
            .join("api/token")
            .context("invalid accounts base URL")?;
        let res = self
            .http
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await
            .context("failed to reach token endpoint")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("token endpoint error {}: {}", status, body));
        }
        let payload: TokenResponse = res.json().await.context("invalid token response")?;
        Ok(TokenSet {
            access_token: AccessToken::new(payload.access_token),
            refresh_token: payload.refresh_token.filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl TokenProvider for SpotifyOAuth {
    fn authorization_url(&self, state: &str) -> Result<Url> {
        let mut url = self
            .accounts_base
            .join("authorize")
            .context("invalid accounts base URL")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", SCOPES)
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        let tokens = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &self.redirect_uri),
            ])
            .await?;
        if tokens.refresh_token.is_none() {
            return Err(anyhow!("token endpoint returned no refresh token"));
        }
        Ok(tokens)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}
