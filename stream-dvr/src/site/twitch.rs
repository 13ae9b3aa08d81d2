//! Twitch site: HTTP polling of the Helix API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use super::{Site, run_tool};
use crate::config::TwitchConfig;
use crate::domain::{CanonicalState, RawState, RawStatus, StreamerIdentity};
use crate::{Error, Result};

const CLIENT_ID_ENV: &str = "TWITCH_CLIENT_ID";
const OAUTH_TOKEN_ENV: &str = "TWITCH_OAUTH_TOKEN";

#[derive(Debug, Deserialize)]
struct HelixPage<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
}

#[derive(Debug, Deserialize)]
struct HelixStream {
    #[serde(rename = "type", default)]
    kind: String,
}

/// Twitch plugin.
///
/// Identities carry the numeric user id so renamed channels keep their
/// roster entry; the display name is the login.
pub struct TwitchSite {
    name: String,
    client: Client,
    api_base: String,
    url_resolver: Vec<String>,
    tool_timeout: Duration,
    capture_states: Vec<CanonicalState>,
}

impl TwitchSite {
    /// Create the plugin. Fails when the API credentials are missing from
    /// both the configuration and the environment.
    pub fn new(name: &str, config: &TwitchConfig, capture_states: Vec<CanonicalState>) -> Result<Self> {
        let client_id = config
            .client_id
            .clone()
            .or_else(|| std::env::var(CLIENT_ID_ENV).ok())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::config(format!("site {name}: twitch client_id is required ({CLIENT_ID_ENV})"))
            })?;
        let token = config
            .oauth_token
            .clone()
            .or_else(|| std::env::var(OAUTH_TOKEN_ENV).ok())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::config(format!("site {name}: twitch oauth_token is required ({OAUTH_TOKEN_ENV})"))
            })?;

        if config.url_resolver.is_empty() {
            return Err(Error::config(format!("site {name}: url_resolver must not be empty")));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            "Client-Id",
            HeaderValue::from_str(&client_id)
                .map_err(|_| Error::config(format!("site {name}: invalid client_id")))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::config(format!("site {name}: invalid oauth_token")))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            name: name.to_string(),
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            url_resolver: config.url_resolver.clone(),
            tool_timeout: Duration::from_secs(config.request_timeout_secs.max(30)),
            capture_states,
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{}", self.api_base, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

fn user_identity(page: HelixPage<HelixUser>) -> Option<StreamerIdentity> {
    page.data
        .into_iter()
        .next()
        .map(|user| StreamerIdentity::new(user.id, user.login))
}

fn stream_state(page: &HelixPage<HelixStream>) -> RawState {
    match page.data.first() {
        None => RawState::NotLive,
        Some(stream) if stream.kind.is_empty() => RawState::NotLive,
        Some(stream) => RawState::parse(&stream.kind),
    }
}

#[async_trait]
impl Site for TwitchSite {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve_identity(&self, name: &str) -> Result<StreamerIdentity> {
        let login = name.trim().to_lowercase();
        let page: HelixPage<HelixUser> = self.get("users", &[("login", &login)]).await?;
        user_identity(page).ok_or_else(|| Error::not_found(&self.name, name))
    }

    async fn query_status(&self, identity: &StreamerIdentity) -> Result<RawStatus> {
        let page: HelixPage<HelixStream> = self
            .get("streams", &[("user_id", identity.id.as_str())])
            .await
            .map_err(|e| Error::query(identity.to_string(), e.to_string()))?;
        let state = stream_state(&page);
        debug!(site = %self.name, "{} reported {:?}", identity, state);
        Ok(RawStatus::new(state))
    }

    async fn stream_url(&self, identity: &StreamerIdentity, _status: &RawStatus) -> Result<String> {
        let output = run_tool(&self.url_resolver, &identity.name, self.tool_timeout)
            .await
            .map_err(|e| Error::query(identity.to_string(), e.to_string()))?;
        output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::query(identity.to_string(), "url resolver printed nothing"))
    }

    fn is_capturable(&self, state: CanonicalState) -> bool {
        self.capture_states.contains(&state)
    }
}
