//! Command site: status comes from an external scraping tool.
//!
//! The tool is run once per streamer and query. It prints either a JSON
//! object `{"state": "...", "url": "..."}` or a bare state token.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Site, run_tool};
use crate::config::CommandConfig;
use crate::domain::{CanonicalState, RawState, RawStatus, StreamerIdentity};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct StatusReport {
    state: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdentityReport {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

pub struct CommandSite {
    name: String,
    status_command: Vec<String>,
    resolve_command: Option<Vec<String>>,
    url_command: Option<Vec<String>>,
    timeout: Duration,
    capture_states: Vec<CanonicalState>,
}

impl CommandSite {
    pub fn new(name: &str, config: &CommandConfig, capture_states: Vec<CanonicalState>) -> Result<Self> {
        if config.status_command.is_empty() {
            return Err(Error::config(format!("site {name}: status_command must not be empty")));
        }
        if config.timeout_secs == 0 {
            return Err(Error::config(format!("site {name}: timeout_secs must be > 0")));
        }
        Ok(Self {
            name: name.to_string(),
            status_command: config.status_command.clone(),
            resolve_command: config.resolve_command.clone().filter(|c| !c.is_empty()),
            url_command: config.url_command.clone().filter(|c| !c.is_empty()),
            timeout: Duration::from_secs(config.timeout_secs),
            capture_states,
        })
    }
}

/// Parse the status tool's output.
fn parse_status(output: &str) -> RawStatus {
    match serde_json::from_str::<StatusReport>(output) {
        Ok(report) => {
            let status = RawStatus::new(RawState::parse(&report.state));
            match report.url.filter(|u| !u.is_empty()) {
                Some(url) => status.with_stream_url(url),
                None => status,
            }
        }
        Err(_) => RawStatus::new(RawState::parse(output.lines().next().unwrap_or_default())),
    }
}

#[async_trait]
impl Site for CommandSite {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve_identity(&self, name: &str) -> Result<StreamerIdentity> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::not_found(&self.name, name));
        }
        let Some(command) = &self.resolve_command else {
            return Ok(StreamerIdentity::from_name(name));
        };

        let output = run_tool(command, name, self.timeout)
            .await
            .map_err(|_| Error::not_found(&self.name, name))?;
        let report: IdentityReport = serde_json::from_str(&output)?;
        Ok(StreamerIdentity::new(
            report.id,
            report.name.unwrap_or_else(|| name.to_string()),
        ))
    }

    async fn query_status(&self, identity: &StreamerIdentity) -> Result<RawStatus> {
        let output = run_tool(&self.status_command, identity.id.as_str(), self.timeout)
            .await
            .map_err(|e| Error::query(identity.to_string(), e.to_string()))?;
        Ok(parse_status(&output))
    }

    async fn stream_url(&self, identity: &StreamerIdentity, status: &RawStatus) -> Result<String> {
        if let Some(url) = &status.stream_url {
            return Ok(url.clone());
        }
        let Some(command) = &self.url_command else {
            return Err(Error::query(identity.to_string(), "site reported no stream url"));
        };
        let output = run_tool(command, identity.id.as_str(), self.timeout)
            .await
            .map_err(|e| Error::query(identity.to_string(), e.to_string()))?;
        output
            .lines()
            .next()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::query(identity.to_string(), "url command printed nothing"))
    }

    fn is_capturable(&self, state: CanonicalState) -> bool {
        self.capture_states.contains(&state)
    }
}
