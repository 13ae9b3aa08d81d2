//! Shared roster update feed.
//!
//! An external tool (or a human) appends names to a TOML file; each site
//! loop drains its own table once per cycle:
//!
//! ```toml
//! [twitch]
//! include = ["alice"]
//! exclude = ["bob"]
//! include_temporary = ["carol"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::utils::fs;
use crate::{Error, Result};

/// Pending roster changes for one site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_temporary: Vec<String>,
}

impl RosterUpdate {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.include_temporary.is_empty()
    }

    /// Append `other`'s names after ours.
    pub fn merge(&mut self, other: RosterUpdate) {
        self.include.extend(other.include);
        self.exclude.extend(other.exclude);
        self.include_temporary.extend(other.include_temporary);
    }
}

/// Update file shared by every site loop.
///
/// Reads and rewrites are serialized so two sites draining at once never
/// lose each other's entries.
#[derive(Debug)]
pub struct UpdateFeed {
    path: PathBuf,
    lock: Mutex<()>,
}

impl UpdateFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the pending update for `site`, leaving other sites' tables alone.
    pub async fn drain(&self, site: &str) -> Result<RosterUpdate> {
        let _guard = self.lock.lock().await;

        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RosterUpdate::default()),
            Err(e) => return Err(Error::io_path("reading updates", &self.path, e)),
        };

        let mut tables: BTreeMap<String, RosterUpdate> = toml::from_str(&contents)?;
        let update = tables.remove(site).unwrap_or_default();
        if update.is_empty() {
            return Ok(update);
        }

        tables.insert(site.to_string(), RosterUpdate::default());
        let contents = toml::to_string(&tables)?;
        fs::write_atomic(&self.path, contents.as_bytes()).await?;

        debug!(
            site = %site,
            "Drained roster update: {} include, {} exclude, {} temporary",
            update.include.len(),
            update.exclude.len(),
            update.include_temporary.len()
        );
        Ok(update)
    }
}
