//! Persisted primary rosters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::StreamerIdentity;
use crate::utils::fs;
use crate::{Error, Result};

/// Storage for the primary roster of each site.
#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Load the saved roster. A site that never saved one has an empty roster.
    async fn load(&self, site: &str) -> Result<Vec<StreamerIdentity>>;

    async fn save(&self, site: &str, identities: &[StreamerIdentity]) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RosterFile {
    #[serde(default)]
    streamers: Vec<StreamerIdentity>,
}

/// One TOML file per site:
///
/// ```toml
/// [[streamers]]
/// id = "141981764"
/// name = "twitchdev"
/// ```
#[derive(Debug, Clone)]
pub struct TomlRosterStore {
    dir: PathBuf,
    overrides: HashMap<String, PathBuf>,
}

impl TomlRosterStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            overrides: HashMap::new(),
        }
    }

    /// Use `path` instead of `<dir>/<site>.toml` for one site.
    pub fn with_file(mut self, site: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(site.into(), path.into());
        self
    }

    pub fn path_for(&self, site: &str) -> PathBuf {
        self.overrides
            .get(site)
            .cloned()
            .unwrap_or_else(|| self.dir.join(format!("{site}.toml")))
    }

    async fn read(path: &Path) -> Result<RosterFile> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RosterFile::default()),
            Err(e) => Err(Error::io_path("reading roster", path, e)),
        }
    }
}

#[async_trait]
impl RosterStore for TomlRosterStore {
    async fn load(&self, site: &str) -> Result<Vec<StreamerIdentity>> {
        let path = self.path_for(site);
        let file = Self::read(&path).await?;
        debug!(site = %site, "Loaded {} streamers from {}", file.streamers.len(), path.display());
        Ok(file.streamers)
    }

    async fn save(&self, site: &str, identities: &[StreamerIdentity]) -> Result<()> {
        let path = self.path_for(site);
        let file = RosterFile {
            streamers: identities.to_vec(),
        };
        let contents = toml::to_string(&file)?;
        fs::write_atomic(&path, contents.as_bytes()).await?;
        debug!(site = %site, "Saved {} streamers to {}", identities.len(), path.display());
        Ok(())
    }
}
