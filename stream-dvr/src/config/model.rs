//! Configuration file model.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::domain::CanonicalState;
use crate::{Error, Result};

/// Top-level configuration, read from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where recordings are written while in progress.
    #[serde(default = "default_capture_dir")]
    pub capture_dir: PathBuf,
    /// Finished, non-empty recordings are moved here when set.
    #[serde(default)]
    pub completed_dir: Option<PathBuf>,
    /// Directory holding one roster file per site.
    #[serde(default = "default_roster_dir")]
    pub roster_dir: PathBuf,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// Rotate captures larger than this. 0 disables rotation.
    #[serde(default)]
    pub max_file_size_mb: u64,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    #[serde(default)]
    pub log_filter: Option<String>,
    /// Days of log files to keep. 0 keeps everything.
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u64,
    /// Shared roster update file polled once per cycle.
    #[serde(default)]
    pub updates_file: Option<PathBuf>,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

fn default_capture_dir() -> PathBuf {
    PathBuf::from("captures")
}

fn default_roster_dir() -> PathBuf {
    PathBuf::from("rosters")
}

fn default_scan_interval() -> u64 {
    60
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u64 {
    7
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            capture_dir: default_capture_dir(),
            completed_dir: None,
            roster_dir: default_roster_dir(),
            scan_interval_secs: default_scan_interval(),
            max_file_size_mb: 0,
            log_dir: default_log_dir(),
            log_filter: None,
            log_retention_days: default_log_retention_days(),
            updates_file: None,
            recorder: RecorderConfig::default(),
            sites: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Read, parse and validate a config file.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io_path("reading config", path, e))?;
        let config = Self::from_toml(&contents)?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no site loop could run with.
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            return Err(Error::config("scan_interval_secs must be greater than 0"));
        }
        if self.recorder.program.trim().is_empty() {
            return Err(Error::config("recorder.program must not be empty"));
        }
        let date_format = &self.recorder.filename_date_format;
        if StrftimeItems::new(date_format).any(|item| matches!(item, Item::Error)) {
            return Err(Error::config(format!(
                "recorder.filename_date_format {date_format:?} is not a valid strftime pattern"
            )));
        }
        if self.max_file_size_mb.checked_mul(1024 * 1024).is_none() {
            return Err(Error::config(format!(
                "max_file_size_mb {} is too large",
                self.max_file_size_mb
            )));
        }

        let mut names = HashSet::new();
        for site in &self.sites {
            if site.name.trim().is_empty() {
                return Err(Error::config("site name must not be empty"));
            }
            if !names.insert(site.name.as_str()) {
                return Err(Error::config(format!("duplicate site name {}", site.name)));
            }
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Rotation threshold in bytes, `None` when rotation is disabled.
    pub fn max_file_size_bytes(&self) -> Option<u64> {
        self.max_file_size_mb
            .checked_mul(1024 * 1024)
            .filter(|bytes| *bytes > 0)
    }

    pub fn enabled_sites(&self) -> impl Iterator<Item = &SiteConfig> {
        self.sites.iter().filter(|s| s.enabled)
    }
}

/// External recorder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Path to the ffmpeg binary.
    #[serde(default = "default_recorder_program")]
    pub program: String,
    /// Extra arguments placed before `-i`.
    #[serde(default)]
    pub input_args: Vec<String>,
    /// Extra arguments placed before the output path.
    #[serde(default)]
    pub output_args: Vec<String>,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// `chrono` format string for the timestamp in file names.
    #[serde(default = "default_filename_date_format")]
    pub filename_date_format: String,
    /// Time a recorder gets to finish its file after being asked to quit.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

fn default_recorder_program() -> String {
    "ffmpeg".to_string()
}

fn default_extension() -> String {
    "ts".to_string()
}

fn default_filename_date_format() -> String {
    "%Y-%m-%d_%H-%M-%S".to_string()
}

fn default_stop_grace() -> u64 {
    10
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            program: default_recorder_program(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            extension: default_extension(),
            filename_date_format: default_filename_date_format(),
            stop_grace_secs: default_stop_grace(),
        }
    }
}

/// One `[[sites]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Roster file override. Defaults to `<roster_dir>/<name>.toml`.
    #[serde(default)]
    pub roster_file: Option<PathBuf>,
    /// States in which a streamer gets recorded.
    #[serde(default = "default_capture_states")]
    pub capture_states: Vec<CanonicalState>,
    #[serde(flatten)]
    pub kind: SiteKind,
}

fn default_true() -> bool {
    true
}

fn default_capture_states() -> Vec<CanonicalState> {
    vec![CanonicalState::PublicChat]
}

/// Site plugin selection, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SiteKind {
    Twitch(TwitchConfig),
    Command(CommandConfig),
}

impl SiteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twitch(_) => "twitch",
            Self::Command(_) => "command",
        }
    }
}

/// Twitch Helix API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitchConfig {
    /// Falls back to `TWITCH_CLIENT_ID`.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Falls back to `TWITCH_OAUTH_TOKEN`.
    #[serde(default)]
    pub oauth_token: Option<String>,
    #[serde(default = "default_twitch_api_base")]
    pub api_base: String,
    /// Command printing the playable URL of a live channel. `{name}` is
    /// replaced with the channel login.
    #[serde(default = "default_url_resolver")]
    pub url_resolver: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_twitch_api_base() -> String {
    "https://api.twitch.tv/helix".to_string()
}

fn default_url_resolver() -> Vec<String> {
    ["streamlink", "--stream-url", "https://twitch.tv/{name}", "best"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            oauth_token: None,
            api_base: default_twitch_api_base(),
            url_resolver: default_url_resolver(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Settings for sites scraped through an external command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Prints `{"state": "...", "url": "..."}` for `{name}`.
    #[serde(default)]
    pub status_command: Vec<String>,
    /// Prints `{"id": "...", "name": "..."}`. Without it the name is the id.
    #[serde(default)]
    pub resolve_command: Option<Vec<String>>,
    /// Prints the stream URL when the status does not carry one.
    #[serde(default)]
    pub url_command: Option<Vec<String>>,
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    30
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            status_command: Vec::new(),
            resolve_command: None,
            url_command: None,
            timeout_secs: default_command_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
capture_dir = "/srv/captures"
completed_dir = "/srv/done"
scan_interval_secs = 30
max_file_size_mb = 2048
updates_file = "updates.toml"

[recorder]
input_args = ["-rw_timeout", "10000000"]
extension = "mkv"

[[sites]]
name = "twitch"
kind = "twitch"
client_id = "abc"
oauth_token = "def"

[[sites]]
name = "cams"
kind = "command"
enabled = false
capture_states = ["PUBLIC_CHAT", "GROUP_SHOW"]
status_command = ["cam-tool", "status", "{name}"]
"#;

    #[test]
    fn parses_full_config() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.capture_dir, PathBuf::from("/srv/captures"));
        assert_eq!(config.scan_interval(), Duration::from_secs(30));
        assert_eq!(config.max_file_size_bytes(), Some(2048 * 1024 * 1024));
        assert_eq!(config.recorder.program, "ffmpeg");
        assert_eq!(config.recorder.extension, "mkv");
        assert_eq!(config.sites.len(), 2);

        let twitch = &config.sites[0];
        assert!(twitch.enabled);
        assert_eq!(twitch.capture_states, vec![CanonicalState::PublicChat]);
        match &twitch.kind {
            SiteKind::Twitch(t) => {
                assert_eq!(t.client_id.as_deref(), Some("abc"));
                assert_eq!(t.api_base, "https://api.twitch.tv/helix");
            }
            other => panic!("unexpected kind {other:?}"),
        }

        let cams = &config.sites[1];
        assert!(!cams.enabled);
        assert_eq!(
            cams.capture_states,
            vec![CanonicalState::PublicChat, CanonicalState::GroupShow]
        );
        match &cams.kind {
            SiteKind::Command(c) => {
                assert_eq!(c.status_command, vec!["cam-tool", "status", "{name}"]);
                assert_eq!(c.timeout_secs, 30);
            }
            other => panic!("unexpected kind {other:?}"),
        }

        assert_eq!(config.enabled_sites().count(), 1);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.scan_interval_secs, 60);
        assert_eq!(config.max_file_size_bytes(), None);
        assert!(config.sites.is_empty());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = AppConfig::from_toml("scan_interval_secs = 0").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn invalid_date_format_is_rejected() {
        let err = AppConfig::from_toml("[recorder]\nfilename_date_format = \"%Q\"").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("%Q"));

        let ok = AppConfig::from_toml("[recorder]\nfilename_date_format = \"%Y%m%d-%H%M\"");
        assert!(ok.is_ok());
    }

    #[test]
    fn oversized_rotation_threshold_is_rejected() {
        let toml = format!("max_file_size_mb = {}", i64::MAX);
        let err = AppConfig::from_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("max_file_size_mb"));
    }

    #[test]
    fn duplicate_site_names_are_rejected() {
        let toml = r#"
[[sites]]
name = "a"
kind = "command"
status_command = ["x"]

[[sites]]
name = "a"
kind = "command"
status_command = ["y"]
"#;
        let err = AppConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate site name a"));
    }

    #[test]
    fn unknown_site_kind_fails_to_parse() {
        let toml = r#"
[[sites]]
name = "a"
kind = "carrier-pigeon"
"#;
        assert!(matches!(AppConfig::from_toml(toml), Err(Error::TomlDe(_))));
    }
}
