//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A roster name could not be resolved to a streamer on the site.
    #[error("Could not find streamer {name} on {site}")]
    IdentityResolution { site: String, name: String },

    /// A status query failed (network, protocol or unknown identity).
    #[error("Status query for {streamer} failed: {message}")]
    Query { streamer: String, message: String },

    /// The recorder process could not be started.
    #[error("Failed to spawn recorder {program} for {streamer}: {source}")]
    Spawn {
        streamer: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Streamer {streamer} is not being captured")]
    NotCapturing { streamer: String },

    #[error("Streamer {streamer} is in both the primary and temporary roster")]
    RosterInvariantViolation { streamer: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(site: impl Into<String>, name: impl Into<String>) -> Self {
        Self::IdentityResolution {
            site: site.into(),
            name: name.into(),
        }
    }

    pub fn query(streamer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            streamer: streamer.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_path_error_mentions_operation_and_path() {
        let err = Error::io_path(
            "reading roster",
            Path::new("/tmp/twitch.toml"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        let msg = err.to_string();
        assert!(msg.contains("reading roster"));
        assert!(msg.contains("/tmp/twitch.toml"));
    }

    #[test]
    fn not_found_names_site_and_streamer() {
        let err = Error::not_found("twitch", "nobody");
        assert_eq!(err.to_string(), "Could not find streamer nobody on twitch");
    }
}
