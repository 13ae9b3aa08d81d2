//! Streamer identities and roster entries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable key for a streamer on one site.
///
/// This is the platform-assigned id when the site has one, otherwise the
/// display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamerId(String);

impl StreamerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A resolved streamer. Immutable once resolved.
///
/// Equality and hashing only look at `id`; two identities with the same id
/// and different display names are the same streamer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerIdentity {
    pub id: StreamerId,
    pub name: String,
}

impl StreamerIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: StreamerId::new(id),
            name: name.into(),
        }
    }

    /// Identity for sites without a stable id: the name is the id.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: StreamerId::new(name.clone()),
            name,
        }
    }
}

impl PartialEq for StreamerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for StreamerIdentity {}

impl std::hash::Hash for StreamerIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for StreamerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.id.as_str() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.id)
        }
    }
}

/// How a streamer belongs to the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    /// Persisted to the roster store.
    Primary,
    /// Lives only as long as the process.
    Temporary,
}

/// One streamer the site loop tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub identity: StreamerIdentity,
    pub membership: Membership,
}

impl RosterEntry {
    pub fn primary(identity: StreamerIdentity) -> Self {
        Self {
            identity,
            membership: Membership::Primary,
        }
    }

    pub fn temporary(identity: StreamerIdentity) -> Self {
        Self {
            identity,
            membership: Membership::Temporary,
        }
    }
}
