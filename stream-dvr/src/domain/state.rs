//! Streamer states: what a site reports and what the recorder acts on.

use serde::{Deserialize, Serialize};

use super::identity::StreamerIdentity;

/// Status value as reported by a site.
///
/// This is the union of every platform vocabulary the site plugins speak.
/// Parsing never fails: anything unknown is kept as `Unrecognized`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawState {
    /// Free, publicly viewable chat.
    FreeChat,
    GroupShow,
    Private,
    TruePrivate,
    Away,
    /// Logged in to the site with the stream turned off.
    Online,
    Offline,
    /// Broadcasting (HTTP APIs that only know live/not live).
    Live,
    NotLive,
    Unrecognized(String),
}

impl RawState {
    /// Parse a platform status token. Case-insensitive and total.
    pub fn parse(s: &str) -> Self {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "freechat" | "public" | "publicchat" => Self::FreeChat,
            "groupshow" | "group" => Self::GroupShow,
            "private" => Self::Private,
            "trueprivate" | "truepvt" => Self::TruePrivate,
            "away" => Self::Away,
            "online" => Self::Online,
            "offline" => Self::Offline,
            "live" | "streaming" => Self::Live,
            "notlive" => Self::NotLive,
            _ => Self::Unrecognized(s.to_string()),
        }
    }
}

/// Platform-agnostic streamer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalState {
    Offline,
    Away,
    PublicChat,
    GroupShow,
    Private,
    TruePrivate,
    /// Not probed yet, or the site reported something we do not know.
    #[default]
    Unknown,
}

impl CanonicalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "OFFLINE",
            Self::Away => "AWAY",
            Self::PublicChat => "PUBLIC_CHAT",
            Self::GroupShow => "GROUP_SHOW",
            Self::Private => "PRIVATE",
            Self::TruePrivate => "TRUE_PRIVATE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Human readable label, the way a status list shows it.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Offline => "Offline",
            Self::Away => "Away",
            Self::PublicChat => "Public Chat",
            Self::GroupShow => "Group Show",
            Self::Private => "Private",
            Self::TruePrivate => "True Private",
            Self::Unknown => "Unknown",
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }
}

impl std::fmt::Display for CanonicalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Map a raw platform state onto the canonical set. Pure and total.
pub fn classify(raw: &RawState) -> CanonicalState {
    match raw {
        RawState::FreeChat | RawState::Live => CanonicalState::PublicChat,
        RawState::GroupShow => CanonicalState::GroupShow,
        RawState::Private => CanonicalState::Private,
        RawState::TruePrivate => CanonicalState::TruePrivate,
        RawState::Away | RawState::Online => CanonicalState::Away,
        RawState::Offline | RawState::NotLive => CanonicalState::Offline,
        RawState::Unrecognized(_) => CanonicalState::Unknown,
    }
}

/// Result of one successful status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatus {
    pub state: RawState,
    /// Playable stream URL, for sites that hand it out with the status.
    pub stream_url: Option<String>,
}

impl RawStatus {
    pub fn new(state: RawState) -> Self {
        Self {
            state,
            stream_url: None,
        }
    }

    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }
}

/// Last known status of a tracked streamer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerStatus {
    pub identity: StreamerIdentity,
    pub canonical_state: CanonicalState,
    pub display_state: String,
    pub last_raw_state: Option<RawState>,
}

impl StreamerStatus {
    /// Status of a streamer that has not been probed yet.
    pub fn unprobed(identity: StreamerIdentity) -> Self {
        Self {
            identity,
            canonical_state: CanonicalState::Unknown,
            display_state: CanonicalState::Unknown.label().to_string(),
            last_raw_state: None,
        }
    }
}
