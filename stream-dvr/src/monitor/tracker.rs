//! Streamer state machine.
//!
//! Keeps the last known status of every tracked streamer, detects
//! transitions and turns them into capture decisions.

use std::collections::HashMap;

use tracing::info;

use crate::domain::{CanonicalState, RawState, StreamerId, StreamerIdentity, StreamerStatus, classify};

/// What the capture supervisor should do for a streamer this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDecision {
    Start,
    Halt,
    Nothing,
}

/// Result of feeding one probe result into the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub identity: StreamerIdentity,
    /// `None` on the first observation of this identity.
    pub previous: Option<CanonicalState>,
    pub current: CanonicalState,
    pub state_changed: bool,
}

impl Observation {
    pub fn is_first(&self) -> bool {
        self.previous.is_none()
    }
}

/// Decide whether an observation starts or halts a capture.
///
/// - A capturable state with no capture running starts one. This also
///   retries a failed spawn on the next cycle.
/// - Entering `Offline` from any other state halts a running capture.
/// - Anything else, including `Offline` to `Offline`, does nothing.
pub fn decide(observation: &Observation, capturable: bool, capturing: bool) -> CaptureDecision {
    if capturable && !capturing {
        return CaptureDecision::Start;
    }

    let entered_offline = observation.current.is_offline()
        && observation.previous.is_some_and(|previous| !previous.is_offline());

    if entered_offline && capturing {
        CaptureDecision::Halt
    } else {
        CaptureDecision::Nothing
    }
}

fn describe(state: CanonicalState) -> &'static str {
    match state {
        CanonicalState::PublicChat => "is in public chat!",
        CanonicalState::GroupShow => "is in a group show",
        CanonicalState::Private => "is in a private show.",
        CanonicalState::TruePrivate => "is in a true private show.",
        CanonicalState::Away => "is away.",
        CanonicalState::Offline => "has logged off.",
        CanonicalState::Unknown => "is in an unknown state.",
    }
}

/// Per-site status map.
#[derive(Debug)]
pub struct StatusTracker {
    site: String,
    statuses: HashMap<StreamerId, StreamerStatus>,
}

impl StatusTracker {
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            statuses: HashMap::new(),
        }
    }

    /// Record a probe result and report the transition.
    ///
    /// Logs at `info` only on the first observation or when the canonical
    /// state changed; repeated identical states stay silent.
    pub fn observe(&mut self, identity: &StreamerIdentity, raw: &RawState) -> Observation {
        let current = classify(raw);

        let status = self
            .statuses
            .entry(identity.id.clone())
            .or_insert_with(|| StreamerStatus::unprobed(identity.clone()));

        let previous = status.last_raw_state.as_ref().map(|_| status.canonical_state);
        let state_changed = previous != Some(current);

        status.identity = identity.clone();
        status.canonical_state = current;
        status.display_state = current.label().to_string();
        status.last_raw_state = Some(raw.clone());

        if state_changed {
            if let RawState::Unrecognized(token) = raw {
                info!(site = %self.site, "{} reported unknown state {:?}", identity.name, token);
            } else {
                info!(site = %self.site, "{} {}", identity.name, describe(current));
            }
        }

        Observation {
            identity: identity.clone(),
            previous,
            current,
            state_changed,
        }
    }

    pub fn status(&self, id: &StreamerId) -> Option<&StreamerStatus> {
        self.statuses.get(id)
    }

    pub fn state_of(&self, id: &StreamerId) -> CanonicalState {
        self.statuses
            .get(id)
            .map(|s| s.canonical_state)
            .unwrap_or_default()
    }

    /// Make sure every tracked identity has a status, even before its first probe.
    pub fn track(&mut self, identity: &StreamerIdentity) {
        self.statuses
            .entry(identity.id.clone())
            .or_insert_with(|| StreamerStatus::unprobed(identity.clone()));
    }

    /// Forget streamers that left the roster.
    pub fn retain(&mut self, keep: impl Fn(&StreamerId) -> bool) {
        self.statuses.retain(|id, _| keep(id));
    }

    pub fn statuses(&self) -> impl Iterator<Item = &StreamerStatus> {
        self.statuses.values()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}
