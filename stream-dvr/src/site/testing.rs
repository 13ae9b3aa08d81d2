//! In-memory site used by unit tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Site;
use crate::domain::{RawState, RawStatus, StreamerIdentity};
use crate::{Error, Result};

pub(crate) struct StaticSite {
    name: String,
    known: HashSet<String>,
    statuses: Mutex<HashMap<String, RawState>>,
    failing: Mutex<HashSet<String>>,
}

impl StaticSite {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            known: HashSet::new(),
            statuses: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn with_streamer(mut self, name: &str) -> Self {
        self.known.insert(name.to_string());
        self
    }

    pub(crate) fn set_state(&self, name: &str, state: RawState) {
        self.statuses.lock().insert(name.to_string(), state);
    }

    pub(crate) fn fail(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }
}

#[async_trait]
impl Site for StaticSite {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve_identity(&self, name: &str) -> Result<StreamerIdentity> {
        if self.known.contains(name) {
            Ok(StreamerIdentity::from_name(name))
        } else {
            Err(Error::not_found(&self.name, name))
        }
    }

    async fn query_status(&self, identity: &StreamerIdentity) -> Result<RawStatus> {
        if self.failing.lock().contains(&identity.name) {
            return Err(Error::query(identity.to_string(), "connection reset"));
        }
        let state = self
            .statuses
            .lock()
            .get(&identity.name)
            .cloned()
            .unwrap_or(RawState::Offline);
        Ok(RawStatus::new(state).with_stream_url(format!("http://stream/{}", identity.name)))
    }
}
