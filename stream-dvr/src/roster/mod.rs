//! Streamer roster for one site.
//!
//! The roster holds the persisted (primary) streamers plus an ephemeral
//! temporary set. An identity is never in both: temporary additions of a
//! primary streamer are ignored, and promoting a temporary streamer moves it.

use std::collections::HashSet;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::domain::{RosterEntry, StreamerId, StreamerIdentity};
use crate::site::Site;
use crate::{Error, Result};

/// Outcome of applying a batch of roster updates.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// The primary roster changed and must be written back.
    pub dirty: bool,
    pub added: Vec<StreamerIdentity>,
    pub removed: Vec<StreamerIdentity>,
    /// Names that could not be resolved, with the reason.
    pub failures: Vec<(String, Error)>,
}

/// Primary and temporary streamers tracked by one site loop.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    primary: Vec<StreamerIdentity>,
    temporary: Vec<StreamerIdentity>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a roster from the persisted primary list, dropping duplicates.
    pub fn from_primary(identities: impl IntoIterator<Item = StreamerIdentity>) -> Self {
        let mut roster = Self::new();
        for identity in identities {
            roster.add_primary(identity);
        }
        roster
    }

    /// Resolve a name through the site. The streamer does not need to be online.
    pub async fn resolve<S: Site + ?Sized>(site: &S, name: &str) -> Result<StreamerIdentity> {
        site.resolve_identity(name).await
    }

    pub fn primary(&self) -> &[StreamerIdentity] {
        &self.primary
    }

    pub fn temporary(&self) -> &[StreamerIdentity] {
        &self.temporary
    }

    pub fn contains(&self, id: &StreamerId) -> bool {
        self.is_primary(id) || self.temporary.iter().any(|i| &i.id == id)
    }

    fn is_primary(&self, id: &StreamerId) -> bool {
        self.primary.iter().any(|i| &i.id == id)
    }

    /// Add to the primary roster. Returns `false` if already present.
    ///
    /// A temporary entry for the same identity is promoted.
    pub fn add_primary(&mut self, identity: StreamerIdentity) -> bool {
        if self.is_primary(&identity.id) {
            return false;
        }
        self.temporary.retain(|i| i.id != identity.id);
        self.primary.push(identity);
        true
    }

    /// Remove from the primary roster. Returns `false` if it was not there.
    pub fn remove_primary(&mut self, identity: &StreamerIdentity) -> bool {
        let before = self.primary.len();
        self.primary.retain(|i| i.id != identity.id);
        self.primary.len() != before
    }

    /// Add to the temporary roster. Suppressed when the identity is primary.
    pub fn add_temporary(&mut self, identity: StreamerIdentity) -> bool {
        if self.contains(&identity.id) {
            return false;
        }
        self.temporary.push(identity);
        true
    }

    pub fn remove_temporary(&mut self, identity: &StreamerIdentity) -> bool {
        let before = self.temporary.len();
        self.temporary.retain(|i| i.id != identity.id);
        self.temporary.len() != before
    }

    /// Apply include/exclude names to the primary roster.
    ///
    /// Names are resolved concurrently. A name that fails to resolve is
    /// reported in the outcome and does not stop the others. Includes are
    /// applied before excludes, and the outcome is only dirty when the
    /// resulting primary set differs from the one we started with.
    pub async fn reconcile<S: Site + ?Sized>(
        &mut self,
        site: &S,
        include: &[String],
        exclude: &[String],
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        if include.is_empty() && exclude.is_empty() {
            return outcome;
        }

        if !include.is_empty() {
            info!(site = site.name(), "{} streamer(s) to include", include.len());
        }
        if !exclude.is_empty() {
            info!(site = site.name(), "{} streamer(s) to exclude", exclude.len());
        }

        let (included, excluded) = futures::join!(
            resolve_all(site, include),
            resolve_all(site, exclude)
        );
        let before = self.primary_ids();

        for (name, resolved) in included {
            match resolved {
                Ok(identity) => {
                    if self.add_primary(identity.clone()) {
                        debug!(site = site.name(), "Added {} to roster", identity);
                        outcome.added.push(identity);
                    }
                }
                Err(e) => outcome.failures.push((name, e)),
            }
        }

        for (name, resolved) in excluded {
            match resolved {
                Ok(identity) => {
                    if self.remove_primary(&identity) {
                        debug!(site = site.name(), "Removed {} from roster", identity);
                        outcome.removed.push(identity);
                    }
                }
                Err(e) => outcome.failures.push((name, e)),
            }
        }

        let removed = &outcome.removed;
        outcome.added.retain(|a| !removed.iter().any(|r| r.id == a.id));
        outcome.dirty = self.primary_ids() != before;

        for (name, e) in &outcome.failures {
            warn!(site = site.name(), "Could not resolve {}: {}", name, e);
        }

        outcome
    }

    /// Resolve names and add them to the temporary roster.
    ///
    /// Returns how many new temporary entries were added.
    pub async fn admit_temporary<S: Site + ?Sized>(&mut self, site: &S, names: &[String]) -> usize {
        let mut added = 0;
        for (name, resolved) in resolve_all(site, names).await {
            match resolved {
                Ok(identity) => {
                    if self.add_temporary(identity) {
                        added += 1;
                    } else {
                        debug!(site = site.name(), "{} is already tracked", name);
                    }
                }
                Err(e) => warn!(site = site.name(), "Could not resolve {}: {}", name, e),
            }
        }
        added
    }

    /// Every streamer to probe this cycle, each exactly once.
    ///
    /// Primary entries come first in roster order, then temporary ones.
    /// A temporary entry that duplicates a primary one is dropped.
    pub fn effective_set(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<RosterEntry> = Vec::with_capacity(self.primary.len() + self.temporary.len());

        for identity in &self.primary {
            if !entries.iter().any(|e| e.identity.id == identity.id) {
                entries.push(RosterEntry::primary(identity.clone()));
            }
        }

        for identity in &self.temporary {
            if self.is_primary(&identity.id) {
                let violation = Error::RosterInvariantViolation {
                    streamer: identity.to_string(),
                };
                warn!("{}; keeping the primary entry", violation);
                continue;
            }
            if !entries.iter().any(|e| e.identity.id == identity.id) {
                entries.push(RosterEntry::temporary(identity.clone()));
            }
        }

        entries
    }

    fn primary_ids(&self) -> HashSet<StreamerId> {
        self.primary.iter().map(|i| i.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.effective_set().len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.temporary.is_empty()
    }
}

async fn resolve_all<S: Site + ?Sized>(
    site: &S,
    names: &[String],
) -> Vec<(String, Result<StreamerIdentity>)> {
    debug!(site = site.name(), "Resolving {} name(s)", names.len());
    let lookups = names.iter().map(|name| async move {
        (name.clone(), Roster::resolve(site, name).await)
    });
    join_all(lookups).await
}
