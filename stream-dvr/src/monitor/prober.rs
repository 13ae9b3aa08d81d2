//! Concurrent status probing.
//!
//! One query per roster entry, all in flight at once. The batch settles
//! only when every query has settled; a failing query is recorded for its
//! entry and never fails the batch.

use std::future::Future;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::Result;
use crate::domain::{RawStatus, RosterEntry, StreamerIdentity};
use crate::site::Site;

/// Result of probing one roster entry.
#[derive(Debug)]
pub struct ProbeOutcome {
    pub entry: RosterEntry,
    pub result: Result<RawStatus>,
}

/// Results of a probe batch, in roster order.
#[derive(Debug, Default)]
pub struct ProbeBatch {
    pub outcomes: Vec<ProbeOutcome>,
}

impl ProbeBatch {
    pub fn total_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.total_count() - self.success_count()
    }

    /// Successful results only.
    pub fn successes(&self) -> impl Iterator<Item = (&RosterEntry, &RawStatus)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|status| (&o.entry, status)))
    }
}

/// Query every entry concurrently with `query`.
///
/// The returned outcomes keep the order of `entries` regardless of the
/// order in which the queries complete. No timeout is added here; the
/// query is expected to carry its own.
pub async fn probe_all<'a, F, Fut>(entries: &'a [RosterEntry], query: F) -> ProbeBatch
where
    F: Fn(&'a StreamerIdentity) -> Fut,
    Fut: Future<Output = Result<RawStatus>> + 'a,
{
    let results = join_all(entries.iter().map(|entry| query(&entry.identity))).await;

    let outcomes: Vec<ProbeOutcome> = entries
        .iter()
        .cloned()
        .zip(results)
        .map(|(entry, result)| ProbeOutcome { entry, result })
        .collect();

    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            warn!("Skipping {} this cycle: {}", outcome.entry.identity, e);
        }
    }

    let batch = ProbeBatch { outcomes };
    debug!(
        "Probe complete: {} success, {} failures",
        batch.success_count(),
        batch.failure_count()
    );
    batch
}

/// Probe every entry through the site's status query.
pub async fn probe_site<'a, S: Site + ?Sized>(site: &'a S, entries: &'a [RosterEntry]) -> ProbeBatch {
    probe_all(entries, |identity| site.query_status(identity)).await
}
