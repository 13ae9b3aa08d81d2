//! Control surface of a running site loop.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{CanonicalState, Membership, StreamerId, StreamerIdentity};

/// Requests queued for the next cycle of a site loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteCommand {
    RosterUpdate {
        include: Vec<String>,
        exclude: Vec<String>,
    },
    AddTemporary(Vec<String>),
    FilesizeExceeded(StreamerId),
}

/// What a status view shows for one streamer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerSnapshot {
    pub identity: StreamerIdentity,
    pub membership: Membership,
    pub state: CanonicalState,
    pub display_state: String,
    pub capturing: bool,
    pub output_path: Option<PathBuf>,
}

/// State of a site after its latest cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteSnapshot {
    pub site: String,
    /// Completed cycles, 0 before the first one.
    pub cycle: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub streamers: Vec<StreamerSnapshot>,
}

impl SiteSnapshot {
    pub fn capturing(&self) -> impl Iterator<Item = &StreamerSnapshot> {
        self.streamers.iter().filter(|s| s.capturing)
    }

    pub fn get(&self, id: &StreamerId) -> Option<&StreamerSnapshot> {
        self.streamers.iter().find(|s| &s.identity.id == id)
    }
}

/// Cloneable handle to a site loop.
///
/// Requests are queued and picked up at the start of the next cycle; none of
/// these calls wait for the loop.
#[derive(Debug, Clone)]
pub struct SiteHandle {
    site: String,
    commands: mpsc::UnboundedSender<SiteCommand>,
    snapshot: watch::Receiver<SiteSnapshot>,
    cancellation_token: CancellationToken,
}

impl SiteHandle {
    pub(crate) fn new(
        site: String,
        commands: mpsc::UnboundedSender<SiteCommand>,
        snapshot: watch::Receiver<SiteSnapshot>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            site,
            commands,
            snapshot,
            cancellation_token,
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    fn send(&self, command: SiteCommand) -> bool {
        let sent = self.commands.send(command).is_ok();
        if !sent {
            debug!(site = %self.site, "Site loop is gone, dropping request");
        }
        sent
    }

    /// Queue names to add to and remove from the primary roster.
    pub fn notify_roster_update(&self, include: Vec<String>, exclude: Vec<String>) -> bool {
        self.send(SiteCommand::RosterUpdate { include, exclude })
    }

    /// Queue names to track for this process lifetime only.
    pub fn add_temporary(&self, names: Vec<String>) -> bool {
        self.send(SiteCommand::AddTemporary(names))
    }

    /// Queue a rotation of the streamer's capture.
    pub fn notify_filesize_exceeded(&self, id: StreamerId) -> bool {
        self.send(SiteCommand::FilesizeExceeded(id))
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SiteSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified after every cycle.
    pub fn subscribe(&self) -> watch::Receiver<SiteSnapshot> {
        self.snapshot.clone()
    }

    /// Stop the loop after the current cycle and halt its captures.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }
}
