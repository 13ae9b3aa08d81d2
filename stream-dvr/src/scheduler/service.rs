//! The per-site scan loop.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handle::{SiteCommand, SiteHandle, SiteSnapshot, StreamerSnapshot};
use crate::capture::{CaptureHandle, CaptureSupervisor, capture_file_name};
use crate::config::{AppConfig, RecorderConfig, RosterStore, RosterUpdate, UpdateFeed};
use crate::domain::{CanonicalState, RawStatus, RosterEntry, StreamerId, StreamerIdentity, StreamerStatus};
use crate::monitor::{CaptureDecision, StatusTracker, decide, probe_site};
use crate::roster::Roster;
use crate::site::Site;
use crate::utils::fs;
use crate::{Error, Result};

/// Settings shared by every site loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scan_interval: Duration,
    pub capture_dir: PathBuf,
    /// Rotate captures at this size. `None` disables rotation.
    pub max_file_size: Option<u64>,
    pub recorder: RecorderConfig,
    /// How long shutdown waits for halted recorders to exit.
    pub shutdown_timeout: Duration,
}

impl SchedulerConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            scan_interval: config.scan_interval(),
            capture_dir: config.capture_dir.clone(),
            max_file_size: config.max_file_size_bytes(),
            recorder: config.recorder.clone(),
            shutdown_timeout: Duration::from_secs(config.recorder.stop_grace_secs + 5),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

/// What one cycle saw and did. Not kept between cycles.
#[derive(Debug, Default)]
pub struct ScanCycleResult {
    /// The effective roster probed this cycle.
    pub to_probe: Vec<RosterEntry>,
    /// Streamers seen in a capturable state.
    pub to_capture: Vec<StreamerStatus>,
    /// The primary roster changed this cycle.
    pub dirty: bool,
    pub failed_probes: usize,
    pub started: Vec<StreamerIdentity>,
    pub halted: Vec<StreamerIdentity>,
    pub rotated: Vec<StreamerIdentity>,
}

/// Owns all mutable state of one site and runs its cycles.
pub struct SiteScheduler {
    site: Arc<dyn Site>,
    config: SchedulerConfig,
    roster: Roster,
    tracker: StatusTracker,
    captures: CaptureSupervisor,
    store: Arc<dyn RosterStore>,
    feed: Option<Arc<UpdateFeed>>,
    commands_tx: mpsc::UnboundedSender<SiteCommand>,
    commands_rx: mpsc::UnboundedReceiver<SiteCommand>,
    snapshot_tx: watch::Sender<SiteSnapshot>,
    cancellation_token: CancellationToken,
    /// The primary roster changed but could not be written yet.
    unsaved: bool,
    cycles: u64,
}

impl SiteScheduler {
    pub fn new(
        site: Arc<dyn Site>,
        captures: CaptureSupervisor,
        store: Arc<dyn RosterStore>,
        config: SchedulerConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(SiteSnapshot {
            site: site.name().to_string(),
            ..SiteSnapshot::default()
        });

        Self {
            tracker: StatusTracker::new(site.name()),
            site,
            config,
            roster: Roster::new(),
            captures,
            store,
            feed: None,
            commands_tx,
            commands_rx,
            snapshot_tx,
            cancellation_token: CancellationToken::new(),
            unsaved: false,
            cycles: 0,
        }
    }

    pub fn with_roster(mut self, roster: Roster) -> Self {
        self.roster = roster;
        self
    }

    pub fn with_update_feed(mut self, feed: Option<Arc<UpdateFeed>>) -> Self {
        self.feed = feed;
        self
    }

    /// Stop together with `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Load the persisted primary roster for this site.
    pub async fn load_roster(mut self) -> Result<Self> {
        let identities = self.store.load(self.site.name()).await?;
        info!(site = %self.site.name(), "Loaded {} streamers", identities.len());
        self.roster = Roster::from_primary(identities);
        Ok(self)
    }

    pub fn handle(&self) -> SiteHandle {
        SiteHandle::new(
            self.site.name().to_string(),
            self.commands_tx.clone(),
            self.snapshot_tx.subscribe(),
            self.cancellation_token.clone(),
        )
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn captures(&self) -> &CaptureSupervisor {
        &self.captures
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> (SiteHandle, JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run_scan_loop()))
    }

    /// Run cycles until cancelled, then halt every capture.
    ///
    /// A failing or panicking cycle is logged and the loop carries on.
    pub async fn run_scan_loop(mut self) {
        info!(
            site = %self.site.name(),
            "Starting scan loop for {} streamers every {:?}",
            self.roster.len(),
            self.config.scan_interval
        );

        while !self.cancellation_token.is_cancelled() {
            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(Ok(result)) => debug!(
                    site = %self.site.name(),
                    "Cycle {} done: {} probed, {} failed, {} started, {} halted, {} rotated",
                    self.cycles,
                    result.to_probe.len(),
                    result.failed_probes,
                    result.started.len(),
                    result.halted.len(),
                    result.rotated.len()
                ),
                Ok(Err(e)) => error!(site = %self.site.name(), "Scan cycle failed: {}", e),
                Err(_) => error!(site = %self.site.name(), "Scan cycle panicked"),
            }

            tokio::select! {
                _ = self.cancellation_token.cancelled() => {}
                _ = tokio::time::sleep(self.config.scan_interval) => {}
            }
        }

        self.shutdown().await;
    }

    /// One full scan cycle.
    pub async fn run_cycle(&mut self) -> Result<ScanCycleResult> {
        let mut result = ScanCycleResult::default();
        let (mut update, requested_rotations) = self.drain_commands();

        // 1. File size check
        result.rotated = self.rotate_captures(requested_rotations).await;

        // 2. Roster updates
        if let Some(feed) = &self.feed {
            match feed.drain(self.site.name()).await {
                Ok(feed_update) => update.merge(feed_update),
                Err(e) => warn!(site = %self.site.name(), "Failed to read roster updates: {}", e),
            }
        }
        result.dirty = self.apply_update(update).await;

        // 3. Probe
        result.to_probe = self.roster.effective_set();
        let batch = probe_site(self.site.as_ref(), &result.to_probe).await;
        result.failed_probes = batch.failure_count();

        // 4. Classify and decide
        let mut starts: Vec<(StreamerIdentity, RawStatus)> = Vec::new();
        let mut halts: Vec<StreamerIdentity> = Vec::new();
        for (entry, status) in batch.successes() {
            let identity = &entry.identity;
            let observation = self.tracker.observe(identity, &status.state);
            let capturable = self.site.is_capturable(observation.current);

            if capturable && let Some(tracked) = self.tracker.status(&identity.id) {
                result.to_capture.push(tracked.clone());
            }

            match decide(&observation, capturable, self.captures.is_capturing(&identity.id)) {
                CaptureDecision::Start => starts.push((identity.clone(), status.clone())),
                CaptureDecision::Halt => halts.push(identity.clone()),
                CaptureDecision::Nothing => {}
            }
        }

        // 5. Dispatch
        for identity in halts {
            match self.captures.halt(&identity.id) {
                Ok(_) => result.halted.push(identity),
                Err(e) => debug!(site = %self.site.name(), "{}", e),
            }
        }
        result.started = self.start_captures(starts).await?;

        self.cycles += 1;
        self.publish_snapshot();
        Ok(result)
    }

    fn drain_commands(&mut self) -> (RosterUpdate, Vec<StreamerId>) {
        let mut update = RosterUpdate::default();
        let mut rotations = Vec::new();

        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                SiteCommand::RosterUpdate { include, exclude } => update.merge(RosterUpdate {
                    include,
                    exclude,
                    include_temporary: Vec::new(),
                }),
                SiteCommand::AddTemporary(names) => update.include_temporary.extend(names),
                SiteCommand::FilesizeExceeded(id) => {
                    if !rotations.contains(&id) {
                        rotations.push(id);
                    }
                }
            }
        }

        (update, rotations)
    }

    async fn rotate_captures(&self, mut ids: Vec<StreamerId>) -> Vec<StreamerIdentity> {
        if let Some(max_bytes) = self.config.max_file_size {
            for capture in self.captures.oversized(max_bytes).await {
                if !ids.contains(&capture.identity.id) {
                    ids.push(capture.identity.id);
                }
            }
        }

        let mut rotated = Vec::new();
        for id in ids {
            match self.rotate(&id).await {
                Ok(handle) => rotated.push(handle.identity),
                Err(e) => warn!(site = %self.site.name(), "Could not rotate capture of {}: {}", id, e),
            }
        }
        rotated
    }

    /// Restart a capture on a new file, reusing the stream URL it was started with.
    async fn rotate(&self, id: &StreamerId) -> Result<CaptureHandle> {
        let current = self.captures.get(id).ok_or_else(|| Error::NotCapturing {
            streamer: id.to_string(),
        })?;
        fs::ensure_dir_all("creating capture directory", &self.config.capture_dir).await?;

        let output_path = self.output_path(&current.identity)?;
        let invocation =
            self.site
                .build_recorder_invocation(&current.stream_url, &output_path, &self.config.recorder);
        self.captures.rotate(&current.identity, invocation)
    }

    /// Reconcile the roster and persist it when the primary set changed.
    /// Returns whether it changed.
    async fn apply_update(&mut self, update: RosterUpdate) -> bool {
        let mut dirty = false;

        if !update.is_empty() {
            let outcome = self
                .roster
                .reconcile(self.site.as_ref(), &update.include, &update.exclude)
                .await;
            let admitted = self
                .roster
                .admit_temporary(self.site.as_ref(), &update.include_temporary)
                .await;
            if admitted > 0 {
                info!(site = %self.site.name(), "Tracking {} temporary streamer(s)", admitted);
            }

            for identity in &outcome.removed {
                if !self.roster.contains(&identity.id) && self.captures.halt(&identity.id).is_ok() {
                    info!(site = %self.site.name(), "{} left the roster, capture halted", identity);
                }
            }
            let roster = &self.roster;
            self.tracker.retain(|id| roster.contains(id));

            dirty = outcome.dirty;
            self.unsaved |= outcome.dirty;
        }

        if self.unsaved {
            self.save_roster().await;
        }
        dirty
    }

    async fn save_roster(&mut self) {
        match self.store.save(self.site.name(), self.roster.primary()).await {
            Ok(()) => {
                self.unsaved = false;
                info!(
                    site = %self.site.name(),
                    "Saved roster with {} streamers",
                    self.roster.primary().len()
                );
            }
            Err(e) => warn!(site = %self.site.name(), "Failed to save roster, will retry: {}", e),
        }
    }

    async fn start_captures(
        &self,
        starts: Vec<(StreamerIdentity, RawStatus)>,
    ) -> Result<Vec<StreamerIdentity>> {
        if starts.is_empty() {
            return Ok(Vec::new());
        }
        fs::ensure_dir_all("creating capture directory", &self.config.capture_dir).await?;

        let site = self.site.as_ref();
        let urls = join_all(
            starts
                .iter()
                .map(|(identity, status)| site.stream_url(identity, status)),
        )
        .await;

        let mut started = Vec::new();
        for ((identity, _), url) in starts.into_iter().zip(urls) {
            let outcome = url.and_then(|url| {
                let output_path = self.output_path(&identity)?;
                let invocation =
                    site.build_recorder_invocation(&url, &output_path, &self.config.recorder);
                self.captures.start(&identity, invocation)
            });
            match outcome {
                Ok(_) => started.push(identity),
                Err(e) => warn!(
                    site = %site.name(),
                    "Could not start capture of {}, retrying next cycle: {}",
                    identity,
                    e
                ),
            }
        }
        Ok(started)
    }

    fn output_path(&self, identity: &StreamerIdentity) -> Result<PathBuf> {
        capture_file_name(
            &self.config.capture_dir,
            &identity.name,
            &self.config.recorder.extension,
            &self.config.recorder.filename_date_format,
        )
    }

    fn publish_snapshot(&self) {
        let streamers = self
            .roster
            .effective_set()
            .into_iter()
            .map(|entry| {
                let status = self.tracker.status(&entry.identity.id);
                let capture = self.captures.get(&entry.identity.id);
                StreamerSnapshot {
                    state: status.map(|s| s.canonical_state).unwrap_or_default(),
                    display_state: status
                        .map(|s| s.display_state.clone())
                        .unwrap_or_else(|| CanonicalState::Unknown.label().to_string()),
                    capturing: capture.is_some(),
                    output_path: capture.map(|c| c.output_path),
                    identity: entry.identity,
                    membership: entry.membership,
                }
            })
            .collect();

        self.snapshot_tx.send_replace(SiteSnapshot {
            site: self.site.name().to_string(),
            cycle: self.cycles,
            updated_at: Some(Utc::now()),
            streamers,
        });
    }

    async fn shutdown(&mut self) {
        info!(site = %self.site.name(), "Stopping scan loop");

        let halted = self.captures.halt_all();
        if !halted.is_empty() && !self.captures.wait_for_exits(self.config.shutdown_timeout).await {
            warn!(
                site = %self.site.name(),
                "Recorders did not exit within {:?}",
                self.config.shutdown_timeout
            );
        }
        if self.unsaved {
            self.save_roster().await;
        }
        self.publish_snapshot();
    }
}
