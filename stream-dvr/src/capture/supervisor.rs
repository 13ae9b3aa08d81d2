//! Per-site capture supervisor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::output::finalize_output;
use super::recorder::{ProcessHandle, Recorder, RecorderInvocation};
use crate::domain::{StreamerId, StreamerIdentity};
use crate::utils::fs;
use crate::{Error, Result};

/// Lifecycle of a capture as seen from outside the supervisor.
///
/// `Starting` only exists while `start` holds the streamer's entry, so it is
/// never observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    Running,
    /// Termination requested, process not exited yet.
    Halting,
}

/// Public view of one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureHandle {
    /// Unique per started process; a rotated capture gets a new one.
    pub capture_id: Uuid,
    pub identity: StreamerIdentity,
    pub pid: Option<u32>,
    pub output_path: PathBuf,
    pub stream_url: String,
    pub started_at: DateTime<Utc>,
}

struct ActiveCapture {
    handle: CaptureHandle,
    process: ProcessHandle,
}

/// Owns the recorder processes of one site.
///
/// At most one capture exists per streamer id. `halt` removes the capture
/// immediately and does not wait for the process; the exit watcher of a
/// halted capture never touches a successor started for the same streamer.
pub struct CaptureSupervisor {
    site: String,
    recorder: Arc<dyn Recorder>,
    active: Arc<DashMap<StreamerId, ActiveCapture>>,
    halting: Arc<DashMap<Uuid, CaptureHandle>>,
    exited: Arc<Notify>,
    completed_dir: Option<PathBuf>,
}

impl CaptureSupervisor {
    pub fn new(site: impl Into<String>, recorder: Arc<dyn Recorder>) -> Self {
        Self {
            site: site.into(),
            recorder,
            active: Arc::new(DashMap::new()),
            halting: Arc::new(DashMap::new()),
            exited: Arc::new(Notify::new()),
            completed_dir: None,
        }
    }

    /// Move finished, non-empty captures into `dir`.
    pub fn with_completed_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.completed_dir = dir;
        self
    }

    /// Start capturing `identity` with `invocation`.
    ///
    /// If a capture for the streamer already exists no process is spawned
    /// and the existing handle is returned. The check and the spawn happen
    /// under the streamer's map entry, so concurrent calls spawn once.
    pub fn start(
        &self,
        identity: &StreamerIdentity,
        invocation: RecorderInvocation,
    ) -> Result<CaptureHandle> {
        let (handle, exit_rx) = match self.active.entry(identity.id.clone()) {
            Entry::Occupied(existing) => {
                debug!(site = %self.site, "{} is already being captured", identity);
                return Ok(existing.get().handle.clone());
            }
            Entry::Vacant(slot) => {
                let mut process =
                    self.recorder
                        .spawn(&invocation)
                        .map_err(|source| Error::Spawn {
                            streamer: identity.name.clone(),
                            program: invocation.program.clone(),
                            source,
                        })?;

                let handle = CaptureHandle {
                    capture_id: Uuid::new_v4(),
                    identity: identity.clone(),
                    pid: process.pid(),
                    output_path: invocation.output_path.clone(),
                    stream_url: invocation.stream_url.clone(),
                    started_at: Utc::now(),
                };
                let exit_rx = process.take_exit();
                slot.insert(ActiveCapture {
                    handle: handle.clone(),
                    process,
                });
                (handle, exit_rx)
            }
        };

        info!(
            site = %self.site,
            "Started capturing {} to {}",
            identity.name,
            handle.output_path.display()
        );

        if let Some(exit_rx) = exit_rx {
            self.watch_exit(handle.clone(), exit_rx);
        }

        Ok(handle)
    }

    fn watch_exit(&self, handle: CaptureHandle, exit_rx: oneshot::Receiver<Option<i32>>) {
        let site = self.site.clone();
        let active = self.active.clone();
        let halting = self.halting.clone();
        let exited = self.exited.clone();
        let completed_dir = self.completed_dir.clone();

        tokio::spawn(async move {
            let exit_code = exit_rx.await.ok().flatten();

            let capture_id = handle.capture_id;
            let still_active = active
                .remove_if(&handle.identity.id, |_, current| {
                    current.handle.capture_id == capture_id
                })
                .is_some();

            if still_active {
                info!(
                    site = %site,
                    "Capture of {} ended on its own (exit code {:?})",
                    handle.identity.name,
                    exit_code
                );
            } else {
                debug!(
                    site = %site,
                    "Capture of {} stopped (exit code {:?})",
                    handle.identity.name,
                    exit_code
                );
            }

            if let Err(e) = finalize_output(&handle.output_path, completed_dir.as_deref()).await {
                warn!(site = %site, "Failed to finalize {}: {}", handle.output_path.display(), e);
            }

            halting.remove(&capture_id);
            exited.notify_waiters();
        });
    }

    /// Request termination of the streamer's capture.
    ///
    /// The capture is forgotten right away; the process exits in the
    /// background. Fails with `NotCapturing` if there is nothing to halt.
    pub fn halt(&self, id: &StreamerId) -> Result<CaptureHandle> {
        let Entry::Occupied(entry) = self.active.entry(id.clone()) else {
            return Err(Error::NotCapturing {
                streamer: id.to_string(),
            });
        };

        // Registered before the entry is released so the exit watcher always
        // finds it.
        let handle = entry.get().handle.clone();
        self.halting.insert(handle.capture_id, handle);
        let capture = entry.remove();
        capture.process.terminate();

        info!(site = %self.site, "Stopped capturing {}", capture.handle.identity.name);
        Ok(capture.handle)
    }

    /// Replace the streamer's capture with a fresh one writing to a new file.
    pub fn rotate(
        &self,
        identity: &StreamerIdentity,
        invocation: RecorderInvocation,
    ) -> Result<CaptureHandle> {
        let previous = self.halt(&identity.id)?;
        info!(
            site = %self.site,
            "Rotating capture of {} away from {}",
            identity.name,
            previous.output_path.display()
        );
        self.start(identity, invocation)
    }

    pub fn is_capturing(&self, id: &StreamerId) -> bool {
        self.active.contains_key(id)
    }

    pub fn phase(&self, id: &StreamerId) -> CapturePhase {
        if self.active.contains_key(id) {
            CapturePhase::Running
        } else if self.halting.iter().any(|h| &h.identity.id == id) {
            CapturePhase::Halting
        } else {
            CapturePhase::Idle
        }
    }

    pub fn get(&self, id: &StreamerId) -> Option<CaptureHandle> {
        self.active.get(id).map(|c| c.handle.clone())
    }

    pub fn active_captures(&self) -> Vec<CaptureHandle> {
        self.active.iter().map(|c| c.handle.clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Captures whose output file is at least `max_bytes` large.
    pub async fn oversized(&self, max_bytes: u64) -> Vec<CaptureHandle> {
        let captures = self.active_captures();
        let mut oversized = Vec::new();
        for capture in captures {
            if let Some(size) = fs::file_size(&capture.output_path).await
                && size >= max_bytes
            {
                debug!(
                    site = %self.site,
                    "{} reached {} bytes",
                    capture.output_path.display(),
                    size
                );
                oversized.push(capture);
            }
        }
        oversized
    }

    /// Halt every capture. Returns the halted handles.
    pub fn halt_all(&self) -> Vec<CaptureHandle> {
        let ids: Vec<StreamerId> = self.active.iter().map(|c| c.key().clone()).collect();
        let halted: Vec<CaptureHandle> = ids.iter().filter_map(|id| self.halt(id).ok()).collect();
        if !halted.is_empty() {
            info!(site = %self.site, "Stopped {} captures", halted.len());
        }
        halted
    }

    /// Wait until every halted process has exited and its output was
    /// finalized. Returns `false` on timeout.
    pub async fn wait_for_exits(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.exited.notified();
                if self.halting.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
