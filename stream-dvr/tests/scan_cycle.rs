//! Scan cycle integration tests.
//!
//! A scripted site and a recorder that never touches a real process drive
//! the scheduler through full cycles.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use stream_dvr::capture::{CaptureSupervisor, ProcessHandle, Recorder, RecorderInvocation};
use stream_dvr::config::{RosterStore, UpdateFeed};
use stream_dvr::domain::{CanonicalState, Membership, RawState, RawStatus, StreamerIdentity};
use stream_dvr::roster::Roster;
use stream_dvr::scheduler::{SchedulerConfig, SiteScheduler};
use stream_dvr::site::Site;
use stream_dvr::{Error, Result};

#[derive(Default)]
struct FakeSite {
    known: Mutex<HashSet<String>>,
    states: Mutex<HashMap<String, RawState>>,
    failing: Mutex<HashSet<String>>,
    queries: AtomicUsize,
}

impl FakeSite {
    fn with(names: &[&str]) -> Arc<Self> {
        let site = Self::default();
        site.known.lock().extend(names.iter().map(|n| n.to_string()));
        Arc::new(site)
    }

    fn set(&self, name: &str, state: RawState) {
        self.known.lock().insert(name.to_string());
        self.states.lock().insert(name.to_string(), state);
    }

    fn fail(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }
}

#[async_trait]
impl Site for FakeSite {
    fn name(&self) -> &str {
        "fake"
    }

    async fn resolve_identity(&self, name: &str) -> Result<StreamerIdentity> {
        if self.known.lock().contains(name) {
            Ok(StreamerIdentity::from_name(name))
        } else {
            Err(Error::not_found("fake", name))
        }
    }

    async fn query_status(&self, identity: &StreamerIdentity) -> Result<RawStatus> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(&identity.name) {
            return Err(Error::query(identity.name.clone(), "connection reset"));
        }
        let state = self
            .states
            .lock()
            .get(&identity.name)
            .cloned()
            .unwrap_or(RawState::Offline);
        Ok(RawStatus::new(state).with_stream_url(format!("http://cdn/{}.m3u8", identity.name)))
    }
}

#[derive(Default)]
struct FakeRecorder {
    spawns: AtomicUsize,
    terminated: Arc<AtomicUsize>,
    invocations: Mutex<Vec<RecorderInvocation>>,
    fail_next: Mutex<bool>,
}

impl Recorder for FakeRecorder {
    fn spawn(&self, invocation: &RecorderInvocation) -> std::io::Result<ProcessHandle> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "recorder missing"));
        }
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().push(invocation.clone());

        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let cancelled = token.clone();
        let terminated = self.terminated.clone();
        tokio::spawn(async move {
            cancelled.cancelled().await;
            terminated.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(Some(0));
        });
        Ok(ProcessHandle::new(Some(1000), token, rx))
    }
}

#[derive(Default)]
struct MemoryStore {
    rosters: Mutex<HashMap<String, Vec<StreamerIdentity>>>,
    saves: AtomicUsize,
}

#[async_trait]
impl RosterStore for MemoryStore {
    async fn load(&self, site: &str) -> Result<Vec<StreamerIdentity>> {
        Ok(self.rosters.lock().get(site).cloned().unwrap_or_default())
    }

    async fn save(&self, site: &str, identities: &[StreamerIdentity]) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.rosters.lock().insert(site.to_string(), identities.to_vec());
        Ok(())
    }
}

struct Harness {
    site: Arc<FakeSite>,
    recorder: Arc<FakeRecorder>,
    store: Arc<MemoryStore>,
    temp: TempDir,
}

impl Harness {
    fn new(names: &[&str]) -> Self {
        Self {
            site: FakeSite::with(names),
            recorder: Arc::new(FakeRecorder::default()),
            store: Arc::new(MemoryStore::default()),
            temp: TempDir::new().unwrap(),
        }
    }

    fn config(&self) -> SchedulerConfig {
        SchedulerConfig {
            scan_interval: Duration::from_millis(20),
            capture_dir: self.temp.path().join("captures"),
            shutdown_timeout: Duration::from_secs(5),
            ..SchedulerConfig::default()
        }
    }

    fn scheduler(&self, primary: &[&str]) -> SiteScheduler {
        self.scheduler_with(primary, self.config())
    }

    fn scheduler_with(&self, primary: &[&str], config: SchedulerConfig) -> SiteScheduler {
        let site: Arc<dyn Site> = self.site.clone();
        let recorder: Arc<dyn Recorder> = self.recorder.clone();
        let captures = CaptureSupervisor::new("fake", recorder);
        let roster = Roster::from_primary(primary.iter().map(|n| StreamerIdentity::from_name(*n)));
        SiteScheduler::new(site, captures, self.store.clone(), config).with_roster(roster)
    }

    fn spawns(&self) -> usize {
        self.recorder.spawns.load(Ordering::SeqCst)
    }
}

fn names(identities: &[StreamerIdentity]) -> Vec<&str> {
    identities.iter().map(|i| i.name.as_str()).collect()
}

#[tokio::test]
async fn live_streamer_is_captured_and_halted_when_offline() {
    let h = Harness::new(&["a", "b"]);
    h.site.set("a", RawState::FreeChat);
    h.site.set("b", RawState::Offline);
    let mut scheduler = h.scheduler(&["a", "b"]);

    let first = scheduler.run_cycle().await.unwrap();
    assert_eq!(names(&first.started), vec!["a"]);
    assert!(first.halted.is_empty());
    assert_eq!(first.to_probe.len(), 2);
    assert_eq!(first.to_capture.len(), 1);
    assert_eq!(first.to_capture[0].canonical_state, CanonicalState::PublicChat);

    h.site.set("a", RawState::Offline);
    let second = scheduler.run_cycle().await.unwrap();
    assert_eq!(names(&second.halted), vec!["a"]);
    assert!(second.started.is_empty());
    assert_eq!(h.spawns(), 1);
    assert!(!scheduler.captures().is_capturing(&StreamerIdentity::from_name("a").id));
}

#[tokio::test]
async fn capture_uses_site_stream_url_and_capture_dir() {
    let h = Harness::new(&["a"]);
    h.site.set("a", RawState::Live);
    let mut scheduler = h.scheduler(&["a"]);

    scheduler.run_cycle().await.unwrap();

    let invocations = h.recorder.invocations.lock();
    assert_eq!(invocations.len(), 1);
    let invocation = &invocations[0];
    assert_eq!(invocation.program, "ffmpeg");
    assert_eq!(invocation.stream_url, "http://cdn/a.m3u8");
    assert!(invocation.args.contains(&"http://cdn/a.m3u8".to_string()));
    assert!(invocation.output_path.starts_with(h.temp.path().join("captures")));
    assert!(h.temp.path().join("captures").is_dir());
}

#[tokio::test]
async fn still_live_streamer_is_not_started_twice() {
    let h = Harness::new(&["a"]);
    h.site.set("a", RawState::FreeChat);
    let mut scheduler = h.scheduler(&["a"]);

    scheduler.run_cycle().await.unwrap();
    let second = scheduler.run_cycle().await.unwrap();

    assert!(second.started.is_empty());
    assert_eq!(h.spawns(), 1);
}

#[tokio::test]
async fn offline_to_offline_neither_halts_nor_starts() {
    let h = Harness::new(&["a"]);
    let mut scheduler = h.scheduler(&["a"]);
    let a = StreamerIdentity::from_name("a");

    scheduler.run_cycle().await.unwrap();
    scheduler
        .captures()
        .start(
            &a,
            RecorderInvocation {
                program: "ffmpeg".to_string(),
                args: vec![],
                stream_url: "http://cdn/a.m3u8".to_string(),
                output_path: h.temp.path().join("a.ts"),
            },
        )
        .unwrap();

    let result = scheduler.run_cycle().await.unwrap();
    assert!(result.halted.is_empty());
    assert!(result.started.is_empty());
    assert!(scheduler.captures().is_capturing(&a.id));
    assert_eq!(h.spawns(), 1);
}

#[tokio::test]
async fn private_show_keeps_capture_running() {
    let h = Harness::new(&["a"]);
    h.site.set("a", RawState::FreeChat);
    let mut scheduler = h.scheduler(&["a"]);
    scheduler.run_cycle().await.unwrap();

    h.site.set("a", RawState::Private);
    let result = scheduler.run_cycle().await.unwrap();

    assert!(result.halted.is_empty());
    assert!(result.to_capture.is_empty());
    assert_eq!(scheduler.captures().active_count(), 1);
}

#[tokio::test]
async fn failed_probe_does_not_affect_other_streamers() {
    let h = Harness::new(&["a", "b", "c"]);
    h.site.set("a", RawState::FreeChat);
    h.site.set("c", RawState::FreeChat);
    h.site.fail("b");
    let mut scheduler = h.scheduler(&["a", "b", "c"]);

    let result = scheduler.run_cycle().await.unwrap();

    assert_eq!(result.failed_probes, 1);
    assert_eq!(names(&result.started), vec!["a", "c"]);
    assert_eq!(h.site.queries.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_probe_keeps_previous_state() {
    let h = Harness::new(&["a"]);
    h.site.set("a", RawState::FreeChat);
    let mut scheduler = h.scheduler(&["a"]);
    scheduler.run_cycle().await.unwrap();

    h.site.fail("a");
    let result = scheduler.run_cycle().await.unwrap();

    let a = StreamerIdentity::from_name("a");
    assert!(result.halted.is_empty());
    assert_eq!(scheduler.tracker().state_of(&a.id), CanonicalState::PublicChat);
    assert!(scheduler.captures().is_capturing(&a.id));
}

#[tokio::test]
async fn spawn_failure_is_retried_next_cycle() {
    let h = Harness::new(&["a"]);
    h.site.set("a", RawState::FreeChat);
    *h.recorder.fail_next.lock() = true;
    let mut scheduler = h.scheduler(&["a"]);

    let first = scheduler.run_cycle().await.unwrap();
    assert!(first.started.is_empty());

    let second = scheduler.run_cycle().await.unwrap();
    assert_eq!(names(&second.started), vec!["a"]);
    assert_eq!(h.spawns(), 1);
}

#[tokio::test]
async fn bad_filename_format_fails_the_start_not_the_cycle() {
    let h = Harness::new(&["a"]);
    h.site.set("a", RawState::FreeChat);
    let mut config = h.config();
    config.recorder.filename_date_format = "%Q".to_string();
    let mut scheduler = h.scheduler_with(&["a"], config);

    let result = scheduler.run_cycle().await.unwrap();
    assert_eq!(result.to_capture.len(), 1);
    assert!(result.started.is_empty());
    assert_eq!(h.spawns(), 0);
    assert_eq!(scheduler.handle().snapshot().cycle, 1);
}

#[tokio::test]
async fn empty_update_is_not_dirty() {
    let h = Harness::new(&["a"]);
    let mut scheduler = h.scheduler(&["a"]);

    let result = scheduler.run_cycle().await.unwrap();

    assert!(!result.dirty);
    assert_eq!(scheduler.roster().primary().len(), 1);
    assert_eq!(h.store.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn roster_updates_are_applied_and_saved() {
    let h = Harness::new(&["a", "b"]);
    let mut scheduler = h.scheduler(&["a"]);
    let handle = scheduler.handle();

    assert!(handle.notify_roster_update(vec!["b".to_string(), "ghost".to_string()], vec![]));
    let result = scheduler.run_cycle().await.unwrap();

    assert!(result.dirty);
    assert_eq!(result.to_probe.len(), 2);
    assert_eq!(h.store.saves.load(Ordering::SeqCst), 1);
    assert_eq!(
        names(&h.store.load("fake").await.unwrap()),
        vec!["a", "b"]
    );

    handle.notify_roster_update(vec![], vec!["a".to_string()]);
    let result = scheduler.run_cycle().await.unwrap();
    assert!(result.dirty);
    assert_eq!(names(scheduler.roster().primary()), vec!["b"]);
}

#[tokio::test]
async fn include_and_exclude_of_same_name_does_not_rewrite_roster() {
    let h = Harness::new(&["a", "b"]);
    let mut scheduler = h.scheduler(&["a"]);

    scheduler
        .handle()
        .notify_roster_update(vec!["b".to_string()], vec!["b".to_string()]);
    let result = scheduler.run_cycle().await.unwrap();

    assert!(!result.dirty);
    assert_eq!(names(scheduler.roster().primary()), vec!["a"]);
    assert_eq!(h.store.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn excluded_streamer_capture_is_halted() {
    let h = Harness::new(&["a"]);
    h.site.set("a", RawState::FreeChat);
    let mut scheduler = h.scheduler(&["a"]);
    scheduler.run_cycle().await.unwrap();

    scheduler.handle().notify_roster_update(vec![], vec!["a".to_string()]);
    let result = scheduler.run_cycle().await.unwrap();

    assert!(result.to_probe.is_empty());
    assert_eq!(scheduler.captures().active_count(), 0);
}

#[tokio::test]
async fn temporary_streamers_are_probed_once() {
    let h = Harness::new(&["a", "t"]);
    h.site.set("t", RawState::FreeChat);
    let mut scheduler = h.scheduler(&["a"]);
    let handle = scheduler.handle();

    handle.add_temporary(vec!["t".to_string(), "a".to_string()]);
    let result = scheduler.run_cycle().await.unwrap();

    assert!(!result.dirty);
    assert_eq!(result.to_probe.len(), 2);
    assert_eq!(result.to_probe[1].membership, Membership::Temporary);
    assert_eq!(names(&result.started), vec!["t"]);
    assert_eq!(h.store.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn update_feed_is_drained_into_the_roster() {
    let h = Harness::new(&["a", "b"]);
    let path = h.temp.path().join("updates.toml");
    tokio::fs::write(&path, "[fake]\ninclude = [\"b\"]\n").await.unwrap();
    let mut scheduler = h
        .scheduler(&["a"])
        .with_update_feed(Some(Arc::new(UpdateFeed::new(&path))));

    let result = scheduler.run_cycle().await.unwrap();
    assert!(result.dirty);
    assert_eq!(names(scheduler.roster().primary()), vec!["a", "b"]);

    let again = scheduler.run_cycle().await.unwrap();
    assert!(!again.dirty);
}

#[tokio::test]
async fn oversized_capture_is_rotated() {
    let h = Harness::new(&["a"]);
    h.site.set("a", RawState::FreeChat);
    let config = SchedulerConfig {
        max_file_size: Some(1024),
        ..h.config()
    };
    let mut scheduler = h.scheduler_with(&["a"], config);
    let a = StreamerIdentity::from_name("a");

    scheduler.run_cycle().await.unwrap();
    let first = scheduler.captures().get(&a.id).unwrap();
    tokio::fs::write(&first.output_path, vec![0u8; 4096]).await.unwrap();

    let result = scheduler.run_cycle().await.unwrap();

    assert_eq!(names(&result.rotated), vec!["a"]);
    assert!(result.started.is_empty());
    let second = scheduler.captures().get(&a.id).unwrap();
    assert_ne!(second.capture_id, first.capture_id);
    assert_ne!(second.output_path, first.output_path);
    assert_eq!(second.stream_url, first.stream_url);
    assert_eq!(h.spawns(), 2);
}

#[tokio::test]
async fn filesize_notification_rotates_capture() {
    let h = Harness::new(&["a"]);
    h.site.set("a", RawState::FreeChat);
    let mut scheduler = h.scheduler(&["a"]);
    let a = StreamerIdentity::from_name("a");
    scheduler.run_cycle().await.unwrap();

    assert!(scheduler.handle().notify_filesize_exceeded(a.id.clone()));
    let result = scheduler.run_cycle().await.unwrap();

    assert_eq!(names(&result.rotated), vec!["a"]);
    assert_eq!(h.spawns(), 2);
    assert_eq!(scheduler.tracker().state_of(&a.id), CanonicalState::PublicChat);
}

#[tokio::test]
async fn snapshot_reflects_latest_cycle() {
    let h = Harness::new(&["a", "b"]);
    h.site.set("a", RawState::FreeChat);
    let mut scheduler = h.scheduler(&["a", "b"]);
    let handle = scheduler.handle();
    assert_eq!(handle.snapshot().cycle, 0);

    scheduler.run_cycle().await.unwrap();

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.site, "fake");
    assert_eq!(snapshot.cycle, 1);
    let a = snapshot.get(&StreamerIdentity::from_name("a").id).unwrap();
    assert!(a.capturing);
    assert_eq!(a.display_state, "Public Chat");
    let b = snapshot.get(&StreamerIdentity::from_name("b").id).unwrap();
    assert!(!b.capturing);
    assert_eq!(b.state, CanonicalState::Offline);
    assert_eq!(snapshot.capturing().count(), 1);
}

#[tokio::test]
async fn loop_keeps_probing_and_halts_captures_on_shutdown() {
    let h = Harness::new(&["a", "b"]);
    h.site.set("a", RawState::FreeChat);
    h.site.fail("b");
    let (handle, task) = h.scheduler(&["a", "b"]).spawn();

    let mut updates = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(10), async {
        while updates.borrow_and_update().cycle < 3 {
            updates.changed().await.unwrap();
        }
    })
    .await
    .expect("loop stalled");

    assert_eq!(h.spawns(), 1);
    assert_eq!(handle.snapshot().capturing().count(), 1);

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("loop did not stop")
        .unwrap();

    assert_eq!(h.recorder.terminated.load(Ordering::SeqCst), 1);
    assert_eq!(handle.snapshot().capturing().count(), 0);
    assert!(!handle.notify_roster_update(vec!["a".to_string()], vec![]));
}

#[tokio::test]
async fn loop_keeps_running_after_cycle_errors() {
    let h = Harness::new(&["a"]);
    h.site.set("a", RawState::FreeChat);
    let blocked = h.temp.path().join("blocked");
    std::fs::write(&blocked, b"not a directory").unwrap();
    let config = SchedulerConfig {
        capture_dir: blocked.join("captures"),
        ..h.config()
    };

    let mut scheduler = h.scheduler_with(&["a"], config.clone());
    assert!(scheduler.run_cycle().await.is_err());

    let (handle, task) = h.scheduler_with(&["a"], config).spawn();
    tokio::time::timeout(Duration::from_secs(10), async {
        while h.site.queries.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("loop stopped after a failed cycle");

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("loop did not stop")
        .unwrap();
    assert_eq!(h.spawns(), 0);
}

#[tokio::test]
async fn loaded_roster_comes_from_the_store() {
    let h = Harness::new(&["a"]);
    h.store
        .save("fake", &[StreamerIdentity::from_name("a")])
        .await
        .unwrap();

    let scheduler = h.scheduler(&[]).load_roster().await.unwrap();
    assert_eq!(names(scheduler.roster().primary()), vec!["a"]);
}
