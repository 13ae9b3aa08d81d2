//! Recorder processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RecorderConfig;

/// Fully built command line for one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub stream_url: String,
    pub output_path: PathBuf,
}

impl RecorderConfig {
    /// Build ffmpeg arguments that copy `stream_url` into `output_path`.
    pub fn invocation(&self, stream_url: &str, output_path: &Path) -> RecorderInvocation {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];
        args.extend(self.input_args.iter().cloned());
        args.extend(["-i".to_string(), stream_url.to_string()]);
        args.extend(["-c".to_string(), "copy".to_string()]);
        args.extend(self.output_args.iter().cloned());
        args.push("-y".to_string());
        args.push(output_path.to_string_lossy().to_string());

        RecorderInvocation {
            program: self.program.clone(),
            args,
            stream_url: stream_url.to_string(),
            output_path: output_path.to_path_buf(),
        }
    }
}

/// A running recorder process as seen by the supervisor.
///
/// Termination is only requested here; the recorder implementation owns the
/// actual child and reports the exit through the one-shot channel.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    cancellation_token: CancellationToken,
    exit_rx: Option<oneshot::Receiver<Option<i32>>>,
}

impl ProcessHandle {
    pub fn new(
        pid: Option<u32>,
        cancellation_token: CancellationToken,
        exit_rx: oneshot::Receiver<Option<i32>>,
    ) -> Self {
        Self {
            pid,
            cancellation_token,
            exit_rx: Some(exit_rx),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the process to stop. Returns immediately.
    pub fn terminate(&self) {
        self.cancellation_token.cancel();
    }

    /// Take the exit notification. Resolves with the exit code, if any.
    pub fn take_exit(&mut self) -> Option<oneshot::Receiver<Option<i32>>> {
        self.exit_rx.take()
    }
}

/// Starts recorder processes.
///
/// `spawn` is synchronous so the supervisor can hold its per-streamer
/// entry while spawning; that is what makes duplicate starts impossible.
pub trait Recorder: Send + Sync + 'static {
    fn spawn(&self, invocation: &RecorderInvocation) -> std::io::Result<ProcessHandle>;
}

/// Recorder backed by an ffmpeg child process.
pub struct FfmpegRecorder {
    stop_grace: Duration,
}

impl FfmpegRecorder {
    pub fn new(stop_grace: Duration) -> Self {
        Self { stop_grace }
    }

    pub fn from_config(config: &RecorderConfig) -> Self {
        Self::new(Duration::from_secs(config.stop_grace_secs))
    }

    /// Version line of the configured binary, if it can be run at all.
    pub fn detect_version(program: &str) -> Option<String> {
        process_utils::probe_version(program, "-version")
    }
}

impl Recorder for FfmpegRecorder {
    fn spawn(&self, invocation: &RecorderInvocation) -> std::io::Result<ProcessHandle> {
        let mut child = process_utils::tokio_command(&invocation.program)
            .args(&invocation.args)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id();
        let output = invocation.output_path.display().to_string();

        if let Some(stderr) = child.stderr.take() {
            let output = output.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.contains("Error") || line.contains("error") {
                        warn!("Recorder error for {}: {}", output, line);
                    } else {
                        debug!("Recorder output for {}: {}", output, line);
                    }
                }
            });
        }

        let cancellation_token = CancellationToken::new();
        let (exit_tx, exit_rx) = oneshot::channel();
        let token = cancellation_token.clone();
        let grace = self.stop_grace;

        tokio::spawn(async move {
            let exit_code = tokio::select! {
                _ = token.cancelled() => {
                    debug!("Stopping recorder for {}", output);
                    process_utils::stop_child(&mut child, Some(b"q"), grace).await
                }
                status = child.wait() => {
                    match status {
                        Ok(exit_status) => {
                            if !exit_status.success() {
                                warn!("Recorder for {} exited with status: {}", output, exit_status);
                            }
                            exit_status.code()
                        }
                        Err(e) => {
                            warn!("Error waiting for recorder of {}: {}", output, e);
                            Some(-1)
                        }
                    }
                }
            };
            let _ = exit_tx.send(exit_code);
        });

        Ok(ProcessHandle::new(pid, cancellation_token, exit_rx))
    }
}
