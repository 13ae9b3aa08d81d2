//! Capture supervision.
//!
//! The capture supervisor owns every in-flight recording process of a site:
//! - Starting recorder processes, at most one per streamer
//! - Halting them on request without waiting for the exit
//! - Dropping the capture when the process exits on its own
//! - Finalizing output files once a recorder is gone
//! - Rotating captures whose output grew past the size limit

mod output;
mod recorder;
mod supervisor;

pub use output::{capture_file_name, finalize_output};
pub use recorder::{FfmpegRecorder, ProcessHandle, Recorder, RecorderInvocation};
pub use supervisor::{CaptureHandle, CapturePhase, CaptureSupervisor};
