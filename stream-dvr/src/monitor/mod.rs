//! Status monitoring for one site.
//!
//! - Concurrent status probing of every roster entry
//! - Classification of raw statuses into canonical states
//! - Transition detection and capture start/halt decisions

mod prober;
mod tracker;

pub use prober::{ProbeBatch, ProbeOutcome, probe_all, probe_site};
pub use tracker::{CaptureDecision, Observation, StatusTracker, decide};
