//! Per-site scan scheduling.
//!
//! One [`SiteScheduler`] per configured site owns that site's roster, status
//! map and capture supervisor, and drives them from a single loop:
//!
//! 1. Rotate oversized captures
//! 2. Apply pending roster updates
//! 3. Probe every roster entry
//! 4. Classify results and decide
//! 5. Halt and start captures
//!
//! then sleep for the scan interval. A cycle never overlaps the next one.

mod handle;
mod service;

pub use handle::{SiteCommand, SiteHandle, SiteSnapshot, StreamerSnapshot};
pub use service::{ScanCycleResult, SchedulerConfig, SiteScheduler};
