//! stream-dvr library crate.
//!
//! Polls live-streaming sites for a roster of streamers and records every
//! streamer that is live through an external recorder process. One
//! independent scan loop runs per configured site.

pub mod capture;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod roster;
pub mod scheduler;
pub mod site;
pub mod utils;

pub use error::{Error, Result};
