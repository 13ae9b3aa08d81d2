//! Configuration: the application config file, persisted rosters and the
//! shared roster update feed.

mod model;
mod store;
mod updates;

pub use model::{AppConfig, CommandConfig, RecorderConfig, SiteConfig, SiteKind, TwitchConfig};
pub use store::{RosterStore, TomlRosterStore};
pub use updates::{RosterUpdate, UpdateFeed};
