//! Domain types shared by the roster, the monitor and the capture supervisor.

mod identity;
mod state;

pub use identity::{Membership, RosterEntry, StreamerId, StreamerIdentity};
pub use state::{CanonicalState, RawState, RawStatus, StreamerStatus, classify};
