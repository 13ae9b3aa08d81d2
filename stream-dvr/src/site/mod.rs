//! Site plugins.
//!
//! A site is the fixed capability set the scan loop needs from a platform:
//! resolve a name, query a status, find the playable stream and describe
//! how to record it. One implementation exists per platform and the
//! configuration picks it at startup.

mod command;
mod tool;
mod twitch;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::capture::RecorderInvocation;
use crate::config::{RecorderConfig, SiteConfig, SiteKind};
use crate::domain::{CanonicalState, RawStatus, StreamerIdentity};
use crate::{Error, Result};

pub use command::CommandSite;
pub use tool::run_tool;
pub use twitch::TwitchSite;

/// Capabilities a platform plugin supplies to the scan loop.
///
/// `query_status` is called concurrently for every roster entry, so
/// implementations must be safe to call in parallel and should carry their
/// own request timeout.
#[async_trait]
pub trait Site: Send + Sync + 'static {
    /// Site name used in logs and as the roster/update key.
    fn name(&self) -> &str;

    /// Look up a streamer by name. Fails with [`Error::IdentityResolution`]
    /// when the site does not know the name.
    async fn resolve_identity(&self, name: &str) -> Result<StreamerIdentity>;

    /// Query the current status of a streamer.
    async fn query_status(&self, identity: &StreamerIdentity) -> Result<RawStatus>;

    /// Find the playable stream for a streamer that is currently capturable.
    async fn stream_url(&self, identity: &StreamerIdentity, status: &RawStatus) -> Result<String> {
        status
            .stream_url
            .clone()
            .ok_or_else(|| Error::query(identity.name.clone(), "site reported no stream url"))
    }

    /// Arguments for the recorder process.
    fn build_recorder_invocation(
        &self,
        stream_url: &str,
        output_path: &Path,
        recorder: &RecorderConfig,
    ) -> RecorderInvocation {
        recorder.invocation(stream_url, output_path)
    }

    /// Whether a streamer in `state` may be recorded.
    fn is_capturable(&self, state: CanonicalState) -> bool {
        state == CanonicalState::PublicChat
    }
}

/// Build the plugin a site configuration asks for.
///
/// Fails when the configuration is unusable (for example missing
/// credentials). Only the affected site is lost; the caller keeps going
/// with the others.
pub fn build_site(config: &SiteConfig) -> Result<Arc<dyn Site>> {
    let site: Arc<dyn Site> = match &config.kind {
        SiteKind::Twitch(twitch) => Arc::new(TwitchSite::new(
            &config.name,
            twitch,
            config.capture_states.clone(),
        )?),
        SiteKind::Command(command) => Arc::new(CommandSite::new(
            &config.name,
            command,
            config.capture_states.clone(),
        )?),
    };
    Ok(site)
}
