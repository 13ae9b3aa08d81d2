use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stream_dvr::capture::{CaptureSupervisor, FfmpegRecorder, Recorder};
use stream_dvr::config::{AppConfig, RosterStore, TomlRosterStore, UpdateFeed};
use stream_dvr::logging;
use stream_dvr::scheduler::{SchedulerConfig, SiteScheduler};
use stream_dvr::site::build_site;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "STREAM_DVR_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Log filter directive, overrides the config file
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;

    let filter = args.log_filter.as_deref().or(config.log_filter.as_deref());
    let _guard = logging::init_logging(&config.log_dir, filter)?;

    let shutdown = CancellationToken::new();
    logging::start_retention_cleanup(
        config.log_dir.clone(),
        config.log_retention_days,
        shutdown.child_token(),
    );

    match FfmpegRecorder::detect_version(&config.recorder.program) {
        Some(version) => info!("Using recorder: {}", version),
        None => warn!("Recorder {} could not be run", config.recorder.program),
    }

    let recorder: Arc<dyn Recorder> = Arc::new(FfmpegRecorder::from_config(&config.recorder));
    let feed = config.updates_file.clone().map(|path| Arc::new(UpdateFeed::new(path)));
    let scheduler_config = SchedulerConfig::from_app(&config);

    let mut store = TomlRosterStore::new(&config.roster_dir);
    for site in &config.sites {
        if let Some(path) = &site.roster_file {
            store = store.with_file(&site.name, path);
        }
    }
    let store: Arc<dyn RosterStore> = Arc::new(store);

    let mut loops = Vec::new();
    for site_config in config.enabled_sites() {
        let site = match build_site(site_config) {
            Ok(site) => site,
            Err(e) => {
                error!(site = %site_config.name, "Site not started: {}", e);
                continue;
            }
        };

        let captures = CaptureSupervisor::new(site_config.name.clone(), recorder.clone())
            .with_completed_dir(config.completed_dir.clone());
        let scheduler = SiteScheduler::new(site, captures, store.clone(), scheduler_config.clone())
            .with_update_feed(feed.clone())
            .with_cancellation(shutdown.child_token());

        let scheduler = match scheduler.load_roster().await {
            Ok(scheduler) => scheduler,
            Err(e) => {
                error!(site = %site_config.name, "Site not started, roster unreadable: {}", e);
                continue;
            }
        };

        loops.push(scheduler.spawn());
    }

    if loops.is_empty() {
        warn!("No site loops running");
        return Ok(());
    }
    info!("{} site loop(s) running, press Ctrl-C to stop", loops.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown.cancel();

    for (handle, task) in loops {
        if let Err(e) = task.await {
            error!(site = %handle.site(), "Site loop ended abnormally: {}", e);
        }
    }

    info!("Stopped");
    Ok(())
}
