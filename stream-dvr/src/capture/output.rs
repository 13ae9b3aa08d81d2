//! Output file naming and post-capture handling.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info};

use crate::Result;
use crate::utils::filename::sanitize_filename;
use crate::utils::fs;

/// Path of a new capture file: `<dir>/<name>_<local time>.<ext>`.
///
/// A `_<n>` suffix is added when that file already exists, so a rotation
/// within the same timestamp never overwrites its predecessor. Fails when
/// `date_format` is not a valid strftime pattern.
pub fn capture_file_name(
    dir: &Path,
    name: &str,
    extension: &str,
    date_format: &str,
) -> Result<PathBuf> {
    let mut timestamp = String::new();
    write!(timestamp, "{}", Local::now().format(date_format)).map_err(|_| {
        crate::Error::config(format!("invalid filename date format {date_format:?}"))
    })?;
    let stem = sanitize_filename(&format!("{name}_{timestamp}"));
    let extension = extension.trim_start_matches('.');

    let with_stem = |stem: &str| {
        if extension.is_empty() {
            dir.join(stem)
        } else {
            dir.join(format!("{stem}.{extension}"))
        }
    };

    let mut path = with_stem(&stem);
    let mut n = 1;
    while path.exists() {
        path = with_stem(&format!("{stem}_{n}"));
        n += 1;
    }
    Ok(path)
}

/// Handle a capture file after its recorder exited.
///
/// Empty or missing files are removed and yield `None`. Otherwise the file is
/// moved into `completed_dir` when one is configured. Returns the final path.
pub async fn finalize_output(path: &Path, completed_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    match fs::file_size(path).await {
        None => {
            debug!("Capture output {} was never created", path.display());
            return Ok(None);
        }
        Some(0) => {
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| crate::Error::io_path("removing empty capture", path, e))?;
            debug!("Removed empty capture {}", path.display());
            return Ok(None);
        }
        Some(_) => {}
    }

    match completed_dir {
        Some(dir) => {
            let target = fs::move_into_dir(path, dir).await?;
            info!("Moved {} to {}", path.display(), target.display());
            Ok(Some(target))
        }
        None => Ok(Some(path.to_path_buf())),
    }
}
