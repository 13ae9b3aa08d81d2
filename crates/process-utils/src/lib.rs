//! Child process helpers shared by the recorder and the site plugins.
//!
//! Recorders and URL resolvers are external programs. These helpers keep
//! spawning consistent (no console window on Windows) and give every caller
//! the same stop sequence: ask politely on stdin, wait, then kill.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Run `program <arg>` and return the first line of its stdout.
///
/// Used to check that an external tool is installed before a site loop
/// starts depending on it.
pub fn probe_version(program: impl AsRef<OsStr>, arg: &str) -> Option<String> {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd.arg(arg);
    let output = cmd.output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .and_then(|s| s.lines().next().map(|l| l.trim().to_string()))
        .filter(|l| !l.is_empty())
}

#[cfg(feature = "tokio")]
mod async_process {
    use std::ffi::OsStr;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::process::Child;

    use super::NoWindowExt;

    impl NoWindowExt for tokio::process::Command {
        fn no_window(&mut self) {
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                self.as_std_mut().creation_flags(super::CREATE_NO_WINDOW);
            }
        }
    }

    /// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
    ///
    /// The child is killed if its `Child` value is dropped, so a lost handle
    /// never leaves an orphaned recorder behind.
    pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.no_window();
        cmd.kill_on_drop(true);
        cmd
    }

    /// Stop a child process.
    ///
    /// If the child has a piped stdin, `quit` is written to it first (ffmpeg
    /// finalizes its output on `q`). The child then gets `grace` to exit on its
    /// own before it is killed. Returns the exit code when one is available.
    pub async fn stop_child(child: &mut Child, quit: Option<&[u8]>, grace: Duration) -> Option<i32> {
        if let (Some(mut stdin), Some(quit)) = (child.stdin.take(), quit) {
            // A closed pipe means the child is already on its way out.
            let _ = stdin.write_all(quit).await;
            let _ = stdin.flush().await;
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => return status.code(),
            Ok(Err(_)) => return None,
            Err(_) => {}
        }

        let _ = child.kill().await;
        child.wait().await.ok().and_then(|status| status.code())
    }
}

#[cfg(feature = "tokio")]
pub use async_process::{stop_child, tokio_command};
