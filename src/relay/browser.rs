use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::debug;

/// Opens `url` in the platform default browser without waiting for it.
pub fn open(url: &str) -> Result<()> {
    let mut command = opener_command(url);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let mut child = command
        .spawn()
        .with_context(|| format!("failed launching browser for {url}"))?;
    std::thread::spawn(move || {
        if let Ok(status) = child.wait() {
            debug!("browser launcher exited with {status}");
        }
    });
    Ok(())
}

fn opener_command(url: &str) -> Command {
    if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        command.arg(url);
        command
    } else if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/c", "start", url]);
        command
    } else {
        let mut command = Command::new("xdg-open");
        command.arg(url);
        command
    }
}
