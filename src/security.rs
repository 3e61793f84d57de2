//! Disk-encryption state via `fdesetup`.

use anyhow::{Context, Result, bail};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Reports whether full-disk encryption is active.
pub trait SecurityStateProbe {
    /// Whether FileVault is on.
    ///
    /// Failures here are recoverable: the caller falls back to a plain
    /// restart rather than aborting the cycle.
    fn is_active(&self) -> impl Future<Output = Result<bool>> + Send;
}

impl<T: SecurityStateProbe + Sync> SecurityStateProbe for &T {
    fn is_active(&self) -> impl Future<Output = Result<bool>> + Send {
        (**self).is_active()
    }
}

/// Interpret `fdesetup status` output.
///
/// Returns `None` for output that states neither on nor off.
pub fn parse_filevault_status(output: &str) -> Option<bool> {
    // Deferred-enablement output still starts with one of these lines.
    if output.starts_with("FileVault is On") {
        Some(true)
    } else if output.starts_with("FileVault is Off") {
        Some(false)
    } else {
        None
    }
}

/// Security probe backed by `fdesetup`.
#[derive(Debug, Default)]
pub struct FdesetupProbe;

impl SecurityStateProbe for FdesetupProbe {
    async fn is_active(&self) -> Result<bool> {
        let output = Command::new("/usr/bin/fdesetup")
            .arg("status")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run fdesetup")?;

        if !output.status.success() {
            bail!(
                "fdesetup exited with code {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(active) = parse_filevault_status(&stdout) else {
            bail!("Unrecognized fdesetup status output: {}", stdout.trim());
        };

        debug!("FileVault active: {active}");
        Ok(active)
    }
}
