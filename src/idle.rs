//! Idle time sampling via the IOKit registry.
//!
//! Reads `HIDIdleTime` from `ioreg -c IOHIDSystem` output. The registry
//! reports nanoseconds since the last keyboard/pointer input.

use anyhow::{Context, Result, bail};
use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::debug;

use crate::domain::IdleSample;

/// Source of the current idle duration.
pub trait IdleSampler {
    /// Sample seconds of continuous input inactivity.
    ///
    /// A failure here is fatal to the evaluation cycle: nothing can be
    /// decided without an idle measurement.
    fn sample(&self) -> impl Future<Output = Result<IdleSample>> + Send;
}

impl<T: IdleSampler + Sync> IdleSampler for &T {
    fn sample(&self) -> impl Future<Output = Result<IdleSample>> + Send {
        (**self).sample()
    }
}

/// First `HIDIdleTime` entry in the registry dump. There are many; the
/// first is close enough, matching what the registry reports for the
/// aggregate HID system.
static HID_IDLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""HIDIdleTime" = (\d+)"#).expect("static pattern"));

/// Parse idle seconds out of `ioreg -c IOHIDSystem` output.
///
/// Returns `None` when no `HIDIdleTime` entry is present (headless
/// session, SSH-only login).
#[allow(clippy::cast_precision_loss)]
pub fn parse_idle_seconds(ioreg_output: &str) -> Option<f64> {
    let captures = HID_IDLE_PATTERN.captures(ioreg_output)?;
    let nanoseconds: u64 = captures[1].parse().ok()?;
    Some(nanoseconds as f64 / 1_000_000_000.0)
}

/// Idle sampler backed by `ioreg`.
#[derive(Debug, Default)]
pub struct IoregIdleSampler;

impl IdleSampler for IoregIdleSampler {
    async fn sample(&self) -> Result<IdleSample> {
        let output = Command::new("/usr/sbin/ioreg")
            .args(["-c", "IOHIDSystem"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run ioreg")?;

        if !output.status.success() {
            bail!(
                "ioreg exited with code {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(seconds) = parse_idle_seconds(&stdout) else {
            bail!("No HIDIdleTime entry in ioreg output");
        };

        debug!("HIDIdleTime: {:.1}s", seconds);
        Ok(IdleSample::from_seconds(seconds))
    }
}
