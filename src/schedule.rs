//! Scheduled shutdown lookup via `pmset`.
//!
//! `pmset -g sched` prints repeating power events in the form
//! `shutdown at 8:00PM every day`. Only the next shutdown time matters
//! here; it is interpreted as today's wall clock.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, warn};

/// Source of the next scheduled shutdown instant.
pub trait ScheduleOracle {
    /// The next scheduled shutdown as local wall-clock time, or `None`
    /// when no schedule is configured.
    ///
    /// An unreadable or unparseable schedule is reported as `None`, not
    /// as a failure; an absent schedule must never abort an evaluation.
    fn next_shutdown(&self) -> impl Future<Output = Option<NaiveDateTime>> + Send;
}

impl<T: ScheduleOracle + Sync> ScheduleOracle for &T {
    fn next_shutdown(&self) -> impl Future<Output = Option<NaiveDateTime>> + Send {
        (**self).next_shutdown()
    }
}

static SHUTDOWN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"shutdown at (\d{1,2}):(\d{2})(AM|PM)").expect("static pattern"));

/// Extract the scheduled shutdown time from `pmset -g sched` output,
/// anchored to `today`.
///
/// Returns `None` when no recognizable `shutdown at H:MM(AM|PM)` entry
/// exists, or when the matched digits do not form a valid clock time.
pub fn parse_shutdown_time(pmset_output: &str, today: NaiveDate) -> Option<NaiveDateTime> {
    let captures = SHUTDOWN_PATTERN.captures(pmset_output)?;

    let hour_12: u32 = captures[1].parse().ok()?;
    let minute: u32 = captures[2].parse().ok()?;
    if hour_12 == 0 || hour_12 > 12 {
        return None;
    }

    // 12-hour to 24-hour: 12AM is 00, 12PM is 12.
    let hour = match (&captures[3], hour_12) {
        ("AM", 12) => 0,
        ("AM", h) => h,
        ("PM", 12) => 12,
        ("PM", h) => h + 12,
        _ => return None,
    };

    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(today.and_time(time))
}

/// Schedule oracle backed by `pmset`.
#[derive(Debug, Default)]
pub struct PmsetScheduleOracle;

impl ScheduleOracle for PmsetScheduleOracle {
    async fn next_shutdown(&self) -> Option<NaiveDateTime> {
        let output = Command::new("/usr/bin/pmset")
            .args(["-g", "sched"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match output {
            Ok(o) if o.status.success() => o,
            Ok(o) => {
                warn!(
                    "pmset exited with code {:?}; treating as no schedule",
                    o.status.code()
                );
                return None;
            }
            Err(e) => {
                warn!("Failed to run pmset: {e}; treating as no schedule");
                return None;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let point = parse_shutdown_time(&stdout, Local::now().date_naive());
        match point {
            Some(p) => debug!("Scheduled shutdown point: {p}"),
            None => debug!("No scheduled shutdown configured"),
        }
        point
    }
}
