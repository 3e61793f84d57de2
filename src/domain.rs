//! Domain types for the idle-logout decision cycle.

use std::fmt;
use std::time::Duration;

/// A single measurement of continuous user-input inactivity.
///
/// Produced fresh on each evaluation cycle; no history is kept between
/// invocations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleSample(f64);

impl IdleSample {
    /// Create a sample from whole-and-fractional seconds.
    pub fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    /// Idle time in seconds.
    pub fn as_seconds(self) -> f64 {
        self.0
    }

    /// Whether this sample meets or exceeds the escalation threshold.
    pub fn exceeds(self, threshold: Duration) -> bool {
        self.0 >= threshold.as_secs_f64()
    }
}

impl fmt::Display for IdleSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}s", self.0)
    }
}

/// Resolution of the countdown race.
///
/// Exactly one of these is produced per escalation. `Cancelled` is only
/// ever the result of a positive user action; a prompt that fails to
/// resolve either way is an error, not an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    /// The user clicked the cancel button before the window elapsed.
    Cancelled,
    /// The window elapsed with no user response.
    TimedOut,
}

/// The terminal action the engine resolves once a countdown times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalAction {
    /// Power the machine off (scheduled shutdown point is past due).
    Shutdown,
    /// Plain restart.
    Restart,
    /// Restart that pre-authenticates past full-disk encryption so the
    /// machine comes back to a normal login screen.
    AuthenticatedRestart,
}

impl TerminalAction {
    /// Human-readable name for log records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::Restart => "restart",
            Self::AuthenticatedRestart => "authenticated restart",
        }
    }
}

impl fmt::Display for TerminalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one full evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Idle time was below the threshold; nothing happened.
    NoAction,
    /// The user cancelled the countdown; nothing happened.
    Cancelled,
    /// The countdown timed out and the given action was executed.
    ActionTaken(TerminalAction),
}
