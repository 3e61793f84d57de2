//! Cancellable countdown dialog via osascript.
//!
//! Presents an AppleScript `display dialog` with a single cancel button
//! and a `giving up after` timeout, then maps the reply onto exactly one
//! of [`PromptOutcome::Cancelled`] or [`PromptOutcome::TimedOut`].
//!
//! The mapping is deliberately strict: a reply that states neither a
//! give-up nor a cancel is an error, never an outcome. Treating "no
//! recognizable reply" as a cancellation would quietly disable
//! escalation forever.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Config;
use crate::domain::PromptOutcome;

/// Presents the countdown race to the user.
pub trait CountdownPrompt {
    /// Block until the user cancels or `window` elapses.
    ///
    /// Returns an error when the prompt mechanism itself fails to
    /// resolve either way; the caller must abort the cycle rather than
    /// guess an outcome.
    fn present(
        &self,
        message: &str,
        cancel_label: &str,
        window: Duration,
    ) -> impl Future<Output = Result<PromptOutcome>> + Send;
}

impl<T: CountdownPrompt + Sync> CountdownPrompt for &T {
    fn present(
        &self,
        message: &str,
        cancel_label: &str,
        window: Duration,
    ) -> impl Future<Output = Result<PromptOutcome>> + Send {
        (**self).present(message, cancel_label, window)
    }
}

/// Extra time allowed for osascript to start up and tear down before
/// the watchdog declares it wedged.
const WATCHDOG_GRACE: Duration = Duration::from_secs(15);

/// AppleScript's error number for a user-cancelled dialog.
const USER_CANCELED_ERR: &str = "(-128)";

/// Map an osascript reply onto a prompt outcome.
///
/// Returns `None` for any reply that is neither a timeout nor a
/// positive cancel; the caller surfaces that as a prompt failure.
pub fn parse_dialog_reply(
    exit_ok: bool,
    stdout: &str,
    stderr: &str,
    cancel_label: &str,
) -> Option<PromptOutcome> {
    if exit_ok && stdout.contains("gave up:true") {
        return Some(PromptOutcome::TimedOut);
    }

    // The cancel button normally surfaces as AppleScript error -128
    // rather than a button-returned record.
    if !exit_ok && stderr.contains(USER_CANCELED_ERR) {
        return Some(PromptOutcome::Cancelled);
    }

    // A cancel label not named "Cancel" loses its cancel role and comes
    // back as an ordinary button press.
    if exit_ok && stdout.contains(&format!("button returned:{cancel_label}")) {
        return Some(PromptOutcome::Cancelled);
    }

    None
}

/// Escape a string for interpolation into an AppleScript literal.
fn applescript_escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Countdown dialog backed by osascript.
#[derive(Debug, Default)]
pub struct OsascriptPrompt {
    icon_path: Option<PathBuf>,
    alert_sound: Option<String>,
}

impl OsascriptPrompt {
    /// Create a prompt using the configured icon and alert sound.
    pub fn from_config(config: &Config) -> Self {
        Self {
            icon_path: config.icon_path.clone(),
            alert_sound: config.alert_sound.clone(),
        }
    }

    /// Build the dialog script for the given copy and window.
    fn build_script(&self, message: &str, cancel_label: &str, window: Duration) -> String {
        let message = applescript_escape(message);
        let cancel = applescript_escape(cancel_label);

        let icon = match &self.icon_path {
            Some(path) => format!(
                "with icon POSIX file \"{}\"",
                applescript_escape(&path.display().to_string())
            ),
            None => "with icon caution".to_string(),
        };

        format!(
            "tell application \"System Events\"\n\
             \tactivate\n\
             \tdisplay dialog \"{message}\" buttons {{\"{cancel}\"}} \
             default button \"{cancel}\" {icon} giving up after {}\n\
             end tell",
            window.as_secs()
        )
    }

    /// Play the configured alert sound, if any. Fire-and-forget; a
    /// missing sound never affects the countdown.
    fn play_alert_sound(&self) {
        let Some(name) = &self.alert_sound else {
            return;
        };
        let path = format!("/System/Library/Sounds/{name}.aiff");
        match Command::new("/usr/bin/afplay")
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => debug!("Playing alert sound: {name}"),
            Err(e) => warn!("Failed to play alert sound {name}: {e}"),
        }
    }
}

impl CountdownPrompt for OsascriptPrompt {
    async fn present(
        &self,
        message: &str,
        cancel_label: &str,
        window: Duration,
    ) -> Result<PromptOutcome> {
        let script = self.build_script(message, cancel_label, window);
        debug!("Presenting countdown dialog ({}s window)", window.as_secs());

        self.play_alert_sound();

        let mut child = Command::new("/usr/bin/osascript")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn osascript")?;

        {
            let mut stdin = child
                .stdin
                .take()
                .context("osascript stdin unavailable")?;
            stdin
                .write_all(script.as_bytes())
                .await
                .context("Failed to write dialog script")?;
        }

        // The dialog gives itself up after the window; the watchdog only
        // catches a wedged osascript. kill_on_drop reaps the child when
        // the timeout abandons the wait.
        let output = match tokio::time::timeout(window + WATCHDOG_GRACE, child.wait_with_output())
            .await
        {
            Ok(result) => result.context("Failed to wait for osascript")?,
            Err(_) => bail!(
                "osascript did not resolve within {}s window plus grace",
                window.as_secs()
            ),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let Some(outcome) =
            parse_dialog_reply(output.status.success(), &stdout, &stderr, cancel_label)
        else {
            bail!(
                "Unrecognized dialog reply (exit code {:?}): stdout={:?} stderr={:?}",
                output.status.code(),
                stdout.trim(),
                stderr.trim()
            );
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gave_up_is_timed_out() {
        let outcome = parse_dialog_reply(true, "button returned:, gave up:true\n", "", "Cancel");
        assert_eq!(outcome, Some(PromptOutcome::TimedOut));
    }

    #[test]
    fn test_user_canceled_error_is_cancelled() {
        let stderr = "execution error: User canceled. (-128)\n";
        let outcome = parse_dialog_reply(false, "", stderr, "Cancel");
        assert_eq!(outcome, Some(PromptOutcome::Cancelled));
    }

    #[test]
    fn test_plain_button_press_is_cancelled() {
        let stdout = "button returned:Keep me logged in, gave up:false\n";
        let outcome = parse_dialog_reply(true, stdout, "", "Keep me logged in");
        assert_eq!(outcome, Some(PromptOutcome::Cancelled));
    }

    #[test]
    fn test_unrecognized_reply_is_not_an_outcome() {
        // A failed osascript run must never read as a cancellation.
        assert_eq!(
            parse_dialog_reply(false, "", "execution error: No user interaction allowed. (-1713)", "Cancel"),
            None
        );
        assert_eq!(parse_dialog_reply(false, "", "", "Cancel"), None);
        assert_eq!(parse_dialog_reply(true, "", "", "Cancel"), None);
    }

    #[test]
    fn test_gave_up_wins_over_button_text() {
        // Give-up replies still carry a button record; timeout takes
        // precedence over any stale button text.
        let stdout = "button returned:, gave up:true\n";
        assert_eq!(
            parse_dialog_reply(true, stdout, "", ""),
            Some(PromptOutcome::TimedOut)
        );
    }

    #[test]
    fn test_applescript_escape() {
        assert_eq!(applescript_escape(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(applescript_escape(r"a\b"), r"a\\b");
        assert_eq!(applescript_escape("line1\nline2"), r"line1\nline2");
    }

    #[test]
    fn test_build_script_contents() {
        let prompt = OsascriptPrompt::default();
        let script = prompt.build_script("Logging out!", "Cancel", Duration::from_secs(120));
        assert!(script.contains("display dialog \"Logging out!\""));
        assert!(script.contains("buttons {\"Cancel\"}"));
        assert!(script.contains("giving up after 120"));
        assert!(script.contains("with icon caution"));
    }

    #[test]
    fn test_build_script_with_icon() {
        let prompt = OsascriptPrompt {
            icon_path: Some(PathBuf::from("/usr/local/share/EvilCloud.png")),
            alert_sound: None,
        };
        let script = prompt.build_script("msg", "Cancel", Duration::from_secs(60));
        assert!(script.contains("with icon POSIX file \"/usr/local/share/EvilCloud.png\""));
    }
}
