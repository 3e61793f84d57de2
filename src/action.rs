//! Power-state command execution.
//!
//! Maps a resolved [`TerminalAction`] onto the corresponding OS command.
//! Deployment grants the console user sudo rights for exactly these
//! three commands.

use anyhow::{Context, Result, bail};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info};

use crate::domain::TerminalAction;

/// Executes the resolved terminal action.
pub trait ActionExecutor {
    /// Launch the power-state command for `action`.
    ///
    /// The command is expected to end this process's execution context;
    /// callers must not rely on code running after a successful launch.
    fn execute(&self, action: TerminalAction) -> impl Future<Output = Result<()>> + Send;
}

impl<T: ActionExecutor + Sync> ActionExecutor for &T {
    fn execute(&self, action: TerminalAction) -> impl Future<Output = Result<()>> + Send {
        (**self).execute(action)
    }
}

/// The command line for each terminal action.
fn command_for(action: TerminalAction) -> (&'static str, &'static [&'static str]) {
    match action {
        TerminalAction::Shutdown => ("/sbin/shutdown", &["-h", "now"]),
        TerminalAction::Restart => ("/sbin/reboot", &["-q"]),
        TerminalAction::AuthenticatedRestart => ("/usr/bin/fdesetup", &["authrestart"]),
    }
}

/// Action executor that shells out through sudo.
#[derive(Debug, Default)]
pub struct PowerActionExecutor {
    dry_run: bool,
}

impl PowerActionExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl ActionExecutor for PowerActionExecutor {
    async fn execute(&self, action: TerminalAction) -> Result<()> {
        let (program, args) = command_for(action);

        if self.dry_run {
            info!(
                "[DRY RUN] Would execute: sudo -u root {} {}",
                program,
                args.join(" ")
            );
            return Ok(());
        }

        error!("Executing {}: {} {}", action, program, args.join(" "));

        let output = Command::new("/usr/bin/sudo")
            .args(["-u", "root", program])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to launch {program}"))?;

        // The machine normally dies before this point. A return with a
        // failing status means the command itself refused to run.
        if !output.status.success() {
            bail!(
                "{} exited with code {:?}: {}",
                program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }
}
