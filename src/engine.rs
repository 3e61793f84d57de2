//! Idle escalation and decision engine.
//!
//! One `evaluate()` call is one complete cycle: sample idle time, run
//! the cancellable countdown if the threshold is crossed, and on a
//! timeout resolve and execute the terminal action. The engine holds no
//! state between cycles; an external scheduler provides the cadence.

use chrono::{Local, NaiveDateTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::action::ActionExecutor;
use crate::config::Config;
use crate::domain::{Outcome, PromptOutcome, TerminalAction};
use crate::idle::IdleSampler;
use crate::prompt::CountdownPrompt;
use crate::schedule::ScheduleOracle;
use crate::security::SecurityStateProbe;

/// Failure modes of one evaluation cycle.
///
/// Schedule and security probe failures never appear here; they degrade
/// to safe defaults inside the cycle. Nothing is retried in-process —
/// the next scheduled invocation is the retry mechanism.
#[derive(Debug, Error)]
pub enum EvaluateError {
    /// Idle time could not be measured; nothing can be decided.
    #[error("idle sampling failed")]
    IdleSampling(#[source] anyhow::Error),

    /// The countdown mechanism failed to resolve either way. Never
    /// treated as a cancellation: a cancel requires a positive user
    /// action.
    #[error("countdown prompt failed to resolve")]
    Prompt(#[source] anyhow::Error),

    /// The power-state command could not be launched or refused to run.
    #[error("failed to execute {action}")]
    ActionExecution {
        action: TerminalAction,
        #[source]
        source: anyhow::Error,
    },

    /// Another evaluation is still in its countdown. Two simultaneous
    /// countdown races against one session would be a correctness
    /// hazard, so re-entrant calls fail fast.
    #[error("an evaluation cycle is already in progress")]
    Busy,
}

/// Resolve the terminal action for a timed-out countdown.
///
/// A past-due schedule point means the administrator wants the machine
/// off; the boundary is inclusive. Otherwise the machine restarts, with
/// an authenticated restart when disk encryption would otherwise leave
/// it stuck at the pre-boot unlock prompt.
fn resolve_action(
    schedule_point: Option<NaiveDateTime>,
    now: NaiveDateTime,
    encryption_active: bool,
) -> TerminalAction {
    if let Some(point) = schedule_point
        && now >= point
    {
        return TerminalAction::Shutdown;
    }
    if encryption_active {
        TerminalAction::AuthenticatedRestart
    } else {
        TerminalAction::Restart
    }
}

/// Clears the busy flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The escalation engine, generic over its five collaborators.
pub struct EscalationEngine<I, P, S, E, A> {
    idle: I,
    prompt: P,
    schedule: S,
    security: E,
    action: A,

    threshold: Duration,
    window: Duration,
    message: String,
    cancel_label: String,

    busy: AtomicBool,
}

impl<I, P, S, E, A> EscalationEngine<I, P, S, E, A>
where
    I: IdleSampler,
    P: CountdownPrompt,
    S: ScheduleOracle,
    E: SecurityStateProbe,
    A: ActionExecutor,
{
    /// Build an engine from configuration and collaborators.
    pub fn new(config: &Config, idle: I, prompt: P, schedule: S, security: E, action: A) -> Self {
        Self {
            idle,
            prompt,
            schedule,
            security,
            action,
            threshold: config.idle_threshold(),
            window: config.cancel_window(),
            message: config.rendered_message(),
            cancel_label: config.cancel_label.clone(),
            busy: AtomicBool::new(false),
        }
    }

    /// Run one complete evaluation cycle.
    pub async fn evaluate(&self) -> Result<Outcome, EvaluateError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Acquire)
            .is_err()
        {
            return Err(EvaluateError::Busy);
        }
        let _guard = CycleGuard(&self.busy);

        let sample = self
            .idle
            .sample()
            .await
            .map_err(EvaluateError::IdleSampling)?;
        info!(
            "System idle: {} out of {}s allowed",
            sample,
            self.threshold.as_secs()
        );

        if !sample.exceeds(self.threshold) {
            return Ok(Outcome::NoAction);
        }

        info!(
            "Idle threshold crossed for user {}",
            std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
        );

        let outcome = self
            .prompt
            .present(&self.message, &self.cancel_label, self.window)
            .await
            .map_err(EvaluateError::Prompt)?;

        if outcome == PromptOutcome::Cancelled {
            info!("User cancelled auto logout");
            return Ok(Outcome::Cancelled);
        }

        let schedule_point = self.schedule.next_shutdown().await;
        info!("Scheduled shutdown point: {:?}", schedule_point);

        let now = Local::now().naive_local();
        let past_due = schedule_point.is_some_and(|p| now >= p);

        // Security state only matters on the restart branch; a shutdown
        // never needs pre-boot authentication.
        let encryption_active = if past_due {
            false
        } else {
            match self.security.is_active().await {
                Ok(active) => active,
                Err(e) => {
                    warn!("Security probe unavailable, assuming plain restart: {e:#}");
                    false
                }
            }
        };

        let action = resolve_action(schedule_point, now, encryption_active);
        info!("Resolved terminal action: {action}");

        self.action
            .execute(action)
            .await
            .map_err(|source| EvaluateError::ActionExecution { action, source })?;

        Ok(Outcome::ActionTaken(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IdleSample;
    use anyhow::{Result, anyhow};
    use chrono::NaiveDate;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    struct FixedIdle(f64);

    impl IdleSampler for FixedIdle {
        async fn sample(&self) -> Result<IdleSample> {
            Ok(IdleSample::from_seconds(self.0))
        }
    }

    struct FailingIdle;

    impl IdleSampler for FailingIdle {
        async fn sample(&self) -> Result<IdleSample> {
            Err(anyhow!("ioreg unavailable"))
        }
    }

    /// Prompt that resolves immediately with a scripted outcome and
    /// counts presentations.
    struct ScriptedPrompt {
        outcome: Option<PromptOutcome>,
        presented: AtomicU32,
    }

    impl ScriptedPrompt {
        fn new(outcome: Option<PromptOutcome>) -> Self {
            Self {
                outcome,
                presented: AtomicU32::new(0),
            }
        }

        fn presentations(&self) -> u32 {
            self.presented.load(Ordering::SeqCst)
        }
    }

    impl CountdownPrompt for ScriptedPrompt {
        async fn present(
            &self,
            _message: &str,
            _cancel_label: &str,
            _window: Duration,
        ) -> Result<PromptOutcome> {
            self.presented.fetch_add(1, Ordering::SeqCst);
            self.outcome.ok_or_else(|| anyhow!("dialog machinery broke"))
        }
    }

    /// Prompt that blocks until released, for overlap tests.
    struct BlockedPrompt(Arc<Notify>);

    impl CountdownPrompt for BlockedPrompt {
        async fn present(
            &self,
            _message: &str,
            _cancel_label: &str,
            _window: Duration,
        ) -> Result<PromptOutcome> {
            self.0.notified().await;
            Ok(PromptOutcome::TimedOut)
        }
    }

    struct FixedSchedule(Option<NaiveDateTime>);

    impl ScheduleOracle for FixedSchedule {
        async fn next_shutdown(&self) -> Option<NaiveDateTime> {
            self.0
        }
    }

    /// `None` simulates an unavailable probe.
    struct FixedSecurity(Option<bool>);

    impl SecurityStateProbe for FixedSecurity {
        async fn is_active(&self) -> Result<bool> {
            self.0.ok_or_else(|| anyhow!("fdesetup unavailable"))
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<TerminalAction>>,
    }

    impl RecordingExecutor {
        fn calls(&self) -> Vec<TerminalAction> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ActionExecutor for RecordingExecutor {
        async fn execute(&self, action: TerminalAction) -> Result<()> {
            self.calls.lock().unwrap().push(action);
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            max_idle_seconds: 1800,
            cancel_window_seconds: 120,
            ..Config::default()
        }
    }

    fn past_point() -> NaiveDateTime {
        Local::now().naive_local() - chrono::Duration::seconds(1)
    }

    fn future_point() -> NaiveDateTime {
        Local::now().naive_local() + chrono::Duration::hours(1)
    }

    #[tokio::test]
    async fn test_below_threshold_is_no_action() {
        let executor = RecordingExecutor::default();
        let prompt = ScriptedPrompt::new(Some(PromptOutcome::TimedOut));
        let engine = EscalationEngine::new(
            &test_config(),
            FixedIdle(1799.0),
            &prompt,
            FixedSchedule(None),
            FixedSecurity(Some(true)),
            &executor,
        );

        let outcome = engine.evaluate().await.unwrap();
        assert_eq!(outcome, Outcome::NoAction);
        assert_eq!(prompt.presentations(), 0);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_takes_no_action() {
        let executor = RecordingExecutor::default();
        let prompt = ScriptedPrompt::new(Some(PromptOutcome::Cancelled));
        let engine = EscalationEngine::new(
            &test_config(),
            FixedIdle(2000.0),
            &prompt,
            FixedSchedule(Some(past_point())),
            FixedSecurity(Some(true)),
            &executor,
        );

        let outcome = engine.evaluate().await.unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(prompt.presentations(), 1);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_no_schedule_plain_restart() {
        // threshold=1800, window=120, sample=2000, no schedule,
        // encryption off, no response: exactly one plain restart.
        let executor = RecordingExecutor::default();
        let engine = EscalationEngine::new(
            &test_config(),
            FixedIdle(2000.0),
            ScriptedPrompt::new(Some(PromptOutcome::TimedOut)),
            FixedSchedule(None),
            FixedSecurity(Some(false)),
            &executor,
        );

        let outcome = engine.evaluate().await.unwrap();
        assert_eq!(outcome, Outcome::ActionTaken(TerminalAction::Restart));
        assert_eq!(executor.calls(), vec![TerminalAction::Restart]);
    }

    #[tokio::test]
    async fn test_timeout_no_schedule_encrypted_auth_restart() {
        let executor = RecordingExecutor::default();
        let engine = EscalationEngine::new(
            &test_config(),
            FixedIdle(2000.0),
            ScriptedPrompt::new(Some(PromptOutcome::TimedOut)),
            FixedSchedule(None),
            FixedSecurity(Some(true)),
            &executor,
        );

        let outcome = engine.evaluate().await.unwrap();
        assert_eq!(
            outcome,
            Outcome::ActionTaken(TerminalAction::AuthenticatedRestart)
        );
        assert_eq!(executor.calls(), vec![TerminalAction::AuthenticatedRestart]);
    }

    #[tokio::test]
    async fn test_timeout_past_due_schedule_shuts_down() {
        let executor = RecordingExecutor::default();
        let engine = EscalationEngine::new(
            &test_config(),
            FixedIdle(2000.0),
            ScriptedPrompt::new(Some(PromptOutcome::TimedOut)),
            FixedSchedule(Some(past_point())),
            // Encryption state must not matter on the shutdown branch.
            FixedSecurity(Some(true)),
            &executor,
        );

        let outcome = engine.evaluate().await.unwrap();
        assert_eq!(outcome, Outcome::ActionTaken(TerminalAction::Shutdown));
        assert_eq!(executor.calls(), vec![TerminalAction::Shutdown]);
    }

    #[tokio::test]
    async fn test_timeout_future_schedule_restarts() {
        let executor = RecordingExecutor::default();
        let engine = EscalationEngine::new(
            &test_config(),
            FixedIdle(2000.0),
            ScriptedPrompt::new(Some(PromptOutcome::TimedOut)),
            FixedSchedule(Some(future_point())),
            FixedSecurity(Some(false)),
            &executor,
        );

        let outcome = engine.evaluate().await.unwrap();
        assert_eq!(outcome, Outcome::ActionTaken(TerminalAction::Restart));
    }

    #[tokio::test]
    async fn test_security_probe_failure_degrades_to_plain_restart() {
        let executor = RecordingExecutor::default();
        let engine = EscalationEngine::new(
            &test_config(),
            FixedIdle(2000.0),
            ScriptedPrompt::new(Some(PromptOutcome::TimedOut)),
            FixedSchedule(None),
            FixedSecurity(None),
            &executor,
        );

        let outcome = engine.evaluate().await.unwrap();
        assert_eq!(outcome, Outcome::ActionTaken(TerminalAction::Restart));
    }

    #[tokio::test]
    async fn test_prompt_failure_aborts_without_action() {
        let executor = RecordingExecutor::default();
        let engine = EscalationEngine::new(
            &test_config(),
            FixedIdle(2000.0),
            ScriptedPrompt::new(None),
            FixedSchedule(Some(past_point())),
            FixedSecurity(Some(false)),
            &executor,
        );

        let err = engine.evaluate().await.unwrap_err();
        assert!(matches!(err, EvaluateError::Prompt(_)));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_idle_sampling_failure_is_fatal() {
        let executor = RecordingExecutor::default();
        let prompt = ScriptedPrompt::new(Some(PromptOutcome::TimedOut));
        let engine = EscalationEngine::new(
            &test_config(),
            FailingIdle,
            &prompt,
            FixedSchedule(None),
            FixedSecurity(Some(false)),
            &executor,
        );

        let err = engine.evaluate().await.unwrap_err();
        assert!(matches!(err, EvaluateError::IdleSampling(_)));
        assert_eq!(prompt.presentations(), 0);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_evaluation_is_rejected() {
        let release = Arc::new(Notify::new());
        let executor: &'static RecordingExecutor = Box::leak(Box::default());
        let engine = Arc::new(EscalationEngine::new(
            &test_config(),
            FixedIdle(2000.0),
            BlockedPrompt(release.clone()),
            FixedSchedule(None),
            FixedSecurity(Some(false)),
            executor,
        ));

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.evaluate().await })
        };

        // Let the first cycle reach its countdown.
        tokio::task::yield_now().await;

        let err = engine.evaluate().await.unwrap_err();
        assert!(matches!(err, EvaluateError::Busy));

        release.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome, Outcome::ActionTaken(TerminalAction::Restart));
        assert_eq!(executor.calls(), vec![TerminalAction::Restart]);
    }

    #[test]
    fn test_resolve_action_boundary_is_inclusive() {
        let point = NaiveDate::from_ymd_opt(2026, 8, 29)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();

        // Exactly at the scheduled instant: shutdown wins.
        assert_eq!(
            resolve_action(Some(point), point, false),
            TerminalAction::Shutdown
        );
        // One second before: restart branch.
        assert_eq!(
            resolve_action(Some(point), point - chrono::Duration::seconds(1), false),
            TerminalAction::Restart
        );
        assert_eq!(
            resolve_action(Some(point), point - chrono::Duration::seconds(1), true),
            TerminalAction::AuthenticatedRestart
        );
        // One second after: still shutdown.
        assert_eq!(
            resolve_action(Some(point), point + chrono::Duration::seconds(1), true),
            TerminalAction::Shutdown
        );
    }

    #[test]
    fn test_resolve_action_without_schedule_never_shuts_down() {
        let now = Local::now().naive_local();
        assert_eq!(resolve_action(None, now, false), TerminalAction::Restart);
        assert_eq!(
            resolve_action(None, now, true),
            TerminalAction::AuthenticatedRestart
        );
    }
}
