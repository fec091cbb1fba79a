//! Runs a unit of work under a retry policy.

use std::thread;

use tracing::debug;

use crate::workers::{SchedulingError, WorkManager};

use super::context::RetryContext;
use super::policy::{ExecutionMode, RetryPolicy};
use super::state::{AttemptResult, RetryState};

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Another attempt may succeed.
    Recoverable(String),
    /// Stop retrying; nothing more can be done for this unit.
    Fatal(String),
}

impl AttemptFailure {
    pub fn recoverable(msg: impl Into<String>) -> Self {
        Self::Recoverable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Recoverable(msg) | Self::Fatal(msg) => msg,
        }
    }
}

/// Terminal result of a retry loop. Carries the final context.
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    Succeeded(RetryContext),
    /// Every attempt the policy allows failed.
    Exhausted(RetryContext),
    /// An attempt reported a fatal failure.
    Abandoned(RetryContext),
}

impl RetryOutcome {
    pub fn context(&self) -> &RetryContext {
        match self {
            Self::Succeeded(ctx) | Self::Exhausted(ctx) | Self::Abandoned(ctx) => ctx,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Executes work under a [`RetryPolicy`].
///
/// In asynchronous mode the whole loop runs on one worker of the shared
/// [`WorkManager`]; waits between attempts keep that worker busy.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    work_manager: WorkManager,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, work_manager: WorkManager) -> Self {
        Self {
            policy,
            work_manager,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn work_manager(&self) -> &WorkManager {
        &self.work_manager
    }

    /// Drive the retry loop on the current thread until it reaches a terminal state.
    pub fn run<F>(&self, description: impl Into<String>, work: F) -> RetryOutcome
    where
        F: FnMut(&RetryContext) -> Result<(), AttemptFailure>,
    {
        run_loop(RetryContext::new(description, self.policy.clone()), work)
    }

    /// Run the loop according to the policy's execution mode and hand the outcome to
    /// `on_complete`.
    ///
    /// Synchronous: blocks through every attempt and delay, then calls `on_complete`
    /// on the caller's thread. Asynchronous: queues the loop and returns at once;
    /// a full pool is reported, never dropped silently.
    pub fn execute<F, C>(
        &self,
        description: impl Into<String>,
        work: F,
        on_complete: C,
    ) -> Result<(), SchedulingError>
    where
        F: FnMut(&RetryContext) -> Result<(), AttemptFailure> + Send + 'static,
        C: FnOnce(RetryOutcome) + Send + 'static,
    {
        let ctx = RetryContext::new(description, self.policy.clone());
        match self.policy.execution_mode() {
            ExecutionMode::Synchronous => {
                on_complete(run_loop(ctx, work));
                Ok(())
            }
            ExecutionMode::Asynchronous => self
                .work_manager
                .schedule(move || on_complete(run_loop(ctx, work))),
        }
    }
}

fn run_loop<F>(mut ctx: RetryContext, mut work: F) -> RetryOutcome
where
    F: FnMut(&RetryContext) -> Result<(), AttemptFailure>,
{
    let policy = ctx.policy().clone();
    let mut state = RetryState::Idle.start();

    loop {
        match state {
            RetryState::Executing { attempt } => {
                ctx.begin_attempt(attempt);
                let result = match work(&ctx) {
                    Ok(()) => AttemptResult::Success,
                    Err(failure) => {
                        debug!(
                            work = ctx.description(),
                            attempt,
                            error = failure.message(),
                            "attempt failed"
                        );
                        let result = match failure {
                            AttemptFailure::Recoverable(_) => AttemptResult::RecoverableFailure,
                            AttemptFailure::Fatal(_) => AttemptResult::FatalFailure,
                        };
                        ctx.record_error(failure.message());
                        result
                    }
                };
                state = state.on_attempt_result(result, &policy);
            }
            RetryState::Waiting { delay, .. } => {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                state = state.resume();
            }
            RetryState::Succeeded { .. } => return RetryOutcome::Succeeded(ctx),
            RetryState::Exhausted { .. } => return RetryOutcome::Exhausted(ctx),
            RetryState::Abandoned { .. } => return RetryOutcome::Abandoned(ctx),
            RetryState::Idle => state = state.start(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::WorkManagerConfig;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn executor(max_attempts: u32, mode: ExecutionMode) -> RetryExecutor {
        let wm = WorkManager::start(WorkManagerConfig::default().with_worker_threads(1)).unwrap();
        RetryExecutor::new(
            RetryPolicy::fixed(max_attempts, Duration::ZERO)
                .unwrap()
                .with_execution_mode(mode),
            wm,
        )
    }

    #[test]
    fn succeeds_on_a_later_attempt() {
        let ex = executor(5, ExecutionMode::Synchronous);
        let outcome = ex.run("flaky", |ctx| {
            if ctx.attempt() < 3 {
                Err(AttemptFailure::recoverable("not yet"))
            } else {
                Ok(())
            }
        });

        assert!(outcome.is_success());
        assert_eq!(outcome.context().attempt(), 3);
        assert_eq!(outcome.context().last_error(), Some("not yet"));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let ex = executor(3, ExecutionMode::Synchronous);
        let mut calls = 0;
        let outcome = ex.run("always-fails", |_| {
            calls += 1;
            Err(AttemptFailure::recoverable("nope"))
        });

        assert!(matches!(outcome, RetryOutcome::Exhausted(_)));
        assert_eq!(calls, 3);
    }

    #[test]
    fn fatal_failure_stops_the_loop() {
        let ex = executor(10, ExecutionMode::Synchronous);
        let mut calls = 0;
        let outcome = ex.run("gone", |_| {
            calls += 1;
            Err(AttemptFailure::fatal("record vanished"))
        });

        assert!(matches!(outcome, RetryOutcome::Abandoned(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn synchronous_execute_completes_on_the_caller_thread() {
        let ex = executor(1, ExecutionMode::Synchronous);
        let caller = thread::current().id();
        let (tx, rx) = channel();

        ex.execute("sync", |_| Ok(()), move |outcome| {
            tx.send((thread::current().id(), outcome.is_success())).unwrap();
        })
        .unwrap();

        assert_eq!(rx.try_recv().unwrap(), (caller, true));
    }

    #[test]
    fn asynchronous_execute_runs_on_the_pool() {
        let ex = executor(2, ExecutionMode::Asynchronous);
        let caller = thread::current().id();
        let (tx, rx) = channel();

        ex.execute(
            "async",
            |_| Err(AttemptFailure::recoverable("down")),
            move |outcome| {
                tx.send((thread::current().id(), outcome.context().attempt()))
                    .unwrap();
            },
        )
        .unwrap();

        let (thread_id, attempts) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(thread_id, caller);
        assert_eq!(attempts, 2);
        ex.work_manager().shutdown();
    }
}
