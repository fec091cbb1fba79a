//! The `UntilSuccessful` router: persistent redelivery of events to one processor.
//!
//! ## Lifecycle of an event
//!
//! 1. `submit` stamps the attempt count (1 when absent), persists the event under its
//!    store key and schedules a redelivery cycle.
//! 2. A cycle re-reads the event from the store and hands it to the processor, up to
//!    `attempts_per_cycle` times.
//! 3. Success removes the record. Failure removes it, and either re-stores it with
//!    the attempt count incremented (then waits and runs another cycle) or, once the
//!    count exceeds `max_retries`, sends it to the dead-letter sink or drops it.
//!
//! The store is the source of truth: anything still in it when the process dies is
//! picked up again by `resume_pending` on the next start.
//!
//! ## Concurrency
//!
//! Cycles for one key never overlap: the next cycle is only scheduled from the
//! completion of the previous one, and `resume_pending` skips keys whose cycle chain
//! is still running or waiting. Different keys are independent.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use relaybus_core::{EventStoreKey, KeyBuilder};
use relaybus_events::{
    DeadLetterSink, Expression, MessageEvent, MessageProcessor, ProcessingError,
};
use relaybus_infra::{
    AttemptFailure, ExecutionMode, ObjectStore, ObjectStoreError, RetryContext, RetryExecutor,
    RetryOutcome, RetryPolicy, SchedulingError, WorkManager, WorkManagerConfig,
};

use crate::config::UntilSuccessfulConfig;
use crate::error::{ConfigError, RoutingError};

/// Store of in-flight events as the router sees it.
pub type EventObjectStore = dyn ObjectStore<EventStoreKey, MessageEvent>;

/// What happened to an event after a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-stored with an incremented attempt count; another cycle follows.
    Rearmed,
    /// Retries used up: dead-lettered, or dropped when no sink is configured.
    Exhausted,
    /// The stored event could not be read back or re-stored.
    Lost,
}

/// Outcome of a `resume_pending` scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub scheduled: usize,
    /// Keys owned by another flow or cluster node, or already being redelivered.
    pub skipped: usize,
    /// Keys that could not be scheduled; they stay stored.
    pub failed: usize,
}

/// Router statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RoutingStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub rearmed: u64,
    pub dead_lettered: u64,
    pub dropped: u64,
    pub lost: u64,
    pub dead_letter_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    rearmed: AtomicU64,
    dead_lettered: AtomicU64,
    dropped: AtomicU64,
    lost: AtomicU64,
    dead_letter_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Builder for [`UntilSuccessful`]. All configuration errors surface from
/// [`build`](Self::build).
pub struct UntilSuccessfulBuilder {
    config: UntilSuccessfulConfig,
    processors: Vec<Arc<dyn MessageProcessor>>,
    store: Option<Arc<EventObjectStore>>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    failure_expression: Option<Expression>,
    work_manager: Option<WorkManager>,
}

impl UntilSuccessfulBuilder {
    pub fn new(config: UntilSuccessfulConfig) -> Self {
        Self {
            config,
            processors: Vec::new(),
            store: None,
            dead_letter: None,
            failure_expression: None,
            work_manager: None,
        }
    }

    /// Add the downstream processor. Exactly one must be added.
    pub fn processor<P: MessageProcessor + 'static>(mut self, processor: P) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn object_store<S>(mut self, store: S) -> Self
    where
        S: ObjectStore<EventStoreKey, MessageEvent> + 'static,
    {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn dead_letter_sink<D: DeadLetterSink + 'static>(mut self, sink: D) -> Self {
        self.dead_letter = Some(Arc::new(sink));
        self
    }

    /// Failure condition given as code. Takes precedence over
    /// `config.failure_expression`.
    pub fn failure_expression(mut self, expression: Expression) -> Self {
        self.failure_expression = Some(expression);
        self
    }

    /// Run cycles on a shared pool instead of starting a dedicated one. A shared pool
    /// is left running by [`UntilSuccessful::stop`].
    pub fn work_manager(mut self, work_manager: WorkManager) -> Self {
        self.work_manager = Some(work_manager);
        self
    }

    pub fn build(self) -> Result<UntilSuccessful, ConfigError> {
        let mut processors = self.processors;
        let processor = match processors.len() {
            0 => return Err(ConfigError::NoProcessor),
            1 => processors.remove(0),
            _ => return Err(ConfigError::MultipleProcessors),
        };
        let store = self.store.ok_or(ConfigError::MissingStore)?;
        let config = self.config;

        let ack_expression = config
            .ack_expression
            .as_deref()
            .map(Expression::parse_wrapped)
            .transpose()
            .map_err(ConfigError::InvalidAckExpression)?;

        let failure_expression = match (self.failure_expression, config.failure_expression.as_deref()) {
            (Some(expr), _) => expr,
            (None, Some(text)) => {
                Expression::parse(text).map_err(ConfigError::InvalidFailureExpression)?
            }
            (None, None) => Expression::has_exception(),
        };

        let policy = RetryPolicy::fixed(config.attempts_per_cycle, config.between_retries)
            .map_err(|e| ConfigError::InvalidRetrySettings(e.to_string()))?
            .with_execution_mode(config.execution_mode);

        let (work_manager, owns_work_manager) = match self.work_manager {
            Some(wm) => (wm, false),
            None => {
                let wm = WorkManager::start(
                    WorkManagerConfig::default()
                        .with_name(format!("{}-until-successful", config.flow))
                        .with_worker_threads(config.worker_threads)
                        .with_queue_capacity(config.queue_capacity),
                )
                .map_err(ConfigError::WorkManager)?;
                (wm, true)
            }
        };

        info!(
            flow = %config.flow,
            cluster_id = %config.cluster_id,
            max_retries = config.max_retries,
            between_retries_ms = config.between_retries.as_millis() as u64,
            attempts_per_cycle = config.attempts_per_cycle,
            execution_mode = ?config.execution_mode,
            failure_expression = %failure_expression,
            "until-successful router configured"
        );

        Ok(UntilSuccessful {
            shared: Arc::new(Shared {
                key_builder: KeyBuilder::new(config.cluster_id.clone()),
                executor: RetryExecutor::new(policy, work_manager),
                config,
                processor,
                store,
                dead_letter: self.dead_letter,
                failure_expression,
                ack_expression,
                owns_work_manager,
                in_flight: Mutex::new(HashSet::new()),
                stopped: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        })
    }
}

/// Persistent redelivery router.
///
/// Dropping the router stops it (see [`stop`](Self::stop)).
pub struct UntilSuccessful {
    shared: Arc<Shared>,
}

struct Shared {
    config: UntilSuccessfulConfig,
    key_builder: KeyBuilder,
    processor: Arc<dyn MessageProcessor>,
    store: Arc<EventObjectStore>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    failure_expression: Expression,
    ack_expression: Option<Expression>,
    executor: RetryExecutor,
    owns_work_manager: bool,
    /// Keys with a cycle running or waiting for its delay.
    in_flight: Mutex<HashSet<EventStoreKey>>,
    stopped: AtomicBool,
    counters: Counters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEnd {
    Done,
    Rearmed,
}

impl UntilSuccessful {
    pub fn builder(config: UntilSuccessfulConfig) -> UntilSuccessfulBuilder {
        UntilSuccessfulBuilder::new(config)
    }

    pub fn config(&self) -> &UntilSuccessfulConfig {
        &self.shared.config
    }

    /// Resume pending work. Call once after building.
    pub fn start(&self) -> Result<ResumeReport, RoutingError> {
        let report = self.resume_pending()?;
        info!(
            flow = %self.shared.config.flow,
            scheduled = report.scheduled,
            skipped = report.skipped,
            failed = report.failed,
            "until-successful router started"
        );
        Ok(report)
    }

    /// Accept an event: persist it and schedule its redelivery.
    ///
    /// Returns the acknowledgement event when an ack expression is configured. In
    /// synchronous mode this only returns after the event succeeded or was given up on.
    pub fn submit(&self, event: MessageEvent) -> Result<Option<MessageEvent>, RoutingError> {
        self.shared.submit(event)
    }

    /// Reschedule every stored event owned by this flow and cluster node.
    ///
    /// A key that cannot be scheduled is logged and counted; the scan goes on.
    pub fn resume_pending(&self) -> Result<ResumeReport, RoutingError> {
        self.shared.resume_pending()
    }

    /// Forget a successfully processed event.
    pub fn on_processing_success(&self, key: &EventStoreKey) {
        self.shared.on_processing_success(key);
    }

    /// Settle a failed cycle: re-arm the event or give up on it.
    pub fn on_processing_failure(&self, key: &EventStoreKey, cause: &str) -> FailureDisposition {
        self.shared.on_processing_failure(key, cause)
    }

    /// One attempt against the downstream processor.
    pub fn process_event(&self, event: MessageEvent) -> Result<(), ProcessingError> {
        self.shared.process_event(event)
    }

    pub fn key_for(&self, event: &MessageEvent) -> EventStoreKey {
        self.shared.key_builder.build_for(event)
    }

    pub fn stats(&self) -> RoutingStats {
        let c = &self.shared.counters;
        RoutingStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            rearmed: c.rearmed.load(Ordering::Relaxed),
            dead_lettered: c.dead_lettered.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            lost: c.lost.load(Ordering::Relaxed),
            dead_letter_failures: c.dead_letter_failures.load(Ordering::Relaxed),
        }
    }

    /// Stop the router's own work manager. Cycles still waiting for their delay are
    /// discarded; their events stay stored for the next `resume_pending`.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.shared.owns_work_manager {
            self.shared.executor.work_manager().shutdown();
            // Delayed cycles were discarded with the pool.
            self.shared.in_flight().clear();
        }
        info!(flow = %self.shared.config.flow, "until-successful router stopped");
    }
}

impl Drop for UntilSuccessful {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn submit(self: &Arc<Self>, mut event: MessageEvent) -> Result<Option<MessageEvent>, RoutingError> {
        if event.flow() != &self.config.flow {
            debug!(
                event_id = %event.id(),
                from = %event.flow(),
                to = %self.config.flow,
                "moving event into the router's flow"
            );
            event = event.with_flow(self.config.flow.clone());
        }

        event
            .materialize_payload()
            .map_err(|e| RoutingError::Serialization(e.to_string()))?;
        serde_json::to_vec(&event).map_err(|e| RoutingError::Serialization(e.to_string()))?;

        let attempt = event.process_attempt_count().unwrap_or(1);
        event.set_process_attempt_count(attempt);

        let key = self.key_builder.build_for(&event);
        self.store.store(&key, &event)?;
        bump(&self.counters.submitted);
        debug!(key = %key, attempt, "event stored");

        let ack = self
            .ack_expression
            .as_ref()
            .map(|expr| event.with_payload(expr.evaluate_payload(&event)));

        self.claim(&key);
        if let Err(err) = self.schedule_for_processing(key.clone()) {
            self.release(&key);
            error!(key = %key, error = %err, "failed to schedule event");
            match self.store.remove(&key) {
                Ok(_) => {}
                Err(remove_err) => {
                    warn!(key = %key, error = %remove_err, "failed to remove unscheduled event");
                }
            }
            return Err(RoutingError::Scheduling(err));
        }

        Ok(ack)
    }

    fn resume_pending(self: &Arc<Self>) -> Result<ResumeReport, RoutingError> {
        let mut report = ResumeReport::default();

        for key in self.store.all_keys()? {
            if !key.belongs_to(&self.config.flow, &self.config.cluster_id) {
                report.skipped += 1;
                continue;
            }
            if !self.claim(&key) {
                debug!(key = %key, "redelivery already in progress");
                report.skipped += 1;
                continue;
            }

            match self.schedule_for_processing(key.clone()) {
                Ok(()) => {
                    debug!(key = %key, "pending event rescheduled");
                    report.scheduled += 1;
                }
                Err(err) => {
                    self.release(&key);
                    error!(key = %key, error = %err, "failed to reschedule pending event");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Start redelivery cycles for `key`.
    ///
    /// Synchronous: runs every cycle on the caller's thread, delays included.
    /// Asynchronous: queues the first cycle; later cycles are queued as earlier ones
    /// finish.
    fn schedule_for_processing(self: &Arc<Self>, key: EventStoreKey) -> Result<(), SchedulingError> {
        match self.executor.policy().execution_mode() {
            ExecutionMode::Synchronous => {
                loop {
                    let outcome = self.executor.run(key.to_string(), |_| self.attempt(&key));
                    match self.finish_cycle(&key, outcome) {
                        CycleEnd::Done => {
                            self.release(&key);
                            return Ok(());
                        }
                        CycleEnd::Rearmed => sleep(self.config.between_retries),
                    }
                }
            }
            ExecutionMode::Asynchronous => {
                let work = {
                    let shared = Arc::clone(self);
                    let key = key.clone();
                    move |_: &RetryContext| shared.attempt(&key)
                };
                let shared = Arc::clone(self);
                self.executor.execute(key.to_string(), work, move |outcome| {
                    shared.complete_async_cycle(key, outcome);
                })
            }
        }
    }

    fn complete_async_cycle(self: &Arc<Self>, key: EventStoreKey, outcome: RetryOutcome) {
        if self.finish_cycle(&key, outcome) == CycleEnd::Done {
            self.release(&key);
            return;
        }

        let shared = Arc::clone(self);
        let next = key.clone();
        let scheduled = self
            .executor
            .work_manager()
            .schedule_after(self.config.between_retries, move || {
                // Already on a worker: run the next cycle in place.
                let outcome = shared
                    .executor
                    .run(next.to_string(), |_| shared.attempt(&next));
                shared.complete_async_cycle(next, outcome);
            });

        if let Err(err) = scheduled {
            self.release(&key);
            error!(
                key = %key,
                error = %err,
                "failed to schedule redelivery, event stays stored until resumed"
            );
        }
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<EventStoreKey>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as having a cycle chain. False when one is already running.
    fn claim(&self, key: &EventStoreKey) -> bool {
        self.in_flight().insert(key.clone())
    }

    fn release(&self, key: &EventStoreKey) {
        self.in_flight().remove(key);
    }

    /// One attempt, reading the current record from the store.
    fn attempt(&self, key: &EventStoreKey) -> Result<(), AttemptFailure> {
        let event = match self.store.retrieve(key) {
            Ok(Some(event)) => event,
            Ok(None) => return Err(AttemptFailure::recoverable("stored event is unreadable")),
            Err(ObjectStoreError::NotFound(_)) => {
                return Err(AttemptFailure::fatal("event is no longer stored"));
            }
            Err(err) => return Err(AttemptFailure::recoverable(err.to_string())),
        };

        self.process_event(event)
            .map_err(|e| AttemptFailure::recoverable(e.to_string()))
    }

    fn process_event(&self, event: MessageEvent) -> Result<(), ProcessingError> {
        let processed = panic::catch_unwind(AssertUnwindSafe(|| self.processor.process(event)))
            .map_err(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown cause".to_string());
                warn!(reason = %reason, "message processor panicked");
                ProcessingError::failed(format!("processor panicked: {reason}"))
            })?;

        let Some(result) = processed? else {
            return Ok(());
        };

        if self.failure_expression.matches(&result) {
            let detail = result
                .exception_payload()
                .map(|e| format!(": {} ({})", e.message, e.exception_type))
                .unwrap_or_default();
            return Err(ProcessingError::failed(format!(
                "result matched failure expression '{}'{detail}",
                self.failure_expression
            )));
        }

        Ok(())
    }

    fn finish_cycle(&self, key: &EventStoreKey, outcome: RetryOutcome) -> CycleEnd {
        match outcome {
            RetryOutcome::Succeeded(_) => {
                self.on_processing_success(key);
                CycleEnd::Done
            }
            RetryOutcome::Exhausted(ctx) => {
                let cause = ctx.last_error().unwrap_or("processing failed");
                match self.on_processing_failure(key, cause) {
                    FailureDisposition::Rearmed => CycleEnd::Rearmed,
                    FailureDisposition::Exhausted | FailureDisposition::Lost => CycleEnd::Done,
                }
            }
            RetryOutcome::Abandoned(ctx) => {
                warn!(
                    key = %key,
                    error = ctx.last_error().unwrap_or_default(),
                    "redelivery abandoned"
                );
                CycleEnd::Done
            }
        }
    }

    fn on_processing_success(&self, key: &EventStoreKey) {
        match self.store.remove(key) {
            Ok(_) => {
                bump(&self.counters.succeeded);
                debug!(key = %key, "event processed, removed from store");
            }
            Err(err) => {
                warn!(key = %key, error = %err, "failed to remove processed event");
            }
        }
    }

    fn on_processing_failure(&self, key: &EventStoreKey, cause: &str) -> FailureDisposition {
        let mut event = match self.store.remove(key) {
            Ok(Some(event)) => event,
            Ok(None) => {
                error!(key = %key, cause, "failed event could not be read back, discarding it");
                bump(&self.counters.lost);
                return FailureDisposition::Lost;
            }
            Err(err) => {
                warn!(key = %key, error = %err, cause, "failed to remove failed event");
                bump(&self.counters.lost);
                return FailureDisposition::Lost;
            }
        };

        let attempt = event.process_attempt_count().unwrap_or(1);
        if attempt <= self.config.max_retries {
            let next = attempt.saturating_add(1);
            event.set_process_attempt_count(next);
            return match self.store.store(key, &event) {
                Ok(()) => {
                    debug!(key = %key, attempt = next, cause, "event re-armed");
                    bump(&self.counters.rearmed);
                    FailureDisposition::Rearmed
                }
                Err(err) => {
                    error!(key = %key, error = %err, "failed to re-store event, it is lost");
                    bump(&self.counters.lost);
                    FailureDisposition::Lost
                }
            };
        }

        info!(key = %key, attempts = attempt, cause, "retries exhausted");
        match &self.dead_letter {
            Some(sink) => match sink.send(event) {
                Ok(()) => bump(&self.counters.dead_lettered),
                Err(err) => {
                    error!(key = %key, error = %err, "dead-letter sink rejected event");
                    bump(&self.counters.dead_letter_failures);
                }
            },
            None => {
                info!(key = %key, "no dead-letter sink configured, event dropped");
                bump(&self.counters.dropped);
            }
        }
        FailureDisposition::Exhausted
    }
}

fn sleep(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}
