//! Recurring scheduler that delivers due sequence steps.
//!
//! Each tick selects a page of PENDING executions whose `scheduled_for` has
//! passed and processes them one by one. An execution is claimed
//! (PENDING -> IN_PROGRESS) before anything else happens, so two workers on
//! the same store never both deliver it. Within one worker, ticks never
//! overlap: a tick that finds the previous one still running is skipped.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::delivery::{DeliveryClient, DeliveryOutcome, OutboundEmail};
use crate::error::{EngineError, StoreError};
use crate::html::{render, TrackingUrls};
use crate::model::{
    Attribution, Enrollment, EnrollmentStatus, Event, EventType, ExecutionStatus,
    SequenceStatus, StepExecution,
};
use crate::store::{ContactStore, EventStore, SequenceStore, Store};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub interval: Duration,
    /// Maximum executions selected per tick
    pub page_size: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Executions this tick claimed and finished
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct SequenceWorker {
    store: Arc<dyn Store>,
    delivery: DeliveryClient,
    urls: TrackingUrls,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    tick_lock: Mutex<()>,
}

impl SequenceWorker {
    pub fn new(
        store: Arc<dyn Store>,
        delivery: DeliveryClient,
        urls: TrackingUrls,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            delivery,
            urls,
            clock,
            settings,
            tick_lock: Mutex::new(()),
        }
    }

    /// Run one tick. Returns `None` when another tick is still in progress.
    pub async fn process_due_executions(&self) -> Result<Option<TickReport>, EngineError> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!("sequence_tick_skipped");
            return Ok(None);
        };

        let now = self.clock.now();
        let due = self
            .store
            .due_executions(now, self.settings.page_size)
            .await?;

        let mut report = TickReport::default();
        for execution in &due {
            match self.process_one(execution).await {
                Ok(Some(status)) => {
                    report.processed += 1;
                    match status {
                        ExecutionStatus::Sent => report.sent += 1,
                        ExecutionStatus::Skipped => report.skipped += 1,
                        _ => report.failed += 1,
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    report.errors += 1;
                    error!(execution_id = %execution.id, error = %e, "sequence_execution_error");
                    self.abandon(execution, &e).await;
                }
            }
        }

        info!(
            due = due.len(),
            processed = report.processed,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            errors = report.errors,
            "sequence_tick_complete"
        );
        Ok(Some(report))
    }

    /// Claim and settle one execution. `None` if the claim was lost.
    async fn process_one(
        &self,
        execution: &StepExecution,
    ) -> Result<Option<ExecutionStatus>, StoreError> {
        if !self.store.claim_execution(execution.id).await? {
            debug!(execution_id = %execution.id, "sequence_claim_lost");
            return Ok(None);
        }

        let enrollment = self.store.enrollment(execution.enrollment_id).await?;
        let live = match &enrollment {
            Some(e) if e.status == EnrollmentStatus::Active => self
                .store
                .sequence(e.sequence_id)
                .await?
                .filter(|s| s.status == SequenceStatus::Active),
            _ => None,
        };

        let (Some(enrollment), Some(sequence)) = (enrollment, live) else {
            self.store
                .finish_execution(execution.id, ExecutionStatus::Skipped, None, None)
                .await?;
            info!(execution_id = %execution.id, "sequence_execution_skipped");
            if let Some(enrollment) = self.store.enrollment(execution.enrollment_id).await? {
                self.complete_if_done(&enrollment).await?;
            }
            return Ok(Some(ExecutionStatus::Skipped));
        };

        let attribution = Attribution::Sequence {
            sequence_id: sequence.id,
            execution_id: execution.id,
        };

        let step = self.store.step(execution.step_id).await?;
        let contact = self.store.contact(enrollment.contact_id).await?;
        let (step, contact) = match (step, contact) {
            (Some(step), Some(contact)) => (step, contact),
            (step, _) => {
                let error = if step.is_none() {
                    "step not found"
                } else {
                    "contact not found"
                };
                self.fail_without_attempt(execution, &enrollment, attribution, error)
                    .await?;
                return Ok(Some(ExecutionStatus::Failed));
            }
        };

        let html = render(
            &step.html_content,
            &contact.merge_variables(),
            &execution.track_token,
            &self.urls,
        );
        let email = OutboundEmail {
            from: sequence.from.mailbox(),
            to: contact.email.clone(),
            subject: step.subject.clone(),
            html,
        };

        let outcome = self.delivery.send_one(attribution, contact.id, email).await?;
        let status = match outcome {
            DeliveryOutcome::Sent { .. } => {
                self.store
                    .finish_execution(
                        execution.id,
                        ExecutionStatus::Sent,
                        Some(self.clock.now()),
                        None,
                    )
                    .await?;
                ExecutionStatus::Sent
            }
            DeliveryOutcome::Failed { error } => {
                self.store
                    .finish_execution(execution.id, ExecutionStatus::Failed, None, Some(error))
                    .await?;
                ExecutionStatus::Failed
            }
        };

        info!(
            execution_id = %execution.id,
            sequence_id = %sequence.id,
            step = step.step_order,
            status = ?status,
            "sequence_execution_processed"
        );

        self.complete_if_done(&enrollment).await?;
        Ok(Some(status))
    }

    async fn fail_without_attempt(
        &self,
        execution: &StepExecution,
        enrollment: &Enrollment,
        attribution: Attribution,
        error: &str,
    ) -> Result<(), StoreError> {
        warn!(execution_id = %execution.id, error = error, "sequence_execution_unresolvable");
        let event = Event::new(
            EventType::EmailFailed,
            attribution,
            enrollment.contact_id,
            self.clock.now(),
        )
        .with_metadata(json!({ "error": error }));
        self.store.append_event(event).await?;
        self.store
            .finish_execution(
                execution.id,
                ExecutionStatus::Failed,
                None,
                Some(error.to_string()),
            )
            .await?;
        self.complete_if_done(enrollment).await
    }

    /// Stamp `completed_at` once every execution is terminal.
    async fn complete_if_done(&self, enrollment: &Enrollment) -> Result<(), StoreError> {
        let executions = self.store.executions_for_enrollment(enrollment.id).await?;
        if !executions.iter().all(|e| e.status.is_terminal()) {
            return Ok(());
        }
        if self
            .store
            .complete_enrollment(enrollment.id, self.clock.now())
            .await?
        {
            info!(
                enrollment_id = %enrollment.id,
                sequence_id = %enrollment.sequence_id,
                "enrollment_completed"
            );
        }
        Ok(())
    }

    /// Best effort: do not leave an errored execution IN_PROGRESS.
    async fn abandon(&self, execution: &StepExecution, cause: &StoreError) {
        let result = self
            .store
            .finish_execution(
                execution.id,
                ExecutionStatus::Failed,
                None,
                Some(cause.to_string()),
            )
            .await;
        if let Err(e) = result {
            debug!(execution_id = %execution.id, error = %e, "sequence_execution_abandon_failed");
        }
    }

    /// Spawn the recurring tick. The first tick runs immediately.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let interval = self.settings.interval;

        let task = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "sequence_scheduler_started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.process_due_executions().await {
                            error!(error = %e, "sequence_tick_failed");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }

            info!("sequence_scheduler_stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}

/// Running scheduler. Dropping it also stops the loop.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop after the tick in flight, if any, has finished.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "sequence_scheduler_join_failed");
        }
    }
}
