//! Enrollment and step management for drip sequences.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{EngineError, StoreError};
use crate::model::{
    Enrollment, EnrollmentStatus, ExecutionStatus, Sequence, SequenceStatus, SequenceStep,
    StepDraft, StepExecution,
};
use crate::store::{ContactStore, SequenceStore, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrollSummary {
    pub enrolled: usize,
    pub skipped: usize,
}

pub struct SequenceService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl SequenceService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn active_sequence(&self, sequence_id: Uuid) -> Result<Sequence, EngineError> {
        let sequence = self
            .store
            .sequence(sequence_id)
            .await?
            .ok_or(EngineError::SequenceNotFound)?;
        if sequence.status != SequenceStatus::Active {
            return Err(EngineError::SequenceInactive);
        }
        Ok(sequence)
    }

    /// Enroll one contact, scheduling one execution per current step.
    pub async fn enroll(
        &self,
        sequence_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Enrollment, EngineError> {
        let sequence = self.active_sequence(sequence_id).await?;
        let steps = self.store.steps(sequence.id).await?;
        self.enroll_in(&sequence, &steps, contact_id).await
    }

    /// Enroll several contacts. Unknown or already-enrolled contacts are
    /// skipped; sequence-level problems fail the whole call.
    pub async fn enroll_many(
        &self,
        sequence_id: Uuid,
        contact_ids: &[Uuid],
    ) -> Result<EnrollSummary, EngineError> {
        let sequence = self.active_sequence(sequence_id).await?;
        let steps = self.store.steps(sequence.id).await?;

        let mut summary = EnrollSummary::default();
        for &contact_id in contact_ids {
            match self.enroll_in(&sequence, &steps, contact_id).await {
                Ok(_) => summary.enrolled += 1,
                Err(EngineError::ContactNotFound(_) | EngineError::AlreadyEnrolled) => {
                    debug!(sequence_id = %sequence_id, contact_id = %contact_id, "enrollment_skipped");
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            sequence_id = %sequence_id,
            enrolled = summary.enrolled,
            skipped = summary.skipped,
            "contacts_enrolled"
        );
        Ok(summary)
    }

    async fn enroll_in(
        &self,
        sequence: &Sequence,
        steps: &[SequenceStep],
        contact_id: Uuid,
    ) -> Result<Enrollment, EngineError> {
        if self.store.contact(contact_id).await?.is_none() {
            return Err(EngineError::ContactNotFound(contact_id));
        }
        if self
            .store
            .find_enrollment(sequence.id, contact_id)
            .await?
            .is_some()
        {
            return Err(EngineError::AlreadyEnrolled);
        }

        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            sequence_id: sequence.id,
            contact_id,
            status: EnrollmentStatus::Active,
            enrolled_at: self.clock.now(),
            completed_at: None,
        };
        let executions: Vec<StepExecution> = steps
            .iter()
            .map(|step| StepExecution::schedule(&enrollment, step))
            .collect::<Option<_>>()
            .ok_or_else(|| {
                EngineError::Validation("a step delay is out of range".to_string())
            })?;

        match self
            .store
            .create_enrollment(enrollment.clone(), executions)
            .await
        {
            Ok(()) => Ok(enrollment),
            Err(StoreError::Conflict(_)) => Err(EngineError::AlreadyEnrolled),
            Err(e) => Err(e.into()),
        }
    }

    /// Archive the contact's enrollment; its pending executions will be skipped.
    pub async fn unenroll(
        &self,
        sequence_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Enrollment, EngineError> {
        let mut enrollment = self
            .store
            .find_enrollment(sequence_id, contact_id)
            .await?
            .ok_or(EngineError::EnrollmentNotFound)?;
        self.store
            .set_enrollment_status(enrollment.id, EnrollmentStatus::Archived)
            .await?;
        enrollment.status = EnrollmentStatus::Archived;

        info!(
            sequence_id = %sequence_id,
            contact_id = %contact_id,
            enrollment_id = %enrollment.id,
            "contact_unenrolled"
        );
        Ok(enrollment)
    }

    /// Replace the step list. Existing executions keep pointing at the old
    /// steps, so this is refused while any of them can still be sent.
    pub async fn replace_steps(
        &self,
        sequence_id: Uuid,
        drafts: Vec<StepDraft>,
    ) -> Result<Vec<SequenceStep>, EngineError> {
        if self.store.sequence(sequence_id).await?.is_none() {
            return Err(EngineError::SequenceNotFound);
        }
        if drafts.is_empty() {
            return Err(EngineError::Validation(
                "at least one step is required".to_string(),
            ));
        }
        for (index, draft) in drafts.iter().enumerate() {
            if let Some(problem) = draft.problem() {
                return Err(EngineError::Validation(format!("step {index}: {problem}")));
            }
        }
        if let Some(status) = self.store.open_execution_status(sequence_id).await? {
            return Err(EngineError::StepsLocked(status));
        }

        let steps: Vec<SequenceStep> = drafts
            .into_iter()
            .enumerate()
            .map(|(order, draft)| draft.into_step(sequence_id, order as u32))
            .collect();

        match self.store.replace_steps(sequence_id, steps.clone()).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(EngineError::StepsLocked(ExecutionStatus::Pending))
            }
            Err(e) => return Err(e.into()),
        }

        info!(sequence_id = %sequence_id, steps = steps.len(), "sequence_steps_replaced");
        Ok(steps)
    }
}
