//! Campaign send trigger.
//!
//! `start_send` validates and claims the campaign synchronously, then hands
//! the bulk run to a spawned task and returns right away with the recipient
//! count. The task owns the `SENDING -> COMPLETED | FAILED` transition.

pub mod orchestrator;

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{EngineError, StoreError};
use crate::html::trackable_link_count;
use crate::model::{Campaign, CampaignStatus, RecipientLink};
use crate::store::{CampaignStore, ContactStore, Store};

pub use orchestrator::{BulkSendSettings, BulkSender, SendTally};

/// What the trigger reports back before delivery begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SendAck {
    pub campaign_id: Uuid,
    pub total_recipients: usize,
}

/// Acknowledgement plus the background run, for callers that want to wait.
pub struct SendHandle {
    pub ack: SendAck,
    pub task: JoinHandle<()>,
}

pub struct CampaignSender {
    store: Arc<dyn Store>,
    bulk: Arc<BulkSender>,
    clock: Arc<dyn Clock>,
}

impl CampaignSender {
    pub fn new(store: Arc<dyn Store>, bulk: BulkSender, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            bulk: Arc::new(bulk),
            clock,
        }
    }

    /// Start sending a DRAFT or SCHEDULED campaign to its pending recipients.
    pub async fn start_send(&self, campaign_id: Uuid) -> Result<SendHandle, EngineError> {
        let campaign = self
            .store
            .campaign(campaign_id)
            .await?
            .ok_or(EngineError::CampaignNotFound)?;
        if !campaign.status.can_start_sending() {
            return Err(EngineError::InvalidState(campaign.status));
        }

        let links = self.recipients(campaign_id).await?;

        let now = self.clock.now();
        let Some(campaign) = self
            .store
            .transition_campaign(campaign_id, &CampaignStatus::SENDABLE, CampaignStatus::Sending, now)
            .await?
        else {
            // Lost the race to another trigger.
            let current = self
                .store
                .campaign(campaign_id)
                .await?
                .map(|c| c.status)
                .unwrap_or(CampaignStatus::Sending);
            return Err(EngineError::InvalidState(current));
        };

        let ack = SendAck {
            campaign_id,
            total_recipients: links.len(),
        };

        info!(
            campaign_id = %campaign_id,
            total_recipients = links.len(),
            tracked_links = trackable_link_count(&campaign.html_content, self.bulk.urls()),
            "campaign_send_started"
        );

        let task = tokio::spawn(run_to_completion(
            self.store.clone(),
            self.bulk.clone(),
            self.clock.clone(),
            campaign,
            links,
        ));

        Ok(SendHandle { ack, task })
    }

    /// Pending links, materialized from the full contact list when the
    /// campaign has none yet.
    async fn recipients(&self, campaign_id: Uuid) -> Result<Vec<RecipientLink>, EngineError> {
        let pending = self.store.pending_links(campaign_id).await?;
        if !pending.is_empty() {
            return Ok(pending);
        }

        let contacts = self.store.all_contacts().await?;
        if contacts.is_empty() {
            return Err(EngineError::NoRecipients);
        }
        let created = self
            .store
            .insert_links(
                contacts
                    .iter()
                    .map(|c| RecipientLink::new(campaign_id, c.id))
                    .collect(),
            )
            .await?;
        info!(
            campaign_id = %campaign_id,
            created = created.len(),
            "recipient_links_materialized"
        );

        let pending = self.store.pending_links(campaign_id).await?;
        if pending.is_empty() {
            return Err(EngineError::NoRecipients);
        }
        Ok(pending)
    }
}

async fn run_to_completion(
    store: Arc<dyn Store>,
    bulk: Arc<BulkSender>,
    clock: Arc<dyn Clock>,
    campaign: Campaign,
    links: Vec<RecipientLink>,
) {
    let final_status = match bulk.run(&campaign, &links).await {
        Ok(tally) => {
            let status = if tally.all_failed() {
                CampaignStatus::Failed
            } else {
                CampaignStatus::Completed
            };
            info!(
                campaign_id = %campaign.id,
                sent = tally.sent,
                failed = tally.failed,
                status = ?status,
                "campaign_send_complete"
            );
            status
        }
        Err(e) => {
            error!(campaign_id = %campaign.id, error = %e, "campaign_send_aborted");
            CampaignStatus::Failed
        }
    };

    if let Err(e) = finish(&*store, campaign.id, final_status, &*clock).await {
        error!(
            campaign_id = %campaign.id,
            error = %e,
            "campaign_status_update_failed"
        );
    }
}

async fn finish(
    store: &dyn Store,
    campaign_id: Uuid,
    status: CampaignStatus,
    clock: &dyn Clock,
) -> Result<(), StoreError> {
    let updated = store
        .transition_campaign(campaign_id, &[CampaignStatus::Sending], status, clock.now())
        .await?;
    if updated.is_none() {
        warn!(campaign_id = %campaign_id, "campaign_left_sending_early");
    }
    Ok(())
}
