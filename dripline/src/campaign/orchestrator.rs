//! Batched bulk delivery for one campaign run.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::delivery::{DeliveryClient, DeliveryOutcome, OutboundEmail};
use crate::error::StoreError;
use crate::html::{render, TrackingUrls};
use crate::model::{Attribution, Campaign, Event, EventType, LinkStatus, RecipientLink};
use crate::store::{CampaignStore, ContactStore, EventStore, Store};

#[derive(Debug, Clone, Copy)]
pub struct BulkSendSettings {
    pub batch_size: usize,
    /// Pause between consecutive batches, never after the last one
    pub batch_pause: Duration,
}

impl Default for BulkSendSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendTally {
    pub sent: usize,
    pub failed: usize,
}

impl SendTally {
    pub fn attempted(&self) -> usize {
        self.sent + self.failed
    }

    /// All attempts failed, and there was at least one.
    pub fn all_failed(&self) -> bool {
        self.sent == 0 && self.failed > 0
    }
}

pub struct BulkSender {
    store: Arc<dyn Store>,
    delivery: DeliveryClient,
    urls: TrackingUrls,
    clock: Arc<dyn Clock>,
    settings: BulkSendSettings,
}

impl BulkSender {
    pub fn new(
        store: Arc<dyn Store>,
        delivery: DeliveryClient,
        urls: TrackingUrls,
        clock: Arc<dyn Clock>,
        settings: BulkSendSettings,
    ) -> Self {
        Self {
            store,
            delivery,
            urls,
            clock,
            settings: BulkSendSettings {
                batch_size: settings.batch_size.max(1),
                ..settings
            },
        }
    }

    pub fn urls(&self) -> &TrackingUrls {
        &self.urls
    }

    /// Deliver to every link, batch by batch. Recipients within a batch run
    /// concurrently and fail independently.
    ///
    /// A store error aborts the run once the current batch has settled. Every
    /// link this run touched ends SENT or FAILED, including the ones in later
    /// batches that were never attempted.
    pub async fn run(
        &self,
        campaign: &Campaign,
        links: &[RecipientLink],
    ) -> Result<SendTally, StoreError> {
        let mut tally = SendTally::default();
        let batch_size = self.settings.batch_size;

        for (index, batch) in links.chunks(batch_size).enumerate() {
            if index > 0 && !self.settings.batch_pause.is_zero() {
                tokio::time::sleep(self.settings.batch_pause).await;
            }

            let results =
                futures::future::join_all(batch.iter().map(|link| self.send_to(campaign, link)))
                    .await;

            let mut aborted = None;
            for result in results {
                match result {
                    Ok(Some(true)) => tally.sent += 1,
                    Ok(Some(false)) => tally.failed += 1,
                    Ok(None) => {}
                    Err(e) => {
                        tally.failed += 1;
                        aborted.get_or_insert(e);
                    }
                }
            }

            if let Some(e) = aborted {
                let rest = &links[((index + 1) * batch_size).min(links.len())..];
                error!(
                    campaign_id = %campaign.id,
                    batch = index,
                    sent = tally.sent,
                    failed = tally.failed,
                    unattempted = rest.len(),
                    error = %e,
                    "campaign_run_aborted"
                );
                for link in rest {
                    self.abandon_unattempted(link, &e).await;
                }
                return Err(e);
            }

            info!(
                campaign_id = %campaign.id,
                batch = index,
                batch_len = batch.len(),
                sent = tally.sent,
                failed = tally.failed,
                "campaign_batch_complete"
            );
        }

        Ok(tally)
    }

    /// `None` when another run owns the link, otherwise whether it was sent.
    async fn send_to(
        &self,
        campaign: &Campaign,
        link: &RecipientLink,
    ) -> Result<Option<bool>, StoreError> {
        if !self.store.claim_link(link.id).await? {
            debug!(link_id = %link.id, "recipient_claim_lost");
            return Ok(None);
        }

        match self.deliver_claimed(campaign, link).await {
            Ok(sent) => Ok(Some(sent)),
            Err(e) => {
                self.abandon(link, &e).await;
                Err(e)
            }
        }
    }

    /// Best effort: never leave a claimed link IN_PROGRESS.
    async fn abandon(&self, link: &RecipientLink, cause: &StoreError) {
        let result = self
            .store
            .finish_link(
                link.id,
                LinkStatus::Failed,
                self.clock.now(),
                Some(cause.to_string()),
            )
            .await;
        if let Err(e) = result {
            warn!(link_id = %link.id, error = %e, "recipient_abandon_failed");
        }
    }

    async fn abandon_unattempted(&self, link: &RecipientLink, cause: &StoreError) {
        match self.store.claim_link(link.id).await {
            Ok(true) => self.abandon(link, cause).await,
            Ok(false) => {}
            Err(e) => warn!(link_id = %link.id, error = %e, "recipient_abandon_failed"),
        }
    }

    async fn deliver_claimed(
        &self,
        campaign: &Campaign,
        link: &RecipientLink,
    ) -> Result<bool, StoreError> {
        let attribution = Attribution::Campaign {
            campaign_id: campaign.id,
        };

        let Some(contact) = self.store.contact(link.contact_id).await? else {
            let error = "contact not found".to_string();
            let event = Event::new(
                EventType::EmailFailed,
                attribution,
                link.contact_id,
                self.clock.now(),
            )
            .with_metadata(json!({ "error": error }));
            self.store.append_event(event).await?;
            self.store
                .finish_link(link.id, LinkStatus::Failed, self.clock.now(), Some(error))
                .await?;
            return Ok(false);
        };

        let html = render(
            &campaign.html_content,
            &contact.merge_variables(),
            &link.track_token,
            &self.urls,
        );
        let email = OutboundEmail {
            from: campaign.from.mailbox(),
            to: contact.email.clone(),
            subject: campaign.subject.clone(),
            html,
        };

        let outcome = self.delivery.send_one(attribution, contact.id, email).await?;
        let (status, error) = match outcome {
            DeliveryOutcome::Sent { .. } => (LinkStatus::Sent, None),
            DeliveryOutcome::Failed { error } => (LinkStatus::Failed, Some(error)),
        };
        self.store
            .finish_link(link.id, status, self.clock.now(), error)
            .await?;

        Ok(status == LinkStatus::Sent)
    }
}
