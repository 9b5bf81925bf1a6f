//! Fakes and fixtures shared by the unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

use crate::clock::Clock;
use crate::delivery::{DeliveryClient, EmailTransport, OutboundEmail, TransportError};
use crate::html::TrackingUrls;
use crate::model::{
    Campaign, CampaignStatus, Contact, Schedule, Sender, Sequence, SequenceStatus, SequenceStep,
    StepDraft, Trigger, TriggerType,
};
use crate::store::Store;

/// Records one transport call.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub to: String,
    pub html: String,
    pub at: Instant,
}

/// In-memory transport with scripted failures and latency.
#[derive(Default)]
pub struct FakeTransport {
    failing: HashSet<String>,
    fail_all: bool,
    delay: Option<Duration>,
    attempts: Mutex<Vec<Attempt>>,
    sent: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, email: &str) -> Self {
        self.failing.insert(email.to_string());
        self
    }

    pub fn failing_all(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    /// Recipients of successful sends, in completion order.
    pub fn sent_to(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailTransport for FakeTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, TransportError> {
        self.attempts.lock().unwrap().push(Attempt {
            to: email.to.clone(),
            html: email.html.clone(),
            at: Instant::now(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_all || self.failing.contains(&email.to) {
            return Err(TransportError::Rejected {
                status: 422,
                message: format!("cannot deliver to {}", email.to),
            });
        }

        self.sent.lock().unwrap().push(email.to.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("msg_{n}"))
    }
}

pub fn tracking_urls() -> TrackingUrls {
    TrackingUrls::new(&Url::parse("https://mail.example.com").unwrap())
}

pub fn delivery(
    transport: Arc<FakeTransport>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
) -> DeliveryClient {
    DeliveryClient::new(transport, store, clock, Duration::from_secs(10))
}

pub fn campaign(name: &str) -> Campaign {
    Campaign {
        id: Uuid::new_v4(),
        name: name.to_string(),
        subject: format!("{name} is here"),
        html_content: r#"<html><body><p>Hi {{name}}</p><a href="https://example.com/launch">Read</a></body></html>"#
            .to_string(),
        from: Sender::new("news@example.com", "Example News"),
        status: CampaignStatus::Draft,
        scheduled_at: None,
        sent_at: None,
    }
}

pub fn contacts(n: usize) -> Vec<Contact> {
    (0..n)
        .map(|i| {
            let mut contact = Contact::new(format!("user{i}@example.com"));
            contact.name = Some(format!("User {i}"));
            contact
        })
        .collect()
}

pub fn step_draft(name: &str, days: u32) -> StepDraft {
    StepDraft {
        name: name.to_string(),
        subject: format!("{name} subject"),
        html_content: format!("<p>{name} for {{{{name}}}}</p>"),
        schedule: Schedule::RelativeDelay { days, hours: 0 },
    }
}

/// An ACTIVE manual sequence with one step per entry of `delay_days`.
pub fn sequence(delay_days: &[u32]) -> (Sequence, Vec<SequenceStep>) {
    let sequence = Sequence {
        id: Uuid::new_v4(),
        name: "Onboarding".to_string(),
        status: SequenceStatus::Active,
        trigger: Trigger {
            kind: TriggerType::Manual,
            value: None,
        },
        from: Sender::new("hello@example.com", "Hello Team"),
    };
    let steps = delay_days
        .iter()
        .enumerate()
        .map(|(i, days)| step_draft(&format!("Step {i}"), *days).into_step(sequence.id, i as u32))
        .collect();
    (sequence, steps)
}
