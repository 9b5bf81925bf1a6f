//! End-to-end runs over a seeded store through the public API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use url::Url;
use uuid::Uuid;

use dripline::clock::ManualClock;
use dripline::delivery::TransportError;
use dripline::html::TrackingUrls;
use dripline::model::{CampaignStatus, EventType, ExecutionStatus};
use dripline::store::{CampaignStore, SequenceStore};
use dripline::{
    BulkSendSettings, BulkSender, CampaignSender, Clock, DeliveryClient, EmailTransport,
    MemoryStore, OutboundEmail, SchedulerSettings, SequenceService, SequenceWorker, Snapshot,
    Store,
};

const SEED: &str = r#"{
  "contacts": [
    { "id": "7d4c6a1e-3b1f-4a53-9a3e-0f1c2b3d4e01", "email": "ada@example.com", "name": "Ada" },
    { "id": "7d4c6a1e-3b1f-4a53-9a3e-0f1c2b3d4e02", "email": "grace@example.com",
      "custom_fields": { "plan": "pro" } }
  ],
  "campaigns": [
    {
      "id": "1f0e2d3c-4b5a-4678-9a0b-1c2d3e4f5a60",
      "name": "Spring launch",
      "subject": "It's here",
      "html_content": "<html><body><p>Hi {{name}}</p><a href=\"https://example.com/spring\">See</a></body></html>",
      "from": { "email": "news@example.com", "name": "Example" },
      "status": "DRAFT"
    }
  ],
  "sequences": [
    {
      "id": "2a3b4c5d-6e7f-4801-9b2c-3d4e5f6a7b80",
      "name": "Welcome",
      "status": "ACTIVE",
      "trigger": { "type": "MANUAL" },
      "from": { "email": "hello@example.com", "name": "Hello" },
      "steps": [
        { "name": "Welcome", "subject": "Welcome", "html_content": "<p>Welcome {{name}}</p>",
          "schedule": { "type": "RELATIVE_DELAY", "days": 0 } },
        { "name": "Tips", "subject": "Tips", "html_content": "<p>Tips for {{plan}}</p>",
          "schedule": { "type": "RELATIVE_DELAY", "days": 3 } }
      ]
    }
  ]
}"#;

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, TransportError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(format!("re_{}", sent.len()))
    }
}

struct Engine {
    store: Arc<MemoryStore>,
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
    delivery: DeliveryClient,
    urls: TrackingUrls,
}

fn engine() -> Engine {
    let snapshot: Snapshot = serde_json::from_str(SEED).unwrap();
    let store = Arc::new(MemoryStore::from_snapshot(snapshot).unwrap());
    let transport = Arc::new(RecordingTransport::default());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap(),
    ));
    let delivery = DeliveryClient::new(
        transport.clone(),
        store.clone(),
        clock.clone(),
        Duration::from_secs(5),
    );
    Engine {
        store,
        transport,
        clock,
        delivery,
        urls: TrackingUrls::new(&Url::parse("https://t.example.com").unwrap()),
    }
}

fn id(raw: &str) -> Uuid {
    raw.parse().unwrap()
}

#[tokio::test]
async fn seeded_campaign_sends_to_every_contact() {
    let engine = engine();
    let store: Arc<dyn Store> = engine.store.clone();
    let clock: Arc<dyn Clock> = engine.clock.clone();
    let bulk = BulkSender::new(
        store.clone(),
        engine.delivery.clone(),
        engine.urls.clone(),
        clock.clone(),
        BulkSendSettings {
            batch_size: 10,
            batch_pause: Duration::ZERO,
        },
    );
    let sender = CampaignSender::new(store.clone(), bulk, clock);
    let campaign_id = id("1f0e2d3c-4b5a-4678-9a0b-1c2d3e4f5a60");

    let handle = sender.start_send(campaign_id).await.unwrap();
    assert_eq!(handle.ack.total_recipients, 2);
    handle.task.await.unwrap();

    let campaign = store.campaign(campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);

    let mut sent = engine.transport.sent();
    sent.sort_by(|a, b| a.to.cmp(&b.to));
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to, "ada@example.com");
    assert_eq!(sent[0].from, "Example <news@example.com>");
    assert!(sent[0].html.contains("<p>Hi Ada</p>"));
    assert!(sent[0].html.contains("https://t.example.com/track/click/"));
    assert!(sent[0].html.contains("https://t.example.com/track/open/"));
    // Name falls back to the address
    assert!(sent[1].html.contains("<p>Hi grace@example.com</p>"));

    let sent_events = engine
        .store
        .events()
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == EventType::EmailSent)
        .count();
    assert_eq!(sent_events, 2);
}

#[tokio::test]
async fn seeded_sequence_delivers_steps_on_schedule() {
    let engine = engine();
    let store: Arc<dyn Store> = engine.store.clone();
    let clock: Arc<dyn Clock> = engine.clock.clone();
    let service = SequenceService::new(store.clone(), clock.clone());
    let worker = SequenceWorker::new(
        store.clone(),
        engine.delivery.clone(),
        engine.urls.clone(),
        clock,
        SchedulerSettings::default(),
    );
    let sequence_id = id("2a3b4c5d-6e7f-4801-9b2c-3d4e5f6a7b80");
    let grace = id("7d4c6a1e-3b1f-4a53-9a3e-0f1c2b3d4e02");

    let enrollment = service.enroll(sequence_id, grace).await.unwrap();

    let report = worker.process_due_executions().await.unwrap().unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(engine.transport.sent()[0].subject, "Welcome");

    engine.clock.advance(chrono::Duration::days(2));
    let report = worker.process_due_executions().await.unwrap().unwrap();
    assert_eq!(report.processed, 0);
    assert!(store
        .enrollment(enrollment.id)
        .await
        .unwrap()
        .unwrap()
        .completed_at
        .is_none());

    engine.clock.advance(chrono::Duration::days(1));
    let report = worker.process_due_executions().await.unwrap().unwrap();
    assert_eq!(report.sent, 1);

    let sent = engine.transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].html.contains("<p>Tips for pro</p>"));

    let executions = store.executions_for_enrollment(enrollment.id).await.unwrap();
    assert!(executions
        .iter()
        .all(|e| e.status == ExecutionStatus::Sent));
    let completed = store
        .enrollment(enrollment.id)
        .await
        .unwrap()
        .unwrap()
        .completed_at;
    assert_eq!(completed, Some(engine.clock.now()));
}
