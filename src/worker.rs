//! Queue worker — bounded batch drain with delay deferral.
//!
//! One drain pops up to `max_batch` records, applying per-job policy:
//! not-yet-due jobs go back to the tail, skips are dropped, everything
//! else is composed, sent, and recorded. Send failures are consumed, not
//! retried. FIFO order holds for jobs that are never deferred; a deferred
//! job intentionally falls behind later arrivals.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::compose::ReplyComposer;
use crate::error::{StorageError, WorkerError};
use crate::events::EventLog;
use crate::mailer::{Mailer, OutboundMail};
use crate::outbox::{Outbox, OutboxEntry};
use crate::queue::{Job, JobQueue, Popped};
use crate::rules;
use crate::settings::{Settings, SettingsStore};
use crate::store::ListStore;

/// What a drain does after a skipped job (disabled responder or missing
/// recipient). Deferrals, malformed records, and send failures always
/// continue regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipPolicy {
    /// Keep draining; ready jobs behind the skip still go out this cycle.
    #[default]
    Continue,
    /// End the batch at the first skip (one job consumed per trigger).
    Stop,
}

impl SkipPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "continue" => Some(Self::Continue),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum dequeue operations per drain.
    pub max_batch: usize,
    /// Advisory minimum interval between drains; zero disables the throttle.
    pub min_interval: Duration,
    pub skip_policy: SkipPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_batch: 25,
            min_interval: Duration::ZERO,
            skip_policy: SkipPolicy::default(),
        }
    }
}

/// Result of one drain.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DrainSummary {
    pub processed: u64,
    pub remaining: u64,
}

/// Shared dependencies for the worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: JobQueue,
    pub settings: SettingsStore,
    pub composer: ReplyComposer,
    pub mailer: Arc<dyn Mailer>,
    pub outbox: Outbox,
    pub events: EventLog,
    /// KV half of the store, for the advisory last-run timestamp.
    pub store: Arc<dyn ListStore>,
}

/// Per-job outcome inside a drain.
enum JobOutcome {
    Sent,
    Deferred,
    Skipped,
    SendFailed,
    /// Popped but unrecoverable (re-enqueue of a deferred job failed).
    Lost,
}

pub struct Worker {
    deps: WorkerDeps,
    config: WorkerConfig,
    last_run_key: String,
}

impl Worker {
    pub fn new(deps: WorkerDeps, config: WorkerConfig, last_run_key: impl Into<String>) -> Self {
        Self {
            deps,
            config,
            last_run_key: last_run_key.into(),
        }
    }

    /// Drain with the configured batch size.
    pub async fn run_once(&self) -> Result<DrainSummary, WorkerError> {
        self.run_once_with(self.config.max_batch).await
    }

    /// Drain up to `max_batch` records.
    ///
    /// A dequeue storage failure ends the drain with the partial processed
    /// count; only a failing length query afterwards is terminal.
    pub async fn run_once_with(&self, max_batch: usize) -> Result<DrainSummary, WorkerError> {
        self.check_throttle().await?;

        let settings = self.deps.settings.load().await.map_err(WorkerError::Storage)?;

        let mut processed: u64 = 0;
        for _ in 0..max_batch {
            let popped = match self.deps.queue.dequeue().await {
                Ok(popped) => popped,
                Err(e) => {
                    tracing::warn!(error = %e, "Dequeue failed, ending drain early");
                    self.deps
                        .events
                        .emit("worker.dequeue_error", serde_json::json!({ "error": e.to_string() }))
                        .await;
                    break;
                }
            };

            match popped {
                None => break,
                Some(Popped::Malformed { raw }) => {
                    self.deps
                        .events
                        .emit("queue.malformed", serde_json::json!({ "raw": raw }))
                        .await;
                }
                Some(Popped::Job(job)) => match self.process(&settings, job).await {
                    JobOutcome::Sent => processed += 1,
                    JobOutcome::Deferred | JobOutcome::SendFailed | JobOutcome::Lost => {}
                    JobOutcome::Skipped => {
                        if self.config.skip_policy == SkipPolicy::Stop {
                            break;
                        }
                    }
                },
            }
        }

        let remaining = self.deps.queue.len().await.map_err(WorkerError::Storage)?;
        self.record_last_run().await;

        Ok(DrainSummary { processed, remaining })
    }

    async fn process(&self, settings: &Settings, job: Job) -> JobOutcome {
        if !settings.enable_auto_responder {
            tracing::debug!(job = %job.id, "Responder disabled, dropping job");
            self.deps
                .events
                .emit("worker.skipped", serde_json::json!({ "id": job.id, "reason": "disabled" }))
                .await;
            return JobOutcome::Skipped;
        }

        let matched = rules::best_match(&settings.sections, job.field("subject"), job.field("message"));
        let delay_seconds = matched
            .and_then(|m| m.section.delay_seconds)
            .unwrap_or(settings.default_delay_seconds);

        if delay_seconds > 0 {
            let not_before = job.received_at + (delay_seconds as i64) * 1000;
            let now = chrono::Utc::now().timestamp_millis();
            if now < not_before {
                // Back to the tail so ready jobs behind it still drain.
                if let Err(e) = self.deps.queue.enqueue(&job).await {
                    tracing::error!(job = %job.id, error = %e, "Re-enqueue of deferred job failed; job lost");
                    self.deps
                        .events
                        .emit(
                            "worker.requeue_error",
                            serde_json::json!({ "id": job.id, "error": e.to_string() }),
                        )
                        .await;
                    return JobOutcome::Lost;
                }
                tracing::debug!(job = %job.id, not_before, "Job deferred");
                self.deps
                    .events
                    .emit(
                        "worker.deferred",
                        serde_json::json!({ "id": job.id, "notBefore": not_before }),
                    )
                    .await;
                return JobOutcome::Deferred;
            }
        }

        if job.field("email").is_empty() {
            self.deps
                .events
                .emit(
                    "worker.skipped",
                    serde_json::json!({ "id": job.id, "reason": "no recipient" }),
                )
                .await;
            return JobOutcome::Skipped;
        }

        let reply = self.deps.composer.build(settings, &job).await;

        let mail = OutboundMail {
            to: reply.to_email.clone(),
            from: settings.from_email.clone(),
            subject: reply.subject.clone(),
            html: reply.html.clone(),
            text: reply.text.clone(),
        };

        match self.deps.mailer.send(&mail).await {
            Ok(message_id) => {
                let entry = OutboxEntry {
                    id: message_id,
                    sent_at: chrono::Utc::now().to_rfc3339(),
                    to: reply.to_email,
                    subject: reply.subject,
                    text: reply.text,
                    html: reply.html,
                    section: reply.matched_section,
                    meta: serde_json::json!({ "jobId": job.id.clone() }),
                };
                // Off the send path: a failed record must not fail the job.
                if let Err(e) = self.deps.outbox.record(&entry).await {
                    tracing::warn!(job = %job.id, error = %e, "Failed to record outbox entry");
                    self.deps
                        .events
                        .emit(
                            "outbox.error",
                            serde_json::json!({ "id": job.id, "error": e.to_string() }),
                        )
                        .await;
                }
                self.deps
                    .events
                    .emit("mail.sent", serde_json::json!({ "id": entry.id, "to": entry.to }))
                    .await;
                JobOutcome::Sent
            }
            Err(e) => {
                // Consumed, not retried: the message is presumed lost.
                tracing::warn!(job = %job.id, error = %e, "Send failed, job consumed");
                self.deps
                    .events
                    .emit(
                        "mail.error",
                        serde_json::json!({ "id": job.id, "error": e.to_string() }),
                    )
                    .await;
                JobOutcome::SendFailed
            }
        }
    }

    async fn check_throttle(&self) -> Result<(), WorkerError> {
        if self.config.min_interval.is_zero() {
            return Ok(());
        }
        // Advisory only: a read failure never blocks the drain, and two
        // callers racing the window can both run.
        let last = match self.deps.store.get_value(&self.last_run_key).await {
            Ok(value) => value.and_then(|v| v.parse::<i64>().ok()),
            Err(e) => {
                tracing::warn!(error = %e, "Throttle timestamp unreadable, allowing drain");
                None
            }
        };
        if let Some(last_ms) = last {
            let now = chrono::Utc::now().timestamp_millis();
            let elapsed_ms = now.saturating_sub(last_ms);
            if elapsed_ms >= 0 && (elapsed_ms as u128) < self.config.min_interval.as_millis() {
                return Err(WorkerError::Throttled {
                    since_last: Duration::from_millis(elapsed_ms as u64),
                });
            }
        }
        Ok(())
    }

    async fn record_last_run(&self) {
        let now = chrono::Utc::now().timestamp_millis();
        if let Err(e) = self.deps.store.set_value(&self.last_run_key, &now.to_string()).await {
            tracing::warn!(error = %e, "Failed to record last-run timestamp");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailError;
    use crate::llm::UnconfiguredGenerator;
    use crate::settings::Section;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mailer that records every send; optionally rejects specific recipients.
    struct RecordingMailer {
        sent: Mutex<Vec<OutboundMail>>,
        reject: Vec<String>,
    }

    impl RecordingMailer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                reject: Vec::new(),
            })
        }

        fn rejecting(recipients: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                reject: recipients.iter().map(|r| r.to_string()).collect(),
            })
        }

        fn recipients(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|m| m.to.clone()).collect()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, mail: &OutboundMail) -> Result<String, MailError> {
            if self.reject.contains(&mail.to) {
                return Err(MailError::Rejected("mailbox unavailable".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(mail.clone());
            Ok(format!("<msg-{}@test>", sent.len()))
        }
    }

    /// Store wrapper that fails every pop after the first `allow` succeed.
    struct FlakyPopStore {
        inner: MemoryStore,
        allow: AtomicUsize,
    }

    #[async_trait]
    impl ListStore for FlakyPopStore {
        async fn push_tail(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.push_tail(key, value).await
        }
        async fn pop_head(&self, key: &str) -> Result<Option<String>, StorageError> {
            if self.allow.fetch_sub(1, Ordering::SeqCst) == 0 {
                return Err(StorageError::Request("connection reset".into()));
            }
            self.inner.pop_head(key).await
        }
        async fn len(&self, key: &str) -> Result<u64, StorageError> {
            self.inner.len(key).await
        }
        async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError> {
            self.inner.range(key, start, stop).await
        }
        async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError> {
            self.inner.trim(key, start, stop).await
        }
        async fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get_value(key).await
        }
        async fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set_value(key, value).await
        }
    }

    struct Harness {
        worker: Worker,
        queue: JobQueue,
        outbox: Outbox,
        mailer: Arc<RecordingMailer>,
        settings: SettingsStore,
    }

    fn harness_on(store: Arc<dyn ListStore>, mailer: Arc<RecordingMailer>, config: WorkerConfig) -> Harness {
        let queue = JobQueue::new(store.clone(), "t:jobs");
        let settings = SettingsStore::new(store.clone(), "t:settings");
        let events = EventLog::new(store.clone(), "t:logs", 500);
        let outbox = Outbox::new(store.clone(), "t:outbox", 500);
        let composer = ReplyComposer::new(Arc::new(UnconfiguredGenerator), events.clone());
        let deps = WorkerDeps {
            queue: queue.clone(),
            settings: settings.clone(),
            composer,
            mailer: mailer.clone() as Arc<dyn Mailer>,
            outbox: outbox.clone(),
            events,
            store,
        };
        Harness {
            worker: Worker::new(deps, config, "t:worker:lastRun"),
            queue,
            outbox,
            mailer,
            settings,
        }
    }

    fn harness() -> Harness {
        harness_on(Arc::new(MemoryStore::new()), RecordingMailer::new(), WorkerConfig::default())
    }

    fn job_to(email: &str) -> Job {
        Job::new(serde_json::json!({ "email": email, "message": "hello" }))
    }

    /// A job received `age_seconds` ago.
    fn aged_job(email: &str, age_seconds: i64) -> Job {
        let mut job = job_to(email);
        job.received_at -= age_seconds * 1000;
        job
    }

    #[tokio::test]
    async fn drains_in_fifo_order() {
        let h = harness();
        for addr in ["a@x.com", "b@x.com", "c@x.com"] {
            h.queue.enqueue(&job_to(addr)).await.unwrap();
        }

        let summary = h.worker.run_once().await.unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.remaining, 0);
        assert_eq!(h.mailer.recipients(), vec!["a@x.com", "b@x.com", "c@x.com"]);
    }

    #[tokio::test]
    async fn delay_defers_to_tail_then_sends_after_elapse() {
        let h = harness();
        let mut settings = Settings::default();
        settings.default_delay_seconds = 60;
        h.settings.save(&settings).await.unwrap();

        // Not yet due: received just now
        h.queue.enqueue(&job_to("late@x.com")).await.unwrap();
        let summary = h.worker.run_once().await.unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.remaining, 1);
        assert!(h.mailer.recipients().is_empty());

        // Same settings, but the job has aged past the delay
        let due = aged_job("due@x.com", 120);
        h.queue.enqueue(&due).await.unwrap();
        let summary = h.worker.run_once().await.unwrap();
        // The not-yet-due job circulates, the due one goes out
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.remaining, 1);
        assert_eq!(h.mailer.recipients(), vec!["due@x.com"]);
    }

    #[tokio::test]
    async fn deferred_job_moves_behind_ready_jobs() {
        let h = harness();
        let mut settings = Settings::default();
        settings.sections = vec![Section {
            name: "Slow".into(),
            keywords: vec!["slow".into()],
            instructions: String::new(),
            priority: 0,
            enabled: true,
            delay_seconds: Some(3600),
        }];
        h.settings.save(&settings).await.unwrap();

        let slow = Job::new(serde_json::json!({ "email": "slow@x.com", "message": "slow lane" }));
        h.queue.enqueue(&slow).await.unwrap();
        h.queue.enqueue(&job_to("fast@x.com")).await.unwrap();

        let summary = h.worker.run_once().await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(h.mailer.recipients(), vec!["fast@x.com"]);

        // The deferred job is back in the queue, at the tail
        assert_eq!(summary.remaining, 1);
        match h.queue.dequeue().await.unwrap() {
            Some(Popped::Job(job)) => {
                assert_eq!(job.id, slow.id);
                // The record itself is unchanged by deferral
                assert_eq!(job.received_at, slow.received_at);
            }
            other => panic!("expected deferred job, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scenario_ready_delayed_ready() {
        // Queue: A (no delay), B (delay 120s, received now), C (no delay)
        let h = harness();
        let mut settings = Settings::default();
        settings.sections = vec![Section {
            name: "Delayed".into(),
            keywords: vec!["invoice".into()],
            instructions: String::new(),
            priority: 0,
            enabled: true,
            delay_seconds: Some(120),
        }];
        h.settings.save(&settings).await.unwrap();

        h.queue.enqueue(&job_to("a@x.com")).await.unwrap();
        let b = Job::new(serde_json::json!({ "email": "b@x.com", "message": "invoice question" }));
        h.queue.enqueue(&b).await.unwrap();
        h.queue.enqueue(&job_to("c@x.com")).await.unwrap();

        let summary = h.worker.run_once_with(10).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.remaining, 1);
        assert_eq!(h.mailer.recipients(), vec!["a@x.com", "c@x.com"]);
    }

    #[tokio::test]
    async fn bounded_drain_respects_max_batch() {
        let h = harness();
        for i in 0..10 {
            h.queue.enqueue(&job_to(&format!("u{i}@x.com"))).await.unwrap();
        }

        let summary = h.worker.run_once_with(4).await.unwrap();
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.remaining, 6);
    }

    #[tokio::test]
    async fn successful_send_records_one_outbox_entry() {
        let h = harness();
        let job = job_to("a@x.com");
        let job_id = job.id.clone();
        h.queue.enqueue(&job).await.unwrap();

        h.worker.run_once().await.unwrap();

        let page = h.outbox.list(0, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].to, "a@x.com");
        assert_eq!(page.items[0].meta["jobId"], job_id);
        assert!(page.items[0].section.is_none());

        // A second drain adds nothing and alters nothing
        h.worker.run_once().await.unwrap();
        let again = h.outbox.list(0, 10).await.unwrap();
        assert_eq!(again.items.len(), 1);
        assert_eq!(again.items[0].id, page.items[0].id);
    }

    #[tokio::test]
    async fn matched_section_is_linked_in_outbox() {
        let h = harness();
        let mut settings = Settings::default();
        settings.sections = vec![Section {
            name: "Repairs".into(),
            keywords: vec!["repair".into()],
            instructions: String::new(),
            priority: 0,
            enabled: true,
            delay_seconds: None,
        }];
        h.settings.save(&settings).await.unwrap();

        h.queue
            .enqueue(&Job::new(serde_json::json!({ "email": "a@x.com", "message": "repair this" })))
            .await
            .unwrap();
        h.worker.run_once().await.unwrap();

        let page = h.outbox.list(0, 10).await.unwrap();
        assert_eq!(page.items[0].section.as_deref(), Some("Repairs"));
    }

    #[tokio::test]
    async fn disabled_responder_drops_jobs_without_sending() {
        let h = harness();
        let mut settings = Settings::default();
        settings.enable_auto_responder = false;
        h.settings.save(&settings).await.unwrap();

        h.queue.enqueue(&job_to("a@x.com")).await.unwrap();
        h.queue.enqueue(&job_to("b@x.com")).await.unwrap();

        let summary = h.worker.run_once().await.unwrap();
        assert_eq!(summary.processed, 0);
        // Default policy keeps draining: both jobs consumed
        assert_eq!(summary.remaining, 0);
        assert!(h.mailer.recipients().is_empty());
    }

    #[tokio::test]
    async fn stop_policy_ends_batch_at_first_skip() {
        let config = WorkerConfig {
            skip_policy: SkipPolicy::Stop,
            ..WorkerConfig::default()
        };
        let h = harness_on(Arc::new(MemoryStore::new()), RecordingMailer::new(), config);
        let mut settings = Settings::default();
        settings.enable_auto_responder = false;
        h.settings.save(&settings).await.unwrap();

        h.queue.enqueue(&job_to("a@x.com")).await.unwrap();
        h.queue.enqueue(&job_to("b@x.com")).await.unwrap();

        let summary = h.worker.run_once().await.unwrap();
        assert_eq!(summary.processed, 0);
        // One job consumed per trigger under the stop policy
        assert_eq!(summary.remaining, 1);
    }

    #[tokio::test]
    async fn missing_recipient_is_dropped() {
        let h = harness();
        h.queue
            .enqueue(&Job::new(serde_json::json!({ "message": "no email field" })))
            .await
            .unwrap();
        h.queue.enqueue(&job_to("b@x.com")).await.unwrap();

        let summary = h.worker.run_once().await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.remaining, 0);
        assert_eq!(h.mailer.recipients(), vec!["b@x.com"]);
    }

    #[tokio::test]
    async fn send_failure_consumes_job_and_continues() {
        let mailer = RecordingMailer::rejecting(&["bad@x.com"]);
        let h = harness_on(Arc::new(MemoryStore::new()), mailer, WorkerConfig::default());

        h.queue.enqueue(&job_to("bad@x.com")).await.unwrap();
        h.queue.enqueue(&job_to("good@x.com")).await.unwrap();

        let summary = h.worker.run_once().await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.remaining, 0);
        assert_eq!(h.mailer.recipients(), vec!["good@x.com"]);

        // Failed send is not retried and not recorded
        let page = h.outbox.list(0, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].to, "good@x.com");
    }

    #[tokio::test]
    async fn malformed_record_is_dropped_and_drain_continues() {
        let store = Arc::new(MemoryStore::new());
        store.push_tail("t:jobs", "{corrupt").await.unwrap();
        let h = harness_on(store, RecordingMailer::new(), WorkerConfig::default());
        h.queue.enqueue(&job_to("ok@x.com")).await.unwrap();

        let summary = h.worker.run_once().await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.remaining, 0);
        assert_eq!(h.mailer.recipients(), vec!["ok@x.com"]);
    }

    #[tokio::test]
    async fn dequeue_failure_reports_partial_progress() {
        let store = Arc::new(FlakyPopStore {
            inner: MemoryStore::new(),
            allow: AtomicUsize::new(2),
        });
        // Seed through the inner store so pops count only drain traffic
        for addr in ["a@x.com", "b@x.com", "c@x.com", "d@x.com"] {
            let payload = serde_json::to_string(&job_to(addr)).unwrap();
            store.inner.push_tail("t:jobs", &payload).await.unwrap();
        }
        let h = harness_on(store, RecordingMailer::new(), WorkerConfig::default());

        let summary = h.worker.run_once().await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.remaining, 2);
    }

    #[tokio::test]
    async fn throttle_rejects_back_to_back_drains() {
        let config = WorkerConfig {
            min_interval: Duration::from_secs(60),
            ..WorkerConfig::default()
        };
        let h = harness_on(Arc::new(MemoryStore::new()), RecordingMailer::new(), config);
        h.queue.enqueue(&job_to("a@x.com")).await.unwrap();

        let first = h.worker.run_once().await.unwrap();
        assert_eq!(first.processed, 1);

        match h.worker.run_once().await {
            Err(WorkerError::Throttled { .. }) => {}
            other => panic!("expected throttled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn section_delay_overrides_default() {
        let h = harness();
        let mut settings = Settings::default();
        settings.default_delay_seconds = 3600;
        settings.sections = vec![Section {
            name: "Urgent".into(),
            keywords: vec!["urgent".into()],
            instructions: String::new(),
            priority: 0,
            enabled: true,
            delay_seconds: Some(0),
        }];
        h.settings.save(&settings).await.unwrap();

        h.queue
            .enqueue(&Job::new(serde_json::json!({ "email": "now@x.com", "message": "urgent please" })))
            .await
            .unwrap();

        let summary = h.worker.run_once().await.unwrap();
        // Section delay of zero beats the default hour-long delay
        assert_eq!(summary.processed, 1);
        assert_eq!(h.mailer.recipients(), vec!["now@x.com"]);
    }
}
