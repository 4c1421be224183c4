//! Queue processor: claims due rows and drives them to a final state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::db::{Channel, NotificationQueueRepository, QueueEntry, QueueStatus};
use crate::error::AppResult;
use crate::services::senders::{SendOutcome, SenderRegistry};

/// Counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Sent,
    Retried,
    Failed,
    /// Nothing was written for the row.
    Stale,
}

impl RowOutcome {
    fn from_status(status: Option<QueueStatus>) -> Self {
        match status {
            Some(QueueStatus::Sent) => RowOutcome::Sent,
            Some(QueueStatus::Failed) => RowOutcome::Failed,
            Some(_) => RowOutcome::Retried,
            None => RowOutcome::Stale,
        }
    }
}

/// Added on top of twice the send timeout before a PROCESSING row counts as abandoned.
const LEASE_GRACE: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct QueueProcessor {
    pool: SqlitePool,
    senders: Arc<SenderRegistry>,
    batch_size: i64,
    send_timeout: Duration,
}

impl QueueProcessor {
    pub fn new(
        pool: SqlitePool,
        senders: SenderRegistry,
        batch_size: u32,
        send_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            senders: Arc::new(senders),
            batch_size: i64::from(batch_size.max(1)),
            send_timeout,
        }
    }

    /// How long a claimed row belongs to its worker.
    fn lease(&self) -> chrono::Duration {
        let lease = self.send_timeout.saturating_mul(2).saturating_add(LEASE_GRACE);
        chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(1))
    }

    pub async fn process_batch(&self) -> AppResult<BatchSummary> {
        self.process_batch_at(Utc::now()).await
    }

    /// Claim up to `batch_size` rows due at `now` and process them concurrently.
    ///
    /// A row whose task errors or panics before its send is handed back through
    /// `record_failure`. Rows abandoned in PROCESSING past the lease are claimed
    /// again, or failed when no attempts remain.
    pub async fn process_batch_at(&self, now: DateTime<Utc>) -> AppResult<BatchSummary> {
        let now = now.naive_utc();
        let stale_before = now - self.lease();

        let expired = NotificationQueueRepository::fail_expired(&self.pool, stale_before, now).await?;
        for row in &expired {
            tracing::error!(
                "Notification {} ({} via {}) abandoned in processing after {} attempts",
                row.id,
                row.event_key,
                row.channel,
                row.attempts
            );
        }

        let entries =
            NotificationQueueRepository::claim_due(&self.pool, self.batch_size, now, stale_before)
                .await?;

        let mut summary = BatchSummary {
            claimed: entries.len(),
            failed: expired.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            if !expired.is_empty() {
                tracing::info!(failed = summary.failed, "Expired abandoned notifications");
            }
            return Ok(summary);
        }

        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = entry.id.clone();
            let processor = self.clone();
            tasks.push((
                id,
                tokio::spawn(async move { processor.process_entry(entry, now).await }),
            ));
        }

        for (id, task) in tasks {
            let outcome = match task.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => self.reset_row(&id, &e.to_string(), now).await,
                Err(e) => {
                    let reason = if e.is_panic() {
                        "row processing panicked".to_string()
                    } else {
                        format!("row processing aborted: {}", e)
                    };
                    self.reset_row(&id, &reason, now).await
                }
            };

            match outcome {
                RowOutcome::Sent => summary.sent += 1,
                RowOutcome::Retried => summary.retried += 1,
                RowOutcome::Failed => summary.failed += 1,
                RowOutcome::Stale => {}
            }
        }

        tracing::info!(
            claimed = summary.claimed,
            sent = summary.sent,
            retried = summary.retried,
            failed = summary.failed,
            "Processed notification batch"
        );

        Ok(summary)
    }

    async fn process_entry(&self, entry: QueueEntry, now: NaiveDateTime) -> AppResult<RowOutcome> {
        let outcome = self.dispatch(&entry).await;

        if outcome.success {
            let Some(row) = self.record_sent(&entry.id, outcome.message_id, now).await else {
                return Ok(RowOutcome::Stale);
            };
            if row.is_none() {
                tracing::warn!("Queue entry {} was no longer processing after send", entry.id);
            }
            return Ok(RowOutcome::from_status(row.map(|r| r.status)));
        }

        let error = outcome
            .error
            .unwrap_or_else(|| "unknown send error".to_string());
        let row = NotificationQueueRepository::record_failure(&self.pool, &entry.id, &error, now)
            .await?;

        match &row {
            Some(r) if r.status == QueueStatus::Failed => tracing::error!(
                "Notification {} ({} via {}) failed permanently after {} attempts: {}",
                r.id,
                r.event_key,
                r.channel,
                r.attempts,
                error
            ),
            Some(r) => tracing::warn!(
                "Notification {} via {} failed (attempt {}/{}), will retry: {}",
                r.id,
                r.channel,
                r.attempts,
                r.max_attempts,
                error
            ),
            None => tracing::warn!("Queue entry {} was no longer processing after failure", entry.id),
        }

        Ok(RowOutcome::from_status(row.map(|r| r.status)))
    }

    async fn dispatch(&self, entry: &QueueEntry) -> SendOutcome {
        // The history row written at enqueue time is the delivery.
        if entry.channel == Channel::InApp {
            return SendOutcome::sent(None);
        }

        let Some(sender) = self.senders.get(entry.channel) else {
            return SendOutcome::failed(format!(
                "no sender configured for channel {}",
                entry.channel
            ));
        };

        match tokio::time::timeout(self.send_timeout, sender.send(entry)).await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::failed(format!(
                "send timed out after {}s",
                self.send_timeout.as_secs_f64()
            )),
        }
    }

    /// Persist a delivered row. A delivered message is never re-queued, so a
    /// write error is retried once and then only logged. `None` means nothing
    /// was written.
    async fn record_sent(
        &self,
        id: &str,
        message_id: Option<String>,
        now: NaiveDateTime,
    ) -> Option<Option<QueueEntry>> {
        match NotificationQueueRepository::mark_sent(&self.pool, id, message_id.clone(), now).await {
            Ok(row) => return Some(row),
            Err(e) => tracing::warn!("Failed to mark notification {} sent, retrying: {}", id, e),
        }

        match NotificationQueueRepository::mark_sent(&self.pool, id, message_id, now).await {
            Ok(row) => Some(row),
            Err(e) => {
                tracing::error!(
                    "Notification {} was delivered but could not be marked sent: {}",
                    id,
                    e
                );
                None
            }
        }
    }

    async fn reset_row(&self, id: &str, reason: &str, now: NaiveDateTime) -> RowOutcome {
        tracing::error!("Processing queue entry {} failed: {}", id, reason);
        match NotificationQueueRepository::record_failure(&self.pool, id, reason, now).await {
            Ok(row) => RowOutcome::from_status(row.map(|r| r.status)),
            Err(e) => {
                tracing::error!("Failed to reset queue entry {}: {}", id, e);
                RowOutcome::Stale
            }
        }
    }

    /// Poll until shutdown. Sleeps `poll_interval` after an empty or failed poll.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>, poll_interval: Duration) {
        tracing::info!(
            "Queue processor started (batch size {}, channels {:?})",
            self.batch_size,
            self.senders.channels()
        );

        loop {
            if shutdown.try_recv().is_ok() {
                tracing::info!("Queue processor received shutdown signal");
                break;
            }

            let idle = match self.process_batch().await {
                Ok(summary) => summary.claimed == 0,
                Err(e) => {
                    tracing::warn!("Failed to process notification queue: {:?}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Queue processor shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::db::CreateQueueEntry;
    use crate::services::senders::ChannelSender;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    async fn enqueue(pool: &SqlitePool, channel: Channel, minutes_ago: i64) -> QueueEntry {
        let at = (noon() - chrono::Duration::minutes(minutes_ago)).naive_utc();
        NotificationQueueRepository::create(
            pool,
            CreateQueueEntry {
                event_key: "ORDER_CREATED".to_string(),
                user_id: Some("u1".to_string()),
                recipient_email: Some("u1@example.com".to_string()),
                recipient_phone: None,
                channel,
                subject: Some("Order created".to_string()),
                message: "Your order was created".to_string(),
                data: serde_json::json!({}),
                scheduled_for: at,
                max_attempts: 3,
            },
            at,
        )
        .await
        .unwrap()
    }

    async fn reload(pool: &SqlitePool, id: &str) -> QueueEntry {
        NotificationQueueRepository::find_by_id(pool, id)
            .await
            .unwrap()
            .unwrap()
    }

    enum Behaviour {
        Succeed,
        Fail(&'static str),
        Sleep(Duration),
        Panic,
    }

    struct FakeSender {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeSender {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChannelSender for FakeSender {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn send(&self, entry: &QueueEntry) -> SendOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Succeed => SendOutcome::sent(Some(format!("msg-{}", entry.id))),
                Behaviour::Fail(error) => SendOutcome::failed(*error),
                Behaviour::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    SendOutcome::sent(None)
                }
                Behaviour::Panic => panic!("transport exploded"),
            }
        }
    }

    fn processor(pool: &SqlitePool, sender: Arc<FakeSender>, timeout: Duration) -> QueueProcessor {
        QueueProcessor::new(
            pool.clone(),
            SenderRegistry::new().with(sender),
            100,
            timeout,
        )
    }

    #[tokio::test]
    async fn successful_send_marks_row_sent() {
        let pool = test_pool().await;
        let row = enqueue(&pool, Channel::Email, 1).await;
        let sender = FakeSender::new(Behaviour::Succeed);
        let p = processor(&pool, sender.clone(), Duration::from_secs(5));

        let summary = p.process_batch_at(noon()).await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                claimed: 1,
                sent: 1,
                retried: 0,
                failed: 0
            }
        );

        let row = reload(&pool, &row.id).await;
        assert_eq!(row.status, QueueStatus::Sent);
        assert_eq!(row.attempts, 1);
        assert_eq!(row.message_id, Some(format!("msg-{}", row.id)));
        assert!(row.sent_at.is_some());
    }

    #[tokio::test]
    async fn failures_retry_until_max_attempts_then_fail() {
        let pool = test_pool().await;
        let row = enqueue(&pool, Channel::Email, 1).await;
        let sender = FakeSender::new(Behaviour::Fail("SMTP timeout"));
        let p = processor(&pool, sender.clone(), Duration::from_secs(5));

        let summary = p.process_batch_at(noon()).await.unwrap();
        assert_eq!(summary.retried, 1);
        let after_first = reload(&pool, &row.id).await;
        assert_eq!(after_first.status, QueueStatus::Pending);
        assert_eq!(after_first.attempts, 1);
        assert_eq!(after_first.error.as_deref(), Some("SMTP timeout"));

        p.process_batch_at(noon()).await.unwrap();
        let summary = p.process_batch_at(noon()).await.unwrap();
        assert_eq!(summary.failed, 1);

        let failed = reload(&pool, &row.id).await;
        assert_eq!(failed.status, QueueStatus::Failed);
        assert_eq!(failed.attempts, 3);
        assert!(failed.failed_at.is_some());

        let summary = p.process_batch_at(noon()).await.unwrap();
        assert_eq!(summary.claimed, 0);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn in_app_rows_succeed_without_a_sender() {
        let pool = test_pool().await;
        let row = enqueue(&pool, Channel::InApp, 1).await;
        let p = QueueProcessor::new(pool.clone(), SenderRegistry::new(), 10, Duration::from_secs(1));

        let summary = p.process_batch_at(noon()).await.unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(reload(&pool, &row.id).await.status, QueueStatus::Sent);
    }

    #[tokio::test]
    async fn missing_sender_is_an_ordinary_failure() {
        let pool = test_pool().await;
        let row = enqueue(&pool, Channel::Sms, 1).await;
        let p = processor(&pool, FakeSender::new(Behaviour::Succeed), Duration::from_secs(1));

        p.process_batch_at(noon()).await.unwrap();
        let row = reload(&pool, &row.id).await;
        assert_eq!(row.status, QueueStatus::Pending);
        assert_eq!(
            row.error.as_deref(),
            Some("no sender configured for channel SMS")
        );
    }

    #[tokio::test]
    async fn slow_sender_times_out_and_is_retried() {
        let pool = test_pool().await;
        let row = enqueue(&pool, Channel::Email, 1).await;
        let sender = FakeSender::new(Behaviour::Sleep(Duration::from_millis(500)));
        let p = processor(&pool, sender, Duration::from_millis(20));

        let summary = p.process_batch_at(noon()).await.unwrap();
        assert_eq!(summary.retried, 1);
        let row = reload(&pool, &row.id).await;
        assert_eq!(row.status, QueueStatus::Pending);
        assert_eq!(row.error.as_deref(), Some("send timed out after 0.02s"));
    }

    #[tokio::test]
    async fn panicking_row_is_reset_and_batch_continues() {
        let pool = test_pool().await;
        let row = enqueue(&pool, Channel::Email, 2).await;
        let in_app = enqueue(&pool, Channel::InApp, 1).await;
        let p = processor(&pool, FakeSender::new(Behaviour::Panic), Duration::from_secs(1));

        let summary = p.process_batch_at(noon()).await.unwrap();
        assert_eq!(summary.claimed, 2);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.retried, 1);

        let row = reload(&pool, &row.id).await;
        assert_eq!(row.status, QueueStatus::Pending);
        assert_eq!(row.error.as_deref(), Some("row processing panicked"));
        assert_eq!(reload(&pool, &in_app.id).await.status, QueueStatus::Sent);
    }

    #[tokio::test]
    async fn concurrent_processors_send_a_row_once() {
        let pool = test_pool().await;
        enqueue(&pool, Channel::Email, 1).await;
        let sender = FakeSender::new(Behaviour::Succeed);
        let a = processor(&pool, sender.clone(), Duration::from_secs(1));
        let b = processor(&pool, sender.clone(), Duration::from_secs(1));

        let (ra, rb) = tokio::join!(a.process_batch_at(noon()), b.process_batch_at(noon()));
        assert_eq!(ra.unwrap().claimed + rb.unwrap().claimed, 1);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn future_rows_wait_for_their_schedule() {
        let pool = test_pool().await;
        let row = enqueue(&pool, Channel::InApp, -10).await;
        let p = QueueProcessor::new(pool.clone(), SenderRegistry::new(), 10, Duration::from_secs(1));

        assert_eq!(p.process_batch_at(noon()).await.unwrap().claimed, 0);
        let later = noon() + chrono::Duration::minutes(11);
        assert_eq!(p.process_batch_at(later).await.unwrap().sent, 1);
        assert_eq!(reload(&pool, &row.id).await.status, QueueStatus::Sent);
    }

    #[tokio::test]
    async fn worker_loop_stops_on_shutdown() {
        let pool = test_pool().await;
        let p = QueueProcessor::new(pool, SenderRegistry::new(), 10, Duration::from_secs(1));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(p.run(rx, Duration::from_secs(60)));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn abandoned_row_is_picked_up_after_its_lease() {
        let pool = test_pool().await;
        let row = enqueue(&pool, Channel::InApp, 1).await;
        // A worker claims the row and dies before finishing.
        let at = noon().naive_utc();
        NotificationQueueRepository::claim_due(&pool, 1, at, at).await.unwrap();
        let p = QueueProcessor::new(pool.clone(), SenderRegistry::new(), 10, Duration::from_secs(1));

        assert_eq!(p.process_batch_at(noon()).await.unwrap().claimed, 0);
        assert_eq!(reload(&pool, &row.id).await.status, QueueStatus::Processing);

        let later = noon() + chrono::Duration::minutes(10);
        let summary = p.process_batch_at(later).await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.sent, 1);

        let row = reload(&pool, &row.id).await;
        assert_eq!(row.status, QueueStatus::Sent);
        assert_eq!(row.attempts, 2);
    }

    #[tokio::test]
    async fn delivered_row_is_not_requeued_when_marking_sent_fails() {
        let pool = test_pool().await;
        let row = enqueue(&pool, Channel::Email, 1).await;
        sqlx::query(
            r#"
            CREATE TRIGGER reject_sent BEFORE UPDATE OF status ON notification_queue
            WHEN NEW.status = 'SENT'
            BEGIN
                SELECT RAISE(ABORT, 'disk full');
            END
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        let sender = FakeSender::new(Behaviour::Succeed);
        let p = processor(&pool, sender.clone(), Duration::from_secs(1));

        let summary = p.process_batch_at(noon()).await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.retried, 0);
        assert_eq!(summary.sent, 0);

        let stored = reload(&pool, &row.id).await;
        assert_eq!(stored.status, QueueStatus::Processing);
        assert!(stored.error.is_none());

        assert_eq!(p.process_batch_at(noon()).await.unwrap().claimed, 0);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
    }
}
