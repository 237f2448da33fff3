//! The queue and its single consumer.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use database::{dispatch_failure, Database};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reply_core::{ContactId, MessageTransport, OutboundPayload, TypingState};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::QueueError;
use crate::greeting::vary_greeting;
use crate::item::{DispatchOutcome, ItemStatus, QueueItem, QueueStatus, QueuedPreview};

const OUTCOME_CHANNEL_CAPACITY: usize = 256;
const PREVIEW_ITEMS: usize = 5;
const PREVIEW_CHARS: usize = 50;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct Stats {
    total_sent: u64,
    total_failed: u64,
    cooldowns: u64,
}

/// Pacing state owned by the consumer.
#[derive(Debug, Default)]
struct Pace {
    last_attempt: Option<Instant>,
    sent_since_cooldown: u32,
}

struct Inner {
    config: DispatchConfig,
    transport: Arc<dyn MessageTransport>,
    items: Mutex<VecDeque<QueueItem>>,
    stats: Mutex<Stats>,
    rng: Mutex<StdRng>,
    notify: Notify,
    running: AtomicBool,
    processing: AtomicBool,
    in_cooldown: AtomicBool,
    outcomes: broadcast::Sender<DispatchOutcome>,
    database: Option<Database>,
}

/// Rate-limited outbound queue.
///
/// Cloning is cheap; all clones share the same queue. Exactly one consumer
/// drains it (see [`DispatchQueue::run_until`]).
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<Inner>,
}

impl DispatchQueue {
    pub fn new(config: DispatchConfig, transport: Arc<dyn MessageTransport>) -> Self {
        Self::build(config, transport, None)
    }

    /// Create a queue that also records exhausted items in the database.
    pub fn with_database(
        config: DispatchConfig,
        transport: Arc<dyn MessageTransport>,
        database: Database,
    ) -> Self {
        Self::build(config, transport, Some(database))
    }

    fn build(
        config: DispatchConfig,
        transport: Arc<dyn MessageTransport>,
        database: Option<Database>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                items: Mutex::new(VecDeque::new()),
                stats: Mutex::new(Stats::default()),
                rng: Mutex::new(rng),
                notify: Notify::new(),
                running: AtomicBool::new(false),
                processing: AtomicBool::new(false),
                in_cooldown: AtomicBool::new(false),
                outcomes,
                database,
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Add a message to the end of the queue and return its id.
    pub fn enqueue(
        &self,
        contact: ContactId,
        payload: OutboundPayload,
        tag: Option<String>,
    ) -> Result<String, QueueError> {
        if payload.text.trim().is_empty() {
            return Err(QueueError::EmptyPayload(contact.to_string()));
        }

        let mut payload = payload;
        if self.inner.config.vary_greetings {
            payload.text = vary_greeting(&payload.text, &mut *lock(&self.inner.rng));
        }

        let item = QueueItem {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            contact,
            payload,
            attempt: 0,
            status: ItemStatus::Pending,
            last_error: None,
            tag,
            enqueued_at: Utc::now(),
        };
        let id = item.id.clone();

        let length = {
            let mut items = lock(&self.inner.items);
            items.push_back(item);
            items.len()
        };
        debug!("Enqueued {} (queue length {})", id, length);
        self.inner.notify.notify_one();

        Ok(id)
    }

    /// Remove a waiting item. Returns `false` if it is not in the queue.
    pub fn remove(&self, id: &str) -> bool {
        let mut items = lock(&self.inner.items);
        let before = items.len();
        items.retain(|item| item.id != id);
        before != items.len()
    }

    /// Remove and return every waiting item without sending it.
    pub fn drain(&self) -> Vec<QueueItem> {
        let drained: Vec<QueueItem> = lock(&self.inner.items).drain(..).collect();
        if !drained.is_empty() {
            info!("Drained {} queued messages", drained.len());
        }
        drained
    }

    pub fn status(&self) -> QueueStatus {
        let items = lock(&self.inner.items);
        let stats = lock(&self.inner.stats);
        let finished = stats.total_sent + stats.total_failed;
        let success_rate = if finished == 0 {
            0.0
        } else {
            stats.total_sent as f64 / finished as f64 * 100.0
        };

        QueueStatus {
            queue_length: items.len(),
            processing: self.inner.processing.load(Ordering::SeqCst),
            in_cooldown: self.inner.in_cooldown.load(Ordering::SeqCst),
            total_sent: stats.total_sent,
            total_failed: stats.total_failed,
            cooldowns_triggered: stats.cooldowns,
            success_rate,
            next_items: items
                .iter()
                .take(PREVIEW_ITEMS)
                .map(|item| QueuedPreview {
                    id: item.id.clone(),
                    contact: item.contact.clone(),
                    attempt: item.attempt,
                    preview: item.payload.text.chars().take(PREVIEW_CHARS).collect(),
                })
                .collect(),
        }
    }

    pub fn reset_stats(&self) {
        *lock(&self.inner.stats) = Stats::default();
    }

    /// Subscribe to per-attempt outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.inner.outcomes.subscribe()
    }

    /// Spawn the consumer on the current runtime. It runs until aborted.
    pub fn spawn(&self) -> JoinHandle<Result<(), QueueError>> {
        let queue = self.clone();
        tokio::spawn(async move { queue.run_until(std::future::pending::<()>()).await })
    }

    /// Drain the queue until `shutdown` resolves.
    ///
    /// Only one consumer may run at a time; a second call fails with
    /// [`QueueError::AlreadyRunning`].
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), QueueError>
    where
        F: Future<Output = ()>,
    {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyRunning);
        }

        info!("Dispatch worker started");
        tokio::pin!(shutdown);
        let mut pace = Pace::default();

        loop {
            let next = tokio::select! {
                biased;

                _ = &mut shutdown => break,

                next = self.next_item(&mut pace) => next,
            };
            let Some((item, typing)) = next else {
                continue;
            };

            self.set_typing(&item.contact, TypingState::Composing).await;
            let interrupted = tokio::select! {
                biased;

                _ = &mut shutdown => true,

                _ = sleep(typing) => false,
            };
            if interrupted {
                self.set_typing(&item.contact, TypingState::Paused).await;
                info!(id = %item.id, "Returning in-flight message to the queue");
                lock(&self.inner.items).push_front(item);
                break;
            }

            // Once the send starts it runs to completion, bounded by the send timeout.
            self.attempt(item, &mut pace).await;
        }

        info!("Dispatch worker shutting down");
        self.inner.processing.store(false, Ordering::SeqCst);
        self.inner.in_cooldown.store(false, Ordering::SeqCst);
        self.inner.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Wait for work and pace, then take the next item along with its typing delay.
    async fn next_item(&self, pace: &mut Pace) -> Option<(QueueItem, Duration)> {
        loop {
            let notified = self.inner.notify.notified();
            if !lock(&self.inner.items).is_empty() {
                break;
            }
            self.inner.processing.store(false, Ordering::SeqCst);
            notified.await;
        }
        self.inner.processing.store(true, Ordering::SeqCst);

        let typing = self.random_between(self.inner.config.typing_min, self.inner.config.typing_max);
        let cooldown = pace.sent_since_cooldown >= self.inner.config.batch_size;

        if let Some(last) = pace.last_attempt {
            let gap = if cooldown {
                self.random_between(self.inner.config.cooldown_min, self.inner.config.cooldown_max)
            } else {
                self.random_between(self.inner.config.interval_min, self.inner.config.interval_max)
            };
            if cooldown {
                info!("Cooldown of {:?} after {} sends", gap, pace.sent_since_cooldown);
                self.inner.in_cooldown.store(true, Ordering::SeqCst);
            }
            sleep_until(last + gap.saturating_sub(typing)).await;
            self.inner.in_cooldown.store(false, Ordering::SeqCst);
        }

        let item = lock(&self.inner.items).pop_front()?;
        if cooldown {
            pace.sent_since_cooldown = 0;
            lock(&self.inner.stats).cooldowns += 1;
        }
        Some((item, typing))
    }

    /// Make one send attempt and settle the item.
    async fn attempt(&self, item: QueueItem, pace: &mut Pace) {
        pace.last_attempt = Some(Instant::now());
        let result = timeout(
            self.inner.config.send_timeout,
            self.inner.transport.send(&item.contact, &item.payload),
        )
        .await;

        self.set_typing(&item.contact, TypingState::Paused).await;

        match result {
            Ok(Ok(receipt)) => {
                pace.sent_since_cooldown += 1;
                self.on_sent(item, receipt.message_id);
            }
            Ok(Err(e)) => self.on_failed_attempt(item, e.to_string()).await,
            Err(_) => {
                let error = format!("send timed out after {:?}", self.inner.config.send_timeout);
                self.on_failed_attempt(item, error).await
            }
        }
    }

    async fn set_typing(&self, contact: &ContactId, state: TypingState) {
        self.inner
            .transport
            .set_typing(contact, state)
            .await
            .unwrap_or_else(|e| debug!("Typing indicator failed for {}: {}", contact, e));
    }

    fn on_sent(&self, mut item: QueueItem, message_id: String) {
        item.attempt += 1;
        item.status = ItemStatus::Sent;
        lock(&self.inner.stats).total_sent += 1;
        info!(contact = %item.contact, id = %item.id, "Message sent ({})", message_id);
        let _ = self.inner.outcomes.send(DispatchOutcome::Sent { item, message_id });
    }

    async fn on_failed_attempt(&self, mut item: QueueItem, error: String) {
        item.attempt += 1;
        item.last_error = Some(error.clone());

        if item.attempt < self.inner.config.max_attempts {
            warn!(
                contact = %item.contact,
                id = %item.id,
                "Send attempt {}/{} failed: {}",
                item.attempt,
                self.inner.config.max_attempts,
                error
            );
            lock(&self.inner.items).push_back(item.clone());
            let _ = self.inner.outcomes.send(DispatchOutcome::Retrying { item, error });
            return;
        }

        item.status = ItemStatus::Failed;
        lock(&self.inner.stats).total_failed += 1;
        warn!(
            contact = %item.contact,
            id = %item.id,
            "Giving up after {} attempts: {}",
            item.attempt,
            error
        );

        if let Some(database) = &self.inner.database {
            if let Err(e) = dispatch_failure::insert_failure(
                database.pool(),
                &item.id,
                item.contact.as_str(),
                i64::from(item.attempt),
                &error,
            )
            .await
            {
                warn!("Failed to persist dispatch failure {}: {}", item.id, e);
            }
        }

        let _ = self.inner.outcomes.send(DispatchOutcome::Failed { item, error });
    }

    fn random_between(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let millis = lock(&self.inner.rng).gen_range(min.as_millis()..=max.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}
