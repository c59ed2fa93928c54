// src/notify.rs

use crate::worklog_store::StoreError;
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

// --- Notification Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    EntryAutoSubmitted,
    LeaveAutoAssigned,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::EntryAutoSubmitted => "ENTRY_AUTO_SUBMITTED",
            NotificationKind::LeaveAutoAssigned => "LEAVE_AUTO_ASSIGNED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub user_key: String,
    pub kind: NotificationKind,
    pub payload: Value,
    pub priority: u8,
    pub delay_ms: u64,
}

impl NotificationRequest {
    pub fn new(user_key: &str, kind: NotificationKind, payload: Value) -> Self {
        Self {
            user_key: user_key.to_string(),
            kind,
            payload,
            priority: 1,
            delay_ms: 0,
        }
    }
}

// --- Dispatch Seam ---

/// Fire-and-forget handoff used by the reconciliation engine. Implementors
/// must never fail or block the caller; delivery problems are the worker's
/// business.
pub trait Notifier: Send + Sync {
    fn notify(&self, request: NotificationRequest);
}

/// Pushes requests onto an unbounded queue drained by
/// [`run_notification_worker`].
pub struct QueueingNotifier {
    tx: UnboundedSender<NotificationRequest>,
}

impl QueueingNotifier {
    pub fn channel() -> (Self, UnboundedReceiver<NotificationRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for QueueingNotifier {
    fn notify(&self, request: NotificationRequest) {
        if self.tx.send(request).is_err() {
            warn!("Notification queue is closed; dropping notification");
        }
    }
}

// --- Delivery Backend ---

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, request: &NotificationRequest) -> Result<(), StoreError>;
}

const BACKOFF_JITTER_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    // 2s, 4s, 8s... plus a little jitter so retries spread out.
    fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        let wait = self.base_delay.saturating_mul(1u32 << doublings);
        wait + Duration::from_millis(rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS))
    }
}

/// Drain the notification queue, delivering each request with retries.
/// Runs until every sender is dropped and the queue is empty.
pub async fn run_notification_worker(
    mut rx: UnboundedReceiver<NotificationRequest>,
    sink: Arc<dyn NotificationSink>,
    policy: RetryPolicy,
) {
    info!("Starting notification dispatch worker");
    while let Some(request) = rx.recv().await {
        if request.delay_ms > 0 {
            sleep(Duration::from_millis(request.delay_ms)).await;
        }
        deliver_with_retry(sink.as_ref(), &request, &policy).await;
    }
    info!("Notification queue closed; dispatch worker exiting");
}

async fn deliver_with_retry(
    sink: &dyn NotificationSink,
    request: &NotificationRequest,
    policy: &RetryPolicy,
) {
    for attempt in 1..=policy.attempts {
        match sink.deliver(request).await {
            Ok(()) => {
                debug!(
                    "Delivered {} notification for '{}'",
                    request.kind.as_str(),
                    request.user_key
                );
                return;
            }
            Err(e) if attempt < policy.attempts => {
                let wait = policy.backoff(attempt);
                warn!(
                    "Notification delivery attempt {}/{} failed for '{}': {}. Retrying in {:?}",
                    attempt, policy.attempts, request.user_key, e, wait
                );
                sleep(wait).await;
            }
            Err(e) => {
                error!(
                    "Giving up on {} notification for '{}' after {} attempts: {}",
                    request.kind.as_str(),
                    request.user_key,
                    policy.attempts,
                    e
                );
            }
        }
    }
}

// --- In-Memory Delivery Store ---

#[derive(Debug, Clone, Serialize)]
pub struct StoredNotification {
    pub user_key: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: Value,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

static NOTIFICATION_COPY: Lazy<HashMap<NotificationKind, (&'static str, &'static str)>> =
    Lazy::new(|| {
        HashMap::from([
            (
                NotificationKind::EntryAutoSubmitted,
                (
                    "Worklog submitted",
                    "Your draft worklog entries were submitted automatically at end of day.",
                ),
            ),
            (
                NotificationKind::LeaveAutoAssigned,
                (
                    "Leave assigned",
                    "No worklog was submitted today, so a leave entry was recorded for you.",
                ),
            ),
        ])
    });

/// Stores rendered notifications for later retrieval by the user-facing
/// surfaces. Stands in for the inbox table of the full product.
#[derive(Default)]
pub struct InMemoryNotificationStore {
    rows: Mutex<Vec<StoredNotification>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("notification store".to_string()))?;
        Ok(rows.len())
    }

    pub fn for_user(&self, user_key: &str) -> Result<Vec<StoredNotification>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("notification store".to_string()))?;
        Ok(rows
            .iter()
            .filter(|r| r.user_key == user_key)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationStore {
    async fn deliver(&self, request: &NotificationRequest) -> Result<(), StoreError> {
        let (title, message) = NOTIFICATION_COPY
            .get(&request.kind)
            .copied()
            .unwrap_or(("Worklog update", ""));
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("notification store".to_string()))?;
        rows.push(StoredNotification {
            user_key: request.user_key.clone(),
            kind: request.kind,
            title: title.to_string(),
            message: message.to_string(),
            data: request.payload.clone(),
            is_read: false,
            created_at: Utc::now().naive_utc(),
        });
        Ok(())
    }
}

// --- Test Double ---

#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct NotificationCriteria {
    pub user_key: Option<String>,
    pub kind: Option<NotificationKind>,
}

#[cfg(test)]
impl NotificationCriteria {
    fn matches(&self, request: &NotificationRequest) -> bool {
        if let Some(user_key) = &self.user_key {
            if request.user_key != *user_key {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if request.kind != *kind {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<NotificationRequest>>>,
}

#[cfg(test)]
impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_sent(&self) -> std::sync::MutexGuard<'_, Vec<NotificationRequest>> {
        self.sent.lock().unwrap()
    }

    pub fn expect_notification(&self, criteria: NotificationCriteria) {
        assert!(
            self.get_sent().iter().any(|n| criteria.matches(n)),
            "Expected notification matching {:?} not found in {:?}",
            criteria,
            self.get_sent()
        );
    }

    pub fn expect_no_notification(&self, criteria: NotificationCriteria) {
        assert!(
            !self.get_sent().iter().any(|n| criteria.matches(n)),
            "Unexpected notification matching {:?} found in {:?}",
            criteria,
            self.get_sent()
        );
    }

    pub fn count_notifications(&self, criteria: NotificationCriteria) -> usize {
        self.get_sent()
            .iter()
            .filter(|n| criteria.matches(n))
            .count()
    }
}

#[cfg(test)]
impl Notifier for MockNotifier {
    fn notify(&self, request: NotificationRequest) {
        debug!("Mock notification sent: {:?}", request);
        self.sent.lock().unwrap().push(request);
    }
}
