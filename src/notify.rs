//! Regulator Notification Pipeline
//!
//! Owns the notification lifecycle: idempotent creation when a transfer
//! first reaches a notifiable terminal state, an immediate first delivery
//! attempt, a durable retry queue with exponential backoff and jitter, and
//! an immutable audit row per attempt. Notifications retry until delivered;
//! there is no maximum attempt count.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::RegulatorConfig;
use crate::context::RunContext;
use crate::error::{OutboundError, OutboundResult};
use crate::storage::Store;
use crate::types::{DeliveryAttempt, Notification, RegulatorPayload, Transfer, TransferStatus};
use crate::webhook::WebhookSender;

/// Maximum notifications handled per retry pass
const RETRY_BATCH_SIZE: usize = 20;

/// Regulator notification pipeline
pub struct NotificationPipeline<S: Store> {
    storage: Arc<S>,
    sender: Arc<dyn WebhookSender>,
    clock: Arc<dyn Clock>,
    webhook_url: String,
    retry_initial_seconds: u64,
    retry_max_seconds: u64,
}

impl<S: Store> NotificationPipeline<S> {
    /// Create a new pipeline
    pub fn new(
        storage: Arc<S>,
        sender: Arc<dyn WebhookSender>,
        clock: Arc<dyn Clock>,
        config: &RegulatorConfig,
    ) -> Self {
        Self {
            storage,
            sender,
            clock,
            webhook_url: config.webhook_url.clone(),
            retry_initial_seconds: config.retry_initial_seconds,
            retry_max_seconds: config.retry_max_seconds,
        }
    }

    /// Create the notification for `(transfer, terminal_status)` if absent
    /// and attempt delivery immediately.
    ///
    /// Safe to call any number of times: an existing row (or losing an
    /// insert race to a concurrent creator) is success.
    pub async fn create_and_deliver(
        &self,
        ctx: &RunContext,
        transfer: &Transfer,
        terminal_status: TransferStatus,
    ) -> OutboundResult<()> {
        if !terminal_status.is_notifiable() {
            warn!(
                transfer_id = %transfer.id,
                status = %terminal_status,
                "ignoring notification request for non-notifiable status"
            );
            return Ok(());
        }

        if self
            .storage
            .notification_exists(&transfer.id, terminal_status)
            .await?
        {
            info!(
                transfer_id = %transfer.id,
                status = %terminal_status,
                "notification already exists, skipping"
            );
            return Ok(());
        }

        let now = self.clock.now();
        let payload = RegulatorPayload::for_transfer(transfer, terminal_status, now);
        let mut notification = Notification::new(
            transfer.id,
            terminal_status,
            serde_json::to_vec(&payload)?,
            now,
        );

        match self.storage.insert_notification(&notification).await {
            Ok(()) => {}
            Err(OutboundError::Duplicate(_)) => {
                // Lost the race to a concurrent creator; their row stands.
                info!(
                    transfer_id = %transfer.id,
                    status = %terminal_status,
                    "notification created concurrently, skipping"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        info!(
            notification_id = %notification.id,
            transfer_id = %transfer.id,
            status = %terminal_status,
            "regulator notification created, attempting immediate delivery"
        );

        self.attempt_delivery(ctx, &mut notification).await;
        Ok(())
    }

    /// Run one retry pass over due notifications, oldest first.
    ///
    /// Returns the number of attempts made. Storage failures are logged and
    /// left for the next tick.
    pub async fn retry_pass(&self, ctx: &RunContext) -> usize {
        let due = match self
            .storage
            .list_due_notifications(self.clock.now(), RETRY_BATCH_SIZE)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to fetch due regulator notifications");
                return 0;
            }
        };

        let mut attempted = 0;
        for mut notification in due {
            if ctx.is_cancelled() {
                break;
            }
            self.attempt_delivery(ctx, &mut notification).await;
            attempted += 1;
        }
        attempted
    }

    /// Attempt one delivery and persist the outcome together with its audit
    /// row. Never returns an error: failures are recorded and rescheduled.
    pub async fn attempt_delivery(&self, ctx: &RunContext, notification: &mut Notification) {
        let now = self.clock.now();
        let outcome = self
            .sender
            .send(ctx, &self.webhook_url, &notification.id, &notification.payload)
            .await;

        notification.attempt_count += 1;
        notification.last_attempt_at = Some(now);
        notification.first_attempt_at.get_or_insert(now);
        notification.last_http_status = outcome.http_status;

        let attempt = if outcome.is_success() {
            notification.delivered = true;
            notification.next_attempt_at = None;
            notification.last_error = None;

            info!(
                notification_id = %notification.id,
                transfer_id = %notification.transfer_id,
                attempt = notification.attempt_count,
                "regulator notification delivered"
            );

            DeliveryAttempt::responded(
                notification.id,
                now,
                outcome.http_status.unwrap_or_default(),
                None,
                outcome.body_prefix,
            )
        } else {
            let reason = match outcome.http_status {
                Some(status) => format!("webhook returned HTTP {status}"),
                None => outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "webhook delivery failed".to_string()),
            };
            let backoff = self.backoff(notification.attempt_count);
            notification.last_error = Some(reason.clone());
            notification.next_attempt_at = Some(now + backoff);

            warn!(
                notification_id = %notification.id,
                transfer_id = %notification.transfer_id,
                attempt = notification.attempt_count,
                error = %reason,
                next_attempt_in_ms = backoff.num_milliseconds(),
                "regulator notification delivery failed, retry scheduled"
            );

            match outcome.http_status {
                Some(status) => DeliveryAttempt::responded(
                    notification.id,
                    now,
                    status,
                    Some(reason),
                    outcome.body_prefix,
                ),
                None => DeliveryAttempt::failed(notification.id, now, reason),
            }
        };

        if let Err(e) = self.storage.record_attempt(notification, &attempt).await {
            error!(
                notification_id = %notification.id,
                error = %e,
                "failed to persist notification attempt"
            );
        }
    }

    /// Backoff before the next attempt after `attempt_count` attempts.
    ///
    /// `min(base * 2^(n-1), cap)` plus a uniform ±20% jitter, floored at
    /// one second. Jitter is applied after the cap, so the result may
    /// exceed the cap by up to 20%.
    pub fn backoff(&self, attempt_count: u32) -> chrono::Duration {
        let base = self.retry_initial_seconds as f64;
        let cap = self.retry_max_seconds as f64;

        let mut seconds = base * 2f64.powi(attempt_count.saturating_sub(1).min(1024) as i32);
        if seconds > cap {
            seconds = cap;
        }

        seconds += seconds * 0.2 * self.clock.jitter_unit();

        if seconds < 1.0 {
            seconds = 1.0;
        }

        chrono::Duration::milliseconds((seconds * 1000.0) as i64)
    }
}
