//! Transfer Status Reconciler
//!
//! Polls the upstream bank for the status of non-terminal transfers and
//! advances the local mirror. When a transfer first reaches a notifiable
//! terminal state, hands it to the notification pipeline. A failure on one
//! transfer never aborts the pass.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::notify::NotificationPipeline;
use crate::storage::Store;
use crate::types::{Transfer, TransferStatus};
use crate::upstream::{parse_rfc3339_optional, UpstreamClient};

/// Maximum transfers polled per pass
const POLL_BATCH_SIZE: usize = 50;

/// Polls upstream transfer status and reconciles local rows
pub struct Reconciler<S: Store> {
    client: Arc<UpstreamClient>,
    storage: Arc<S>,
    pipeline: Arc<NotificationPipeline<S>>,
}

impl<S: Store> Reconciler<S> {
    /// Create a new reconciler
    pub fn new(
        client: Arc<UpstreamClient>,
        storage: Arc<S>,
        pipeline: Arc<NotificationPipeline<S>>,
    ) -> Self {
        Self {
            client,
            storage,
            pipeline,
        }
    }

    /// Run one reconcile pass over open transfers, oldest first.
    ///
    /// Returns the number of transfers whose status changed.
    pub async fn poll_once(&self, ctx: &RunContext) -> usize {
        let transfers = match self.storage.list_open_transfers(POLL_BATCH_SIZE).await {
            Ok(transfers) => transfers,
            Err(e) => {
                error!(error = %e, "failed to fetch open transfers");
                return 0;
            }
        };

        if transfers.is_empty() {
            return 0;
        }

        debug!(count = transfers.len(), "polling upstream for transfer status updates");

        let mut updated = 0;
        for mut transfer in transfers {
            if ctx.is_cancelled() {
                break;
            }
            if self.check_transfer(ctx, &mut transfer).await {
                updated += 1;
            }
        }
        updated
    }

    /// Query upstream for one transfer and apply any status change.
    ///
    /// Returns true if the local row changed.
    async fn check_transfer(&self, ctx: &RunContext, transfer: &mut Transfer) -> bool {
        let upstream_id = transfer.upstream_transfer_id.to_string();
        let resp = match self.client.transfer_status(ctx, &upstream_id).await {
            Ok(resp) => resp,
            Err(e) => {
                // Transient or not, the row stays put until the next tick.
                warn!(
                    transfer_id = %transfer.id,
                    upstream_id = %upstream_id,
                    error = %e,
                    "failed to fetch transfer status from upstream"
                );
                return false;
            }
        };

        let new_status = TransferStatus::from_upstream(&resp.status);
        if new_status == transfer.status {
            return false;
        }

        let old_status = transfer.status;
        transfer.status = new_status;

        if let Some(date) = parse_rfc3339_optional(resp.processing_date.as_deref()) {
            transfer.processing_date = Some(date);
        }
        if let Some(date) = parse_rfc3339_optional(resp.completed_date.as_deref()) {
            transfer.completed_date = Some(date);
        }
        if let Some(date) = parse_rfc3339_optional(resp.expected_completion_date.as_deref()) {
            transfer.expected_completion_date = Some(date);
        }
        if let Some(code) = resp.error_code.filter(|c| !c.is_empty()) {
            transfer.error_code = Some(code);
        }
        if let Some(message) = resp.error_message.filter(|m| !m.is_empty()) {
            transfer.error_message = Some(message);
        }

        if let Err(e) = self.storage.update_transfer(transfer).await {
            error!(
                transfer_id = %transfer.id,
                error = %e,
                "failed to update transfer status"
            );
            return false;
        }

        info!(
            transfer_id = %transfer.id,
            upstream_id = %upstream_id,
            old_status = %old_status,
            new_status = %new_status,
            "transfer status updated"
        );

        if new_status.is_notifiable() && !old_status.is_terminal() {
            info!(
                transfer_id = %transfer.id,
                status = %new_status,
                "transfer reached terminal state, creating regulator notification"
            );
            if let Err(e) = self
                .pipeline
                .create_and_deliver(ctx, transfer, new_status)
                .await
            {
                // The retry queue picks this up on a later tick.
                error!(
                    transfer_id = %transfer.id,
                    error = %e,
                    "failed to create regulator notification"
                );
            }
        }

        true
    }
}
