//! Persistence Layer
//!
//! Storage interface and backends for the outbound core's durable records.
//! Uniqueness constraints surface as `OutboundError::Duplicate`; the
//! notification update + attempt append pair is atomic, so observers never
//! see a delivered notification without its success attempt row.

pub mod memory;
pub mod sled;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::OutboundResult;
use crate::types::{
    DeliveryAttempt, ExternalAccount, Notification, Transfer, TransferFilters, TransferStatus,
};

/// Storage interface for the outbound core
///
/// Implementations stamp `updated_at` on every update through their clock.
#[async_trait]
pub trait Store: Send + Sync {
    // --- External accounts ---

    /// Insert a registered account; unique per
    /// `(user_id, account_number, routing_number)`
    async fn insert_account(&self, account: &ExternalAccount) -> OutboundResult<()>;

    /// Update an existing account
    async fn update_account(&self, account: &mut ExternalAccount) -> OutboundResult<()>;

    /// Get an account by id
    async fn get_account(&self, id: &Uuid) -> OutboundResult<Option<ExternalAccount>>;

    /// Find a user's account by account and routing number
    async fn find_account(
        &self,
        user_id: &Uuid,
        account_number: &str,
        routing_number: &str,
    ) -> OutboundResult<Option<ExternalAccount>>;

    /// Page through a user's registered accounts; returns (rows, total)
    async fn list_accounts_for_user(
        &self,
        user_id: &Uuid,
        offset: usize,
        limit: usize,
    ) -> OutboundResult<(Vec<ExternalAccount>, u64)>;

    // --- Transfers ---

    /// Insert a transfer; `upstream_transfer_id` is unique
    async fn insert_transfer(&self, transfer: &Transfer) -> OutboundResult<()>;

    /// Get a transfer by local id
    async fn get_transfer(&self, id: &Uuid) -> OutboundResult<Option<Transfer>>;

    /// Update an existing transfer
    async fn update_transfer(&self, transfer: &mut Transfer) -> OutboundResult<()>;

    /// Page through a user's transfers, newest first; returns (rows, total)
    async fn list_transfers(
        &self,
        user_id: &Uuid,
        filters: &TransferFilters,
        offset: usize,
        limit: usize,
    ) -> OutboundResult<(Vec<Transfer>, u64)>;

    /// Non-terminal transfers (PENDING or PROCESSING), oldest first
    async fn list_open_transfers(&self, limit: usize) -> OutboundResult<Vec<Transfer>>;

    // --- Notifications ---

    /// Insert a notification; unique per `(transfer_id, terminal_status)`
    async fn insert_notification(&self, notification: &Notification) -> OutboundResult<()>;

    /// Get a notification by id
    async fn get_notification(&self, id: &Uuid) -> OutboundResult<Option<Notification>>;

    /// Whether a notification exists for the transfer and terminal status
    async fn notification_exists(
        &self,
        transfer_id: &Uuid,
        terminal_status: TransferStatus,
    ) -> OutboundResult<bool>;

    /// The notification for `(transfer_id, terminal_status)`, if any
    async fn find_notification(
        &self,
        transfer_id: &Uuid,
        terminal_status: TransferStatus,
    ) -> OutboundResult<Option<Notification>>;

    /// Undelivered notifications due at `now`, oldest first
    async fn list_due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> OutboundResult<Vec<Notification>>;

    /// Persist the post-attempt notification state and append the attempt
    /// row in a single atomic write
    async fn record_attempt(
        &self,
        notification: &mut Notification,
        attempt: &DeliveryAttempt,
    ) -> OutboundResult<()>;

    // --- Attempts ---

    /// Delivery attempts for a notification, in attempt order
    async fn list_attempts(&self, notification_id: &Uuid) -> OutboundResult<Vec<DeliveryAttempt>>;

    // --- Diagnostics ---

    /// Row counts for operator visibility
    async fn stats(&self) -> OutboundResult<StorageStats>;
}

/// Storage row counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub accounts: u64,
    pub transfers: u64,
    /// Transfers still PENDING or PROCESSING
    pub open_transfers: u64,
    pub notifications: u64,
    /// Notifications with `delivered = false`
    pub undelivered_notifications: u64,
    pub attempts: u64,
}

pub use self::sled::SledStore;
pub use memory::MemoryStore;
