//! In-Memory Storage
//!
//! Memory-backed store used by tests and development setups. All tables
//! live under one lock so the notification + attempt write is observably
//! atomic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StorageStats, Store};
use crate::clock::{Clock, SystemClock};
use crate::error::{OutboundError, OutboundResult};
use crate::types::{
    DeliveryAttempt, ExternalAccount, Notification, Transfer, TransferFilters, TransferStatus,
};

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, ExternalAccount>,
    // (user_id, account_number, routing_number) -> account id
    account_unique: HashMap<(Uuid, String, String), Uuid>,
    transfers: HashMap<Uuid, Transfer>,
    // upstream_transfer_id -> transfer id
    transfer_upstream: HashMap<Uuid, Uuid>,
    notifications: HashMap<Uuid, Notification>,
    // (transfer_id, terminal_status) -> notification id
    notification_unique: HashMap<(Uuid, TransferStatus), Uuid>,
    attempts: HashMap<Uuid, Vec<DeliveryAttempt>>,
}

/// Thread-safe in-memory store
pub struct MemoryStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty store using the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new empty store with the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Drop all rows
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        *inner = Inner::default();
    }
}

#[async_trait]
impl Store for MemoryStore {
    // --- External accounts ---

    async fn insert_account(&self, account: &ExternalAccount) -> OutboundResult<()> {
        let mut inner = self.inner.write().await;
        let key = (
            account.user_id,
            account.account_number.clone(),
            account.routing_number.clone(),
        );
        if inner.account_unique.contains_key(&key) {
            return Err(OutboundError::Duplicate("external account"));
        }
        inner.account_unique.insert(key, account.id);
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn update_account(&self, account: &mut ExternalAccount) -> OutboundResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.accounts.contains_key(&account.id) {
            return Err(OutboundError::NotFound("external account"));
        }
        account.updated_at = self.clock.now();
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, id: &Uuid) -> OutboundResult<Option<ExternalAccount>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.get(id).cloned())
    }

    async fn find_account(
        &self,
        user_id: &Uuid,
        account_number: &str,
        routing_number: &str,
    ) -> OutboundResult<Option<ExternalAccount>> {
        let inner = self.inner.read().await;
        let key = (
            *user_id,
            account_number.to_string(),
            routing_number.to_string(),
        );
        Ok(inner
            .account_unique
            .get(&key)
            .and_then(|id| inner.accounts.get(id))
            .cloned())
    }

    async fn list_accounts_for_user(
        &self,
        user_id: &Uuid,
        offset: usize,
        limit: usize,
    ) -> OutboundResult<(Vec<ExternalAccount>, u64)> {
        let inner = self.inner.read().await;
        let mut rows: Vec<ExternalAccount> = inner
            .accounts
            .values()
            .filter(|a| a.user_id == *user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let total = rows.len() as u64;
        let rows = rows.into_iter().skip(offset).take(limit).collect();
        Ok((rows, total))
    }

    // --- Transfers ---

    async fn insert_transfer(&self, transfer: &Transfer) -> OutboundResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .transfer_upstream
            .contains_key(&transfer.upstream_transfer_id)
        {
            return Err(OutboundError::Duplicate("transfer"));
        }
        inner
            .transfer_upstream
            .insert(transfer.upstream_transfer_id, transfer.id);
        inner.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn get_transfer(&self, id: &Uuid) -> OutboundResult<Option<Transfer>> {
        let inner = self.inner.read().await;
        Ok(inner.transfers.get(id).cloned())
    }

    async fn update_transfer(&self, transfer: &mut Transfer) -> OutboundResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.transfers.contains_key(&transfer.id) {
            return Err(OutboundError::NotFound("transfer"));
        }
        transfer.updated_at = self.clock.now();
        inner.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn list_transfers(
        &self,
        user_id: &Uuid,
        filters: &TransferFilters,
        offset: usize,
        limit: usize,
    ) -> OutboundResult<(Vec<Transfer>, u64)> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Transfer> = inner
            .transfers
            .values()
            .filter(|t| t.user_id == Some(*user_id) && filters.matches(t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let total = rows.len() as u64;
        let rows = rows.into_iter().skip(offset).take(limit).collect();
        Ok((rows, total))
    }

    async fn list_open_transfers(&self, limit: usize) -> OutboundResult<Vec<Transfer>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Transfer> = inner
            .transfers
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    TransferStatus::Pending | TransferStatus::Processing
                )
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    // --- Notifications ---

    async fn insert_notification(&self, notification: &Notification) -> OutboundResult<()> {
        let mut inner = self.inner.write().await;
        let key = (notification.transfer_id, notification.terminal_status);
        if inner.notification_unique.contains_key(&key) {
            return Err(OutboundError::Duplicate("notification"));
        }
        inner.notification_unique.insert(key, notification.id);
        inner
            .notifications
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn get_notification(&self, id: &Uuid) -> OutboundResult<Option<Notification>> {
        let inner = self.inner.read().await;
        Ok(inner.notifications.get(id).cloned())
    }

    async fn notification_exists(
        &self,
        transfer_id: &Uuid,
        terminal_status: TransferStatus,
    ) -> OutboundResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .notification_unique
            .contains_key(&(*transfer_id, terminal_status)))
    }

    async fn find_notification(
        &self,
        transfer_id: &Uuid,
        terminal_status: TransferStatus,
    ) -> OutboundResult<Option<Notification>> {
        let inner = self.inner.read().await;
        Ok(inner
            .notification_unique
            .get(&(*transfer_id, terminal_status))
            .and_then(|id| inner.notifications.get(id))
            .cloned())
    }

    async fn list_due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> OutboundResult<Vec<Notification>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Notification> = inner
            .notifications
            .values()
            .filter(|n| n.is_due(now))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn record_attempt(
        &self,
        notification: &mut Notification,
        attempt: &DeliveryAttempt,
    ) -> OutboundResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.notifications.contains_key(&notification.id) {
            return Err(OutboundError::NotFound("notification"));
        }
        notification.updated_at = self.clock.now();
        inner
            .notifications
            .insert(notification.id, notification.clone());
        inner
            .attempts
            .entry(attempt.notification_id)
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    // --- Attempts ---

    async fn list_attempts(&self, notification_id: &Uuid) -> OutboundResult<Vec<DeliveryAttempt>> {
        let inner = self.inner.read().await;
        let mut rows = inner
            .attempts
            .get(notification_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by(|a, b| a.attempted_at.cmp(&b.attempted_at));
        Ok(rows)
    }

    // --- Diagnostics ---

    async fn stats(&self) -> OutboundResult<StorageStats> {
        let inner = self.inner.read().await;
        let open_transfers = inner
            .transfers
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    TransferStatus::Pending | TransferStatus::Processing
                )
            })
            .count() as u64;
        let undelivered = inner
            .notifications
            .values()
            .filter(|n| !n.delivered)
            .count() as u64;
        let attempts = inner.attempts.values().map(|v| v.len() as u64).sum();

        Ok(StorageStats {
            accounts: inner.accounts.len() as u64,
            transfers: inner.transfers.len() as u64,
            open_transfers,
            notifications: inner.notifications.len() as u64,
            undelivered_notifications: undelivered,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn test_transfer(user: Uuid, status: TransferStatus, created_at: DateTime<Utc>) -> Transfer {
        Transfer {
            id: Uuid::new_v4(),
            user_id: Some(user),
            upstream_transfer_id: Uuid::new_v4(),
            direction: Direction::Outbound,
            transfer_type: "ach".to_string(),
            amount: "50.00".parse().unwrap(),
            currency: "USD".to_string(),
            description: None,
            reference_number: "REF".to_string(),
            source_account_number: "111".to_string(),
            source_routing_number: None,
            source_account_holder_name: None,
            destination_account_number: "222".to_string(),
            destination_routing_number: None,
            destination_account_holder_name: None,
            status,
            error_code: None,
            error_message: None,
            scheduled_date: None,
            initiated_date: None,
            processing_date: None,
            expected_completion_date: None,
            completed_date: None,
            fee: None,
            exchange_rate: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_transfer_upstream_id_uniqueness() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let transfer = test_transfer(user, TransferStatus::Pending, now());
        store.insert_transfer(&transfer).await.unwrap();

        let mut dup = test_transfer(user, TransferStatus::Pending, now());
        dup.upstream_transfer_id = transfer.upstream_transfer_id;
        assert!(matches!(
            store.insert_transfer(&dup).await,
            Err(OutboundError::Duplicate("transfer"))
        ));
    }

    #[tokio::test]
    async fn test_open_transfers_oldest_first_with_limit() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();

        let newest = test_transfer(user, TransferStatus::Pending, now());
        let oldest = test_transfer(
            user,
            TransferStatus::Processing,
            now() - chrono::Duration::hours(2),
        );
        let middle = test_transfer(
            user,
            TransferStatus::Pending,
            now() - chrono::Duration::hours(1),
        );
        let done = test_transfer(
            user,
            TransferStatus::Completed,
            now() - chrono::Duration::hours(3),
        );

        for t in [&newest, &oldest, &middle, &done] {
            store.insert_transfer(t).await.unwrap();
        }

        let open = store.list_open_transfers(2).await.unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id, oldest.id);
        assert_eq!(open[1].id, middle.id);
    }

    #[tokio::test]
    async fn test_notification_uniqueness_per_transfer_and_status() {
        let store = MemoryStore::new();
        let transfer_id = Uuid::new_v4();

        let n1 = Notification::new(transfer_id, TransferStatus::Completed, vec![1], now());
        store.insert_notification(&n1).await.unwrap();

        let n2 = Notification::new(transfer_id, TransferStatus::Completed, vec![2], now());
        assert!(matches!(
            store.insert_notification(&n2).await,
            Err(OutboundError::Duplicate("notification"))
        ));

        // Different terminal status is a distinct row.
        let n3 = Notification::new(transfer_id, TransferStatus::Failed, vec![3], now());
        store.insert_notification(&n3).await.unwrap();

        assert!(store
            .notification_exists(&transfer_id, TransferStatus::Completed)
            .await
            .unwrap());
        assert!(store
            .notification_exists(&transfer_id, TransferStatus::Failed)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_due_notification_queue_filtering() {
        let store = MemoryStore::new();
        let t = now();

        let mut due_now = Notification::new(Uuid::new_v4(), TransferStatus::Completed, vec![], t);
        due_now.created_at = t - chrono::Duration::minutes(5);

        let mut not_yet = Notification::new(Uuid::new_v4(), TransferStatus::Completed, vec![], t);
        not_yet.next_attempt_at = Some(t + chrono::Duration::seconds(30));

        let mut delivered = Notification::new(Uuid::new_v4(), TransferStatus::Failed, vec![], t);
        delivered.delivered = true;
        delivered.next_attempt_at = None;

        let mut unscheduled = Notification::new(Uuid::new_v4(), TransferStatus::Failed, vec![], t);
        unscheduled.next_attempt_at = None;

        for n in [&due_now, &not_yet, &delivered, &unscheduled] {
            store.insert_notification(n).await.unwrap();
        }

        let due = store.list_due_notifications(t, 20).await.unwrap();
        let ids: Vec<Uuid> = due.iter().map(|n| n.id).collect();
        assert!(ids.contains(&due_now.id));
        // NULL next_attempt_at on an undelivered row counts as due.
        assert!(ids.contains(&unscheduled.id));
        assert!(!ids.contains(&not_yet.id));
        assert!(!ids.contains(&delivered.id));
        // Oldest created first.
        assert_eq!(due[0].id, due_now.id);
    }

    #[tokio::test]
    async fn test_record_attempt_updates_both_tables() {
        let store = MemoryStore::new();
        let mut n = Notification::new(Uuid::new_v4(), TransferStatus::Completed, vec![], now());
        store.insert_notification(&n).await.unwrap();

        n.attempt_count = 1;
        n.last_http_status = Some(500);
        let attempt = DeliveryAttempt::responded(n.id, now(), 500, Some("HTTP 500".into()), None);
        store.record_attempt(&mut n, &attempt).await.unwrap();

        let stored = store.get_notification(&n.id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(stored.last_http_status, Some(500));

        let attempts = store.list_attempts(&n.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].http_status, Some(500));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.undelivered_notifications, 1);
    }

    #[tokio::test]
    async fn test_account_uniqueness_and_find() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let account = ExternalAccount {
            id: Uuid::new_v4(),
            user_id: user,
            account_holder_name: "Holder".to_string(),
            account_number: "12345".to_string(),
            routing_number: "110000000".to_string(),
            institution_name: None,
            validated: true,
            validation_time: Some(now()),
            created_at: now(),
            updated_at: now(),
        };
        store.insert_account(&account).await.unwrap();

        let mut dup = account.clone();
        dup.id = Uuid::new_v4();
        assert!(matches!(
            store.insert_account(&dup).await,
            Err(OutboundError::Duplicate("external account"))
        ));

        let found = store
            .find_account(&user, "12345", "110000000")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, account.id);

        // Same numbers under a different user are a distinct registration.
        let other_user = Uuid::new_v4();
        assert!(store
            .find_account(&other_user, "12345", "110000000")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_transfers_scopes_and_filters() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        let mine = test_transfer(user, TransferStatus::Pending, now());
        let mine_done = test_transfer(user, TransferStatus::Completed, now());
        let theirs = test_transfer(other, TransferStatus::Pending, now());
        for t in [&mine, &mine_done, &theirs] {
            store.insert_transfer(t).await.unwrap();
        }

        let (all_mine, total) = store
            .list_transfers(&user, &TransferFilters::default(), 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(all_mine.iter().all(|t| t.user_id == Some(user)));

        let filters = TransferFilters {
            status: Some(TransferStatus::Completed),
            ..Default::default()
        };
        let (completed, total) = store.list_transfers(&user, &filters, 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(completed[0].id, mine_done.id);
    }
}
