//! Sled Persistent Storage
//!
//! Durable store backed by the sled embedded database. One tree per table,
//! plus index trees enforcing the uniqueness constraints via
//! compare-and-swap. The notification + attempt write runs inside one sled
//! transaction across both trees.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::Transactional;
use uuid::Uuid;

use super::{StorageStats, Store};
use crate::clock::{Clock, SystemClock};
use crate::error::{OutboundError, OutboundResult};
use crate::types::{
    DeliveryAttempt, ExternalAccount, Notification, Transfer, TransferFilters, TransferStatus,
};

const ACCOUNTS_TREE: &str = "accounts";
const ACCOUNT_UNIQUE_TREE: &str = "account_unique";
const TRANSFERS_TREE: &str = "transfers";
const TRANSFER_UPSTREAM_TREE: &str = "transfer_upstream";
const NOTIFICATIONS_TREE: &str = "notifications";
const NOTIFICATION_UNIQUE_TREE: &str = "notification_unique";
const ATTEMPTS_TREE: &str = "attempts";

/// Sled-backed durable store
pub struct SledStore {
    _db: sled::Db,
    accounts: sled::Tree,
    account_unique: sled::Tree,
    transfers: sled::Tree,
    transfer_upstream: sled::Tree,
    notifications: sled::Tree,
    notification_unique: sled::Tree,
    attempts: sled::Tree,
    clock: Arc<dyn Clock>,
}

impl SledStore {
    /// Open or create a store at the given path with the system clock
    pub fn open<P: AsRef<Path>>(path: P) -> OutboundResult<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open or create a store at the given path with the given clock
    pub fn open_with_clock<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> OutboundResult<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        Ok(Self {
            accounts: db.open_tree(ACCOUNTS_TREE).map_err(storage_err)?,
            account_unique: db.open_tree(ACCOUNT_UNIQUE_TREE).map_err(storage_err)?,
            transfers: db.open_tree(TRANSFERS_TREE).map_err(storage_err)?,
            transfer_upstream: db.open_tree(TRANSFER_UPSTREAM_TREE).map_err(storage_err)?,
            notifications: db.open_tree(NOTIFICATIONS_TREE).map_err(storage_err)?,
            notification_unique: db
                .open_tree(NOTIFICATION_UNIQUE_TREE)
                .map_err(storage_err)?,
            attempts: db.open_tree(ATTEMPTS_TREE).map_err(storage_err)?,
            _db: db,
            clock,
        })
    }

    fn scan<T: DeserializeOwned>(tree: &sled::Tree) -> OutboundResult<Vec<T>> {
        let mut rows = Vec::new();
        for entry in tree.iter() {
            let (_, value) = entry.map_err(storage_err)?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }

    /// Reserve a uniqueness-index slot; `Duplicate` if already claimed
    fn claim_unique(
        tree: &sled::Tree,
        key: &[u8],
        id: &Uuid,
        what: &'static str,
    ) -> OutboundResult<()> {
        let claimed = tree
            .compare_and_swap(key, None::<&[u8]>, Some(id.as_bytes().as_slice()))
            .map_err(storage_err)?;
        match claimed {
            Ok(()) => Ok(()),
            Err(_) => Err(OutboundError::Duplicate(what)),
        }
    }
}

fn storage_err(e: impl std::fmt::Display) -> OutboundError {
    OutboundError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> OutboundResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| OutboundError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> OutboundResult<T> {
    serde_json::from_slice(bytes).map_err(|e| OutboundError::Serialization(e.to_string()))
}

fn account_unique_key(user_id: &Uuid, account_number: &str, routing_number: &str) -> Vec<u8> {
    format!("{user_id}/{account_number}/{routing_number}").into_bytes()
}

fn notification_unique_key(transfer_id: &Uuid, status: TransferStatus) -> Vec<u8> {
    format!("{transfer_id}/{status}").into_bytes()
}

fn attempt_key(attempt: &DeliveryAttempt) -> Vec<u8> {
    // notification id prefix keeps one notification's attempts in one range
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(attempt.notification_id.as_bytes());
    key.extend_from_slice(attempt.id.as_bytes());
    key
}

#[async_trait]
impl Store for SledStore {
    // --- External accounts ---

    async fn insert_account(&self, account: &ExternalAccount) -> OutboundResult<()> {
        let key = account_unique_key(
            &account.user_id,
            &account.account_number,
            &account.routing_number,
        );
        Self::claim_unique(&self.account_unique, &key, &account.id, "external account")?;
        self.accounts
            .insert(account.id.as_bytes(), encode(account)?)
            .map_err(storage_err)?;
        Ok(())
    }

    async fn update_account(&self, account: &mut ExternalAccount) -> OutboundResult<()> {
        if !self
            .accounts
            .contains_key(account.id.as_bytes())
            .map_err(storage_err)?
        {
            return Err(OutboundError::NotFound("external account"));
        }
        account.updated_at = self.clock.now();
        self.accounts
            .insert(account.id.as_bytes(), encode(account)?)
            .map_err(storage_err)?;
        Ok(())
    }

    async fn get_account(&self, id: &Uuid) -> OutboundResult<Option<ExternalAccount>> {
        self.accounts
            .get(id.as_bytes())
            .map_err(storage_err)?
            .map(|v| decode(&v))
            .transpose()
    }

    async fn find_account(
        &self,
        user_id: &Uuid,
        account_number: &str,
        routing_number: &str,
    ) -> OutboundResult<Option<ExternalAccount>> {
        let key = account_unique_key(user_id, account_number, routing_number);
        let Some(id_bytes) = self.account_unique.get(key).map_err(storage_err)? else {
            return Ok(None);
        };
        self.accounts
            .get(&id_bytes)
            .map_err(storage_err)?
            .map(|v| decode(&v))
            .transpose()
    }

    async fn list_accounts_for_user(
        &self,
        user_id: &Uuid,
        offset: usize,
        limit: usize,
    ) -> OutboundResult<(Vec<ExternalAccount>, u64)> {
        let mut rows: Vec<ExternalAccount> = Self::scan(&self.accounts)?
            .into_iter()
            .filter(|a: &ExternalAccount| a.user_id == *user_id)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let total = rows.len() as u64;
        Ok((rows.into_iter().skip(offset).take(limit).collect(), total))
    }

    // --- Transfers ---

    async fn insert_transfer(&self, transfer: &Transfer) -> OutboundResult<()> {
        Self::claim_unique(
            &self.transfer_upstream,
            transfer.upstream_transfer_id.as_bytes(),
            &transfer.id,
            "transfer",
        )?;
        self.transfers
            .insert(transfer.id.as_bytes(), encode(transfer)?)
            .map_err(storage_err)?;
        Ok(())
    }

    async fn get_transfer(&self, id: &Uuid) -> OutboundResult<Option<Transfer>> {
        self.transfers
            .get(id.as_bytes())
            .map_err(storage_err)?
            .map(|v| decode(&v))
            .transpose()
    }

    async fn update_transfer(&self, transfer: &mut Transfer) -> OutboundResult<()> {
        if !self
            .transfers
            .contains_key(transfer.id.as_bytes())
            .map_err(storage_err)?
        {
            return Err(OutboundError::NotFound("transfer"));
        }
        transfer.updated_at = self.clock.now();
        self.transfers
            .insert(transfer.id.as_bytes(), encode(transfer)?)
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list_transfers(
        &self,
        user_id: &Uuid,
        filters: &TransferFilters,
        offset: usize,
        limit: usize,
    ) -> OutboundResult<(Vec<Transfer>, u64)> {
        let mut rows: Vec<Transfer> = Self::scan(&self.transfers)?
            .into_iter()
            .filter(|t: &Transfer| t.user_id == Some(*user_id) && filters.matches(t))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let total = rows.len() as u64;
        Ok((rows.into_iter().skip(offset).take(limit).collect(), total))
    }

    async fn list_open_transfers(&self, limit: usize) -> OutboundResult<Vec<Transfer>> {
        let mut rows: Vec<Transfer> = Self::scan(&self.transfers)?
            .into_iter()
            .filter(|t: &Transfer| {
                matches!(
                    t.status,
                    TransferStatus::Pending | TransferStatus::Processing
                )
            })
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    // --- Notifications ---

    async fn insert_notification(&self, notification: &Notification) -> OutboundResult<()> {
        let key = notification_unique_key(&notification.transfer_id, notification.terminal_status);
        Self::claim_unique(
            &self.notification_unique,
            &key,
            &notification.id,
            "notification",
        )?;
        self.notifications
            .insert(notification.id.as_bytes(), encode(notification)?)
            .map_err(storage_err)?;
        Ok(())
    }

    async fn get_notification(&self, id: &Uuid) -> OutboundResult<Option<Notification>> {
        self.notifications
            .get(id.as_bytes())
            .map_err(storage_err)?
            .map(|v| decode(&v))
            .transpose()
    }

    async fn notification_exists(
        &self,
        transfer_id: &Uuid,
        terminal_status: TransferStatus,
    ) -> OutboundResult<bool> {
        let key = notification_unique_key(transfer_id, terminal_status);
        self.notification_unique
            .contains_key(key)
            .map_err(storage_err)
    }

    async fn find_notification(
        &self,
        transfer_id: &Uuid,
        terminal_status: TransferStatus,
    ) -> OutboundResult<Option<Notification>> {
        let key = notification_unique_key(transfer_id, terminal_status);
        let Some(id_bytes) = self.notification_unique.get(key).map_err(storage_err)? else {
            return Ok(None);
        };
        self.notifications
            .get(&id_bytes)
            .map_err(storage_err)?
            .map(|v| decode(&v))
            .transpose()
    }

    async fn list_due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> OutboundResult<Vec<Notification>> {
        let mut rows: Vec<Notification> = Self::scan(&self.notifications)?
            .into_iter()
            .filter(|n: &Notification| n.is_due(now))
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
        if !self
            .notifications
            .contains_key(notification.id.as_bytes())
            .map_err(storage_err)?
        {
            return Err(OutboundError::NotFound("notification"));
        }
        notification.updated_at = self.clock.now();
        let notification_bytes = encode(&*notification)?;
        let attempt_bytes = encode(attempt)?;
        let notification_key = notification.id.as_bytes().to_vec();
        let attempt_row_key = attempt_key(attempt);

        (&self.notifications, &self.attempts)
            .transaction(|(notifications, attempts)| {
                notifications.insert(notification_key.as_slice(), notification_bytes.as_slice())?;
                attempts.insert(attempt_row_key.as_slice(), attempt_bytes.as_slice())?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| storage_err(e))?;
        Ok(())
    }

    // --- Attempts ---

    async fn list_attempts(&self, notification_id: &Uuid) -> OutboundResult<Vec<DeliveryAttempt>> {
        let mut rows = Vec::new();
        for entry in self.attempts.scan_prefix(notification_id.as_bytes()) {
            let (_, value) = entry.map_err(storage_err)?;
            rows.push(decode::<DeliveryAttempt>(&value)?);
        }
        rows.sort_by(|a, b| a.attempted_at.cmp(&b.attempted_at));
        Ok(rows)
    }

    // --- Diagnostics ---

    async fn stats(&self) -> OutboundResult<StorageStats> {
        let transfers: Vec<Transfer> = Self::scan(&self.transfers)?;
        let notifications: Vec<Notification> = Self::scan(&self.notifications)?;

        let open_transfers = transfers
            .iter()
            .filter(|t| {
                matches!(
                    t.status,
                    TransferStatus::Pending | TransferStatus::Processing
                )
            })
            .count() as u64;
        let undelivered = notifications.iter().filter(|n| !n.delivered).count() as u64;

        Ok(StorageStats {
            accounts: self.accounts.len() as u64,
            transfers: transfers.len() as u64,
            open_transfers,
            notifications: notifications.len() as u64,
            undelivered_notifications: undelivered,
            attempts: self.attempts.len() as u64,
        })
    }
}
