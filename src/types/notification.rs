//! Regulator Notification Records
//!
//! Scheduling record for one terminal-transfer notification and the
//! append-only audit trail of its delivery attempts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transfer::{Direction, Transfer, TransferStatus};

/// Regulator notification scheduling record
///
/// Unique per `(transfer_id, terminal_status)`. The payload bytes are fixed
/// at creation; retries always resend the same body. `next_attempt_at` null
/// means the notification is not scheduled (delivered, or awaiting a
/// reschedule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub transfer_id: Uuid,
    pub terminal_status: TransferStatus,
    pub delivered: bool,
    pub attempt_count: u32,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_http_status: Option<u16>,
    pub last_error: Option<String>,
    /// Webhook body, serialized once at creation
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Create a new undelivered notification scheduled for an immediate
    /// first attempt.
    pub fn new(
        transfer_id: Uuid,
        terminal_status: TransferStatus,
        payload: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transfer_id,
            terminal_status,
            delivered: false,
            attempt_count: 0,
            first_attempt_at: None,
            last_attempt_at: None,
            next_attempt_at: Some(now),
            last_http_status: None,
            last_error: None,
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the notification is undelivered and due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.delivered && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Immutable audit record of one webhook delivery attempt
///
/// At least one of `http_status` and `error_message` is always set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub attempted_at: DateTime<Utc>,
    pub http_status: Option<u16>,
    pub error_message: Option<String>,
    /// First 1024 bytes of the response body, when one was received
    pub response_body_prefix: Option<String>,
}

impl DeliveryAttempt {
    /// Record an attempt that received an HTTP response
    pub fn responded(
        notification_id: Uuid,
        attempted_at: DateTime<Utc>,
        http_status: u16,
        error_message: Option<String>,
        response_body_prefix: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_id,
            attempted_at,
            http_status: Some(http_status),
            error_message,
            response_body_prefix,
        }
    }

    /// Record an attempt that failed before any response arrived
    pub fn failed(notification_id: Uuid, attempted_at: DateTime<Utc>, error: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_id,
            attempted_at,
            http_status: None,
            error_message: Some(error),
            response_body_prefix: None,
        }
    }
}

/// Webhook body sent to the regulator
///
/// Field set and shape are part of the external contract; the regulator
/// deduplicates on `event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatorPayload {
    pub event_id: Uuid,
    pub transfer_id: Uuid,
    pub northwind_transfer_id: Uuid,
    pub status: TransferStatus,
    pub amount: Decimal,
    pub currency: String,
    pub direction: Direction,
    pub transfer_type: String,
    /// RFC 3339 UTC notification creation time
    pub timestamp: String,
}

impl RegulatorPayload {
    /// Build the payload for a transfer that reached `terminal_status` at
    /// `now`, minting a fresh event id.
    pub fn for_transfer(transfer: &Transfer, terminal_status: TransferStatus, now: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            transfer_id: transfer.id,
            northwind_transfer_id: transfer.upstream_transfer_id,
            status: terminal_status,
            amount: transfer.amount,
            currency: transfer.currency.clone(),
            direction: transfer.direction,
            transfer_type: transfer.transfer_type.clone(),
            timestamp: now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }
}
