//! Transfer Records
//!
//! Local mirror of an upstream transfer and its status state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transfer direction relative to the local bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "INBOUND",
            Direction::Outbound => "OUTBOUND",
        }
    }
}

/// Transfer status
///
/// Statuses only move forward; COMPLETED, FAILED, CANCELLED, and REVERSED
/// are terminal. COMPLETED and FAILED additionally trigger a regulator
/// notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Reversed,
}

impl TransferStatus {
    /// Map an upstream status string to the local domain.
    ///
    /// Matching is case-insensitive; unrecognized strings map to PENDING.
    pub fn from_upstream(s: &str) -> Self {
        if s.eq_ignore_ascii_case("COMPLETED") {
            TransferStatus::Completed
        } else if s.eq_ignore_ascii_case("FAILED") {
            TransferStatus::Failed
        } else if s.eq_ignore_ascii_case("CANCELLED") {
            TransferStatus::Cancelled
        } else if s.eq_ignore_ascii_case("REVERSED") {
            TransferStatus::Reversed
        } else if s.eq_ignore_ascii_case("PROCESSING") {
            TransferStatus::Processing
        } else {
            TransferStatus::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Processing => "PROCESSING",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
            TransferStatus::Cancelled => "CANCELLED",
            TransferStatus::Reversed => "REVERSED",
        }
    }

    /// True for states with no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed
                | TransferStatus::Failed
                | TransferStatus::Cancelled
                | TransferStatus::Reversed
        )
    }

    /// True for terminal states that trigger a regulator notification
    pub fn is_notifiable(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local mirror of an upstream transfer
///
/// Created by the transfer service with status PENDING (or the status the
/// upstream reported at initiation), advanced by the reconciler, never
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    /// Upstream identifier; unique, immutable after create
    pub upstream_transfer_id: Uuid,
    pub direction: Direction,
    pub transfer_type: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub reference_number: String,
    pub source_account_number: String,
    pub source_routing_number: Option<String>,
    pub source_account_holder_name: Option<String>,
    pub destination_account_number: String,
    pub destination_routing_number: Option<String>,
    pub destination_account_holder_name: Option<String>,
    pub status: TransferStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub initiated_date: Option<DateTime<Utc>>,
    pub processing_date: Option<DateTime<Utc>>,
    pub expected_completion_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub fee: Option<Decimal>,
    pub exchange_rate: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// True if this transfer is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Filters for listing a user's transfers
#[derive(Debug, Clone, Default)]
pub struct TransferFilters {
    pub status: Option<TransferStatus>,
    pub direction: Option<Direction>,
    pub transfer_type: Option<String>,
}

impl TransferFilters {
    /// True if the transfer passes every set filter
    pub fn matches(&self, transfer: &Transfer) -> bool {
        if let Some(status) = self.status {
            if transfer.status != status {
                return false;
            }
        }
        if let Some(direction) = self.direction {
            if transfer.direction != direction {
                return false;
            }
        }
        if let Some(transfer_type) = &self.transfer_type {
            if &transfer.transfer_type != transfer_type {
                return false;
            }
        }
        true
    }
}
