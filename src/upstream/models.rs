//! Upstream Wire Models
//!
//! Request and response shapes for the NorthWind bank API. Response structs
//! default every field so partial upstream payloads still decode.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// --- Requests ---

/// Request to validate an external account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountValidationRequest {
    pub account_number: String,
    pub routing_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
}

/// Bank account details inside a transfer request or response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountDetails {
    pub account_holder_name: String,
    pub account_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution_name: Option<String>,
}

/// Request to validate or initiate a transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub amount: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub direction: String,
    pub transfer_type: String,
    pub reference_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<String>,
    pub source_account: AccountDetails,
    pub destination_account: AccountDetails,
}

/// Batch of transfer requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTransferRequest {
    pub transfers: Vec<TransferRequest>,
}

/// Transfer cancel request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

/// Transfer reversal request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseRequest {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Filters for listing upstream transfers
#[derive(Debug, Clone, Default)]
pub struct TransferListFilters {
    pub status: Option<String>,
    pub direction: Option<String>,
    pub transfer_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

// --- Responses ---

/// Upstream bank information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BankInfo {
    pub name: String,
    pub routing_number: String,
    pub swift_code: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

/// Upstream domain descriptor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Domain {
    pub name: String,
    pub description: Option<String>,
}

/// External account as reported by the upstream bank
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamAccount {
    pub account_number: String,
    pub routing_number: String,
    pub account_holder_name: String,
    pub account_type: Option<String>,
    pub institution_name: Option<String>,
    pub status: Option<String>,
}

/// Response from account validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountValidationResponse {
    pub valid: bool,
    pub account_number: Option<String>,
    pub routing_number: Option<String>,
    pub account_holder_name: Option<String>,
    pub institution_name: Option<String>,
    pub account_type: Option<String>,
    pub message: Option<String>,
}

/// Account balance as reported by the upstream bank
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountBalance {
    pub account_number: String,
    pub available_balance: Decimal,
    pub current_balance: Decimal,
    pub currency: String,
}

/// Transfer record as reported by the upstream bank
///
/// Status polls may return only a subset of these fields; everything
/// defaults so `{"status":"COMPLETED"}` alone still decodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferResponse {
    pub transfer_id: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub direction: String,
    pub transfer_type: String,
    pub reference_number: String,
    pub description: Option<String>,
    pub scheduled_date: Option<String>,
    pub source_account: AccountDetails,
    pub destination_account: AccountDetails,
    pub initiated_date: Option<String>,
    pub processing_date: Option<String>,
    pub expected_completion_date: Option<String>,
    pub completed_date: Option<String>,
    pub fee: Option<Decimal>,
    pub exchange_rate: Option<Decimal>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Single transfer validation issue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationIssue {
    pub field: Option<String>,
    pub message: String,
    /// "error" or "warning"
    pub severity: String,
}

impl ValidationIssue {
    pub fn is_blocking(&self) -> bool {
        self.severity == "error"
    }
}

/// Transfer validation result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferValidationResponse {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl TransferValidationResponse {
    /// First issue with error severity, if any
    pub fn blocking_issue(&self) -> Option<&ValidationIssue> {
        self.issues.iter().find(|i| i.is_blocking())
    }
}

/// Batch transfer result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchTransferResponse {
    pub transfers: Vec<TransferResponse>,
    pub total_count: u32,
    pub success_count: u32,
    pub failed_count: u32,
}

/// Upstream health check response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Structured error body returned by the upstream API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
    pub code: Option<String>,
    pub details: Option<String>,
}

impl ApiErrorBody {
    /// Human-readable detail, preferring `message` over `error`
    pub fn message(&self) -> Option<&str> {
        self.message
            .as_deref()
            .filter(|m| !m.is_empty())
            .or(self.error.as_deref())
    }
}
