//! Upstream Bank Integration
//!
//! Typed client for the NorthWind bank API: account validation, balance
//! lookups, transfer initiation and lifecycle operations, and health
//! checks. Owns the retry policy for transient failures and propagates the
//! caller's trace identifier.

pub mod client;
pub mod models;

pub use client::UpstreamClient;
pub use models::{
    AccountBalance, AccountDetails, AccountValidationRequest, AccountValidationResponse,
    ApiErrorBody, BankInfo, BatchTransferRequest, BatchTransferResponse, Domain, HealthResponse,
    TransferListFilters, TransferRequest, TransferResponse, TransferValidationResponse,
    UpstreamAccount, ValidationIssue,
};

use chrono::{DateTime, Utc};

/// Parse an optional RFC 3339 date string; empty or malformed input maps to
/// `None`.
pub fn parse_rfc3339_optional(value: Option<&str>) -> Option<DateTime<Utc>> {
    let s = value?;
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
