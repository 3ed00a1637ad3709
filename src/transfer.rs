//! Transfer Service
//!
//! Foreground transfer operations: validated initiation through the
//! upstream bank with a durable local mirror, plus read, cancel, and
//! reverse. Validation and balance checks are best-effort: a dead
//! validation endpoint must not block initiations, but an explicit
//! rejection does.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::context::RunContext;
use crate::error::{OutboundError, OutboundResult};
use crate::storage::Store;
use crate::types::{Direction, Transfer, TransferFilters, TransferStatus};
use crate::upstream::{
    parse_rfc3339_optional, AccountDetails, TransferRequest, TransferResponse, UpstreamClient,
};

/// Account details supplied with a new transfer
#[derive(Debug, Clone)]
pub struct NewTransferAccount {
    pub account_holder_name: String,
    pub account_number: String,
    pub routing_number: Option<String>,
    pub institution_name: Option<String>,
}

/// Request to create an external transfer
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub direction: Direction,
    pub transfer_type: String,
    pub reference_number: String,
    /// RFC 3339 date, forwarded to the upstream bank as-is
    pub scheduled_date: Option<String>,
    pub source_account: NewTransferAccount,
    pub destination_account: NewTransferAccount,
}

/// Result of creating a transfer: the stored local row plus the raw
/// upstream response
#[derive(Debug, Clone)]
pub struct CreatedTransfer {
    pub transfer: Transfer,
    pub upstream: TransferResponse,
}

/// Foreground transfer operations
pub struct TransferService<S: Store> {
    client: Arc<UpstreamClient>,
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> TransferService<S> {
    /// Create a new transfer service
    pub fn new(client: Arc<UpstreamClient>, storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            storage,
            clock,
        }
    }

    /// Validate, balance-check, and initiate a transfer, then store the
    /// local mirror row.
    pub async fn create_transfer(
        &self,
        ctx: &RunContext,
        user_id: Uuid,
        req: NewTransfer,
    ) -> OutboundResult<CreatedTransfer> {
        let wire = TransferRequest {
            amount: req.amount,
            currency: req.currency.clone(),
            description: req.description.clone(),
            direction: req.direction.as_str().to_string(),
            transfer_type: req.transfer_type.clone(),
            reference_number: req.reference_number.clone(),
            scheduled_date: req.scheduled_date.clone(),
            source_account: to_wire_account(&req.source_account),
            destination_account: to_wire_account(&req.destination_account),
        };

        // Step 1: upstream validation. A dead endpoint is tolerated; an
        // explicit error-severity issue is not.
        match self.client.validate_transfer(ctx, &wire).await {
            Ok(validation) if !validation.valid => {
                if let Some(issue) = validation.blocking_issue() {
                    return Err(OutboundError::ValidationRejected(issue.message.clone()));
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "upstream transfer validation call failed, proceeding");
            }
        }

        // Step 2: balance check on the source account, same best-effort rule.
        match self
            .client
            .account_balance(ctx, &req.source_account.account_number)
            .await
        {
            Ok(balance) if balance.available_balance < req.amount => {
                return Err(OutboundError::InsufficientBalance {
                    available: balance.available_balance.to_string(),
                    requested: req.amount.to_string(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "balance check failed, proceeding with initiation");
            }
        }

        // Step 3: initiate.
        let upstream = match self.client.initiate_transfer(ctx, &wire).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(error = %e, "upstream transfer initiation failed");
                return Err(OutboundError::InitiationFailed(e.to_string()));
            }
        };

        // Step 4: store the local mirror. A malformed upstream id gets a
        // fresh local id; the raw response still reaches the caller.
        let upstream_transfer_id = match Uuid::parse_str(&upstream.transfer_id) {
            Ok(id) => id,
            Err(_) => {
                warn!(
                    upstream_transfer_id = %upstream.transfer_id,
                    "upstream returned a malformed transfer id, minting a local one"
                );
                Uuid::new_v4()
            }
        };

        let now = self.clock.now();
        let transfer = Transfer {
            id: Uuid::new_v4(),
            user_id: Some(user_id),
            upstream_transfer_id,
            direction: req.direction,
            transfer_type: req.transfer_type,
            amount: req.amount,
            currency: req.currency,
            description: req.description,
            reference_number: req.reference_number,
            source_account_number: req.source_account.account_number,
            source_routing_number: req.source_account.routing_number,
            source_account_holder_name: non_empty(req.source_account.account_holder_name),
            destination_account_number: req.destination_account.account_number,
            destination_routing_number: req.destination_account.routing_number,
            destination_account_holder_name: non_empty(req.destination_account.account_holder_name),
            status: TransferStatus::from_upstream(&upstream.status),
            error_code: upstream.error_code.clone().filter(|c| !c.is_empty()),
            error_message: upstream.error_message.clone().filter(|m| !m.is_empty()),
            scheduled_date: parse_rfc3339_optional(upstream.scheduled_date.as_deref())
                .or_else(|| parse_rfc3339_optional(req.scheduled_date.as_deref())),
            initiated_date: parse_rfc3339_optional(upstream.initiated_date.as_deref()),
            processing_date: parse_rfc3339_optional(upstream.processing_date.as_deref()),
            expected_completion_date: parse_rfc3339_optional(
                upstream.expected_completion_date.as_deref(),
            ),
            completed_date: parse_rfc3339_optional(upstream.completed_date.as_deref()),
            fee: upstream.fee,
            exchange_rate: upstream.exchange_rate,
            created_at: now,
            updated_at: now,
        };

        self.storage.insert_transfer(&transfer).await?;

        info!(
            transfer_id = %transfer.id,
            upstream_id = %transfer.upstream_transfer_id,
            status = %transfer.status,
            "transfer initiated and stored"
        );

        Ok(CreatedTransfer { transfer, upstream })
    }

    /// Get a transfer by id, scoped to its owner.
    ///
    /// A transfer owned by someone else is indistinguishable from a missing
    /// one.
    pub async fn get_transfer(&self, user_id: Uuid, transfer_id: Uuid) -> OutboundResult<Transfer> {
        let transfer = self
            .storage
            .get_transfer(&transfer_id)
            .await?
            .ok_or(OutboundError::NotFound("transfer"))?;
        match transfer.user_id {
            Some(owner) if owner == user_id => Ok(transfer),
            _ => Err(OutboundError::NotFound("transfer")),
        }
    }

    /// List the user's transfers with optional filters; returns
    /// (rows, total)
    pub async fn list_transfers(
        &self,
        user_id: Uuid,
        filters: &TransferFilters,
        offset: usize,
        limit: usize,
    ) -> OutboundResult<(Vec<Transfer>, u64)> {
        self.storage
            .list_transfers(&user_id, filters, offset, limit)
            .await
    }

    /// Cancel a transfer via the upstream bank and update the local row
    pub async fn cancel_transfer(
        &self,
        ctx: &RunContext,
        user_id: Uuid,
        transfer_id: Uuid,
        reason: &str,
    ) -> OutboundResult<Transfer> {
        let mut transfer = self.get_transfer(user_id, transfer_id).await?;
        let resp = self
            .client
            .cancel_transfer(ctx, &transfer.upstream_transfer_id.to_string(), reason)
            .await?;
        self.apply_upstream_outcome(&mut transfer, resp).await?;
        Ok(transfer)
    }

    /// Reverse a transfer via the upstream bank and update the local row
    pub async fn reverse_transfer(
        &self,
        ctx: &RunContext,
        user_id: Uuid,
        transfer_id: Uuid,
        reason: &str,
        description: Option<&str>,
    ) -> OutboundResult<Transfer> {
        let mut transfer = self.get_transfer(user_id, transfer_id).await?;
        let resp = self
            .client
            .reverse_transfer(
                ctx,
                &transfer.upstream_transfer_id.to_string(),
                reason,
                description,
            )
            .await?;
        self.apply_upstream_outcome(&mut transfer, resp).await?;
        Ok(transfer)
    }

    async fn apply_upstream_outcome(
        &self,
        transfer: &mut Transfer,
        resp: TransferResponse,
    ) -> OutboundResult<()> {
        transfer.status = TransferStatus::from_upstream(&resp.status);
        if let Some(code) = resp.error_code.filter(|c| !c.is_empty()) {
            transfer.error_code = Some(code);
        }
        if let Some(message) = resp.error_message.filter(|m| !m.is_empty()) {
            transfer.error_message = Some(message);
        }
        self.storage.update_transfer(transfer).await
    }
}

fn to_wire_account(account: &NewTransferAccount) -> AccountDetails {
    AccountDetails {
        account_holder_name: account.account_holder_name.clone(),
        account_number: account.account_number.clone(),
        routing_number: account.routing_number.clone(),
        institution_name: account.institution_name.clone(),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
