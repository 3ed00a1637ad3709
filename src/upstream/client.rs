//! Upstream Bank Client
//!
//! HTTP client for the NorthWind bank API. Requests carry bearer
//! authorization, JSON accept/content types, and the caller's trace id.
//! Transient failures (transport errors and 5xx) are retried with
//! exponential backoff when retries are enabled; 4xx responses are
//! returned immediately as API errors.

use std::time::Duration;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::context::RunContext;
use crate::error::{OutboundError, OutboundResult};

use super::models::{
    AccountBalance, AccountValidationRequest, AccountValidationResponse, ApiErrorBody, BankInfo,
    BatchTransferRequest, BatchTransferResponse, CancelRequest, Domain, HealthResponse,
    ReverseRequest, TransferListFilters, TransferRequest, TransferResponse,
    TransferValidationResponse, UpstreamAccount,
};

/// Upper bound on a single retry delay
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Bytes of an error response body kept on the error value
const ERROR_BODY_PREFIX_LIMIT: usize = 1024;

/// NorthWind bank API client
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Create a new upstream client
    pub fn new(config: UpstreamConfig) -> OutboundResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| OutboundError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Configured base URL
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Execute one request with the configured retry policy.
    ///
    /// Retries transport errors and 5xx responses up to `max_retries`
    /// additional attempts; 4xx responses return immediately. Cancellation
    /// is honored between attempts, never mid-request.
    async fn execute<T: DeserializeOwned>(
        &self,
        ctx: &RunContext,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> OutboundResult<T> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut last_err = OutboundError::Network("no attempt executed".to_string());

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                if ctx.is_cancelled() {
                    return Err(OutboundError::Network("request cancelled".to_string()));
                }
                let delay = self.retry_backoff(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if ctx.is_cancelled() {
                    return Err(OutboundError::Network("request cancelled".to_string()));
                }
            }

            debug!(method = %method, path, attempt, "upstream request");

            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.config.api_key)
                .header("Accept", "application/json");
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }
            if let Some(trace_id) = ctx.trace_id() {
                request = request.header("X-Trace-ID", trace_id);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    last_err = OutboundError::Network(e.to_string());
                    continue;
                }
            };

            let status = response.status();
            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    last_err = OutboundError::Network(e.to_string());
                    continue;
                }
            };

            if status.as_u16() >= 400 {
                let mut raw = String::from_utf8_lossy(&bytes).into_owned();
                if raw.len() > ERROR_BODY_PREFIX_LIMIT {
                    let mut end = ERROR_BODY_PREFIX_LIMIT;
                    while !raw.is_char_boundary(end) {
                        end -= 1;
                    }
                    raw.truncate(end);
                }
                let api_err = OutboundError::Api {
                    status: status.as_u16(),
                    parsed: serde_json::from_slice::<ApiErrorBody>(&bytes).ok(),
                    body: raw,
                };
                // 4xx is never retried.
                if status.as_u16() < 500 {
                    return Err(api_err);
                }
                last_err = api_err;
                continue;
            }

            return serde_json::from_slice(&bytes)
                .map_err(|e| OutboundError::Serialization(e.to_string()));
        }

        Err(last_err)
    }

    fn retry_backoff(&self, attempt: u32) -> Duration {
        if self.config.retry_initial_ms == 0 {
            return Duration::ZERO;
        }
        let ms = self
            .config
            .retry_initial_ms
            .saturating_mul(1u64 << (attempt - 1).min(20));
        Duration::from_millis(ms).min(MAX_RETRY_BACKOFF)
    }

    // --- API methods ---

    /// Retrieve upstream bank information
    pub async fn bank_info(&self, ctx: &RunContext) -> OutboundResult<BankInfo> {
        self.execute(ctx, Method::GET, "/bank", &[], None).await
    }

    /// Retrieve upstream domains
    pub async fn domains(&self, ctx: &RunContext) -> OutboundResult<Vec<Domain>> {
        self.execute(ctx, Method::GET, "/domains", &[], None).await
    }

    /// Check upstream API health
    pub async fn health(&self, ctx: &RunContext) -> OutboundResult<HealthResponse> {
        self.execute(ctx, Method::GET, "/health", &[], None).await
    }

    /// List external accounts known to the upstream bank
    pub async fn list_accounts(
        &self,
        ctx: &RunContext,
        limit: u32,
        offset: u32,
        account_type: Option<&str>,
        status: Option<&str>,
    ) -> OutboundResult<Vec<UpstreamAccount>> {
        let mut query = Vec::new();
        if limit > 0 {
            query.push(("limit", limit.to_string()));
        }
        if offset > 0 {
            query.push(("offset", offset.to_string()));
        }
        if let Some(account_type) = account_type {
            query.push(("type", account_type.to_string()));
        }
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        self.execute(ctx, Method::GET, "/external/accounts", &query, None)
            .await
    }

    /// Validate an external account
    pub async fn validate_account(
        &self,
        ctx: &RunContext,
        req: &AccountValidationRequest,
    ) -> OutboundResult<AccountValidationResponse> {
        self.execute(
            ctx,
            Method::POST,
            "/external/accounts/validate",
            &[],
            Some(serde_json::to_value(req)?),
        )
        .await
    }

    /// Retrieve the balance of an external account
    pub async fn account_balance(
        &self,
        ctx: &RunContext,
        account_number: &str,
    ) -> OutboundResult<AccountBalance> {
        let path = format!(
            "/external/accounts/{}/balance",
            urlencoding::encode(account_number)
        );
        self.execute(ctx, Method::GET, &path, &[], None).await
    }

    /// List external transfers
    pub async fn list_transfers(
        &self,
        ctx: &RunContext,
        filters: &TransferListFilters,
    ) -> OutboundResult<Vec<TransferResponse>> {
        let mut query = Vec::new();
        if let Some(status) = &filters.status {
            query.push(("status", status.clone()));
        }
        if let Some(direction) = &filters.direction {
            query.push(("direction", direction.clone()));
        }
        if let Some(transfer_type) = &filters.transfer_type {
            query.push(("transfer_type", transfer_type.clone()));
        }
        if let Some(limit) = filters.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(offset) = filters.offset {
            query.push(("offset", offset.to_string()));
        }
        self.execute(ctx, Method::GET, "/external/transfers", &query, None)
            .await
    }

    /// Validate a transfer request
    pub async fn validate_transfer(
        &self,
        ctx: &RunContext,
        req: &TransferRequest,
    ) -> OutboundResult<TransferValidationResponse> {
        self.execute(
            ctx,
            Method::POST,
            "/external/transfers/validate",
            &[],
            Some(serde_json::to_value(req)?),
        )
        .await
    }

    /// Initiate a transfer
    pub async fn initiate_transfer(
        &self,
        ctx: &RunContext,
        req: &TransferRequest,
    ) -> OutboundResult<TransferResponse> {
        self.execute(
            ctx,
            Method::POST,
            "/external/transfers/initiate",
            &[],
            Some(serde_json::to_value(req)?),
        )
        .await
    }

    /// Submit a batch of transfers
    pub async fn batch_transfers(
        &self,
        ctx: &RunContext,
        req: &BatchTransferRequest,
    ) -> OutboundResult<BatchTransferResponse> {
        self.execute(
            ctx,
            Method::POST,
            "/external/transfers/batch",
            &[],
            Some(serde_json::to_value(req)?),
        )
        .await
    }

    /// Retrieve the current status of a transfer
    pub async fn transfer_status(
        &self,
        ctx: &RunContext,
        transfer_id: &str,
    ) -> OutboundResult<TransferResponse> {
        let path = format!(
            "/external/transfers/{}",
            urlencoding::encode(transfer_id)
        );
        self.execute(ctx, Method::GET, &path, &[], None).await
    }

    /// Cancel a pending transfer
    pub async fn cancel_transfer(
        &self,
        ctx: &RunContext,
        transfer_id: &str,
        reason: &str,
    ) -> OutboundResult<TransferResponse> {
        let path = format!(
            "/external/transfers/{}/cancel",
            urlencoding::encode(transfer_id)
        );
        let body = CancelRequest {
            reason: reason.to_string(),
        };
        self.execute(ctx, Method::POST, &path, &[], Some(serde_json::to_value(body)?))
            .await
    }

    /// Reverse a completed transfer
    pub async fn reverse_transfer(
        &self,
        ctx: &RunContext,
        transfer_id: &str,
        reason: &str,
        description: Option<&str>,
    ) -> OutboundResult<TransferResponse> {
        let path = format!(
            "/external/transfers/{}/reverse",
            urlencoding::encode(transfer_id)
        );
        let body = ReverseRequest {
            reason: reason.to_string(),
            description: description.map(str::to_string),
        };
        self.execute(ctx, Method::POST, &path, &[], Some(serde_json::to_value(body)?))
            .await
    }

    /// Reset upstream state (development only)
    pub async fn reset(&self, ctx: &RunContext) -> OutboundResult<serde_json::Value> {
        self.execute(ctx, Method::POST, "/external/reset", &[], None)
            .await
    }
}
