//! Regulator Webhook Sender
//!
//! Sends a single HTTP POST with a JSON body and reports what happened
//! without judging it: status code, a bounded response-body prefix, and
//! the transport error if no response arrived. Retry policy lives in the
//! notification pipeline, not here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use uuid::Uuid;

use crate::context::RunContext;
use crate::error::{OutboundError, OutboundResult};

/// Per-request timeout for regulator deliveries
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes of the response body retained for the audit trail
pub const RESPONSE_BODY_PREFIX_LIMIT: usize = 1024;

/// Result of one webhook POST
#[derive(Debug, Clone, Default)]
pub struct WebhookOutcome {
    /// HTTP status, when a response arrived
    pub http_status: Option<u16>,
    /// First bytes of the response body, when one arrived
    pub body_prefix: Option<String>,
    /// Transport-level failure description, when no response arrived
    pub error: Option<String>,
}

impl WebhookOutcome {
    /// True for a 2xx response
    pub fn is_success(&self) -> bool {
        matches!(self.http_status, Some(s) if (200..300).contains(&s))
    }
}

/// One-shot webhook delivery
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// POST `payload` to `url` with the event id header
    async fn send(
        &self,
        ctx: &RunContext,
        url: &str,
        event_id: &Uuid,
        payload: &[u8],
    ) -> WebhookOutcome;
}

/// Production sender backed by reqwest
pub struct HttpWebhookSender {
    client: Client,
}

impl HttpWebhookSender {
    pub fn new() -> OutboundResult<Self> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| OutboundError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(
        &self,
        ctx: &RunContext,
        url: &str,
        event_id: &Uuid,
        payload: &[u8],
    ) -> WebhookOutcome {
        if ctx.is_cancelled() {
            return WebhookOutcome {
                error: Some("delivery cancelled".to_string()),
                ..Default::default()
            };
        }

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Event-ID", event_id.to_string())
            .body(payload.to_vec())
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return WebhookOutcome {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        };

        let status = response.status().as_u16();
        let body_prefix = match response.bytes().await {
            Ok(bytes) => {
                let mut text = String::from_utf8_lossy(&bytes).into_owned();
                if text.len() > RESPONSE_BODY_PREFIX_LIMIT {
                    let mut end = RESPONSE_BODY_PREFIX_LIMIT;
                    while !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    text.truncate(end);
                }
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
            // A response whose body cannot be read still counts by status.
            Err(_) => None,
        };

        WebhookOutcome {
            http_status: Some(status),
            body_prefix,
            error: None,
        }
    }
}
