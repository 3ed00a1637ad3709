//! External Account Service
//!
//! Registration and validation of counterparty accounts at the upstream
//! bank. Re-registering an already-validated account is a no-op; an
//! existing unvalidated registration is upgraded in place.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::context::RunContext;
use crate::error::{OutboundError, OutboundResult};
use crate::storage::Store;
use crate::types::ExternalAccount;
use crate::upstream::{
    AccountValidationRequest, AccountValidationResponse, UpstreamAccount, UpstreamClient,
};

/// Request to validate and register an external account
#[derive(Debug, Clone)]
pub struct RegisterAccountRequest {
    pub account_holder_name: String,
    pub account_number: String,
    pub routing_number: String,
    pub institution_name: Option<String>,
}

/// Result of a validate-and-register call
#[derive(Debug, Clone)]
pub struct RegisteredAccount {
    pub account: ExternalAccount,
    pub validation: AccountValidationResponse,
}

/// External account registration and lookup
pub struct AccountService<S: Store> {
    client: Arc<UpstreamClient>,
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> AccountService<S> {
    /// Create a new account service
    pub fn new(client: Arc<UpstreamClient>, storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            storage,
            clock,
        }
    }

    /// Validate an account with the upstream bank and register it locally.
    ///
    /// An already-validated registration short-circuits without an upstream
    /// call. An unvalidated one is upgraded after successful validation.
    pub async fn validate_and_register(
        &self,
        ctx: &RunContext,
        user_id: Uuid,
        req: RegisterAccountRequest,
    ) -> OutboundResult<RegisteredAccount> {
        let existing = self
            .storage
            .find_account(&user_id, &req.account_number, &req.routing_number)
            .await?;

        if let Some(account) = &existing {
            if account.validated {
                return Ok(RegisteredAccount {
                    account: account.clone(),
                    validation: AccountValidationResponse {
                        valid: true,
                        account_number: Some(account.account_number.clone()),
                        routing_number: Some(account.routing_number.clone()),
                        message: Some("Account already registered and validated".to_string()),
                        ..Default::default()
                    },
                });
            }
        }

        let validation = self
            .client
            .validate_account(
                ctx,
                &AccountValidationRequest {
                    account_number: req.account_number.clone(),
                    routing_number: req.routing_number.clone(),
                    account_type: None,
                },
            )
            .await?;

        if !validation.valid {
            return Err(OutboundError::ValidationRejected(
                validation
                    .message
                    .clone()
                    .unwrap_or_else(|| "external account validation failed".to_string()),
            ));
        }

        // Upstream's institution name wins over the caller's.
        let institution_name = validation
            .institution_name
            .clone()
            .filter(|n| !n.is_empty())
            .or(req.institution_name);

        let now = self.clock.now();
        let account = if let Some(mut account) = existing {
            account.account_holder_name = req.account_holder_name;
            account.mark_validated(now);
            if institution_name.is_some() {
                account.institution_name = institution_name;
            }
            self.storage.update_account(&mut account).await?;
            account
        } else {
            let account = ExternalAccount {
                id: Uuid::new_v4(),
                user_id,
                account_holder_name: req.account_holder_name,
                account_number: req.account_number,
                routing_number: req.routing_number,
                institution_name,
                validated: true,
                validation_time: Some(now),
                created_at: now,
                updated_at: now,
            };
            self.storage.insert_account(&account).await?;
            account
        };

        info!(
            account_id = %account.id,
            user_id = %user_id,
            "external account registered"
        );

        Ok(RegisteredAccount {
            account,
            validation,
        })
    }

    /// Page through the user's registered accounts; returns (rows, total)
    pub async fn list_registered(
        &self,
        user_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> OutboundResult<(Vec<ExternalAccount>, u64)> {
        self.storage
            .list_accounts_for_user(&user_id, offset, limit)
            .await
    }

    /// Accounts the upstream bank reports as accessible (passthrough)
    pub async fn list_upstream_accounts(
        &self,
        ctx: &RunContext,
    ) -> OutboundResult<Vec<UpstreamAccount>> {
        self.client.list_accounts(ctx, 100, 0, None, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::UpstreamConfig;
    use crate::storage::MemoryStore;

    fn service_against(
        upstream_url: &str,
        storage: Arc<MemoryStore>,
    ) -> AccountService<MemoryStore> {
        let client = Arc::new(
            UpstreamClient::new(UpstreamConfig {
                base_url: upstream_url.to_string(),
                api_key: "k".to_string(),
                max_retries: 0,
                retry_initial_ms: 0,
                timeout_seconds: 2,
            })
            .unwrap(),
        );
        AccountService::new(client, storage, Arc::new(SystemClock))
    }

    fn register_request() -> RegisterAccountRequest {
        RegisterAccountRequest {
            account_holder_name: "Pat Holder".to_string(),
            account_number: "000123456789".to_string(),
            routing_number: "110000000".to_string(),
            institution_name: None,
        }
    }

    #[tokio::test]
    async fn test_register_validates_and_stores() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/external/accounts/validate")
            .with_status(200)
            .with_body(
                r#"{"valid":true,"account_number":"000123456789","routing_number":"110000000","institution_name":"First Example Bank"}"#,
            )
            .create_async()
            .await;

        let storage = Arc::new(MemoryStore::new());
        let service = service_against(&server.url(), storage.clone());
        let user = Uuid::new_v4();

        let registered = service
            .validate_and_register(&RunContext::new(), user, register_request())
            .await
            .unwrap();

        assert!(registered.account.validated);
        assert!(registered.account.validation_time.is_some());
        // Upstream institution name wins.
        assert_eq!(
            registered.account.institution_name.as_deref(),
            Some("First Example Bank")
        );
        assert_eq!(storage.stats().await.unwrap().accounts, 1);
    }

    #[tokio::test]
    async fn test_reregistering_validated_account_skips_upstream() {
        let mut server = mockito::Server::new_async().await;
        let validate = server
            .mock("POST", "/external/accounts/validate")
            .with_status(200)
            .with_body(r#"{"valid":true}"#)
            .expect(1)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStore::new());
        let service = service_against(&server.url(), storage.clone());
        let user = Uuid::new_v4();

        let first = service
            .validate_and_register(&RunContext::new(), user, register_request())
            .await
            .unwrap();
        let second = service
            .validate_and_register(&RunContext::new(), user, register_request())
            .await
            .unwrap();

        assert_eq!(first.account.id, second.account.id);
        assert_eq!(
            second.validation.message.as_deref(),
            Some("Account already registered and validated")
        );
        // Only the first call reached upstream.
        validate.assert_async().await;
        assert_eq!(storage.stats().await.unwrap().accounts, 1);
    }

    #[tokio::test]
    async fn test_invalid_account_is_rejected_and_not_stored() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/external/accounts/validate")
            .with_status(200)
            .with_body(r#"{"valid":false,"message":"routing number not recognized"}"#)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStore::new());
        let service = service_against(&server.url(), storage.clone());

        let err = service
            .validate_and_register(&RunContext::new(), Uuid::new_v4(), register_request())
            .await
            .unwrap_err();
        match err {
            OutboundError::ValidationRejected(message) => {
                assert_eq!(message, "routing number not recognized");
            }
            other => panic!("expected ValidationRejected, got {other:?}"),
        }
        assert_eq!(storage.stats().await.unwrap().accounts, 0);
    }

    #[tokio::test]
    async fn test_unvalidated_registration_is_upgraded() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/external/accounts/validate")
            .with_status(200)
            .with_body(r#"{"valid":true}"#)
            .create_async()
            .await;

        let storage = Arc::new(MemoryStore::new());
        let service = service_against(&server.url(), storage.clone());
        let user = Uuid::new_v4();

        // Seed an unvalidated registration.
        let now = chrono::Utc::now();
        let unvalidated = ExternalAccount {
            id: Uuid::new_v4(),
            user_id: user,
            account_holder_name: "Old Name".to_string(),
            account_number: "000123456789".to_string(),
            routing_number: "110000000".to_string(),
            institution_name: None,
            validated: false,
            validation_time: None,
            created_at: now,
            updated_at: now,
        };
        storage.insert_account(&unvalidated).await.unwrap();

        let registered = service
            .validate_and_register(&RunContext::new(), user, register_request())
            .await
            .unwrap();

        // Upgraded in place: same row, now validated, name refreshed.
        assert_eq!(registered.account.id, unvalidated.id);
        assert!(registered.account.validated);
        assert_eq!(registered.account.account_holder_name, "Pat Holder");
        assert_eq!(storage.stats().await.unwrap().accounts, 1);
    }
}
