//! End-to-end scenarios driving the full core: mock upstream bank, mock
//! regulator, real scheduler ticks over a memory (and once, sled) store.

use std::sync::Arc;
use std::time::Duration;

use northwind_outbound::{
    Direction, MemoryStore, NewTransfer, NewTransferAccount, OutboundConfig, OutboundCore,
    OutboundError, RegulatorConfig, RunContext, SchedulerConfig, SledStore, Store, Transfer,
    TransferStatus, UpstreamConfig,
};
use uuid::Uuid;

fn config_for(upstream_url: &str, regulator_url: &str) -> OutboundConfig {
    OutboundConfig {
        upstream: UpstreamConfig {
            base_url: upstream_url.to_string(),
            api_key: "test-key".to_string(),
            max_retries: 0,
            retry_initial_ms: 0,
            timeout_seconds: 2,
        },
        regulator: RegulatorConfig {
            webhook_url: format!("{regulator_url}/regulator/webhook"),
            retry_initial_seconds: 2,
            retry_max_seconds: 60,
        },
        scheduler: SchedulerConfig {
            interval_seconds: 1,
        },
    }
}

fn seeded_transfer(upstream_id: Uuid) -> Transfer {
    let now = chrono::Utc::now();
    Transfer {
        id: Uuid::new_v4(),
        user_id: Some(Uuid::new_v4()),
        upstream_transfer_id: upstream_id,
        direction: Direction::Outbound,
        transfer_type: "ach".to_string(),
        amount: "100.50".parse().unwrap(),
        currency: "USD".to_string(),
        description: None,
        reference_number: "REF-E2E".to_string(),
        source_account_number: "111000111".to_string(),
        source_routing_number: None,
        source_account_holder_name: None,
        destination_account_number: "222000222".to_string(),
        destination_routing_number: None,
        destination_account_holder_name: None,
        status: TransferStatus::Pending,
        error_code: None,
        error_message: None,
        scheduled_date: None,
        initiated_date: None,
        processing_date: None,
        expected_completion_date: None,
        completed_date: None,
        fee: None,
        exchange_rate: None,
        created_at: now,
        updated_at: now,
    }
}

/// S1: PENDING transfer completes upstream, regulator answers 200 on the
/// first attempt.
#[tokio::test]
async fn happy_path_delivers_on_first_attempt() {
    let mut upstream = mockito::Server::new_async().await;
    let mut regulator = mockito::Server::new_async().await;

    let storage = Arc::new(MemoryStore::new());
    let core = OutboundCore::new(
        config_for(&upstream.url(), &regulator.url()),
        storage.clone(),
    )
    .unwrap();

    let transfer = seeded_transfer(Uuid::new_v4());
    storage.insert_transfer(&transfer).await.unwrap();

    upstream
        .mock(
            "GET",
            format!("/external/transfers/{}", transfer.upstream_transfer_id).as_str(),
        )
        .with_status(200)
        .with_body(r#"{"status":"COMPLETED","completed_date":"2024-06-01T12:00:00Z"}"#)
        .create_async()
        .await;
    let hook = regulator
        .mock("POST", "/regulator/webhook")
        .match_header("content-type", "application/json")
        .with_status(200)
        .with_body("ok")
        .expect(1)
        .create_async()
        .await;

    core.tick_once(&RunContext::new()).await;

    let row = storage.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.status, TransferStatus::Completed);
    assert!(row.completed_date.is_some());

    let notification = storage
        .find_notification(&transfer.id, TransferStatus::Completed)
        .await
        .unwrap()
        .expect("notification must exist");
    assert!(notification.delivered);
    assert_eq!(notification.attempt_count, 1);
    assert!(notification.first_attempt_at.is_some());
    assert_eq!(notification.next_attempt_at, None);
    assert_eq!(notification.last_http_status, Some(200));

    let attempts = storage.list_attempts(&notification.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].http_status, Some(200));
    hook.assert_async().await;
}

/// S2: regulator answers 500 first, then 200 on the retry.
#[tokio::test]
async fn regulator_outage_is_retried_until_delivered() {
    let mut upstream = mockito::Server::new_async().await;
    let mut regulator = mockito::Server::new_async().await;

    let storage = Arc::new(MemoryStore::new());
    let core = OutboundCore::new(
        config_for(&upstream.url(), &regulator.url()),
        storage.clone(),
    )
    .unwrap();

    let transfer = seeded_transfer(Uuid::new_v4());
    storage.insert_transfer(&transfer).await.unwrap();

    upstream
        .mock(
            "GET",
            format!("/external/transfers/{}", transfer.upstream_transfer_id).as_str(),
        )
        .with_status(200)
        .with_body(r#"{"status":"COMPLETED"}"#)
        .create_async()
        .await;
    let failing_hook = regulator
        .mock("POST", "/regulator/webhook")
        .with_status(500)
        .with_body("regulator overloaded")
        .expect(1)
        .create_async()
        .await;

    core.tick_once(&RunContext::new()).await;

    let notification = storage
        .find_notification(&transfer.id, TransferStatus::Completed)
        .await
        .unwrap()
        .unwrap();
    assert!(!notification.delivered);
    assert_eq!(notification.attempt_count, 1);
    assert_eq!(notification.last_http_status, Some(500));
    let next_attempt_at = notification.next_attempt_at.expect("retry must be scheduled");
    let delay_ms = (next_attempt_at - notification.last_attempt_at.unwrap()).num_milliseconds();
    // base 2s with ±20% jitter
    assert!(
        (1_600..=2_400).contains(&delay_ms),
        "unexpected backoff: {delay_ms}ms"
    );
    failing_hook.assert_async().await;

    // The regulator recovers.
    failing_hook.remove_async().await;
    let healthy_hook = regulator
        .mock("POST", "/regulator/webhook")
        .with_status(200)
        .with_body("ok")
        .expect(1)
        .create_async()
        .await;

    // Wait past the scheduled retry, then run a retry pass.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    core.pipeline().retry_pass(&RunContext::new()).await;

    let notification = storage
        .find_notification(&transfer.id, TransferStatus::Completed)
        .await
        .unwrap()
        .unwrap();
    assert!(notification.delivered);
    assert_eq!(notification.attempt_count, 2);
    assert_eq!(notification.next_attempt_at, None);

    let attempts = storage.list_attempts(&notification.id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].http_status, Some(500));
    assert_eq!(attempts[1].http_status, Some(200));
    healthy_hook.assert_async().await;
}

/// S3: observing the same terminal status twice creates exactly one
/// notification.
#[tokio::test]
async fn duplicate_terminal_observation_creates_one_notification() {
    let mut upstream = mockito::Server::new_async().await;
    let mut regulator = mockito::Server::new_async().await;

    let storage = Arc::new(MemoryStore::new());
    let core = OutboundCore::new(
        config_for(&upstream.url(), &regulator.url()),
        storage.clone(),
    )
    .unwrap();

    let transfer = seeded_transfer(Uuid::new_v4());
    storage.insert_transfer(&transfer).await.unwrap();

    upstream
        .mock(
            "GET",
            format!("/external/transfers/{}", transfer.upstream_transfer_id).as_str(),
        )
        .with_status(200)
        .with_body(r#"{"status":"COMPLETED"}"#)
        .create_async()
        .await;
    regulator
        .mock("POST", "/regulator/webhook")
        .with_status(200)
        .create_async()
        .await;

    // Two reconcile cycles; the second sees a terminal row and skips it.
    core.tick_once(&RunContext::new()).await;
    core.tick_once(&RunContext::new()).await;

    // A direct repeated observation is also a no-op.
    let row = storage.get_transfer(&transfer.id).await.unwrap().unwrap();
    core.pipeline()
        .create_and_deliver(&RunContext::new(), &row, TransferStatus::Completed)
        .await
        .unwrap();

    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.notifications, 1);
    assert_eq!(stats.attempts, 1);
}

/// S4: insufficient balance blocks creation before the initiate call.
#[tokio::test]
async fn insufficient_balance_rejects_creation() {
    let mut upstream = mockito::Server::new_async().await;
    let regulator = mockito::Server::new_async().await;

    upstream
        .mock("POST", "/external/transfers/validate")
        .with_status(200)
        .with_body(r#"{"valid":true}"#)
        .create_async()
        .await;
    upstream
        .mock("GET", "/external/accounts/111000111/balance")
        .with_status(200)
        .with_body(
            r#"{"account_number":"111000111","available_balance":250.0,"current_balance":250.0,"currency":"USD"}"#,
        )
        .create_async()
        .await;
    let initiate = upstream
        .mock("POST", "/external/transfers/initiate")
        .expect(0)
        .create_async()
        .await;

    let storage = Arc::new(MemoryStore::new());
    let core = OutboundCore::new(
        config_for(&upstream.url(), &regulator.url()),
        storage.clone(),
    )
    .unwrap();

    let request = NewTransfer {
        amount: "500.00".parse().unwrap(),
        currency: "USD".to_string(),
        description: None,
        direction: Direction::Outbound,
        transfer_type: "ach".to_string(),
        reference_number: "REF-S4".to_string(),
        scheduled_date: None,
        source_account: NewTransferAccount {
            account_holder_name: "Sender".to_string(),
            account_number: "111000111".to_string(),
            routing_number: Some("110000000".to_string()),
            institution_name: None,
        },
        destination_account: NewTransferAccount {
            account_holder_name: "Receiver".to_string(),
            account_number: "222000222".to_string(),
            routing_number: None,
            institution_name: None,
        },
    };

    let err = core
        .transfers()
        .create_transfer(&RunContext::new(), Uuid::new_v4(), request)
        .await
        .unwrap_err();

    assert!(matches!(err, OutboundError::InsufficientBalance { .. }));
    initiate.assert_async().await;
    assert_eq!(storage.stats().await.unwrap().transfers, 0);
}

/// S5: a transport failure during reconcile leaves everything untouched.
#[tokio::test]
async fn upstream_outage_leaves_state_unchanged() {
    let regulator = mockito::Server::new_async().await;

    let storage = Arc::new(MemoryStore::new());
    // Nothing listens on the upstream port.
    let core = OutboundCore::new(
        config_for("http://127.0.0.1:9", &regulator.url()),
        storage.clone(),
    )
    .unwrap();

    let transfer = seeded_transfer(Uuid::new_v4());
    storage.insert_transfer(&transfer).await.unwrap();

    core.tick_once(&RunContext::new()).await;

    let row = storage.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.status, TransferStatus::Pending);

    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.notifications, 0);
    assert_eq!(stats.attempts, 0);
}

/// S6: two concurrent createAndDeliver calls for the same terminal state
/// settle on one notification with at most one successful attempt.
#[tokio::test]
async fn concurrent_notification_creation_is_race_safe() {
    let upstream = mockito::Server::new_async().await;
    let mut regulator = mockito::Server::new_async().await;

    regulator
        .mock("POST", "/regulator/webhook")
        .with_status(200)
        .create_async()
        .await;

    let storage = Arc::new(MemoryStore::new());
    let core = OutboundCore::new(
        config_for(&upstream.url(), &regulator.url()),
        storage.clone(),
    )
    .unwrap();

    let transfer = seeded_transfer(Uuid::new_v4());
    storage.insert_transfer(&transfer).await.unwrap();

    let ctx = RunContext::new();
    let (first, second) = tokio::join!(
        core.pipeline()
            .create_and_deliver(&ctx, &transfer, TransferStatus::Completed),
        core.pipeline()
            .create_and_deliver(&ctx, &transfer, TransferStatus::Completed),
    );
    first.unwrap();
    second.unwrap();

    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.notifications, 1);

    let notification = storage
        .find_notification(&transfer.id, TransferStatus::Completed)
        .await
        .unwrap()
        .unwrap();
    let attempts = storage.list_attempts(&notification.id).await.unwrap();
    assert_eq!(attempts.len() as u32, notification.attempt_count);
    let successes = attempts
        .iter()
        .filter(|a| matches!(a.http_status, Some(s) if (200..300).contains(&s)))
        .count();
    assert!(successes <= 1);
    assert!(notification.delivered);
}

/// The happy path holds over the durable backend too.
#[tokio::test]
async fn happy_path_with_sled_store() {
    let mut upstream = mockito::Server::new_async().await;
    let mut regulator = mockito::Server::new_async().await;

    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(SledStore::open(dir.path()).unwrap());
    let core = OutboundCore::new(
        config_for(&upstream.url(), &regulator.url()),
        storage.clone(),
    )
    .unwrap();

    let transfer = seeded_transfer(Uuid::new_v4());
    storage.insert_transfer(&transfer).await.unwrap();

    upstream
        .mock(
            "GET",
            format!("/external/transfers/{}", transfer.upstream_transfer_id).as_str(),
        )
        .with_status(200)
        .with_body(r#"{"status":"FAILED","error_code":"NSF"}"#)
        .create_async()
        .await;
    regulator
        .mock("POST", "/regulator/webhook")
        .with_status(201)
        .create_async()
        .await;

    core.tick_once(&RunContext::new()).await;

    let row = storage.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.status, TransferStatus::Failed);
    assert_eq!(row.error_code.as_deref(), Some("NSF"));

    let notification = storage
        .find_notification(&transfer.id, TransferStatus::Failed)
        .await
        .unwrap()
        .unwrap();
    assert!(notification.delivered);
    assert_eq!(notification.last_http_status, Some(201));

    let attempts = storage.list_attempts(&notification.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
}

/// The background scheduler drives the same flow without manual ticks.
#[tokio::test]
async fn scheduler_loop_reconciles_and_delivers() {
    let mut upstream = mockito::Server::new_async().await;
    let mut regulator = mockito::Server::new_async().await;

    let storage = Arc::new(MemoryStore::new());
    let core = OutboundCore::new(
        config_for(&upstream.url(), &regulator.url()),
        storage.clone(),
    )
    .unwrap();

    let transfer = seeded_transfer(Uuid::new_v4());
    storage.insert_transfer(&transfer).await.unwrap();

    upstream
        .mock(
            "GET",
            format!("/external/transfers/{}", transfer.upstream_transfer_id).as_str(),
        )
        .with_status(200)
        .with_body(r#"{"status":"COMPLETED"}"#)
        .create_async()
        .await;
    regulator
        .mock("POST", "/regulator/webhook")
        .with_status(200)
        .create_async()
        .await;

    let handle = core.start_scheduler();

    // Interval is 1s; give the loop two ticks.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    handle.stop().await;

    let row = storage.get_transfer(&transfer.id).await.unwrap().unwrap();
    assert_eq!(row.status, TransferStatus::Completed);
    let notification = storage
        .find_notification(&transfer.id, TransferStatus::Completed)
        .await
        .unwrap()
        .unwrap();
    assert!(notification.delivered);
}
