//! NorthWind Outbound Integration Core
//!
//! This crate is the outbound-integration core for a banking API. It
//! initiates and tracks external fund transfers through the NorthWind
//! bank and guarantees that the compliance regulator is notified over
//! HTTP whenever a transfer reaches a reportable terminal outcome, with
//! at-least-once delivery and an immutable audit trail of every attempt.
//!
//! # Architecture
//!
//! - **UpstreamClient**: typed reqwest client for the NorthWind API with
//!   opt-in retry for transient failures
//! - **TransferService / AccountService**: foreground operations backed by
//!   the upstream client and the store
//! - **Reconciler**: polls upstream status for open transfers and advances
//!   the local state machine
//! - **NotificationPipeline**: idempotent notification creation, immediate
//!   first delivery, retry queue with exponential backoff and jitter,
//!   per-attempt audit rows
//! - **Scheduler**: one periodic driver running reconcile then retry each
//!   tick, with cooperative shutdown
//! - **Store**: trait over persistence with in-memory and sled backends
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use northwind_outbound::{OutboundConfig, OutboundCore, SledStore};
//!
//! async fn example() {
//!     let config = OutboundConfig::from_env();
//!     let storage = Arc::new(SledStore::open("./outbound_data").unwrap());
//!     let core = OutboundCore::new(config, storage).unwrap();
//!
//!     // Drive reconciliation and regulator retries in the background.
//!     let handle = core.start_scheduler();
//!
//!     // ... serve foreground traffic via core.transfers() ...
//!
//!     handle.stop().await;
//! }
//! ```

pub mod account;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod notify;
pub mod reconcile;
pub mod scheduler;
pub mod storage;
pub mod transfer;
pub mod types;
pub mod upstream;
pub mod webhook;

pub use account::{AccountService, RegisterAccountRequest, RegisteredAccount};
pub use clock::{Clock, SystemClock};
pub use config::{OutboundConfig, RegulatorConfig, SchedulerConfig, UpstreamConfig};
pub use context::RunContext;
pub use error::{OutboundError, OutboundResult};
pub use notify::NotificationPipeline;
pub use reconcile::Reconciler;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use storage::{MemoryStore, SledStore, StorageStats, Store};
pub use transfer::{CreatedTransfer, NewTransfer, NewTransferAccount, TransferService};
pub use types::{
    DeliveryAttempt, Direction, ExternalAccount, Notification, RegulatorPayload, Transfer,
    TransferFilters, TransferStatus,
};
pub use upstream::UpstreamClient;
pub use webhook::{HttpWebhookSender, WebhookOutcome, WebhookSender};

use std::sync::Arc;

/// Outbound core facade
///
/// Wires the upstream client, services, pipeline, reconciler, and
/// scheduler over one storage backend.
pub struct OutboundCore<S: Store + 'static> {
    config: OutboundConfig,
    storage: Arc<S>,
    upstream: Arc<UpstreamClient>,
    transfers: Arc<TransferService<S>>,
    accounts: Arc<AccountService<S>>,
    pipeline: Arc<NotificationPipeline<S>>,
    reconciler: Arc<Reconciler<S>>,
    scheduler: Scheduler<S>,
}

impl<S: Store + 'static> OutboundCore<S> {
    /// Create a core over the given storage backend with the system clock
    pub fn new(config: OutboundConfig, storage: Arc<S>) -> OutboundResult<Self> {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    /// Create a core with an explicit clock (used by tests)
    pub fn with_clock(
        config: OutboundConfig,
        storage: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> OutboundResult<Self> {
        config.validate()?;

        let upstream = Arc::new(UpstreamClient::new(config.upstream.clone())?);
        let sender: Arc<dyn WebhookSender> = Arc::new(HttpWebhookSender::new()?);
        let pipeline = Arc::new(NotificationPipeline::new(
            storage.clone(),
            sender,
            clock.clone(),
            &config.regulator,
        ));
        let reconciler = Arc::new(Reconciler::new(
            upstream.clone(),
            storage.clone(),
            pipeline.clone(),
        ));
        let transfers = Arc::new(TransferService::new(
            upstream.clone(),
            storage.clone(),
            clock.clone(),
        ));
        let accounts = Arc::new(AccountService::new(
            upstream.clone(),
            storage.clone(),
            clock,
        ));
        let scheduler = Scheduler::new(reconciler.clone(), pipeline.clone(), &config.scheduler);

        Ok(Self {
            config,
            storage,
            upstream,
            transfers,
            accounts,
            pipeline,
            reconciler,
            scheduler,
        })
    }

    /// Start the background scheduler
    pub fn start_scheduler(&self) -> SchedulerHandle {
        self.scheduler.start()
    }

    /// Run a single scheduler tick (reconcile then retry)
    pub async fn tick_once(&self, ctx: &RunContext) {
        self.scheduler.tick_once(ctx).await;
    }

    /// Transfer operations
    pub fn transfers(&self) -> &Arc<TransferService<S>> {
        &self.transfers
    }

    /// External account operations
    pub fn accounts(&self) -> &Arc<AccountService<S>> {
        &self.accounts
    }

    /// Notification pipeline
    pub fn pipeline(&self) -> &Arc<NotificationPipeline<S>> {
        &self.pipeline
    }

    /// Reconciler
    pub fn reconciler(&self) -> &Arc<Reconciler<S>> {
        &self.reconciler
    }

    /// Upstream client
    pub fn upstream(&self) -> &Arc<UpstreamClient> {
        &self.upstream
    }

    /// Storage backend
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Configuration
    pub fn config(&self) -> &OutboundConfig {
        &self.config
    }
}
