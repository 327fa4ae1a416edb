//! Service state and wiring
//!
//! `ServerState::initialize` builds the database pool and every service,
//! selects the artifact generator capability, attests SYSTEM_START in the
//! event ledger and hands out the background task set.

use std::sync::Arc;
use std::time::Duration;

use shared::models::EventType;

use crate::aeat::HttpAeatClient;
use crate::chain::scheduler::IntegrityAuditScheduler;
use crate::chain::verify::ChainVerifier;
use crate::core::config::Config;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::db::DbService;
use crate::eventlog::EventLogService;
use crate::locks::{LocalLockBackend, LockBackend};
use crate::qr::{AeatQrGenerator, ArtifactGenerator, NoopArtifactGenerator};
use crate::records::RecordService;
use crate::remision::{RemisionConfig, RemisionService, RemisionWorker};
use crate::tenants::TenantService;
use crate::utils::{AppError, AppResult};

/// Tenant scope used for service-level ledger events.
const SYSTEM_TENANT: i64 = 0;

/// Shared service state.
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub db: DbService,
    pub locks: Arc<dyn LockBackend>,
    pub events: Arc<EventLogService>,
    pub records: Arc<RecordService>,
    pub remision: Arc<RemisionService>,
    pub verifier: ChainVerifier,
    pub tenants: Arc<TenantService>,
}

impl ServerState {
    /// Wire every service from configuration.
    pub async fn initialize(config: &Config) -> AppResult<Self> {
        let db = DbService::new(&config.database_path).await?;
        let pool = db.pool.clone();

        let locks: Arc<dyn LockBackend> = Arc::new(LocalLockBackend::new());
        let events = Arc::new(EventLogService::new(pool.clone()));
        let lock_timeout = Duration::from_millis(config.lock_timeout_ms);

        // Artifact capability: a single injection point decides whether the
        // verification URL generator runs or the no-op stands in.
        let artifacts: Arc<dyn ArtifactGenerator> = if config.enable_qr_artifacts {
            let base = if config.is_production() {
                &config.qr_base_url_production
            } else {
                &config.qr_base_url_testing
            };
            Arc::new(AeatQrGenerator::new(base.clone()))
        } else {
            Arc::new(NoopArtifactGenerator)
        };

        let records = Arc::new(RecordService::new(
            pool.clone(),
            locks.clone(),
            events.clone(),
            artifacts,
            lock_timeout,
            config.software_id.clone(),
            config.software_version.clone(),
        ));

        let client_identity = match &config.client_cert_pem_path {
            Some(path) => Some(std::fs::read(path).map_err(|e| {
                AppError::internal(format!("Failed to read client certificate {path}: {e}"))
            })?),
            None => None,
        };
        let client = Arc::new(
            HttpAeatClient::new(
                Duration::from_millis(config.aeat_request_timeout_ms),
                client_identity.as_deref(),
            )
            .map_err(|e| AppError::internal(e.to_string()))?,
        );

        let remision = Arc::new(RemisionService::new(
            pool.clone(),
            client,
            events.clone(),
            RemisionConfig {
                flow_control_seconds: config.flow_control_seconds,
                max_retries: config.max_retries,
                retry_backoff_base_seconds: config.retry_backoff_base_seconds,
                retry_backoff_cap_seconds: config.retry_backoff_cap_seconds,
                circuit_breaker_threshold: config.circuit_breaker_threshold,
                circuit_breaker_pause_seconds: config.circuit_breaker_pause_seconds,
                max_records_per_batch: config.max_records_per_batch,
                endpoint_production: config.aeat_endpoint_production.clone(),
                endpoint_testing: config.aeat_endpoint_testing.clone(),
                software_id: config.software_id.clone(),
                software_version: config.software_version.clone(),
            },
        ));

        let verifier = ChainVerifier::new(pool.clone(), locks.clone(), events.clone(), lock_timeout);
        let tenants = Arc::new(TenantService::new(pool.clone(), events.clone()));

        let state = Self {
            config: config.clone(),
            db,
            locks,
            events,
            records,
            remision,
            verifier,
            tenants,
        };

        state
            .events
            .log_event(
                EventType::SystemStart,
                SYSTEM_TENANT,
                None,
                serde_json::json!({
                    "environment": state.config.environment,
                    "software_id": state.config.software_id,
                    "software_version": state.config.software_version,
                }),
            )
            .await;

        tracing::info!(
            environment = %state.config.environment,
            database = %state.config.database_path,
            "Ledger service initialized"
        );
        Ok(state)
    }

    /// Start the background task set: the remision worker plus the periodic
    /// integrity audit.
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let worker = RemisionWorker::new(
            self.remision.clone(),
            Duration::from_secs(self.config.remision_poll_seconds),
            tasks.shutdown_token(),
        );
        tasks.spawn("remision_worker", TaskKind::Worker, worker.run());

        let audit = IntegrityAuditScheduler::new(
            self.db.pool.clone(),
            self.verifier.clone(),
            self.events.clone(),
            Duration::from_secs(self.config.verify_interval_seconds),
            tasks.shutdown_token(),
        );
        tasks.spawn("integrity_audit", TaskKind::Periodic, audit.run());

        tracing::info!("Background tasks registered: {}", tasks.len());
        tasks
    }
}
