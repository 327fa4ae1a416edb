//! Integrity audit scheduler
//!
//! Periodically verifies the invoice chain and the event chain of every
//! active tenant. Registered as a periodic background task at startup.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use shared::models::EventType;

use crate::chain::verify::ChainVerifier;
use crate::db::repository::tenant_config;
use crate::eventlog::EventLogService;

pub struct IntegrityAuditScheduler {
    pool: SqlitePool,
    verifier: ChainVerifier,
    events: Arc<EventLogService>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl IntegrityAuditScheduler {
    pub fn new(
        pool: SqlitePool,
        verifier: ChainVerifier,
        events: Arc<EventLogService>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            verifier,
            events,
            interval,
            shutdown,
        }
    }

    /// Main loop: run one audit sweep per interval until shutdown.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Integrity audit scheduler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Integrity audit scheduler received shutdown signal");
                    return;
                }
            }

            self.audit_all_tenants().await;
        }
    }

    async fn audit_all_tenants(&self) {
        let tenants = match tenant_config::list_active(&self.pool).await {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::error!("Integrity audit: failed to list tenants: {e}");
                return;
            }
        };

        for config in tenants {
            if self.shutdown.is_cancelled() {
                tracing::info!("Integrity audit sweep interrupted by shutdown");
                return;
            }

            let tenant_id = config.tenant_id;

            // Invoice chain: the verifier logs INTEGRITY_CHECK / CHAIN_BREAK
            // / CHAIN_RECOVERY itself.
            let result = self.verifier.verify_chain_integrity(tenant_id).await;
            if let Some(msg) = &result.error_message
                && !result.is_valid
            {
                tracing::warn!(tenant_id, "Integrity audit: {msg}");
            }

            // Event chain.
            match self.events.verify_integrity(tenant_id).await {
                Ok(report) if !report.chain_intact => {
                    tracing::error!(
                        tenant_id,
                        first_break = ?report.first_break,
                        "Event chain integrity BROKEN"
                    );
                    self.events
                        .log_event(
                            EventType::ChainBreak,
                            tenant_id,
                            None,
                            serde_json::json!({
                                "chain": "event",
                                "first_break": report.first_break,
                                "valid_entries": report.valid_entries,
                                "total_entries": report.total_entries,
                            }),
                        )
                        .await;
                }
                Ok(report) => {
                    tracing::debug!(
                        tenant_id,
                        total_entries = report.total_entries,
                        "Event chain verified"
                    );
                }
                Err(e) => {
                    tracing::error!(tenant_id, "Event chain verification failed: {e}");
                }
            }
        }
    }
}
