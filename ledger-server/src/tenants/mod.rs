//! Tenant configuration service
//!
//! Thin surface over the tenant config repository that attests every
//! configuration change in the event ledger (CONFIG_CHANGE, or
//! CERTIFICATE_CHANGE when the certificate reference moves).

use std::sync::Arc;

use sqlx::SqlitePool;

use shared::models::{EventType, TenantConfig, TenantConfigUpdate};

use crate::db::repository::tenant_config::{self, NewTenantConfig};
use crate::eventlog::EventLogService;
use crate::utils::{AppError, AppResult};

pub struct TenantService {
    pool: SqlitePool,
    events: Arc<EventLogService>,
}

impl TenantService {
    pub fn new(pool: SqlitePool, events: Arc<EventLogService>) -> Self {
        Self { pool, events }
    }

    pub async fn get_config(&self, tenant_id: i64) -> AppResult<Option<TenantConfig>> {
        Ok(tenant_config::find_by_tenant(&self.pool, tenant_id).await?)
    }

    pub async fn register(&self, data: NewTenantConfig) -> AppResult<TenantConfig> {
        let tenant_id = data.tenant_id;
        let config = tenant_config::create(&self.pool, &data).await?;

        self.events
            .log_event(
                EventType::ConfigChange,
                tenant_id,
                None,
                serde_json::json!({
                    "description": "Tenant VeriFactu configuration registered",
                    "aeat_environment": config.aeat_environment,
                }),
            )
            .await;

        tracing::info!(tenant_id, "Tenant configuration registered");
        Ok(config)
    }

    pub async fn update_config(
        &self,
        tenant_id: i64,
        update: TenantConfigUpdate,
    ) -> AppResult<TenantConfig> {
        let before = tenant_config::find_by_tenant(&self.pool, tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("tenant config for tenant {tenant_id}"))
            })?;

        let certificate_changed = update
            .certificate_ref
            .as_ref()
            .is_some_and(|new_ref| Some(new_ref) != before.certificate_ref.as_ref());

        let config = tenant_config::update(&self.pool, tenant_id, &update).await?;

        let event_type = if certificate_changed {
            EventType::CertificateChange
        } else {
            EventType::ConfigChange
        };
        self.events
            .log_event(
                event_type,
                tenant_id,
                None,
                serde_json::json!({
                    "description": "Tenant VeriFactu configuration updated",
                    "certificate_changed": certificate_changed,
                    "aeat_environment": config.aeat_environment,
                    "is_active": config.is_active,
                }),
            )
            .await;

        tracing::info!(tenant_id, certificate_changed, "Tenant configuration updated");
        Ok(config)
    }
}
