//! Shared test harness: a fully wired service over a tempdir SQLite
//! database with a scripted AEAT transport.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use ledger_server::aeat::{AeatClient, AeatError};
use ledger_server::chain::verify::ChainVerifier;
use ledger_server::db::DbService;
use ledger_server::db::repository::tenant_config::{self, NewTenantConfig};
use ledger_server::eventlog::EventLogService;
use ledger_server::locks::{LocalLockBackend, LockBackend};
use ledger_server::qr::AeatQrGenerator;
use ledger_server::records::{RecordService, SourceInvoice};
use ledger_server::remision::{RemisionConfig, RemisionService};
use rust_decimal::Decimal;
use shared::models::AeatEnvironment;

/// Scripted AEAT transport: pops one prepared reply per call.
pub struct MockAeatClient {
    responses: Mutex<VecDeque<Result<String, AeatError>>>,
    calls: AtomicUsize,
}

impl MockAeatClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub async fn push_response(&self, body: impl Into<String>) {
        self.responses.lock().await.push_back(Ok(body.into()));
    }

    pub async fn push_transport_error(&self, message: impl Into<String>) {
        self.responses
            .lock()
            .await
            .push_back(Err(AeatError::Transport(message.into())));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AeatClient for MockAeatClient {
    async fn send(&self, _endpoint: &str, _envelope: &str) -> Result<String, AeatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(AeatError::Transport("no scripted response".into())))
    }
}

pub fn test_remision_config() -> RemisionConfig {
    RemisionConfig {
        flow_control_seconds: 60,
        max_retries: 3,
        retry_backoff_base_seconds: 1,
        retry_backoff_cap_seconds: 4,
        circuit_breaker_threshold: 3,
        circuit_breaker_pause_seconds: 60,
        max_records_per_batch: 100,
        endpoint_production: "https://aeat.test/production".into(),
        endpoint_testing: "https://aeat.test/testing".into(),
        software_id: "ledger-server".into(),
        software_version: "0.1.0".into(),
    }
}

pub struct TestHarness {
    pub pool: SqlitePool,
    pub local_locks: Arc<LocalLockBackend>,
    pub events: Arc<EventLogService>,
    pub records: Arc<RecordService>,
    pub remision: Arc<RemisionService>,
    pub verifier: ChainVerifier,
    pub aeat: Arc<MockAeatClient>,
    // Keeps the database directory alive for the test's duration.
    _tmp: tempfile::TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_remision_config(test_remision_config()).await
    }

    pub async fn with_remision_config(remision_config: RemisionConfig) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let db_path = tmp.path().join("ledger.db");
        let db = DbService::new(db_path.to_str().expect("utf8 path"))
            .await
            .expect("database init");
        let pool = db.pool.clone();

        let local_locks = Arc::new(LocalLockBackend::new());
        let locks: Arc<dyn LockBackend> = local_locks.clone();
        let events = Arc::new(EventLogService::new(pool.clone()));
        // Generous enough that serialized appends never time out under test
        // contention, short enough that held-lock tests stay quick.
        let lock_timeout = Duration::from_millis(2000);

        let records = Arc::new(RecordService::new(
            pool.clone(),
            locks.clone(),
            events.clone(),
            Arc::new(AeatQrGenerator::new("https://aeat.test/qr")),
            lock_timeout,
            "ledger-server",
            "0.1.0",
        ));

        let aeat = MockAeatClient::new();
        let remision = Arc::new(RemisionService::new(
            pool.clone(),
            aeat.clone(),
            events.clone(),
            remision_config,
        ));

        let verifier = ChainVerifier::new(pool.clone(), locks, events.clone(), lock_timeout);

        Self {
            pool,
            local_locks,
            events,
            records,
            remision,
            verifier,
            aeat,
            _tmp: tmp,
        }
    }

    /// Register a tenant configuration (testing environment).
    pub async fn seed_tenant(&self, tenant_id: i64) {
        tenant_config::create(
            &self.pool,
            &NewTenantConfig {
                tenant_id,
                nif: "B12345678".into(),
                nombre_fiscal: "Acme SL".into(),
                serie_facturacion: "VF".into(),
                aeat_environment: AeatEnvironment::Testing,
                certificate_ref: None,
            },
        )
        .await
        .expect("seed tenant config");
    }

    /// A 1210.00 gross / 21% VAT source invoice.
    pub fn invoice(&self, tenant_id: i64, reference: &str) -> SourceInvoice {
        SourceInvoice {
            tenant_id,
            invoice_reference: reference.to_string(),
            amount_due: Decimal::new(121_000, 2),
            tax_rate: None,
            invoice_type: None,
            issue_date: None,
        }
    }
}

/// Build a fully successful AEAT response covering the given invoice numbers.
pub fn correcto_response(invoice_numbers: &[&str]) -> String {
    respuesta("Correcto", invoice_numbers, &[])
}

/// Build a partially accepted response: `accepted` lines Correcto,
/// `rejected` lines Incorrecto with error 1117.
pub fn parcial_response(accepted: &[&str], rejected: &[&str]) -> String {
    respuesta("ParcialmenteCorrecto", accepted, rejected)
}

fn respuesta(estado: &str, accepted: &[&str], rejected: &[&str]) -> String {
    let mut lineas = String::new();
    for numero in accepted {
        lineas.push_str(&format!(
            "<tikR:RespuestaLinea><tikR:IDFactura><tikR:NumSerieFactura>{numero}</tikR:NumSerieFactura></tikR:IDFactura><tikR:EstadoRegistro>Correcto</tikR:EstadoRegistro></tikR:RespuestaLinea>"
        ));
    }
    for numero in rejected {
        lineas.push_str(&format!(
            "<tikR:RespuestaLinea><tikR:IDFactura><tikR:NumSerieFactura>{numero}</tikR:NumSerieFactura></tikR:IDFactura><tikR:EstadoRegistro>Incorrecto</tikR:EstadoRegistro><tikR:CodigoErrorRegistro>1117</tikR:CodigoErrorRegistro><tikR:DescripcionErrorRegistro>Huella incorrecta</tikR:DescripcionErrorRegistro></tikR:RespuestaLinea>"
        ));
    }

    format!(
        concat!(
            r#"<?xml version="1.0"?>"#,
            r#"<env:Envelope xmlns:env="http://schemas.xmlsoap.org/soap/envelope/"><env:Body>"#,
            "<tikR:RespuestaRegFactuSistemaFacturacion>",
            "<tikR:CSV>CSV-TEST-0001</tikR:CSV>",
            "<tikR:EstadoEnvio>{estado}</tikR:EstadoEnvio>",
            "{lineas}",
            "</tikR:RespuestaRegFactuSistemaFacturacion>",
            "</env:Body></env:Envelope>"
        ),
        estado = estado,
        lineas = lineas,
    )
}
