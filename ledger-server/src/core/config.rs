//! Service configuration
//!
//! # Environment variables
//!
//! Every setting can be overridden through the environment:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | WORK_DIR | /var/lib/verifactu/ledger | working directory (database, logs) |
//! | DATABASE_PATH | {WORK_DIR}/ledger.db | SQLite database file |
//! | ENVIRONMENT | development | development \| staging \| production |
//! | LOCK_TIMEOUT_MS | 30000 | tenant lock acquisition timeout |
//! | FLOW_CONTROL_SECONDS | 60 | minimum spacing between AEAT submissions |
//! | MAX_RETRIES | 5 | submission attempts per batch before terminal failure |
//! | RETRY_BACKOFF_BASE_SECONDS | 30 | base of the exponential backoff |
//! | RETRY_BACKOFF_CAP_SECONDS | 900 | backoff ceiling |
//! | CIRCUIT_BREAKER_THRESHOLD | 5 | consecutive failures that open the breaker |
//! | CIRCUIT_BREAKER_PAUSE_SECONDS | 300 | breaker cool-down |
//! | MAX_RECORDS_PER_BATCH | 1000 | batch size cap |
//! | AEAT_REQUEST_TIMEOUT_MS | 30000 | per-request transport timeout |
//! | AEAT_ENDPOINT_PRODUCTION | (AEAT production URL) | SOAP endpoint |
//! | AEAT_ENDPOINT_TESTING | (AEAT pre-production URL) | SOAP endpoint |
//! | QR_BASE_URL_PRODUCTION | (AEAT cotejo URL) | verification URL base |
//! | QR_BASE_URL_TESTING | (AEAT pre-production cotejo URL) | verification URL base |
//! | ENABLE_QR_ARTIFACTS | true | verification-URL generation on/off |
//! | CLIENT_CERT_PEM_PATH | (unset) | PEM bundle for AEAT mutual TLS |
//! | REMISION_POLL_SECONDS | 60 | remision worker tick |
//! | VERIFY_INTERVAL_SECONDS | 86400 | integrity audit sweep interval |
//! | SOFTWARE_ID | ledger-server | SIF software identifier stamped on records |

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory for the database and logs
    pub work_dir: String,
    /// SQLite database file path
    pub database_path: String,
    /// Runtime environment: development | staging | production
    pub environment: String,

    // === Concurrency ===
    /// Tenant lock acquisition timeout (milliseconds)
    pub lock_timeout_ms: u64,

    // === Remision pipeline ===
    pub flow_control_seconds: u64,
    pub max_retries: u32,
    pub retry_backoff_base_seconds: u64,
    pub retry_backoff_cap_seconds: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_pause_seconds: u64,
    pub max_records_per_batch: usize,
    pub aeat_request_timeout_ms: u64,
    pub aeat_endpoint_production: String,
    pub aeat_endpoint_testing: String,
    /// PEM bundle (certificate + key) for AEAT mutual TLS, when configured
    pub client_cert_pem_path: Option<String>,

    // === Artifacts ===
    pub qr_base_url_production: String,
    pub qr_base_url_testing: String,
    pub enable_qr_artifacts: bool,

    // === Workers ===
    pub remision_poll_seconds: u64,
    pub verify_interval_seconds: u64,

    // === SIF identification ===
    pub software_id: String,
    pub software_version: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let work_dir =
            std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/verifactu/ledger".into());
        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| format!("{}/ledger.db", work_dir.trim_end_matches('/')));

        Self {
            database_path,
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),

            lock_timeout_ms: env_or("LOCK_TIMEOUT_MS", 30_000),

            flow_control_seconds: env_or("FLOW_CONTROL_SECONDS", 60),
            max_retries: env_or("MAX_RETRIES", 5),
            retry_backoff_base_seconds: env_or("RETRY_BACKOFF_BASE_SECONDS", 30),
            retry_backoff_cap_seconds: env_or("RETRY_BACKOFF_CAP_SECONDS", 900),
            circuit_breaker_threshold: env_or("CIRCUIT_BREAKER_THRESHOLD", 5),
            circuit_breaker_pause_seconds: env_or("CIRCUIT_BREAKER_PAUSE_SECONDS", 300),
            max_records_per_batch: env_or("MAX_RECORDS_PER_BATCH", 1000),
            aeat_request_timeout_ms: env_or("AEAT_REQUEST_TIMEOUT_MS", 30_000),
            aeat_endpoint_production: std::env::var("AEAT_ENDPOINT_PRODUCTION").unwrap_or_else(
                |_| {
                    "https://www1.agenciatributaria.gob.es/wlpl/TIKE-CONT/ws/SistemaFacturacion/VerifactuSOAP"
                        .into()
                },
            ),
            aeat_endpoint_testing: std::env::var("AEAT_ENDPOINT_TESTING").unwrap_or_else(|_| {
                "https://prewww1.aeat.es/wlpl/TIKE-CONT/ws/SistemaFacturacion/VerifactuSOAP".into()
            }),
            client_cert_pem_path: std::env::var("CLIENT_CERT_PEM_PATH").ok(),

            qr_base_url_production: std::env::var("QR_BASE_URL_PRODUCTION").unwrap_or_else(|_| {
                "https://www2.agenciatributaria.gob.es/wlpl/TIKE-CONT/ValidarQR".into()
            }),
            qr_base_url_testing: std::env::var("QR_BASE_URL_TESTING")
                .unwrap_or_else(|_| "https://prewww2.aeat.es/wlpl/TIKE-CONT/ValidarQR".into()),
            enable_qr_artifacts: env_or("ENABLE_QR_ARTIFACTS", true),

            remision_poll_seconds: env_or("REMISION_POLL_SECONDS", 60),
            verify_interval_seconds: env_or("VERIFY_INTERVAL_SECONDS", 86_400),

            software_id: std::env::var("SOFTWARE_ID").unwrap_or_else(|_| "ledger-server".into()),
            software_version: env!("CARGO_PKG_VERSION").to_string(),

            work_dir,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
