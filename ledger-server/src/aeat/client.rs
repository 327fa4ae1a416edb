//! AEAT transport
//!
//! HTTPS POST of a SOAP envelope to the configured endpoint, authenticated
//! with the deployment's client certificate when one is configured. Every
//! call carries a request timeout; a timed-out attempt is a retryable
//! failure, never an implicit success.

use std::time::Duration;

use async_trait::async_trait;

use super::AeatError;

const SOAP_ACTION: &str = "SuministroFactEmitidas";

/// Transport boundary to the external authority.
#[async_trait]
pub trait AeatClient: Send + Sync {
    /// Send `envelope` to `endpoint`, returning the raw response body.
    async fn send(&self, endpoint: &str, envelope: &str) -> Result<String, AeatError>;
}

/// reqwest-backed transport.
pub struct HttpAeatClient {
    http: reqwest::Client,
}

impl HttpAeatClient {
    pub fn new(
        request_timeout: Duration,
        client_identity_pem: Option<&[u8]>,
    ) -> Result<Self, AeatError> {
        let mut builder = reqwest::Client::builder().timeout(request_timeout);

        if let Some(pem) = client_identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| AeatError::Transport(format!("Invalid client certificate: {e}")))?;
            builder = builder.identity(identity);
        }

        let http = builder
            .build()
            .map_err(|e| AeatError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AeatClient for HttpAeatClient {
    async fn send(&self, endpoint: &str, envelope: &str) -> Result<String, AeatError> {
        let response = self
            .http
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", SOAP_ACTION)
            .body(envelope.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // SOAP faults arrive with 500; hand the body to the parser instead
        // of discarding it. Other non-success statuses are plain transport
        // failures.
        if !status.is_success() && status.as_u16() != 500 {
            return Err(AeatError::Transport(format!(
                "AEAT endpoint returned HTTP {status}"
            )));
        }

        if body.trim().is_empty() {
            return Err(AeatError::Transport("Empty response from AEAT".into()));
        }

        Ok(body)
    }
}
