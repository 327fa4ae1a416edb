//! Remision background worker
//!
//! Periodic loop that turns pending records into batches and drains the
//! due-batch queue, stopping early whenever a guard refuses (the window
//! will not reopen within this tick).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::remision::service::{RemisionService, SubmitOutcome};

pub struct RemisionWorker {
    service: Arc<RemisionService>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl RemisionWorker {
    pub fn new(
        service: Arc<RemisionService>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service,
            poll_interval,
            shutdown,
        }
    }

    /// Run the worker until shutdown.
    pub async fn run(self) {
        tracing::info!(
            poll_secs = self.poll_interval.as_secs(),
            "Remision worker started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Remision worker received shutdown signal");
                    return;
                }
            }

            self.tick().await;
        }
    }

    async fn tick(&self) {
        match self.service.process_queue().await {
            Ok(0) => {}
            Ok(created) => tracing::info!(created, "Remision queue processed"),
            Err(e) => tracing::error!("Failed to process remision queue: {e}"),
        }

        let due = match self.service.due_batches().await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Failed to load due batches: {e}");
                return;
            }
        };

        for batch in due {
            if self.shutdown.is_cancelled() {
                return;
            }

            match self.service.submit_batch(batch.id).await {
                Ok(SubmitOutcome::Refused(refusal)) => {
                    // Breaker cool-down or flow-control spacing: neither
                    // clears within this tick.
                    tracing::debug!(batch_id = batch.id, "Submission refused: {refusal}");
                    return;
                }
                Ok(SubmitOutcome::Completed(result)) => {
                    tracing::debug!(
                        batch_id = result.batch_id,
                        status = ?result.status,
                        will_retry = result.will_retry,
                        "Batch attempt finished"
                    );
                }
                Err(e) => {
                    tracing::error!(batch_id = batch.id, "Batch submission error: {e}");
                }
            }
        }
    }
}
