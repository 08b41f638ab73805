//! Retry, timeout and confidence policy around any extractor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use slotflow_core::config::ExtractionConfig;

use crate::error::ExtractionError;
use crate::extract::{Extraction, ExtractionRequest, SlotExtractor};

/// Wraps an extractor with a per-attempt timeout, bounded retries for
/// transient failures and a confidence floor.
///
/// Malformed output is not retried; it is logged and treated as unresolved.
pub struct GuardedExtractor {
    inner: Arc<dyn SlotExtractor>,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
    min_confidence: f32,
}

impl GuardedExtractor {
    pub fn new(inner: Arc<dyn SlotExtractor>, config: &ExtractionConfig) -> Self {
        Self {
            inner,
            timeout: Duration::from_millis(config.timeout_ms),
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            min_confidence: config.min_confidence,
        }
    }

    fn apply_floor(&self, extraction: Extraction) -> Extraction {
        match extraction {
            Extraction::Resolved(values) => Extraction::from_values(
                values
                    .into_iter()
                    .filter(|v| v.confidence >= self.min_confidence)
                    .collect(),
            ),
            Extraction::Unresolved => Extraction::Unresolved,
        }
    }
}

#[async_trait]
impl SlotExtractor for GuardedExtractor {
    async fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<Extraction, ExtractionError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match tokio::time::timeout(self.timeout, self.inner.extract(request)).await {
                Ok(Ok(extraction)) => return Ok(self.apply_floor(extraction)),
                Ok(Err(ExtractionError::Malformed(reason))) => {
                    warn!(extractor = self.inner.name(), %reason, "Discarding malformed extraction");
                    return Ok(Extraction::Unresolved);
                }
                Ok(Err(ExtractionError::Transient(reason))) => {
                    warn!(extractor = self.inner.name(), attempt, %reason, "Extraction attempt failed");
                    last_error = reason;
                }
                Err(_) => {
                    warn!(
                        extractor = self.inner.name(),
                        attempt,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Extraction attempt timed out"
                    );
                    last_error = format!("timed out after {} ms", self.timeout.as_millis());
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }

        Err(ExtractionError::Transient(last_error))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
