use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

/// One batched request: the representative text of a cluster plus the
/// candidate kinds the oracle may answer with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub representative: String,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub kind: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Call budget exhausted")]
    BudgetExhausted,
}

pub type OracleResult<T> = Result<T, OracleError>;

/// External classification boundary. The response is untrusted; callers must
/// validate the returned kind and degrade to unclassified on failure.
#[async_trait::async_trait]
pub trait ClassificationOracle: Send + Sync {
    async fn classify(&self, request: ClassifyRequest) -> OracleResult<ClassifyResponse>;
}

/// HTTP JSON oracle. POSTs the request body to the endpoint and expects a
/// `{"kind": "..."}` reply.
pub struct HttpOracle {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpOracle {
    pub fn new(endpoint: &str, timeout: Duration) -> OracleResult<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| OracleError::InvalidEndpoint(e.to_string()))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::RequestFailed(e.to_string()))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait]
impl ClassificationOracle for HttpOracle {
    async fn classify(&self, request: ClassifyRequest) -> OracleResult<ClassifyResponse> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OracleError::RequestFailed(format!(
                "status {}",
                response.status()
            )));
        }

        response
            .json::<ClassifyResponse>()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))
    }
}

/// Retry behavior for transient oracle failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts (0 = only the initial attempt).
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Caps exponential growth.
    pub max_delay_ms: u64,
    /// 0.0-1.0, randomizes delays to avoid thundering herd.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 15_000,
            jitter_factor: 0.2,
        }
    }
}

/// Wraps any oracle with exponential backoff retry.
pub struct RetryingOracle {
    inner: Arc<dyn ClassificationOracle>,
    config: RetryConfig,
}

impl RetryingOracle {
    pub fn new(inner: Arc<dyn ClassificationOracle>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn calculate_delay(&self, attempt: u32) -> u64 {
        let base = self.config.base_delay_ms;
        let exponential = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.config.max_delay_ms);

        let jitter_range = (capped as f64 * self.config.jitter_factor) as i64;
        if jitter_range > 0 {
            let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
            (capped as i64 + jitter).max(0) as u64
        } else {
            capped
        }
    }

    fn is_retryable(error: &OracleError) -> bool {
        match error {
            OracleError::RequestFailed(msg) => {
                !msg.contains("401") && !msg.contains("403") && !msg.contains("400")
            }
            OracleError::InvalidResponse(_) => true,
            OracleError::InvalidEndpoint(_) | OracleError::BudgetExhausted => false,
        }
    }
}

#[async_trait::async_trait]
impl ClassificationOracle for RetryingOracle {
    async fn classify(&self, request: ClassifyRequest) -> OracleResult<ClassifyResponse> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.inner.classify(request.clone()).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(attempt = attempt + 1, "oracle call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let retryable = Self::is_retryable(&e);

                    if attempt < self.config.max_retries && retryable {
                        let delay = self.calculate_delay(attempt + 1);
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_retries = self.config.max_retries,
                            delay_ms = delay,
                            error = %e,
                            "oracle call failed, retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    } else if !retryable {
                        return Err(e);
                    }

                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| OracleError::RequestFailed("unknown".into())))
    }
}

/// Global cap on dispatched oracle batches. Incremented atomically; once the
/// limit is reached every further acquire fails and the affected clusters
/// degrade to unclassified.
#[derive(Debug)]
pub struct CallBudget {
    limit: Option<u32>,
    used: AtomicU32,
}

impl CallBudget {
    #[must_use]
    pub fn new(limit: Option<u32>) -> Self {
        Self {
            limit,
            used: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Reserves one call. Returns false when the budget is spent.
    pub fn try_acquire(&self) -> bool {
        match self.limit {
            None => {
                self.used.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(limit) => self
                .used
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                    (used < limit).then_some(used + 1)
                })
                .is_ok(),
        }
    }

    #[must_use]
    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Oracle that fails a configurable number of times before succeeding.
    struct FlakyOracle {
        failures_remaining: AtomicU32,
        attempts: AtomicU32,
    }

    impl FlakyOracle {
        fn new(failures: u32) -> Self {
            Self {
                failures_remaining: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ClassificationOracle for FlakyOracle {
        async fn classify(&self, _request: ClassifyRequest) -> OracleResult<ClassifyResponse> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(OracleError::RequestFailed("connection reset".into()));
            }
            Ok(ClassifyResponse {
                kind: "faction".into(),
            })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let inner = Arc::new(FlakyOracle::new(2));
        let oracle = RetryingOracle::new(inner.clone(), fast_retry());

        let response = oracle
            .classify(ClassifyRequest {
                representative: "text".into(),
                candidates: vec!["faction".into()],
            })
            .await
            .unwrap();

        assert_eq!(response.kind, "faction");
        assert_eq!(inner.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_error() {
        let inner = Arc::new(FlakyOracle::new(10));
        let oracle = RetryingOracle::new(inner.clone(), fast_retry());

        let result = oracle
            .classify(ClassifyRequest {
                representative: "text".into(),
                candidates: vec![],
            })
            .await;

        assert!(result.is_err());
        assert_eq!(inner.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        struct Unauthorized;

        #[async_trait::async_trait]
        impl ClassificationOracle for Unauthorized {
            async fn classify(&self, _: ClassifyRequest) -> OracleResult<ClassifyResponse> {
                Err(OracleError::RequestFailed("status 401".into()))
            }
        }

        let oracle = RetryingOracle::new(Arc::new(Unauthorized), fast_retry());
        let result = oracle
            .classify(ClassifyRequest {
                representative: String::new(),
                candidates: vec![],
            })
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_budget_limit() {
        let budget = CallBudget::new(Some(2));
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn test_budget_unlimited() {
        let budget = CallBudget::unlimited();
        for _ in 0..100 {
            assert!(budget.try_acquire());
        }
        assert_eq!(budget.used(), 100);
    }
}
