//! HTTP client for the accrual authority (`GET {base}/api/orders/{number}`).

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{AccrualApi, Cooldown};
use crate::domain::ExternalResolution;
use crate::error::{AccrualError, LedgerError, Result};

/// Connection settings for the authority
#[derive(Debug, Clone)]
pub struct AccrualClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Cooldown applied when a 429 carries no usable `Retry-After`
    pub default_retry_after: Duration,
    /// Upper bound on any cooldown the authority asks for
    pub max_retry_after: Duration,
}

impl Default for AccrualClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(5),
            default_retry_after: Duration::from_secs(60),
            max_retry_after: Duration::from_secs(3600),
        }
    }
}

/// Authority client; construct once and share among all workers
pub struct AccrualClient {
    http: Client,
    base_url: String,
    default_retry_after: Duration,
    max_retry_after: Duration,
    cooldown: Cooldown,
}

impl AccrualClient {
    pub fn new(config: AccrualClientConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("points-ledger/0.1")
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                LedgerError::Internal(format!("failed to build accrual HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_retry_after: config.default_retry_after,
            max_retry_after: config.max_retry_after,
            cooldown: Cooldown::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cooldown(&self) -> &Cooldown {
        &self.cooldown
    }

    fn order_url(&self, order_number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, order_number)
    }

    fn parse_retry_after(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let requested = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| {
                warn!(
                    "Accrual system sent 429 without a usable Retry-After, backing off {:?}",
                    self.default_retry_after
                );
                self.default_retry_after
            });

        if requested > self.max_retry_after {
            warn!(
                "Accrual system asked to back off {:?}, capping at {:?}",
                requested, self.max_retry_after
            );
            return self.max_retry_after;
        }
        requested
    }
}

#[async_trait]
impl AccrualApi for AccrualClient {
    #[instrument(skip(self))]
    async fn resolve(
        &self,
        order_number: &str,
    ) -> std::result::Result<ExternalResolution, AccrualError> {
        self.cooldown.wait().await;

        let url = self.order_url(order_number);
        let response = self.http.get(&url).send().await.map_err(|e| {
            warn!("Error requesting accrual system at {}: {}", url, e);
            AccrualError::Unavailable {
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let body = response.text().await.map_err(|e| AccrualError::Unavailable {
                    reason: format!("failed to read body: {}", e),
                })?;
                let resolution: ExternalResolution =
                    serde_json::from_str(&body).map_err(|e| {
                        warn!("Accrual system returned malformed body: {}", e);
                        AccrualError::UnexpectedResponse {
                            status: status.as_u16(),
                            detail: format!("malformed body: {}", e),
                        }
                    })?;
                debug!(
                    "Accrual system resolved order {} as {:?}",
                    order_number, resolution.status
                );
                Ok(resolution)
            }
            StatusCode::NO_CONTENT => {
                info!("No order registered with number {}", order_number);
                Err(AccrualError::NotRegistered)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = self.parse_retry_after(response.headers());
                self.cooldown.trip(retry_after);
                info!(
                    "Accrual system reported too many requests, retry after {:?}",
                    retry_after
                );
                Err(AccrualError::RateLimited { retry_after })
            }
            s if s.is_server_error() => {
                warn!("Accrual system returned {}", s);
                Err(AccrualError::Unavailable {
                    reason: format!("status {}", s.as_u16()),
                })
            }
            s => {
                let detail = response.text().await.unwrap_or_default();
                warn!("Accrual system returned unexpected status {}", s);
                Err(AccrualError::UnexpectedResponse {
                    status: s.as_u16(),
                    detail,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn client() -> AccrualClient {
        AccrualClient::new(AccrualClientConfig {
            base_url: "http://accrual.local:8080/".to_string(),
            request_timeout: Duration::from_secs(1),
            default_retry_after: Duration::from_secs(30),
            max_retry_after: Duration::from_secs(600),
        })
        .unwrap()
    }

    #[test]
    fn test_base_url_is_normalised() {
        let client = client();
        assert_eq!(client.base_url(), "http://accrual.local:8080");
        assert_eq!(
            client.order_url("79927398713"),
            "http://accrual.local:8080/api/orders/79927398713"
        );
    }

    #[test]
    fn test_retry_after_in_seconds() {
        let client = client();
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("5"));
        assert_eq!(client.parse_retry_after(&headers), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_after_falls_back_to_default() {
        let client = client();
        let mut headers = HeaderMap::new();
        assert_eq!(client.parse_retry_after(&headers), Duration::from_secs(30));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(client.parse_retry_after(&headers), Duration::from_secs(30));
    }

    #[test]
    fn test_huge_retry_after_is_capped() {
        let client = client();
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("18446744073709551615"),
        );
        assert_eq!(client.parse_retry_after(&headers), Duration::from_secs(600));
    }
}
