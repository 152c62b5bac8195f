//! Shared HTTP client for all source adapters and downloads.
//!
//! Centralizes proxy configuration, TLS trust overrides, bearer-token
//! injection for rate-limited APIs, request timeouts, and rate-limit
//! tracking from response headers.

use crate::config::{EngineConfig, NetworkConfig};
use crate::{Result, VaultError};
use reqwest::{header, Client, Response, StatusCode};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Rate limit state extracted from `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
    /// Unix timestamp when the limit resets.
    pub reset: Option<u64>,
}

impl RateLimitState {
    /// Throttle when below 10% of the limit.
    pub fn should_throttle(&self) -> bool {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) if limit > 0 => {
                let threshold = (limit as f64 * 0.1) as u64;
                remaining < threshold.max(1)
            }
            _ => false,
        }
    }

    pub fn time_until_reset(&self) -> Option<Duration> {
        self.reset.and_then(|reset| {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            (reset > now).then(|| Duration::from_secs(reset - now))
        })
    }
}

/// HTTP client shared by every adapter and the download pipeline.
pub struct HttpClient {
    client: Client,
    /// Bearer token injected into GitHub API requests.
    github_token: Option<String>,
    rate_limit_remaining: AtomicI64,
    rate_limit_limit: AtomicU64,
    rate_limit_reset: AtomicU64,
    throttle_delay: Duration,
}

impl HttpClient {
    /// Build the client from an engine configuration snapshot.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(NetworkConfig::REQUEST_TIMEOUT)
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(config.user_agent.clone());

        if let Some(ref proxy) = config.proxy {
            let mut p = reqwest::Proxy::all(&proxy.url).map_err(|e| VaultError::Config {
                message: format!("Invalid proxy url {}: {}", proxy.url, e),
            })?;
            if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                p = p.basic_auth(user, pass);
            }
            builder = builder.proxy(p);
        }

        if config.tls.accept_invalid_certs {
            warn!("TLS certificate verification disabled by configuration");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ref cert_path) = config.tls.extra_root_cert {
            let pem = std::fs::read(cert_path)
                .map_err(|e| VaultError::io_with_path(e, cert_path))?;
            let cert =
                reqwest::Certificate::from_pem(&pem).map_err(|e| VaultError::Config {
                    message: format!("Invalid root certificate {}: {}", cert_path.display(), e),
                })?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder.build().map_err(|e| VaultError::Network {
            message: format!("Failed to create HTTP client: {e}"),
            cause: Some(e.to_string()),
        })?;

        Ok(Self {
            client,
            github_token: config.github_token.clone(),
            rate_limit_remaining: AtomicI64::new(-1),
            rate_limit_limit: AtomicU64::new(0),
            rate_limit_reset: AtomicU64::new(0),
            throttle_delay: Duration::from_millis(500),
        })
    }

    pub fn rate_limit_state(&self) -> RateLimitState {
        let remaining = self.rate_limit_remaining.load(Ordering::SeqCst);
        let limit = self.rate_limit_limit.load(Ordering::SeqCst);
        let reset = self.rate_limit_reset.load(Ordering::SeqCst);
        RateLimitState {
            remaining: (remaining >= 0).then_some(remaining as u64),
            limit: (limit > 0).then_some(limit),
            reset: (reset > 0).then_some(reset),
        }
    }

    /// GET a URL. 429 responses become `RateLimited` carrying any
    /// server-provided retry-after hint; other statuses are returned to the
    /// caller.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.maybe_throttle().await;

        let mut request = self.client.get(url);
        if let Some(ref token) = self.github_token {
            if is_github_api(url) {
                request = request.bearer_auth(token);
            }
        }

        let response = request.send().await.map_err(|e| VaultError::Network {
            message: format!("GET {url} failed: {e}"),
            cause: Some(e.to_string()),
        })?;

        self.update_rate_limits(&response);
        self.check_response_status(response, url)
    }

    /// GET a URL and deserialize the JSON body.
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VaultError::Network {
                message: format!("GET {url} returned status {status}"),
                cause: None,
            });
        }
        response.json::<T>().await.map_err(|e| VaultError::Json {
            message: format!("Failed to decode JSON from {url}: {e}"),
            source: None,
        })
    }

    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
    }

    pub fn is_permanent_failure(status: StatusCode) -> bool {
        matches!(status.as_u16(), 400 | 401 | 403 | 404)
    }

    async fn maybe_throttle(&self) {
        let state = self.rate_limit_state();
        if state.should_throttle() {
            warn!(
                "Rate limit approaching (remaining: {:?}/{:?}), throttling for {:?}",
                state.remaining, state.limit, self.throttle_delay
            );
            tokio::time::sleep(self.throttle_delay).await;
        }
    }

    fn update_rate_limits(&self, response: &Response) {
        let headers = response.headers();
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
        };

        if let Some(remaining) = parse("X-RateLimit-Remaining") {
            self.rate_limit_remaining
                .store(remaining as i64, Ordering::SeqCst);
        }
        if let Some(limit) = parse("X-RateLimit-Limit") {
            self.rate_limit_limit.store(limit, Ordering::SeqCst);
        }
        if let Some(reset) = parse("X-RateLimit-Reset") {
            self.rate_limit_reset.store(reset, Ordering::SeqCst);
        }

        let remaining = self.rate_limit_remaining.load(Ordering::SeqCst);
        let limit = self.rate_limit_limit.load(Ordering::SeqCst);
        if remaining >= 0 && limit > 0 {
            debug!("Rate limit: {}/{}", remaining, limit);
        }
    }

    fn check_response_status(&self, response: Response, url: &str) -> Result<Response> {
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .or_else(|| self.rate_limit_state().time_until_reset().map(|d| d.as_secs()));

            return Err(VaultError::RateLimited {
                service: extract_domain(url),
                retry_after_secs: retry_after,
            });
        }
        Ok(response)
    }
}

fn is_github_api(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == "api.github.com"))
        .unwrap_or(false)
}

/// Domain of a URL, for error messages and per-service rate limit tags.
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}
