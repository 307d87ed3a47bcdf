use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING};
use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};

const APP_USER_AGENT: &str = concat!("compass-launcher/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client.
///
/// `Accept-Encoding: identity` keeps the bytes on the wire identical to the
/// bytes the release digest was computed over.
///
/// `timeout` bounds each idle gap between reads, not the whole transfer, so
/// a large binary on a slow but steady link still completes.
pub fn build_http_client(timeout: Duration, proxy: Option<&str>) -> LauncherResult<Client> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    let mut builder = Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .connect_timeout(Duration::from_secs(15))
        .read_timeout(timeout);

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| LauncherError::Config(format!("invalid proxy {proxy_url:?}: {e}")))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Bounded exponential backoff for transient network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base * 2^attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2_u32.saturating_pow(attempt))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, url: &str, mut op: F) -> LauncherResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = LauncherResult<T>>,
    {
        let mut attempt = 0_u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "Attempt {} for {} failed ({}); retrying in {:?}",
                        attempt + 1,
                        url,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Issue a GET and turn transport failures and non-2xx statuses into
/// classified launcher errors.
pub async fn get_checked(client: &Client, url: &str) -> LauncherResult<Response> {
    debug!("GET {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_transport_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(LauncherError::DownloadFailed {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

/// Connection resets, timeouts and truncated bodies are transient; anything
/// else reqwest reports (bad URL, TLS config, redirect loop) is not.
pub fn classify_transport_error(url: &str, err: reqwest::Error) -> LauncherError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        LauncherError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    } else {
        LauncherError::Http(err)
    }
}
