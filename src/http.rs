//! Shared outbound HTTP plumbing for providers.
//!
//! Every provider enforces its own timeout through the client built here; the
//! fan-out executor never cancels a provider call.

use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Settings;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_MS: u64 = 500;

pub fn user_agent() -> String {
    format!("socialite/{}", env!("CARGO_PKG_VERSION"))
}

pub fn client(settings: &Settings) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.http_timeout_secs))
        .user_agent(user_agent())
        .build()
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// GET with up to three attempts on 429/5xx and transport errors.
pub async fn get_with_retry(
    client: &reqwest::Client,
    request: reqwest::RequestBuilder,
) -> reqwest::Result<reqwest::Response> {
    let request = request.build()?;
    let mut attempt = 1;
    loop {
        let Some(req) = request.try_clone() else {
            return client.execute(request).await;
        };
        match client.execute(req).await {
            Ok(resp) if is_retryable(resp.status()) && attempt < MAX_ATTEMPTS => {
                warn!(url = %request.url(), status = resp.status().as_u16(), attempt, "retrying GET");
            }
            Ok(resp) => return Ok(resp),
            Err(e) if attempt < MAX_ATTEMPTS && !e.is_builder() => {
                debug!(url = %request.url(), attempt, "GET failed, retrying: {}", e);
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(Duration::from_millis(BACKOFF_MS * attempt as u64)).await;
        attempt += 1;
    }
}

/// Blocking counterpart of [`get_with_retry`] for providers that run on the
/// blocking pool.
pub fn get_with_retry_blocking(
    client: &reqwest::blocking::Client,
    url: &str,
) -> reqwest::Result<reqwest::blocking::Response> {
    let mut attempt = 1;
    loop {
        match client.get(url).send() {
            Ok(resp) if is_retryable(resp.status()) && attempt < MAX_ATTEMPTS => {
                warn!(url, status = resp.status().as_u16(), attempt, "retrying GET");
            }
            Ok(resp) => return Ok(resp),
            Err(e) if attempt < MAX_ATTEMPTS => {
                debug!(url, attempt, "GET failed, retrying: {}", e);
            }
            Err(e) => return Err(e),
        }
        std::thread::sleep(Duration::from_millis(BACKOFF_MS * attempt as u64));
        attempt += 1;
    }
}
