use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::core::config::HttpConfig;
use crate::core::error::PipelineError;

/// Retries an async operation with configurable attempts and delays
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
///
/// # Returns
/// Either the successful result or the error after all attempts. Errors
/// carry no URL since request URLs may hold credentials.
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    retries: usize,
    delay_ms: u64,
) -> Result<T, reqwest::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                let err = err.without_url();
                if attempt > retries {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

pub fn build_client(http: &HttpConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("stockfx/0.1")
        .timeout(http.timeout())
        .build()
}

/// Issues a GET and returns the body of a successful response.
///
/// Transport failures are retried; a non-success status is not.
pub async fn get_body(
    client: &reqwest::Client,
    url: &str,
    http: &HttpConfig,
    source_name: &'static str,
) -> Result<String, PipelineError> {
    let response = with_retry(
        || async { client.get(url).send().await },
        http.retries,
        http.retry_delay_ms,
    )
    .await
    .map_err(|e| PipelineError::unavailable(source_name, format!("request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| {
            PipelineError::unavailable(
                source_name,
                format!("failed to read body: {}", e.without_url()),
            )
        })?;

    if !status.is_success() {
        return Err(PipelineError::unavailable(
            source_name,
            format!("HTTP {status}: {}", body.trim()),
        ));
    }
    Ok(body)
}
