//! Shared HTTP error handling for the Azure clients.

use medroute_core::capability::GenerationError;
use reqwest::{StatusCode, header::HeaderValue};
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

/// Extracts `error.message` (prefixed with `error.code`) from an Azure error body.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(wrapper) => match wrapper.error.code {
            Some(code) => format!("{} ({}): {}", status, code, wrapper.error.message),
            None => format!("{}: {}", status, wrapper.error.message),
        },
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => format!("{}: {}", status, body.trim()),
    }
}

/// Maps a non-success status to a generation error.
///
/// 429 is the only rate-limit class; everything else is reported as unavailable.
pub(crate) fn map_http_error(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> GenerationError {
    let message = error_message(status, body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        GenerationError::RateLimited {
            retry_after,
            message,
        }
    } else {
        GenerationError::Unavailable(message)
    }
}

pub(crate) fn map_request_error(err: reqwest::Error, timeout: Duration) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout(timeout)
    } else {
        GenerationError::Unavailable(format!("request failed: {err}"))
    }
}

pub(crate) fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    // Retry-After HTTP-date parsing is omitted for simplicity
    None
}
