//! Shared HTTP plumbing for source adapters.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{ConfigError, SourceError};

/// User agent sent with every outbound request.
pub const USER_AGENT: &str = concat!("reldocs/", env!("CARGO_PKG_VERSION"));

/// Build the reqwest client used by an adapter or host.
pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(request_timeout)
        .build()
        .map_err(|e| ConfigError::InvalidValue {
            key: "http_client".to_string(),
            reason: e.to_string(),
        })
}

/// Whether a failed HTTP status should be retried.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Map an HTTP status to a source failure.
pub fn status_error(status: StatusCode, context: &str) -> SourceError {
    let message = format!("{context}: HTTP {status}");
    if is_transient_status(status) {
        SourceError::transient(message)
    } else {
        SourceError::permanent(message)
    }
}

/// Map a transport-level reqwest error to a source failure.
pub fn transport_error(err: reqwest::Error, context: &str) -> SourceError {
    if err.is_decode() || err.is_builder() {
        SourceError::permanent(format!("{context}: {err}"))
    } else {
        SourceError::transient(format!("{context}: {err}"))
    }
}

/// Send a request and decode a JSON body, racing the run's cancellation token.
pub async fn get_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    context: &str,
    cancel: &CancellationToken,
) -> Result<T, SourceError> {
    let send = async {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, context))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, context));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| transport_error(e, context))
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(context = %context, "request abandoned on cancellation");
            Err(SourceError::transient(format!("{context}: cancelled")))
        }
        result = send => result,
    }
}

/// Fail fast between paged requests once the run is cancelled.
pub fn ensure_not_cancelled(cancel: &CancellationToken, context: &str) -> Result<(), SourceError> {
    if cancel.is_cancelled() {
        Err(SourceError::transient(format!("{context}: cancelled")))
    } else {
        Ok(())
    }
}

/// Parse the timestamp formats used by the supported source systems:
/// RFC 3339 (`2024-01-15T10:30:00Z`, `...+00:00`) and the offset-without-colon
/// form (`2024-01-15T10:30:00.000+0000`).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_classification() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "x").is_transient());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "x").is_transient());
        assert!(status_error(StatusCode::REQUEST_TIMEOUT, "x").is_transient());
        assert!(!status_error(StatusCode::UNAUTHORIZED, "x").is_transient());
        assert!(!status_error(StatusCode::FORBIDDEN, "x").is_transient());
        assert!(!status_error(StatusCode::NOT_FOUND, "x").is_transient());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-15T10:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T10:30:00+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T10:30:00.000+0000"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T12:30:00.000+0200"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ensure_not_cancelled(&cancel, "jira search").unwrap_err();
        assert!(err.is_transient());
        assert!(err.message.contains("cancelled"));
    }
}
