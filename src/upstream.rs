//! Shared HTTP plumbing for the upstream services (OpenAI, Qdrant).
//!
//! Failures are reported as [`CallError`] so the core retry classifier can
//! tell rate limits and outages (retried) from bad requests (not retried).

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use grounded_chat_core::resilience::{CallError, NetworkErrorKind};

/// Client with a per-request transport timeout.
pub fn client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send `request` and parse a JSON body from a 2xx response.
pub async fn send_json(request: RequestBuilder) -> Result<Value> {
    let response = request.send().await.map_err(classify)?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CallError::Status {
            status: status.as_u16(),
            body,
        }
        .into());
    }

    Ok(response.json().await.map_err(classify)?)
}

/// Map a transport error onto a [`CallError`].
pub fn classify(err: reqwest::Error) -> CallError {
    if let Some(status) = err.status() {
        return CallError::Status {
            status: status.as_u16(),
            body: err.to_string(),
        };
    }

    let kind = if err.is_timeout() {
        NetworkErrorKind::Timeout
    } else {
        io_kind(&err).unwrap_or_else(|| {
            let text = format!("{:?}", err).to_lowercase();
            if text.contains("dns") || text.contains("resolve") {
                NetworkErrorKind::DnsFailure
            } else if err.is_connect() {
                NetworkErrorKind::Unreachable
            } else {
                NetworkErrorKind::Other
            }
        })
    };

    CallError::Network {
        kind,
        message: err.to_string(),
    }
}

fn io_kind(err: &reqwest::Error) -> Option<NetworkErrorKind> {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    Some(NetworkErrorKind::ConnectionReset)
                }
                io::ErrorKind::ConnectionRefused => Some(NetworkErrorKind::ConnectionRefused),
                io::ErrorKind::TimedOut => Some(NetworkErrorKind::Timeout),
                _ => None,
            };
        }
        source = cause.source();
    }
    None
}
