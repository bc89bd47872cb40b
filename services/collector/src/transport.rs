//! JSON-over-HTTP transport used by every extractor.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

const USER_AGENT: &str = "health-indicators-collector/0.1 (country-year indicator pipeline)";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("response from {url} is not valid JSON: {reason}")]
    Body { url: String, reason: String },

    #[error("response from {url} has an unexpected shape: {reason}")]
    Shape { url: String, reason: String },
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Fetch a URL and hand back the parsed JSON document.
#[async_trait]
pub trait JsonTransport: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<Value, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JsonTransport for HttpTransport {
    async fn fetch_json(&self, url: &str) -> Result<Value, TransportError> {
        tracing::debug!(url, "fetching");
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| classify(url, e))?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

fn classify(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Canned transport for extractor tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeTransport {
        responses: HashMap<String, Result<Value, u16>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        pub fn with_json(mut self, url: impl Into<String>, body: Value) -> Self {
            self.responses.insert(url.into(), Ok(body));
            self
        }

        pub fn with_status(mut self, url: impl Into<String>, status: u16) -> Self {
            self.responses.insert(url.into(), Err(status));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JsonTransport for FakeTransport {
        async fn fetch_json(&self, url: &str) -> Result<Value, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.responses.get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(TransportError::Status {
                    url: url.to_string(),
                    status: *status,
                }),
                None => Err(TransportError::Request {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                }),
            }
        }
    }
}
