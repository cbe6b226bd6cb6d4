use anyhow::Context;
use std::time::Duration;

pub const TOO_MANY_REQUESTS: u16 = 429;

/// Status and body of an upstream response, not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Network-level failure of one upstream call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportFailure {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("response is not valid JSON: {0}")]
    Parse(String),
}

impl TransportFailure {
    /// HTTP status code, when the failure carries one.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Status(status) => Some(*status),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout | Self::Body(_) => true,
            Self::Status(status) => *status >= 500,
            Self::Parse(_) => false,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::Status(TOO_MANY_REQUESTS))
    }
}

#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<RawResponse, TransportFailure>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build upstream http client")?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<RawResponse, TransportFailure> {
        // The query carries the API key; strip the URL before it reaches any log line.
        let res = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportFailure::Timeout
                } else {
                    TransportFailure::Connect(err.without_url().to_string())
                }
            })?;

        // Non-2xx bodies are kept; a 429 usually carries the rate-limit note.
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|err| TransportFailure::Body(err.without_url().to_string()))?;

        Ok(RawResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses in order and records every query it receives.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, TransportFailure>>>,
        queries: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl ScriptedTransport {
        pub fn new(
            script: impl IntoIterator<Item = Result<RawResponse, TransportFailure>>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                queries: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.queries.lock().unwrap().len()
        }

        pub fn query_param(&self, call: usize, key: &str) -> Option<String> {
            self.queries.lock().unwrap()[call]
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        }
    }

    #[async_trait::async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(
            &self,
            _url: &str,
            query: &[(&str, &str)],
        ) -> Result<RawResponse, TransportFailure> {
            self.queries.lock().unwrap().push(
                query
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportFailure::Connect("script exhausted".to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(TransportFailure::Timeout.is_retryable());
        assert!(TransportFailure::Connect("refused".into()).is_retryable());
        assert!(TransportFailure::Status(503).is_retryable());
        assert!(!TransportFailure::Status(429).is_retryable());
        assert!(!TransportFailure::Status(404).is_retryable());
        assert!(!TransportFailure::Parse("eof".into()).is_retryable());
    }

    #[test]
    fn recognises_too_many_requests() {
        assert!(TransportFailure::Status(429).is_rate_limit());
        assert!(!TransportFailure::Status(503).is_rate_limit());
        assert!(!TransportFailure::Timeout.is_rate_limit());
    }

    #[test]
    fn exposes_status_code() {
        assert_eq!(TransportFailure::Status(502).code(), Some(502));
        assert_eq!(TransportFailure::Timeout.code(), None);
    }
}
