use crate::config::{env_or, Settings};
use crate::domain::stock::{StockPayload, Symbol};
use crate::ingest::transport::{
    HttpTransport, RawResponse, ReqwestTransport, TransportFailure, TOO_MANY_REQUESTS,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_URL_BASE: &str = "https://www.alphavantage.co/query";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_MS: u64 = 1000;

/// Fragment of the advisory Alpha Vantage puts in `Note` when the call quota is exhausted.
pub const DEFAULT_RATE_LIMIT_MARKER: &str = "Our standard API call frequency is";

const NOTE_FIELD: &str = "Note";
const ERROR_FIELD: &str = "Error Message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvFunction {
    TimeSeriesDaily,
    Overview,
}

impl AvFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeSeriesDaily => "TIME_SERIES_DAILY",
            Self::Overview => "OVERVIEW",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlphaVantageConfig {
    pub base_url: String,
    /// `None` puts the client in offline mode.
    pub api_key: Option<String>,
    pub rate_limit_marker: String,
    pub timeout: Duration,
    /// Maximum attempts per call, including the first one.
    pub retries: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff: Duration,
}

impl AlphaVantageConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            rate_limit_marker: DEFAULT_RATE_LIMIT_MARKER.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let base_url = settings
            .alpha_vantage_url_base
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_URL_BASE.to_string());

        let mut config = Self::new(base_url, settings.alpha_vantage_api_key.clone());
        if let Some(marker) = settings
            .alpha_vantage_rate_limit_marker
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            config.rate_limit_marker = marker.to_string();
        }
        config.timeout =
            Duration::from_secs(env_or("ALPHA_VANTAGE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS));
        config.retries = env_or("ALPHA_VANTAGE_RETRIES", DEFAULT_RETRIES).max(1);
        config.backoff =
            Duration::from_millis(env_or("ALPHA_VANTAGE_BACKOFF_MS", DEFAULT_BACKOFF_MS));
        config
    }

    pub fn is_offline(&self) -> bool {
        self.api_key.is_none()
    }
}

/// Classified result of one upstream call.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T = Value> {
    Success(T),
    RateLimited,
    Empty,
    UpstreamError(String),
    TransportError(TransportFailure),
    /// No API key configured; nothing was sent.
    Offline,
}

impl<T> FetchOutcome<T> {
    /// Splits off the payload, re-typing every failure variant.
    pub fn into_success<U>(self) -> Result<T, FetchOutcome<U>> {
        match self {
            Self::Success(v) => Ok(v),
            Self::RateLimited => Err(FetchOutcome::RateLimited),
            Self::Empty => Err(FetchOutcome::Empty),
            Self::UpstreamError(msg) => Err(FetchOutcome::UpstreamError(msg)),
            Self::TransportError(failure) => Err(FetchOutcome::TransportError(failure)),
            Self::Offline => Err(FetchOutcome::Offline),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::RateLimited => "rate_limited",
            Self::Empty => "empty",
            Self::UpstreamError(_) => "upstream_error",
            Self::TransportError(_) => "transport_error",
            Self::Offline => "offline",
        }
    }
}

/// Classifies a response body. The provider reports rate limits and errors inside
/// HTTP 200 bodies, so the status alone says little. Order: rate-limit, error, empty.
/// A rate-limit note or HTTP 429 is `RateLimited` under any status.
pub fn classify(raw: &RawResponse, rate_limit_marker: &str) -> FetchOutcome {
    let parsed = serde_json::from_str::<Value>(&raw.body);

    let rate_limited = raw.status == TOO_MANY_REQUESTS
        || parsed
            .as_ref()
            .ok()
            .and_then(|body| body.get(NOTE_FIELD))
            .and_then(Value::as_str)
            .is_some_and(|note| note.contains(rate_limit_marker));
    if rate_limited {
        return FetchOutcome::RateLimited;
    }

    if !raw.is_success() {
        return FetchOutcome::TransportError(TransportFailure::Status(raw.status));
    }

    let body = match parsed {
        Ok(v) => v,
        Err(err) => return FetchOutcome::TransportError(TransportFailure::Parse(err.to_string())),
    };

    if let Some(message) = body.get(ERROR_FIELD) {
        let message = message
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| message.to_string());
        return FetchOutcome::UpstreamError(message);
    }

    match &body {
        Value::Object(fields) if !fields.is_empty() => FetchOutcome::Success(body),
        _ => FetchOutcome::Empty,
    }
}

#[derive(Clone)]
pub struct AlphaVantageClient {
    transport: Arc<dyn HttpTransport>,
    config: AlphaVantageConfig,
}

impl std::fmt::Debug for AlphaVantageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaVantageClient")
            .field("base_url", &self.config.base_url)
            .field("offline", &self.config.is_offline())
            .finish()
    }
}

impl AlphaVantageClient {
    pub fn from_config(config: AlphaVantageConfig) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(config.timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: AlphaVantageConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &AlphaVantageConfig {
        &self.config
    }

    /// One logical call: retried with exponential backoff on retryable transport
    /// failures, never on a classified application response.
    pub async fn fetch_and_classify(&self, function: AvFunction, symbol: &Symbol) -> FetchOutcome {
        let Some(api_key) = self.config.api_key.as_deref() else {
            tracing::warn!(%symbol, function = function.as_str(), "no Alpha Vantage API key; offline mode");
            return FetchOutcome::Offline;
        };

        let query = [
            ("function", function.as_str()),
            ("symbol", symbol.as_str()),
            ("apikey", api_key),
        ];

        let mut attempt: u32 = 0;
        let outcome = loop {
            attempt += 1;
            let outcome = match self.transport.get(&self.config.base_url, &query).await {
                Ok(raw) => classify(&raw, &self.config.rate_limit_marker),
                Err(failure) if failure.is_rate_limit() => FetchOutcome::RateLimited,
                Err(failure) => FetchOutcome::TransportError(failure),
            };

            let retryable = match &outcome {
                FetchOutcome::TransportError(failure)
                    if failure.is_retryable() && attempt < self.config.retries =>
                {
                    Some(failure.to_string())
                }
                _ => None,
            };
            let Some(error) = retryable else {
                break outcome;
            };

            let backoff = self.config.backoff * (1u32 << (attempt - 1).min(16));
            tracing::warn!(
                attempt,
                ?backoff,
                %symbol,
                function = function.as_str(),
                %error,
                "Alpha Vantage request failed; retrying"
            );
            tokio::time::sleep(backoff).await;
        };

        match &outcome {
            FetchOutcome::Success(_) => {
                tracing::debug!(%symbol, function = function.as_str(), attempt, "Alpha Vantage call succeeded");
            }
            FetchOutcome::RateLimited => {
                tracing::info!(%symbol, function = function.as_str(), "Alpha Vantage call limit exceeded");
            }
            FetchOutcome::Empty => {
                tracing::error!(%symbol, function = function.as_str(), "Alpha Vantage returned an empty response");
            }
            FetchOutcome::UpstreamError(message) => {
                tracing::error!(%symbol, function = function.as_str(), %message, "Alpha Vantage returned an error response");
            }
            FetchOutcome::TransportError(failure) => {
                tracing::error!(%symbol, function = function.as_str(), attempt, http_status = ?failure.code(), error = %failure, "Alpha Vantage request failed");
            }
            FetchOutcome::Offline => {}
        }

        outcome
    }

    /// Full refresh: daily time series, then company overview. Stops at the first
    /// call that does not succeed.
    pub async fn refresh(&self, symbol: &Symbol) -> FetchOutcome<StockPayload> {
        let timeseries = match self
            .fetch_and_classify(AvFunction::TimeSeriesDaily, symbol)
            .await
            .into_success()
        {
            Ok(v) => v,
            Err(outcome) => return outcome,
        };

        let overview = match self
            .fetch_and_classify(AvFunction::Overview, symbol)
            .await
            .into_success()
        {
            Ok(v) => v,
            Err(outcome) => return outcome,
        };

        FetchOutcome::Success(StockPayload {
            timeseries,
            overview,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::ingest::transport::scripted::ScriptedTransport;
    use serde_json::json;

    fn ok(v: Value) -> Result<RawResponse, TransportFailure> {
        Ok(RawResponse::ok_json(v.to_string()))
    }

    fn client(transport: Arc<ScriptedTransport>) -> AlphaVantageClient {
        let mut config = AlphaVantageConfig::new("http://upstream.test/query", Some("key".into()));
        config.backoff = Duration::ZERO;
        AlphaVantageClient::with_transport(config, transport)
    }

    fn ibm() -> Symbol {
        Symbol::parse("IBM").unwrap()
    }

    #[test]
    fn classifies_rate_limit_note_under_http_200() {
        let raw = RawResponse::ok_json(rate_limit_body().to_string());
        assert_eq!(
            classify(&raw, DEFAULT_RATE_LIMIT_MARKER),
            FetchOutcome::RateLimited
        );
    }

    #[test]
    fn note_without_marker_is_not_rate_limit() {
        let raw = RawResponse::ok_json(json!({"Note": "scheduled maintenance"}).to_string());
        assert!(matches!(
            classify(&raw, DEFAULT_RATE_LIMIT_MARKER),
            FetchOutcome::Success(_)
        ));
    }

    #[test]
    fn rate_limit_marker_is_configurable() {
        let raw = RawResponse::ok_json(json!({"Note": "quota reached"}).to_string());
        assert_eq!(classify(&raw, "quota reached"), FetchOutcome::RateLimited);
    }

    #[test]
    fn classifies_empty_object_as_empty() {
        let raw = RawResponse::ok_json("{}");
        assert_eq!(classify(&raw, DEFAULT_RATE_LIMIT_MARKER), FetchOutcome::Empty);
        let raw = RawResponse::ok_json("[]");
        assert_eq!(classify(&raw, DEFAULT_RATE_LIMIT_MARKER), FetchOutcome::Empty);
    }

    #[test]
    fn classifies_error_message() {
        let raw = RawResponse::ok_json(
            json!({"Error Message": "Invalid API call. Please retry or visit the documentation."})
                .to_string(),
        );
        assert_eq!(
            classify(&raw, DEFAULT_RATE_LIMIT_MARKER),
            FetchOutcome::UpstreamError(
                "Invalid API call. Please retry or visit the documentation.".to_string()
            )
        );
    }

    #[test]
    fn rate_limit_wins_over_error_message() {
        let raw = RawResponse::ok_json(
            json!({"Note": RATE_LIMIT_NOTE, "Error Message": "boom"}).to_string(),
        );
        assert_eq!(
            classify(&raw, DEFAULT_RATE_LIMIT_MARKER),
            FetchOutcome::RateLimited
        );
    }

    #[test]
    fn malformed_body_is_transport_parse_failure() {
        let raw = RawResponse::ok_json("<html>oops</html>");
        assert!(matches!(
            classify(&raw, DEFAULT_RATE_LIMIT_MARKER),
            FetchOutcome::TransportError(TransportFailure::Parse(_))
        ));
    }

    #[test]
    fn non_success_status_is_transport_failure() {
        let raw = RawResponse {
            status: 502,
            body: String::new(),
        };
        assert_eq!(
            classify(&raw, DEFAULT_RATE_LIMIT_MARKER),
            FetchOutcome::TransportError(TransportFailure::Status(502))
        );
    }

    #[test]
    fn rate_limit_note_wins_over_error_status() {
        let raw = RawResponse {
            status: 429,
            body: rate_limit_body().to_string(),
        };
        assert_eq!(
            classify(&raw, DEFAULT_RATE_LIMIT_MARKER),
            FetchOutcome::RateLimited
        );

        let raw = RawResponse {
            status: 503,
            body: rate_limit_body().to_string(),
        };
        assert_eq!(
            classify(&raw, DEFAULT_RATE_LIMIT_MARKER),
            FetchOutcome::RateLimited
        );
    }

    #[test]
    fn too_many_requests_without_body_is_rate_limit() {
        let raw = RawResponse {
            status: 429,
            body: String::new(),
        };
        assert_eq!(
            classify(&raw, DEFAULT_RATE_LIMIT_MARKER),
            FetchOutcome::RateLimited
        );
    }

    #[tokio::test]
    async fn too_many_requests_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new([
            Err(TransportFailure::Status(429)),
            ok(ibm_time_series()),
        ]));
        let outcome = client(transport.clone())
            .fetch_and_classify(AvFunction::TimeSeriesDaily, &ibm())
            .await;

        assert_eq!(outcome, FetchOutcome::RateLimited);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn offline_mode_makes_no_request() {
        let transport = Arc::new(ScriptedTransport::default());
        let config = AlphaVantageConfig::new("http://upstream.test/query", Some("  ".into()));
        assert!(config.is_offline());
        let client = AlphaVantageClient::with_transport(config, transport.clone());

        let outcome = client
            .fetch_and_classify(AvFunction::TimeSeriesDaily, &ibm())
            .await;
        assert_eq!(outcome, FetchOutcome::Offline);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn sends_function_symbol_and_key() {
        let transport = Arc::new(ScriptedTransport::new([ok(ibm_time_series())]));
        let outcome = client(transport.clone())
            .fetch_and_classify(AvFunction::TimeSeriesDaily, &ibm())
            .await;

        assert!(matches!(outcome, FetchOutcome::Success(_)));
        assert_eq!(
            transport.query_param(0, "function").as_deref(),
            Some("TIME_SERIES_DAILY")
        );
        assert_eq!(transport.query_param(0, "symbol").as_deref(), Some("IBM"));
        assert_eq!(transport.query_param(0, "apikey").as_deref(), Some("key"));
    }

    #[tokio::test]
    async fn retries_transient_transport_failures() {
        let transport = Arc::new(ScriptedTransport::new([
            Err(TransportFailure::Timeout),
            Err(TransportFailure::Status(503)),
            ok(ibm_time_series()),
        ]));
        let outcome = client(transport.clone())
            .fetch_and_classify(AvFunction::TimeSeriesDaily, &ibm())
            .await;

        assert!(matches!(outcome, FetchOutcome::Success(_)));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let transport = Arc::new(ScriptedTransport::new([
            Err(TransportFailure::Connect("refused".into())),
            Err(TransportFailure::Connect("refused".into())),
            Err(TransportFailure::Connect("refused".into())),
            ok(ibm_time_series()),
        ]));
        let outcome = client(transport.clone())
            .fetch_and_classify(AvFunction::TimeSeriesDaily, &ibm())
            .await;

        assert_eq!(
            outcome,
            FetchOutcome::TransportError(TransportFailure::Connect("refused".into()))
        );
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_rate_limit() {
        let transport = Arc::new(ScriptedTransport::new([
            ok(rate_limit_body()),
            ok(ibm_time_series()),
        ]));
        let outcome = client(transport.clone())
            .fetch_and_classify(AvFunction::TimeSeriesDaily, &ibm())
            .await;

        assert_eq!(outcome, FetchOutcome::RateLimited);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn refresh_combines_time_series_and_overview() {
        let transport = Arc::new(ScriptedTransport::new([
            ok(ibm_time_series()),
            ok(ibm_overview()),
        ]));
        let outcome = client(transport.clone()).refresh(&ibm()).await;

        let FetchOutcome::Success(payload) = outcome else {
            panic!("expected a successful refresh");
        };
        assert_eq!(payload.timeseries, ibm_time_series());
        assert_eq!(payload.overview["Name"], "International Business Machines");
        assert_eq!(transport.query_param(1, "function").as_deref(), Some("OVERVIEW"));
    }

    #[tokio::test]
    async fn refresh_stops_at_first_failure() {
        let transport = Arc::new(ScriptedTransport::new([
            ok(ibm_time_series()),
            ok(rate_limit_body()),
        ]));
        let outcome = client(transport.clone()).refresh(&ibm()).await;
        assert_eq!(outcome, FetchOutcome::RateLimited);

        let transport = Arc::new(ScriptedTransport::new([ok(json!({}))]));
        let outcome = client(transport.clone()).refresh(&ibm()).await;
        assert_eq!(outcome, FetchOutcome::Empty);
        assert_eq!(transport.calls(), 1);
    }
}
