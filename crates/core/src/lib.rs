pub mod domain;
pub mod error;
pub mod ingest;
pub mod lookup;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone, Default)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub alpha_vantage_url_base: Option<String>,
        pub alpha_vantage_api_key: Option<String>,
        pub alpha_vantage_rate_limit_marker: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                alpha_vantage_url_base: std::env::var("ALPHA_VANTAGE_URL_BASE").ok(),
                alpha_vantage_api_key: std::env::var("ALPHA_VANTAGE_API_KEY").ok(),
                alpha_vantage_rate_limit_marker: std::env::var("ALPHA_VANTAGE_RATE_LIMIT_MARKER")
                    .ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }
    }

    /// Reads an optional numeric override, falling back to `default` when unset or unparsable.
    pub fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
        std::env::var(key)
            .ok()
            .and_then(|s| s.trim().parse::<T>().ok())
            .unwrap_or(default)
    }
}
