pub mod aggregator;
pub mod cache;
pub mod domain;
pub mod ingest;
pub mod insights;
pub mod llm;
pub mod portfolio;
pub mod prices;
pub mod storage;
pub mod wallet;

pub mod config {
    use anyhow::Context;
    use std::time::Duration;

    const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
    const DEFAULT_INSIGHTS_CACHE_TTL_SECS: u64 = 8 * 3600;
    const DEFAULT_PRICE_CACHE_TTL_SECS: u64 = 300;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub openai_api_key: Option<String>,
        pub defillama_base_url: Option<String>,
        pub defillama_api_key: Option<String>,
        pub coingecko_base_url: Option<String>,
        pub coingecko_api_key: Option<String>,
        pub alchemy_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub cache_ttl: Duration,
        pub insights_cache_ttl: Duration,
        pub price_cache_ttl: Duration,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                openai_api_key: non_empty_var("OPENAI_API_KEY"),
                defillama_base_url: non_empty_var("DEFILLAMA_BASE_URL"),
                defillama_api_key: non_empty_var("DEFILLAMA_API_KEY"),
                coingecko_base_url: non_empty_var("COINGECKO_BASE_URL"),
                coingecko_api_key: non_empty_var("COINGECKO_API_KEY"),
                alchemy_api_key: non_empty_var("ALCHEMY_API_KEY"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                cache_ttl: secs_var("CACHE_TTL_SECS")?
                    .unwrap_or(Duration::from_secs(DEFAULT_CACHE_TTL_SECS)),
                insights_cache_ttl: secs_var("INSIGHTS_CACHE_TTL_SECS")?
                    .unwrap_or(Duration::from_secs(DEFAULT_INSIGHTS_CACHE_TTL_SECS)),
                price_cache_ttl: secs_var("PRICE_CACHE_TTL_SECS")?
                    .unwrap_or(Duration::from_secs(DEFAULT_PRICE_CACHE_TTL_SECS)),
            })
        }

        pub fn require_openai_api_key(&self) -> anyhow::Result<&str> {
            self.openai_api_key
                .as_deref()
                .context("OPENAI_API_KEY is required")
        }
    }

    // Placeholder values copied from .env templates count as unset.
    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && !v.starts_with("your_"))
    }

    fn secs_var(key: &str) -> anyhow::Result<Option<Duration>> {
        let Some(raw) = non_empty_var(key) else {
            return Ok(None);
        };
        let secs = raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be a whole number of seconds (got {raw:?})"))?;
        Ok(Some(Duration::from_secs(secs)))
    }
}
