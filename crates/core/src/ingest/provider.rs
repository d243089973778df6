use crate::config::Settings;
use crate::ingest::types::{LlamaPool, PoolsResponse};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use std::future::Future;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://yields.llama.fi";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PATH: &str = "/pools";
const DEFAULT_RETRIES: u32 = 3;
pub(crate) const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

#[async_trait::async_trait]
pub trait PoolSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn fetch_pools(&self) -> Result<Vec<LlamaPool>>;
}

#[derive(Debug, Clone)]
pub struct DefiLlamaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
    backoff: Duration,
}

impl DefiLlamaClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        retries: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build DeFiLlama http client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            retries: retries.max(1),
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Base delay before the first retry; later retries double it.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .defillama_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_key = settings.defillama_api_key.clone();

        let timeout_secs = std::env::var("DEFILLAMA_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("DEFILLAMA_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        Self::new(base_url, api_key, retries, Duration::from_secs(timeout_secs))
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), DEFAULT_PATH)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(&self) -> Result<Vec<LlamaPool>> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .send()
            .await
            .context("DeFiLlama request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read DeFiLlama response")?;

        if !status.is_success() {
            anyhow::bail!("DeFiLlama HTTP {status}: {}", truncate(&text, 256));
        }

        parse_pools(&text)
    }
}

#[async_trait::async_trait]
impl PoolSource for DefiLlamaClient {
    fn source_name(&self) -> &'static str {
        "defillama"
    }

    async fn fetch_pools(&self) -> Result<Vec<LlamaPool>> {
        let pools =
            with_retries("DeFiLlama", self.retries, self.backoff, || self.fetch_once()).await?;
        tracing::info!(pools = pools.len(), "fetched DeFiLlama pools");
        Ok(pools)
    }
}

/// Delay before retry number `attempt` (1-based): `base`, then doubling.
pub(crate) fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp)
}

/// Runs `op` up to `retries` times, sleeping on the backoff schedule between
/// failures. The last error is returned once attempts run out.
pub(crate) async fn with_retries<T, F, Fut>(
    upstream: &str,
    retries: u32,
    base: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= retries.max(1) => return Err(err),
            Err(err) => {
                let backoff = backoff_delay(attempt, base);
                tracing::warn!(upstream, attempt, ?backoff, error = %err, "fetch failed; retrying");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

pub fn parse_pools(text: &str) -> Result<Vec<LlamaPool>> {
    let parsed = serde_json::from_str::<PoolsResponse>(text)
        .context("failed to parse DeFiLlama response into PoolsResponse")?;
    if let Some(status) = parsed.status.as_deref() {
        anyhow::ensure!(status == "success", "DeFiLlama returned status={status}");
    }

    let total = parsed.data.len();
    let pools: Vec<_> = parsed.data.into_iter().filter(LlamaPool::is_usable).collect();
    if pools.len() < total {
        tracing::debug!(dropped = total - pools.len(), "dropped pools without chain or project");
    }
    Ok(pools)
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
