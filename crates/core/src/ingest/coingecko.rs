use crate::config::Settings;
use crate::ingest::provider::{truncate, with_retries, DEFAULT_BACKOFF};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const MARKETS_PATH: &str = "/coins/markets";
const DEFAULT_RETRIES: u32 = 2;

/// Spot price of one asset in USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPrice {
    /// Upper-case ticker, e.g. `SOL`.
    pub symbol: String,
    pub name: String,
    pub price_usd: f64,
    pub price_change_24h: f64,
}

#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Prices for the given tickers. Tickers the source does not know are skipped.
    async fn fetch_prices(&self, symbols: &[String]) -> Result<Vec<AssetPrice>>;
}

/// CoinGecko market id for a wallet ticker.
pub fn coingecko_id(symbol: &str) -> Option<&'static str> {
    let id = match symbol.to_ascii_uppercase().as_str() {
        "SOL" => "solana",
        "USDC" => "usd-coin",
        "USDT" => "tether",
        "ETH" => "ethereum",
        "BTC" => "bitcoin",
        "RAY" => "raydium",
        "BONK" => "bonk",
        "JTO" => "jito-governance-token",
        "JUP" => "jupiter-exchange-solana",
        "ORCA" => "orca",
        "MSOL" => "msol",
        _ => return None,
    };
    Some(id)
}

#[derive(Debug, Deserialize)]
struct MarketRow {
    symbol: String,
    #[serde(default)]
    name: String,
    current_price: Option<f64>,
    price_change_percentage_24h: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CoinGeckoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
    backoff: Duration,
}

impl CoinGeckoClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        retries: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build CoinGecko http client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            retries: retries.max(1),
            backoff: DEFAULT_BACKOFF,
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .coingecko_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("COINGECKO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("COINGECKO_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        Self::new(
            base_url,
            settings.coingecko_api_key.clone(),
            retries,
            Duration::from_secs(timeout_secs),
        )
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), MARKETS_PATH)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-cg-demo-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(&self, ids: &str) -> Result<Vec<AssetPrice>> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&[
                ("vs_currency", "usd"),
                ("ids", ids),
                ("price_change_percentage", "24h"),
            ])
            .send()
            .await
            .context("CoinGecko request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read CoinGecko response")?;

        if !status.is_success() {
            anyhow::bail!("CoinGecko HTTP {status}: {}", truncate(&text, 256));
        }

        parse_markets(&text)
    }
}

#[async_trait::async_trait]
impl PriceSource for CoinGeckoClient {
    fn source_name(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch_prices(&self, symbols: &[String]) -> Result<Vec<AssetPrice>> {
        let mut ids: Vec<&str> = symbols.iter().filter_map(|s| coingecko_id(s)).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = ids.join(",");

        let prices =
            with_retries("CoinGecko", self.retries, self.backoff, || self.fetch_once(&ids)).await?;
        tracing::info!(prices = prices.len(), "fetched CoinGecko prices");
        Ok(prices)
    }
}

/// Decodes a `/coins/markets` body. Rows without a positive price are dropped.
pub fn parse_markets(text: &str) -> Result<Vec<AssetPrice>> {
    let rows = serde_json::from_str::<Vec<MarketRow>>(text)
        .context("failed to parse CoinGecko markets response")?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let price = row.current_price.filter(|p| p.is_finite() && *p > 0.0)?;
            Some(AssetPrice {
                symbol: row.symbol.to_ascii_uppercase(),
                name: row.name,
                price_usd: price,
                price_change_24h: row.price_change_percentage_24h.unwrap_or(0.0),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::stub::serve;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    #[test]
    fn parses_markets_and_drops_unpriced_rows() {
        let body = json!([
            {
                "id": "solana",
                "symbol": "sol",
                "name": "Solana",
                "current_price": 172.4,
                "price_change_percentage_24h": -2.5
            },
            {
                "id": "bonk",
                "symbol": "bonk",
                "name": "Bonk",
                "current_price": 0.000021,
                "price_change_percentage_24h": null
            },
            {"id": "dead", "symbol": "dead", "name": "Dead", "current_price": null}
        ])
        .to_string();

        let prices = parse_markets(&body).unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].symbol, "SOL");
        assert_eq!(prices[0].price_usd, 172.4);
        assert_eq!(prices[0].price_change_24h, -2.5);
        assert_eq!(prices[1].price_change_24h, 0.0);
    }

    #[test]
    fn rejects_non_array_body() {
        assert!(parse_markets(r#"{"status": {"error_code": 429}}"#).is_err());
    }

    #[test]
    fn maps_wallet_tickers_to_market_ids() {
        assert_eq!(coingecko_id("sol"), Some("solana"));
        assert_eq!(coingecko_id("JTO"), Some("jito-governance-token"));
        assert_eq!(coingecko_id("HIRAM"), None);
    }

    #[tokio::test]
    async fn fetch_retries_then_reads_markets() {
        let body = json!([{"symbol": "eth", "name": "Ethereum", "current_price": 3200.0}]);
        let body = body.to_string();
        let (url, hits) = serve(vec![(429, "slow down".to_string()), (200, body)]).await;
        let client = CoinGeckoClient::new(url, None, 2, Duration::from_secs(5))
            .unwrap()
            .with_backoff(Duration::ZERO);

        let prices = client
            .fetch_prices(&["ETH".to_string(), "HIRAM".to_string()])
            .await
            .unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].symbol, "ETH");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_tickers_skip_the_request() {
        let (url, hits) = serve(vec![(500, String::new())]).await;
        let client = CoinGeckoClient::new(url, None, 1, Duration::from_secs(5)).unwrap();

        assert!(client.fetch_prices(&["HIRAM".to_string()]).await.unwrap().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
