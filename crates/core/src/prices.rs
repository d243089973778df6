use crate::cache::TtlCache;
use crate::config::Settings;
use crate::ingest::{AssetPrice, CoinGeckoClient, PriceSource};
use crate::wallet::MockWallet;
use std::sync::Arc;
use std::time::Duration;

/// Cached spot prices used to revalue wallet holdings.
pub struct PriceFeed {
    source: Arc<dyn PriceSource>,
    cache: TtlCache<String, Vec<AssetPrice>>,
}

impl PriceFeed {
    pub fn new(source: Arc<dyn PriceSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: TtlCache::new(ttl),
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let source = Arc::new(CoinGeckoClient::from_settings(settings)?);
        Ok(Self::new(source, settings.price_cache_ttl))
    }

    pub fn source_name(&self) -> &'static str {
        self.source.source_name()
    }

    pub async fn quotes(
        &self,
        symbols: &[String],
        force_refresh: bool,
    ) -> anyhow::Result<Vec<AssetPrice>> {
        let mut wanted: Vec<String> = symbols.iter().map(|s| s.to_ascii_uppercase()).collect();
        wanted.sort_unstable();
        wanted.dedup();
        let key = wanted.join(",");

        let source = self.source.clone();
        self.cache
            .get_or_fetch(key, force_refresh, || async move { source.fetch_prices(&wanted).await })
            .await
    }

    /// Reprices `wallet` from live quotes. On failure the wallet keeps the
    /// prices it already has. Returns the number of holdings repriced.
    pub async fn revalue(&self, wallet: &tokio::sync::Mutex<MockWallet>) -> usize {
        let symbols = wallet.lock().await.symbols();
        match self.quotes(&symbols, false).await {
            Ok(quotes) => wallet.lock().await.apply_prices(&quotes),
            Err(err) => {
                tracing::warn!(
                    source = self.source_name(),
                    error = %err,
                    "price refresh failed; keeping last known prices"
                );
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::TokenHolding;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct StaticPrices {
        prices: Vec<AssetPrice>,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PriceSource for StaticPrices {
        fn source_name(&self) -> &'static str {
            "static"
        }

        async fn fetch_prices(&self, symbols: &[String]) -> anyhow::Result<Vec<AssetPrice>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("CoinGecko HTTP 429 Too Many Requests");
            }
            Ok(self
                .prices
                .iter()
                .filter(|p| symbols.contains(&p.symbol))
                .cloned()
                .collect())
        }
    }

    fn price(symbol: &str, price_usd: f64) -> AssetPrice {
        AssetPrice {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            price_usd,
            price_change_24h: 1.0,
        }
    }

    fn feed(fail: bool) -> (PriceFeed, Arc<StaticPrices>) {
        let source = Arc::new(StaticPrices {
            prices: vec![price("SOL", 200.0), price("ETH", 3_000.0)],
            fail,
            calls: AtomicUsize::new(0),
        });
        let feed = PriceFeed::new(source.clone(), Duration::from_secs(300));
        (feed, source)
    }

    fn connected_wallet() -> Mutex<MockWallet> {
        let mut wallet = MockWallet::default();
        wallet.connect("phantom", None).unwrap();
        Mutex::new(wallet)
    }

    fn holdings(wallet: &MockWallet) -> Vec<TokenHolding> {
        wallet.data().unwrap().tokens
    }

    fn holding_value(wallet: &MockWallet, symbol: &str) -> f64 {
        holdings(wallet)
            .into_iter()
            .find(|t| t.symbol == symbol)
            .map(|t| t.value_usd)
            .unwrap()
    }

    #[tokio::test]
    async fn live_quotes_reprice_matching_holdings() {
        let (feed, source) = feed(false);
        let wallet = connected_wallet();

        assert_eq!(feed.revalue(&wallet).await, 2);
        let wallet = wallet.lock().await;
        assert_eq!(holding_value(&wallet, "SOL"), 12.5 * 200.0);
        assert_eq!(holding_value(&wallet, "ETH"), 1.2 * 3_000.0);
        assert_eq!(holding_value(&wallet, "USDC"), 2_500.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn quotes_are_cached_per_symbol_set() {
        let (feed, source) = feed(false);
        let symbols = vec!["sol".to_string(), "ETH".to_string()];
        feed.quotes(&symbols, false).await.unwrap();
        feed.quotes(&["ETH".to_string(), "SOL".to_string()], false).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        feed.quotes(&symbols, true).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_seeded_prices() {
        let (feed, _) = feed(true);
        let wallet = connected_wallet();
        let before = holdings(&*wallet.lock().await);

        assert_eq!(feed.revalue(&wallet).await, 0);
        assert_eq!(holdings(&*wallet.lock().await), before);
    }
}
