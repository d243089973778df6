pub mod coingecko;
pub mod provider;
pub mod types;

pub use coingecko::{AssetPrice, CoinGeckoClient, PriceSource};
pub use provider::{DefiLlamaClient, PoolSource};
pub use types::LlamaPool;
