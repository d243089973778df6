use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsResponse {
    #[serde(default)]
    pub status: Option<String>,
    pub data: Vec<LlamaPool>,
}

/// One pool row from the DeFiLlama yields API. Upstream leaves numeric fields
/// null freely, so everything but the identifiers is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlamaPool {
    #[serde(default)]
    pub pool: String,
    #[serde(default)]
    pub chain: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub tvl_usd: Option<f64>,
    #[serde(default)]
    pub apy: Option<f64>,
    #[serde(default)]
    pub apy_base: Option<f64>,
    #[serde(default)]
    pub apy_reward: Option<f64>,
    #[serde(default)]
    pub pool_meta: Option<String>,
    #[serde(default)]
    pub stablecoin: Option<bool>,
}

impl LlamaPool {
    pub fn is_usable(&self) -> bool {
        !self.chain.trim().is_empty() && !self.project.trim().is_empty()
    }
}
