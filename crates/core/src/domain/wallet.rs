use crate::domain::fees::{StakingInfo, HIRAM_PRICE_USD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenHolding {
    pub symbol: String,
    pub name: String,
    pub amount: f64,
    pub price_usd: f64,
    pub value_usd: f64,
    pub price_change_24h: f64,
    #[serde(rename = "yield", skip_serializing_if = "Option::is_none")]
    pub yield_pct: Option<f64>,
}

impl TokenHolding {
    pub fn revalue(&mut self) {
        self.value_usd = self.amount * self.price_usd;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakedAsset {
    pub protocol: String,
    pub token: String,
    pub amount: f64,
    pub value_usd: f64,
    pub apy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Swap,
    Deposit,
    Withdraw,
    Stake,
    Unstake,
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Confirmed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub protocol: String,
    pub token_in: Option<String>,
    pub token_out: Option<String>,
    pub amount: f64,
    pub value_usd: f64,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: String,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRecord {
    pub strategy_name: String,
    pub profit_amount: f64,
    pub fee_rate: f64,
    pub fee_amount: f64,
    pub discount: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub address: String,
    pub wallet_type: String,
    pub tokens: Vec<TokenHolding>,
    pub staked: Vec<StakedAsset>,
    pub transactions: Vec<Transaction>,
    pub staking: StakingInfo,
    pub fee_history: Vec<FeeRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalletSummary {
    pub balance_usd: f64,
    pub staked_usd: f64,
    pub annual_yield_usd: f64,
    pub yield_pct: f64,
}

impl WalletSnapshot {
    /// Totals across tokens, protocol stakes and the HIRAM staked with the platform.
    pub fn summary(&self) -> WalletSummary {
        let balance_usd: f64 = self.tokens.iter().map(|t| t.value_usd).sum();
        let platform_stake_usd = self.staking.amount * HIRAM_PRICE_USD;
        let staked_usd: f64 =
            self.staked.iter().map(|s| s.value_usd).sum::<f64>() + platform_stake_usd;
        let annual_yield_usd: f64 = self
            .staked
            .iter()
            .map(|s| s.value_usd * s.apy / 100.0)
            .sum::<f64>()
            + platform_stake_usd * self.staking.apy / 100.0;
        let yield_pct = if balance_usd > 0.0 {
            annual_yield_usd / balance_usd * 100.0
        } else {
            0.0
        };

        WalletSummary {
            balance_usd,
            staked_usd,
            annual_yield_usd,
            yield_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletStatus {
    pub connected: bool,
    pub address: Option<String>,
    pub wallet_type: Option<String>,
}
