use anyhow::ensure;
use serde::{Deserialize, Serialize};

pub const HIRAM_SYMBOL: &str = "HIRAM";
pub const HIRAM_PRICE_USD: f64 = 1.25;

/// Platform fee charged on strategy profit before any staking discount.
pub const BASE_FEE_PERCENT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeTier {
    pub tier: u8,
    pub amount: f64,
    pub fee_discount: f64,
    pub apy: f64,
}

pub const FEE_TIERS: [FeeTier; 5] = [
    FeeTier {
        tier: 0,
        amount: 0.0,
        fee_discount: 0.0,
        apy: 0.0,
    },
    FeeTier {
        tier: 1,
        amount: 1_000.0,
        fee_discount: 5.0,
        apy: 2.0,
    },
    FeeTier {
        tier: 2,
        amount: 10_000.0,
        fee_discount: 10.0,
        apy: 3.0,
    },
    FeeTier {
        tier: 3,
        amount: 100_000.0,
        fee_discount: 20.0,
        apy: 5.0,
    },
    FeeTier {
        tier: 4,
        amount: 500_000.0,
        fee_discount: 50.0,
        apy: 8.0,
    },
];

pub fn tier_for(staked: f64) -> FeeTier {
    FEE_TIERS
        .iter()
        .rev()
        .find(|t| staked >= t.amount)
        .copied()
        .unwrap_or(FEE_TIERS[0])
}

pub fn next_tier(current: &FeeTier) -> Option<NextTier> {
    FEE_TIERS
        .iter()
        .find(|t| t.tier == current.tier + 1)
        .map(|t| NextTier {
            tier: t.tier,
            amount: t.amount,
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NextTier {
    pub tier: u8,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakingInfo {
    pub amount: f64,
    pub tier: u8,
    pub fee_discount: f64,
    pub apy: f64,
    pub next_tier: Option<NextTier>,
    pub tier_info: Vec<FeeTier>,
}

impl StakingInfo {
    pub fn for_amount(amount: f64) -> Self {
        let tier = tier_for(amount);
        Self {
            amount,
            tier: tier.tier,
            fee_discount: tier.fee_discount,
            apy: tier.apy,
            next_tier: next_tier(&tier),
            tier_info: FEE_TIERS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub profit_amount: f64,
    pub base_fee_percent: f64,
    pub discount_percent: f64,
    pub effective_fee_percent: f64,
    pub fee_amount: f64,
    pub net_profit: f64,
}

/// Fee owed on `profit` for a wallet with `staked` HIRAM. The tier discount
/// scales the base fee rather than subtracting from it.
pub fn calculate_fee(profit: f64, staked: f64) -> anyhow::Result<FeeBreakdown> {
    ensure!(
        profit.is_finite() && profit >= 0.0,
        "profit must be a non-negative number (got {profit})"
    );
    ensure!(
        staked.is_finite() && staked >= 0.0,
        "staked amount must be a non-negative number (got {staked})"
    );

    let discount = tier_for(staked).fee_discount;
    let effective = BASE_FEE_PERCENT * (1.0 - discount / 100.0);
    let fee_amount = profit * effective / 100.0;

    Ok(FeeBreakdown {
        profit_amount: profit,
        base_fee_percent: BASE_FEE_PERCENT,
        discount_percent: discount,
        effective_fee_percent: effective,
        fee_amount,
        net_profit: profit - fee_amount,
    })
}
