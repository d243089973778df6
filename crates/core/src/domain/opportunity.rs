use crate::ingest::LlamaPool;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_TVL_THRESHOLD: f64 = 100_000.0;
pub const MID_TVL_THRESHOLD: f64 = MIN_TVL_THRESHOLD * 5.0;
pub const HIGH_TVL_THRESHOLD: f64 = 10_000_000.0;
pub const SUSPICIOUS_APY_THRESHOLD: f64 = 100.0;

const ESTABLISHED_PROTOCOLS: [&str; 4] = ["raydium", "orca", "marinade", "solend"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 25.0 {
            Self::Low
        } else if score < 50.0 {
            Self::Medium
        } else if score < 75.0 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    /// Representative score used when only the label is known.
    pub fn nominal_score(self) -> f64 {
        match self {
            Self::Low => 25.0,
            Self::Medium => 50.0,
            Self::High => 75.0,
            Self::VeryHigh => 90.0,
        }
    }

    /// Highest risk score a replacement may carry to count as "similar risk".
    pub fn ceiling(self) -> f64 {
        match self {
            Self::Low => 35.0,
            Self::Medium => 60.0,
            Self::High => 85.0,
            Self::VeryHigh => 100.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::VeryHigh => "Very High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "veryhigh" => Ok(Self::VeryHigh),
            _ => anyhow::bail!("unknown risk level: {s}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Opportunity {
    pub id: String,
    pub project: String,
    pub symbol: String,
    pub chain: String,
    pub apy: f64,
    pub apy_base: Option<f64>,
    pub apy_reward: Option<f64>,
    pub tvl_usd: f64,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub opportunity_score: f64,
    pub estimated_return_1k_1y: f64,
    pub description: String,
}

impl Opportunity {
    pub fn from_pool(pool: &LlamaPool) -> Self {
        let apy = pool.apy.filter(|v| v.is_finite()).unwrap_or(0.0);
        let tvl_usd = pool.tvl_usd.filter(|v| v.is_finite()).unwrap_or(0.0);
        let risk_score = risk_score(apy, tvl_usd, &pool.project);

        Self {
            id: pool.pool.clone(),
            project: pool.project.clone(),
            symbol: pool.symbol.clone(),
            chain: pool.chain.clone(),
            apy,
            apy_base: pool.apy_base,
            apy_reward: pool.apy_reward,
            tvl_usd,
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            opportunity_score: opportunity_score(apy, risk_score),
            estimated_return_1k_1y: 1000.0 * apy / 100.0,
            description: describe(pool, apy),
        }
    }

    pub fn is_on_chain(&self, chain: &str) -> bool {
        self.chain.eq_ignore_ascii_case(chain.trim())
    }

    pub fn is_project(&self, project: &str) -> bool {
        self.project.eq_ignore_ascii_case(project.trim())
    }
}

/// Risk score in [0, 100]; lower is safer.
pub fn risk_score(apy: f64, tvl_usd: f64, project: &str) -> f64 {
    let mut score = 50.0;

    if tvl_usd >= HIGH_TVL_THRESHOLD {
        score -= 20.0;
    } else if tvl_usd >= MID_TVL_THRESHOLD {
        score -= 10.0;
    } else if tvl_usd < MIN_TVL_THRESHOLD {
        score += 20.0;
    }

    if apy > SUSPICIOUS_APY_THRESHOLD {
        score += ((apy - SUSPICIOUS_APY_THRESHOLD) / 10.0).min(40.0);
    }

    let project = project.trim().to_ascii_lowercase();
    if ESTABLISHED_PROTOCOLS.contains(&project.as_str()) {
        score -= 10.0;
    }

    score.clamp(0.0, 100.0)
}

/// Reward/risk blend in [0, 100]: 60% capped APY, 40% inverted risk.
pub fn opportunity_score(apy: f64, risk_score: f64) -> f64 {
    let apy_normalized = apy.clamp(0.0, 100.0);
    0.6 * apy_normalized + 0.4 * (100.0 - risk_score)
}

fn describe(pool: &LlamaPool, apy: f64) -> String {
    let project = &pool.project;
    let chain = &pool.chain;
    let symbol = &pool.symbol;
    let meta = pool.pool_meta.as_deref().unwrap_or("").to_ascii_lowercase();
    let project_lc = project.to_ascii_lowercase();

    if meta.contains("lp") || symbol.to_ascii_lowercase().contains("lp") || symbol.contains('-') {
        format!("Liquidity pool on {project} ({chain}) offering {apy:.2}% APY for providing liquidity with {symbol}")
    } else if project_lc.contains("lend") || project_lc == "solend" {
        format!("Lending opportunity on {project} ({chain}) offering {apy:.2}% APY for lending {symbol}")
    } else if project_lc.contains("stak") || meta.contains("stake") {
        format!("Staking pool on {project} ({chain}) offering {apy:.2}% APY for staking {symbol}")
    } else {
        format!("Yield opportunity on {project} ({chain}) offering {apy:.2}% APY for {symbol}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(project: &str, apy: f64, tvl: f64) -> LlamaPool {
        LlamaPool {
            pool: "p1".to_string(),
            chain: "Solana".to_string(),
            project: project.to_string(),
            symbol: "SOL".to_string(),
            tvl_usd: Some(tvl),
            apy: Some(apy),
            apy_base: None,
            apy_reward: None,
            pool_meta: None,
            stablecoin: None,
        }
    }

    #[test]
    fn risk_level_never_rises_with_tvl() {
        let tvls = [
            0.0, 50_000.0, 99_999.0, 100_000.0, 250_000.0, 500_000.0, 2_000_000.0,
            10_000_000.0, 1e9,
        ];
        for project in ["raydium", "unknown-dex"] {
            for apy in [3.0, 40.0, 150.0, 900.0] {
                let levels: Vec<_> = tvls
                    .iter()
                    .map(|tvl| RiskLevel::from_score(risk_score(apy, *tvl, project)))
                    .collect();
                for pair in levels.windows(2) {
                    assert!(
                        pair[1] <= pair[0],
                        "risk rose with TVL for {project} apy={apy}: {levels:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn high_tvl_established_protocol_is_low_risk() {
        let opp = Opportunity::from_pool(&pool("orca", 8.0, 25_000_000.0));
        assert_eq!(opp.risk_score, 20.0);
        assert_eq!(opp.risk_level, RiskLevel::Low);
        assert!((opp.opportunity_score - (0.6 * 8.0 + 0.4 * 80.0)).abs() < 1e-9);
        assert!((opp.estimated_return_1k_1y - 80.0).abs() < 1e-9);
    }

    #[test]
    fn suspicious_apy_penalty_is_capped() {
        assert_eq!(risk_score(150.0, 1_000_000.0, "x"), 45.0);
        assert_eq!(risk_score(10_000.0, 50_000.0, "x"), 100.0);
    }

    #[test]
    fn missing_numbers_default_to_zero() {
        let mut p = pool("orca", 0.0, 0.0);
        p.apy = None;
        p.tvl_usd = None;
        let opp = Opportunity::from_pool(&p);
        assert_eq!(opp.apy, 0.0);
        assert_eq!(opp.tvl_usd, 0.0);
        assert_eq!(opp.risk_level, RiskLevel::High);
    }

    #[test]
    fn parses_risk_level_labels() {
        assert_eq!("Very High".parse::<RiskLevel>().unwrap(), RiskLevel::VeryHigh);
        assert_eq!("very_high".parse::<RiskLevel>().unwrap(), RiskLevel::VeryHigh);
        assert_eq!("low".parse::<RiskLevel>().unwrap(), RiskLevel::Low);
        assert!("spicy".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn chain_match_ignores_case() {
        let opp = Opportunity::from_pool(&pool("orca", 8.0, 1.0));
        assert!(opp.is_on_chain("solana"));
        assert!(!opp.is_on_chain("ethereum"));
    }
}
