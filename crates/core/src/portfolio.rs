use crate::domain::opportunity::{Opportunity, RiskLevel};
use crate::domain::projection::{
    compound_value, period_days, period_returns, project_return, round2, CompoundFrequency,
    PeriodReturns, Projection,
};
use crate::wallet::mock_tx_hash;
use anyhow::{ensure, Context};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

const MAX_SUGGESTIONS: usize = 3;
const SAME_CHAIN_UPLIFT: f64 = 1.2;
const OTHER_CHAIN_UPLIFT: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub opportunity_id: String,
    pub project: String,
    pub symbol: String,
    pub chain: String,
    pub initial_apy: f64,
    pub current_apy: f64,
    pub risk_level: RiskLevel,
    pub tvl_usd: f64,
    pub invested_amount: f64,
    pub duration_days: u32,
    pub compound_frequency: CompoundFrequency,
    pub created_at: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub tx_hash: String,
    pub current_value: f64,
    pub returns: f64,
    pub returns_pct: f64,
    pub period_returns: PeriodReturns,
    /// Compounded outcome at `end_date` at the APY seen when opened.
    pub expected: Projection,
}

impl Strategy {
    pub fn open(
        opp: &Opportunity,
        invested_amount: f64,
        duration_days: u32,
        compound_frequency: CompoundFrequency,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        ensure!(
            invested_amount.is_finite() && invested_amount > 0.0,
            "invested_amount must be positive (got {invested_amount})"
        );
        ensure!(duration_days > 0, "duration must be at least one day");

        let expected = project_return(invested_amount, opp.apy, duration_days, compound_frequency)?;

        Ok(Self {
            id: Uuid::new_v4(),
            opportunity_id: opp.id.clone(),
            project: opp.project.clone(),
            symbol: opp.symbol.clone(),
            chain: opp.chain.clone(),
            initial_apy: opp.apy,
            current_apy: opp.apy,
            risk_level: opp.risk_level,
            tvl_usd: opp.tvl_usd,
            invested_amount,
            duration_days,
            compound_frequency,
            created_at: now,
            end_date: now + Duration::days(i64::from(duration_days)),
            tx_hash: mock_tx_hash(),
            current_value: invested_amount,
            returns: 0.0,
            returns_pct: 0.0,
            period_returns: period_returns(invested_amount, opp.apy),
            expected,
        })
    }

    /// Re-prices against the latest APY. Strategies whose pool vanished from
    /// the feed keep their last known values.
    pub fn revalue(&mut self, latest: Option<&Opportunity>, now: DateTime<Utc>) {
        let Some(opp) = latest else {
            return;
        };
        let days_held = (now - self.created_at).num_days().max(0) as f64;

        self.current_apy = opp.apy;
        self.tvl_usd = opp.tvl_usd;
        self.current_value = round2(compound_value(
            self.invested_amount,
            opp.apy,
            days_held,
            self.compound_frequency,
        ));
        self.returns = round2(self.current_value - self.invested_amount);
        self.returns_pct = round2(self.returns / self.invested_amount * 100.0);
        self.period_returns = period_returns(self.invested_amount, opp.apy);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioTotals {
    pub total_invested: f64,
    pub total_current_value: f64,
    pub total_returns: f64,
    pub total_returns_pct: f64,
    /// Current-value-weighted APY across strategies.
    pub weighted_apy: f64,
    pub active_strategies: usize,
    pub active_chains: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioView {
    #[serde(flatten)]
    pub totals: PortfolioTotals,
    pub strategies: Vec<Strategy>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRisk {
    pub avg_risk_score: f64,
    pub risk_level: Option<RiskLevel>,
    pub risk_distribution: BTreeMap<String, f64>,
    pub chain_distribution: BTreeMap<String, f64>,
    pub project_distribution: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionPoint {
    pub month: u32,
    pub days: u32,
    pub value: f64,
    pub growth: f64,
    pub growth_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub initial_value: f64,
    pub current_apy_weighted: f64,
    pub final_value: f64,
    pub total_growth: f64,
    pub total_growth_pct: f64,
    pub projection: Vec<ProjectionPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedValue {
    pub date: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub period: String,
    pub initial_value: f64,
    pub final_value: f64,
    pub total_growth: f64,
    pub total_growth_pct: f64,
    pub avg_apy: f64,
    pub data: Vec<DatedValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPosition {
    pub project: String,
    pub chain: String,
    pub symbol: String,
    pub apy: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetterOpportunity {
    pub opportunity_id: String,
    pub project: String,
    pub chain: String,
    pub symbol: String,
    pub apy: f64,
    pub risk_level: RiskLevel,
    pub apy_difference: f64,
    pub potential_yearly_gain: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub strategy_id: Uuid,
    pub current_strategy: CurrentPosition,
    pub better_opportunities: Vec<BetterOpportunity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimization {
    pub current_apy_weighted: f64,
    pub suggestions: Vec<Suggestion>,
    pub total_potential_gain: f64,
    pub potential_apy_increase: f64,
}

/// One open position as the insight generator describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionBrief {
    pub project: String,
    pub symbol: String,
    pub chain: String,
    pub invested_amount: f64,
    pub current_value: f64,
    pub current_apy: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioContext {
    pub totals: PortfolioTotals,
    pub risk: PortfolioRisk,
    pub positions: Vec<PositionBrief>,
}

#[derive(Debug, Clone, Default)]
pub struct PortfolioBook {
    strategies: Vec<Strategy>,
    updated_at: Option<DateTime<Utc>>,
}

impl PortfolioBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_strategies(strategies: Vec<Strategy>) -> Self {
        Self {
            strategies,
            updated_at: None,
        }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn add_strategy(
        &mut self,
        opp: &Opportunity,
        invested_amount: f64,
        duration_days: u32,
        compound_frequency: CompoundFrequency,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Strategy> {
        let strategy =
            Strategy::open(opp, invested_amount, duration_days, compound_frequency, now)?;
        tracing::info!(
            strategy_id = %strategy.id,
            opportunity_id = %strategy.opportunity_id,
            invested_amount,
            "added strategy"
        );
        self.strategies.push(strategy.clone());
        self.updated_at = Some(now);
        Ok(strategy)
    }

    pub fn remove_strategy(&mut self, id: Uuid) -> anyhow::Result<Strategy> {
        let idx = self
            .strategies
            .iter()
            .position(|s| s.id == id)
            .with_context(|| format!("Strategy {id} not found"))?;
        let removed = self.strategies.remove(idx);
        tracing::info!(strategy_id = %id, "removed strategy");
        Ok(removed)
    }

    pub fn refresh(&mut self, opportunities: &[Opportunity], now: DateTime<Utc>) {
        for strategy in &mut self.strategies {
            let latest = opportunities.iter().find(|o| o.id == strategy.opportunity_id);
            strategy.revalue(latest, now);
        }
        self.updated_at = Some(now);
    }

    pub fn totals(&self) -> PortfolioTotals {
        let total_invested: f64 = self.strategies.iter().map(|s| s.invested_amount).sum();
        let total_current_value: f64 = self.strategies.iter().map(|s| s.current_value).sum();
        let total_returns = total_current_value - total_invested;
        let mut chains: Vec<String> = self
            .strategies
            .iter()
            .map(|s| s.chain.to_ascii_lowercase())
            .collect();
        chains.sort();
        chains.dedup();

        PortfolioTotals {
            total_invested: round2(total_invested),
            total_current_value: round2(total_current_value),
            total_returns: round2(total_returns),
            total_returns_pct: if total_invested > 0.0 {
                round2(total_returns / total_invested * 100.0)
            } else {
                0.0
            },
            weighted_apy: round2(self.weighted_apy()),
            active_strategies: self.strategies.len(),
            active_chains: chains.len(),
        }
    }

    pub fn view(&self) -> PortfolioView {
        PortfolioView {
            totals: self.totals(),
            strategies: self.strategies.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Snapshot handed to insight generation; `None` while the book is empty.
    pub fn insight_context(&self) -> Option<PortfolioContext> {
        if self.is_empty() {
            return None;
        }
        let positions = self
            .strategies
            .iter()
            .map(|s| PositionBrief {
                project: s.project.clone(),
                symbol: s.symbol.clone(),
                chain: s.chain.clone(),
                invested_amount: s.invested_amount,
                current_value: s.current_value,
                current_apy: s.current_apy,
                risk_level: s.risk_level,
            })
            .collect();
        Some(PortfolioContext {
            totals: self.totals(),
            risk: self.risk(),
            positions,
        })
    }

    fn weighted_apy(&self) -> f64 {
        let total: f64 = self.strategies.iter().map(|s| s.current_value).sum();
        if total <= 0.0 {
            return 0.0;
        }
        self.strategies
            .iter()
            .map(|s| s.current_apy * s.current_value / total)
            .sum()
    }

    /// Investment-weighted risk on the 0-100 scale, using each strategy's
    /// label rather than its raw score at open time.
    pub fn risk(&self) -> PortfolioRisk {
        let total: f64 = self.strategies.iter().map(|s| s.invested_amount).sum();
        let mut out = PortfolioRisk {
            avg_risk_score: 0.0,
            risk_level: None,
            risk_distribution: BTreeMap::new(),
            chain_distribution: BTreeMap::new(),
            project_distribution: BTreeMap::new(),
        };
        if total <= 0.0 {
            return out;
        }

        let mut score = 0.0;
        for s in &self.strategies {
            let weight = s.invested_amount / total;
            score += s.risk_level.nominal_score() * weight;
            *out.risk_distribution.entry(s.risk_level.to_string()).or_default() += weight;
            *out.chain_distribution.entry(s.chain.clone()).or_default() += weight;
            *out.project_distribution.entry(s.project.clone()).or_default() += weight;
        }

        for dist in [
            &mut out.risk_distribution,
            &mut out.chain_distribution,
            &mut out.project_distribution,
        ] {
            for v in dist.values_mut() {
                *v = round2(*v * 100.0);
            }
        }
        out.avg_risk_score = round2(score);
        out.risk_level = Some(RiskLevel::from_score(score));
        out
    }

    pub fn simulate(&self, days: u32) -> anyhow::Result<Simulation> {
        ensure!(!self.strategies.is_empty(), "No strategies in portfolio");

        let initial = self.strategies.iter().map(|s| s.current_value).sum::<f64>();
        let apy = self.weighted_apy();
        let monthly = 1.0 + apy / 100.0 / 12.0;

        let projection: Vec<ProjectionPoint> = (0..=days / 30)
            .map(|month| {
                let value = initial * monthly.powi(month as i32);
                let growth = value - initial;
                ProjectionPoint {
                    month,
                    days: month * 30,
                    value: round2(value),
                    growth: round2(growth),
                    growth_pct: if initial > 0.0 {
                        round2(growth / initial * 100.0)
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        let last = projection.last().copied().unwrap_or(ProjectionPoint {
            month: 0,
            days: 0,
            value: round2(initial),
            growth: 0.0,
            growth_pct: 0.0,
        });

        Ok(Simulation {
            initial_value: round2(initial),
            current_apy_weighted: round2(apy),
            final_value: last.value,
            total_growth: last.growth,
            total_growth_pct: last.growth_pct,
            projection,
        })
    }

    /// Simulation for a dashboard period selector, with each point dated so
    /// the series ends today.
    pub fn performance(&self, period: &str, now: DateTime<Utc>) -> anyhow::Result<Performance> {
        let days = period_days(period);
        let sim = self.simulate(days)?;
        let start = now - Duration::days(i64::from(days));

        let data = sim
            .projection
            .iter()
            .map(|p| DatedValue {
                date: (start + Duration::days(i64::from(p.days)))
                    .format("%Y-%m-%d")
                    .to_string(),
                value: p.value,
            })
            .collect();

        Ok(Performance {
            period: period.to_string(),
            initial_value: sim.initial_value,
            final_value: sim.final_value,
            total_growth: sim.total_growth,
            total_growth_pct: sim.total_growth_pct,
            avg_apy: sim.current_apy_weighted,
            data,
        })
    }

    pub fn optimization(&self, opportunities: &[Opportunity]) -> anyhow::Result<Optimization> {
        ensure!(!self.strategies.is_empty(), "No strategies in portfolio to optimize");

        let suggestions: Vec<Suggestion> = self
            .strategies
            .iter()
            .filter_map(|s| {
                let better = better_opportunities(s, opportunities);
                (!better.is_empty()).then(|| Suggestion {
                    strategy_id: s.id,
                    current_strategy: CurrentPosition {
                        project: s.project.clone(),
                        chain: s.chain.clone(),
                        symbol: s.symbol.clone(),
                        apy: s.current_apy,
                        risk_level: s.risk_level,
                    },
                    better_opportunities: better,
                })
            })
            .collect();

        let total_potential_gain: f64 = suggestions
            .iter()
            .filter_map(|s| s.better_opportunities.first())
            .map(|b| b.potential_yearly_gain)
            .sum();
        let total_value: f64 = self.strategies.iter().map(|s| s.current_value).sum();

        Ok(Optimization {
            current_apy_weighted: round2(self.weighted_apy()),
            suggestions,
            total_potential_gain: round2(total_potential_gain),
            potential_apy_increase: if total_value > 0.0 {
                round2(total_potential_gain / total_value * 100.0)
            } else {
                0.0
            },
        })
    }
}

fn better_opportunities(
    strategy: &Strategy,
    opportunities: &[Opportunity],
) -> Vec<BetterOpportunity> {
    let ceiling = strategy.risk_level.ceiling();
    let eligible = |o: &&Opportunity| o.id != strategy.opportunity_id && o.risk_score <= ceiling;
    let same_chain_floor = strategy.current_apy * SAME_CHAIN_UPLIFT;
    let other_chain_floor = strategy.current_apy * OTHER_CHAIN_UPLIFT;

    let mut picks: Vec<&Opportunity> = opportunities
        .iter()
        .filter(eligible)
        .filter(|o| o.is_on_chain(&strategy.chain) && o.apy > same_chain_floor)
        .collect();

    if picks.len() < MAX_SUGGESTIONS {
        picks.extend(
            opportunities
                .iter()
                .filter(eligible)
                .filter(|o| !o.is_on_chain(&strategy.chain) && o.apy > other_chain_floor),
        );
    }

    picks.sort_by(|a, b| b.apy.total_cmp(&a.apy));
    picks.truncate(MAX_SUGGESTIONS);

    picks
        .into_iter()
        .map(|o| {
            let diff = o.apy - strategy.current_apy;
            BetterOpportunity {
                opportunity_id: o.id.clone(),
                project: o.project.clone(),
                chain: o.chain.clone(),
                symbol: o.symbol.clone(),
                apy: o.apy,
                risk_level: o.risk_level,
                apy_difference: round2(diff),
                potential_yearly_gain: round2(strategy.invested_amount * diff / 100.0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::tests::llama;

    fn opp(id: &str, chain: &str, project: &str, apy: f64, tvl: f64) -> Opportunity {
        Opportunity::from_pool(&llama(id, chain, project, apy, tvl))
    }

    fn book_with(opps: &[(&Opportunity, f64)], now: DateTime<Utc>) -> PortfolioBook {
        let mut book = PortfolioBook::new();
        for (o, amount) in opps {
            book.add_strategy(o, *amount, 365, CompoundFrequency::Daily, now).unwrap();
        }
        book
    }

    #[test]
    fn add_strategy_validates_inputs() {
        let o = opp("a", "Solana", "orca", 10.0, 20_000_000.0);
        let mut book = PortfolioBook::new();
        let now = Utc::now();
        assert!(book.add_strategy(&o, 0.0, 30, CompoundFrequency::Daily, now).is_err());
        assert!(book.add_strategy(&o, 100.0, 0, CompoundFrequency::Daily, now).is_err());

        let s = book.add_strategy(&o, 1_000.0, 365, CompoundFrequency::Daily, now).unwrap();
        assert_eq!(s.current_value, 1_000.0);
        assert_eq!(s.period_returns.yearly, 100.0);
        assert!((s.expected.final_value - 1_000.0 * (1.0 + 0.1 / 365.0f64).powi(365)).abs() < 1e-6);
        assert_eq!(s.end_date - s.created_at, Duration::days(365));
    }

    #[test]
    fn refresh_compounds_by_elapsed_days() {
        let o = opp("a", "Solana", "orca", 12.0, 20_000_000.0);
        let opened = Utc::now();
        let mut book = book_with(&[(&o, 1_000.0)], opened);

        book.refresh(&[o.clone()], opened + Duration::days(30));
        let s = &book.strategies()[0];
        let expected = round2(1_000.0 * (1.0 + 0.12 / 365.0f64).powi(30));
        assert_eq!(s.current_value, expected);
        assert_eq!(s.returns, round2(expected - 1_000.0));

        let totals = book.totals();
        assert_eq!(totals.total_invested, 1_000.0);
        assert_eq!(totals.total_current_value, expected);
        assert_eq!(totals.active_chains, 1);
    }

    #[test]
    fn refresh_keeps_values_when_pool_disappears() {
        let o = opp("a", "Solana", "orca", 12.0, 20_000_000.0);
        let opened = Utc::now();
        let mut book = book_with(&[(&o, 1_000.0)], opened);
        book.refresh(&[], opened + Duration::days(90));
        assert_eq!(book.strategies()[0].current_value, 1_000.0);
        assert_eq!(book.strategies()[0].current_apy, 12.0);
    }

    #[test]
    fn remove_unknown_strategy_fails() {
        let mut book = PortfolioBook::new();
        let err = book.remove_strategy(Uuid::new_v4()).unwrap_err();
        assert!(err.to_string().starts_with("Strategy "));
    }

    #[test]
    fn risk_is_investment_weighted_label_score() {
        let low = opp("low", "Solana", "orca", 10.0, 20_000_000.0);
        let high = opp("high", "Ethereum", "unknown", 10.0, 50_000.0);
        assert_eq!(low.risk_level, RiskLevel::Low);
        assert_eq!(high.risk_level, RiskLevel::High);

        let book = book_with(&[(&low, 3_000.0), (&high, 1_000.0)], Utc::now());
        let risk = book.risk();
        assert_eq!(risk.avg_risk_score, 37.5);
        assert_eq!(risk.risk_level, Some(RiskLevel::Medium));
        assert_eq!(risk.risk_distribution["Low"], 75.0);
        assert_eq!(risk.chain_distribution["Ethereum"], 25.0);
    }

    #[test]
    fn empty_portfolio_has_no_risk_level_and_cannot_simulate() {
        let book = PortfolioBook::new();
        assert_eq!(book.risk().risk_level, None);
        assert!(book.simulate(365).is_err());
        assert!(book.optimization(&[]).is_err());
    }

    #[test]
    fn insight_context_is_absent_until_a_strategy_exists() {
        let mut book = PortfolioBook::new();
        assert!(book.insight_context().is_none());

        let o = opp("a", "Solana", "orca", 12.0, 20_000_000.0);
        book.add_strategy(&o, 2_500.0, 90, CompoundFrequency::Weekly, Utc::now()).unwrap();
        let ctx = book.insight_context().unwrap();
        assert_eq!(ctx.totals.active_strategies, 1);
        assert_eq!(ctx.risk.avg_risk_score, 25.0);
        assert_eq!(ctx.positions[0].project, "orca");
        assert_eq!(ctx.positions[0].invested_amount, 2_500.0);
    }

    #[test]
    fn simulation_compounds_monthly() {
        let o = opp("a", "Solana", "orca", 12.0, 20_000_000.0);
        let book = book_with(&[(&o, 1_000.0)], Utc::now());
        let sim = book.simulate(365).unwrap();
        assert_eq!(sim.projection.len(), 13);
        assert_eq!(sim.projection[0].value, 1_000.0);
        assert_eq!(sim.final_value, round2(1_000.0 * 1.01f64.powi(12)));

        let perf = book.performance("3m", Utc::now()).unwrap();
        assert_eq!(perf.data.len(), 4);
        assert_eq!(perf.avg_apy, 12.0);
    }

    #[test]
    fn optimization_prefers_same_chain_then_larger_uplift_elsewhere() {
        let current = opp("cur", "Solana", "orca", 10.0, 20_000_000.0);
        let feed = vec![
            current.clone(),
            opp("sol-better", "Solana", "raydium", 13.0, 20_000_000.0),
            opp("sol-marginal", "Solana", "raydium", 11.5, 20_000_000.0),
            opp("eth-better", "Ethereum", "marinade", 16.0, 20_000_000.0),
            opp("eth-marginal", "Ethereum", "marinade", 14.0, 20_000_000.0),
            opp("risky", "Solana", "unknown", 40.0, 50_000.0),
        ];
        let book = book_with(&[(&current, 1_000.0)], Utc::now());
        let opt = book.optimization(&feed).unwrap();

        let ids: Vec<_> = opt.suggestions[0]
            .better_opportunities
            .iter()
            .map(|b| b.opportunity_id.as_str())
            .collect();
        assert_eq!(ids, vec!["eth-better", "sol-better"]);
        assert_eq!(opt.suggestions[0].better_opportunities[0].potential_yearly_gain, 60.0);
        assert_eq!(opt.total_potential_gain, 60.0);
        assert_eq!(opt.potential_apy_increase, 6.0);
    }
}
