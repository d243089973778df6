use crate::cache::TtlCache;
use crate::domain::opportunity::{Opportunity, RiskLevel};
use crate::ingest::PoolSource;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const POOLS_KEY: &str = "pools";
pub const DEFAULT_LIMIT: usize = 20;
const TOP_GROUPS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Apy,
    Tvl,
    Score,
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "apy" => Ok(Self::Apy),
            "tvl" | "tvlusd" | "tvl_usd" => Ok(Self::Tvl),
            "score" | "opportunity_score" => Ok(Self::Score),
            other => anyhow::bail!("unknown sort key: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpportunityQuery {
    pub chain: Option<String>,
    pub project: Option<String>,
    pub min_apy: f64,
    pub min_tvl: f64,
    pub max_risk: f64,
    pub risk_level: Option<RiskLevel>,
    pub sort: SortKey,
    pub limit: usize,
}

impl Default for OpportunityQuery {
    fn default() -> Self {
        Self {
            chain: None,
            project: None,
            min_apy: 0.0,
            min_tvl: 0.0,
            max_risk: 100.0,
            risk_level: None,
            sort: SortKey::Apy,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl OpportunityQuery {
    pub fn matches(&self, opp: &Opportunity) -> bool {
        if let Some(chain) = self.chain.as_deref() {
            if !opp.is_on_chain(chain) {
                return false;
            }
        }
        if let Some(project) = self.project.as_deref() {
            if !opp.is_project(project) {
                return false;
            }
        }
        if let Some(level) = self.risk_level {
            if opp.risk_level != level {
                return false;
            }
        }
        opp.apy >= self.min_apy && opp.tvl_usd >= self.min_tvl && opp.risk_score <= self.max_risk
    }
}

pub fn filter_opportunities(all: &[Opportunity], query: &OpportunityQuery) -> Vec<Opportunity> {
    let mut out: Vec<Opportunity> = all.iter().filter(|o| query.matches(o)).cloned().collect();
    sort_opportunities(&mut out, query.sort);
    out.truncate(query.limit);
    out
}

pub fn sort_opportunities(items: &mut [Opportunity], key: SortKey) {
    match key {
        SortKey::Apy => items.sort_by(|a, b| b.apy.total_cmp(&a.apy)),
        SortKey::Tvl => items.sort_by(|a, b| b.tvl_usd.total_cmp(&a.tvl_usd)),
        SortKey::Score => items.sort_by(|a, b| b.opportunity_score.total_cmp(&a.opportunity_score)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub count: usize,
    pub total_tvl: f64,
    pub avg_apy: f64,
    pub max_apy: f64,
    pub min_apy: f64,
    pub avg_risk: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedGroup {
    pub name: String,
    pub tvl: f64,
    pub avg_apy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOverview {
    pub total_tvl: f64,
    pub total_pools: usize,
    /// TVL-weighted across chains.
    pub avg_apy: f64,
    pub top_chains: Vec<RankedGroup>,
    pub top_projects: Vec<RankedGroup>,
}

pub fn group_stats<F>(
    all: &[Opportunity],
    key: F,
    with_chains: bool,
) -> BTreeMap<String, GroupStats>
where
    F: Fn(&Opportunity) -> &str,
{
    let mut grouped: BTreeMap<String, Vec<&Opportunity>> = BTreeMap::new();
    for opp in all {
        grouped.entry(key(opp).to_string()).or_default().push(opp);
    }

    grouped
        .into_iter()
        .map(|(name, members)| {
            let count = members.len();
            let n = count as f64;
            let chains = with_chains.then(|| {
                members
                    .iter()
                    .map(|o| o.chain.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            });
            let stats = GroupStats {
                count,
                total_tvl: members.iter().map(|o| o.tvl_usd).sum(),
                avg_apy: members.iter().map(|o| o.apy).sum::<f64>() / n,
                max_apy: members.iter().map(|o| o.apy).fold(f64::MIN, f64::max),
                min_apy: members.iter().map(|o| o.apy).fold(f64::MAX, f64::min),
                avg_risk: members.iter().map(|o| o.risk_score).sum::<f64>() / n,
                chains,
            };
            (name, stats)
        })
        .collect()
}

pub fn market_overview(all: &[Opportunity]) -> MarketOverview {
    let by_chain = group_stats(all, |o| &o.chain, false);
    let by_project = group_stats(all, |o| &o.project, false);

    let total_tvl: f64 = by_chain.values().map(|s| s.total_tvl).sum();
    let total_pools: usize = by_chain.values().map(|s| s.count).sum();
    let avg_apy = if total_tvl > 0.0 {
        by_chain
            .values()
            .map(|s| s.avg_apy * s.total_tvl / total_tvl)
            .sum()
    } else {
        0.0
    };

    MarketOverview {
        total_tvl,
        total_pools,
        avg_apy,
        top_chains: top_groups(&by_chain),
        top_projects: top_groups(&by_project),
    }
}

fn top_groups(stats: &BTreeMap<String, GroupStats>) -> Vec<RankedGroup> {
    let mut ranked: Vec<RankedGroup> = stats
        .iter()
        .map(|(name, s)| RankedGroup {
            name: name.clone(),
            tvl: s.total_tvl,
            avg_apy: s.avg_apy,
        })
        .collect();
    ranked.sort_by(|a, b| b.tvl.total_cmp(&a.tvl));
    ranked.truncate(TOP_GROUPS);
    ranked
}

/// Scored view over the pool source, memoized for the cache TTL.
pub struct YieldAggregator {
    source: Arc<dyn PoolSource>,
    cache: TtlCache<&'static str, Arc<Vec<Opportunity>>>,
}

impl YieldAggregator {
    pub fn new(source: Arc<dyn PoolSource>, ttl: Duration) -> Self {
        Self::with_cache(source, TtlCache::new(ttl))
    }

    pub fn with_cache(
        source: Arc<dyn PoolSource>,
        cache: TtlCache<&'static str, Arc<Vec<Opportunity>>>,
    ) -> Self {
        Self { source, cache }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.source_name()
    }

    pub async fn all(&self, force_refresh: bool) -> anyhow::Result<Arc<Vec<Opportunity>>> {
        let source = self.source.clone();
        self.cache
            .get_or_fetch(POOLS_KEY, force_refresh, || async move {
                let name = source.source_name();
                let pools = source
                    .fetch_pools()
                    .await
                    .with_context(|| format!("failed to fetch pools from {name}"))?;
                let scored: Vec<Opportunity> = pools.iter().map(Opportunity::from_pool).collect();
                tracing::info!(
                    source = source.source_name(),
                    opportunities = scored.len(),
                    "scored yield opportunities"
                );
                Ok(Arc::new(scored))
            })
            .await
    }

    pub async fn query(&self, query: &OpportunityQuery) -> anyhow::Result<Vec<Opportunity>> {
        let all = self.all(false).await?;
        Ok(filter_opportunities(&all, query))
    }

    pub async fn top_by_score(&self, n: usize) -> anyhow::Result<Vec<Opportunity>> {
        self.query(&OpportunityQuery {
            sort: SortKey::Score,
            limit: n,
            ..OpportunityQuery::default()
        })
        .await
    }

    pub async fn find(&self, id: &str) -> anyhow::Result<Option<Opportunity>> {
        let all = self.all(false).await?;
        Ok(all.iter().find(|o| o.id == id).cloned())
    }

    pub async fn stats_by_chain(&self) -> anyhow::Result<BTreeMap<String, GroupStats>> {
        let all = self.all(false).await?;
        Ok(group_stats(&all, |o| &o.chain, false))
    }

    pub async fn stats_by_project(&self) -> anyhow::Result<BTreeMap<String, GroupStats>> {
        let all = self.all(false).await?;
        Ok(group_stats(&all, |o| &o.project, true))
    }

    pub async fn market_overview(&self) -> anyhow::Result<MarketOverview> {
        let all = self.all(false).await?;
        Ok(market_overview(&all))
    }
}
