use crate::aggregator::{sort_opportunities, SortKey};
use crate::cache::TtlCache;
use crate::config::Settings;
use crate::domain::format_usd;
use crate::domain::insight::{
    default_title, Insight, InsightKind, InsightReport, InsightSource, MarketStats,
};
use crate::domain::opportunity::{Opportunity, RiskLevel, SUSPICIOUS_APY_THRESHOLD};
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::openai::PROMPT_OPPORTUNITIES;
use crate::llm::{InsightInput, LlmClient, OpenAiClient};
use crate::portfolio::PortfolioContext;
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

pub struct InsightService {
    client: Option<Arc<dyn LlmClient>>,
    cache: TtlCache<u64, InsightReport>,
}

impl InsightService {
    pub fn new(client: Option<Arc<dyn LlmClient>>, ttl: Duration) -> Self {
        Self {
            client,
            cache: TtlCache::new(ttl),
        }
    }

    /// Uses OpenAI when a key is configured, otherwise serves canned insights.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let client: Option<Arc<dyn LlmClient>> = match settings.openai_api_key {
            Some(_) => Some(Arc::new(OpenAiClient::from_settings(settings)?)),
            None => {
                tracing::info!("OPENAI_API_KEY not set; insights will use the built-in fallback");
                None
            }
        };
        Ok(Self::new(client, settings.insights_cache_ttl))
    }

    pub fn has_llm(&self) -> bool {
        self.client.is_some()
    }

    /// Market insights for `opportunities`, plus a portfolio insight when the
    /// user holds strategies.
    pub async fn report(
        &self,
        opportunities: &[Opportunity],
        portfolio: Option<&PortfolioContext>,
        force_refresh: bool,
    ) -> anyhow::Result<InsightReport> {
        let mut top = opportunities.to_vec();
        sort_opportunities(&mut top, SortKey::Score);
        top.truncate(PROMPT_OPPORTUNITIES);
        let analyzed = opportunities.len();
        let input = InsightInput {
            opportunities: top,
            stats: MarketStats::from_opportunities(opportunities),
            portfolio: portfolio.cloned(),
        };

        let Some(client) = self.client.clone() else {
            return Ok(fallback_report(&input, analyzed, None));
        };

        let key = fingerprint(&input, analyzed)?;
        let request = input.clone();
        let generated = self
            .cache
            .get_or_fetch(key, force_refresh, || async move {
                let stats = request.stats.clone();
                let out = client.generate_insights(request).await?;
                Ok(InsightReport {
                    summary: out.summary,
                    insights: out.insights,
                    source: InsightSource::Llm,
                    opportunities_analyzed: analyzed,
                    stats,
                    generated_at: Utc::now(),
                    error: None,
                })
            })
            .await;

        match generated {
            Ok(report) => Ok(report),
            Err(err) => {
                let transient = err
                    .downcast_ref::<LlmDiagnosticsError>()
                    .is_some_and(LlmDiagnosticsError::is_transient);
                tracing::warn!(
                    error = %err,
                    transient,
                    "LLM insight generation failed; serving fallback"
                );
                Ok(fallback_report(&input, analyzed, Some(err.to_string())))
            }
        }
    }
}

/// Cache key covering everything a generated report depends on: the prompt
/// input and the size of the feed it was drawn from.
///
/// Positions are keyed by what they hold, not by their accrued value, which
/// moves on every request.
pub fn fingerprint(input: &InsightInput, analyzed: usize) -> anyhow::Result<u64> {
    let mut hasher = DefaultHasher::new();
    serde_json::to_vec(&input.opportunities)?.hash(&mut hasher);
    serde_json::to_vec(&input.stats)?.hash(&mut hasher);
    analyzed.hash(&mut hasher);
    if let Some(portfolio) = &input.portfolio {
        for p in &portfolio.positions {
            p.project.hash(&mut hasher);
            p.symbol.hash(&mut hasher);
            p.chain.hash(&mut hasher);
            p.invested_amount.to_bits().hash(&mut hasher);
            p.current_apy.to_bits().hash(&mut hasher);
            p.risk_level.hash(&mut hasher);
        }
    }
    Ok(hasher.finish())
}

/// Insights computed locally from the numbers alone.
pub fn fallback_report(
    input: &InsightInput,
    analyzed: usize,
    error: Option<String>,
) -> InsightReport {
    let top = &input.opportunities;
    let stats = &input.stats;
    let mut insights = Vec::new();

    if analyzed > 0 {
        insights.push(Insight {
            kind: InsightKind::Trend,
            title: default_title(InsightKind::Trend).to_string(),
            content: format!(
                "Across {analyzed} pools the average APY is {:.2}% with {} of total value locked.",
                stats.avg_apy,
                format_usd(stats.total_tvl)
            ),
        });
    }

    if let Some(best) = top.first() {
        insights.push(Insight {
            kind: InsightKind::Opportunity,
            title: default_title(InsightKind::Opportunity).to_string(),
            content: format!(
                "{} {} on {} offers {:.2}% APY with {} TVL ({} risk, score {:.1}).",
                best.project,
                best.symbol,
                best.chain,
                best.apy,
                format_usd(best.tvl_usd),
                best.risk_level,
                best.opportunity_score
            ),
        });
    }

    if let Some(portfolio) = &input.portfolio {
        insights.push(portfolio_insight(portfolio, stats.avg_apy));
    }

    let risky = stats
        .risk_distribution
        .iter()
        .filter(|(level, _)| {
            level
                .parse::<RiskLevel>()
                .map(|l| l >= RiskLevel::High)
                .unwrap_or(false)
        })
        .map(|(_, n)| *n)
        .sum::<usize>();
    let suspicious = top.iter().filter(|o| o.apy > SUSPICIOUS_APY_THRESHOLD).count();
    if risky > 0 || suspicious > 0 {
        let mut content = format!("{risky} of {analyzed} pools carry High or Very High risk.");
        if suspicious > 0 {
            content.push_str(&format!(
                " {suspicious} of the top picks advertise APY above {SUSPICIOUS_APY_THRESHOLD:.0}%; such rates rarely last."
            ));
        }
        insights.push(Insight {
            kind: InsightKind::Warning,
            title: default_title(InsightKind::Warning).to_string(),
            content,
        });
    }

    let summary = match top.first() {
        Some(best) => format!(
            "Yield markets average {:.2}% APY; {} leads on a risk-adjusted basis at {:.2}%. \
Add an OpenAI API key for AI-powered analysis.",
            stats.avg_apy, best.project, best.apy
        ),
        None => "No yield opportunities are available right now.".to_string(),
    };

    InsightReport {
        summary,
        insights,
        source: InsightSource::Fallback,
        opportunities_analyzed: analyzed,
        stats: stats.clone(),
        generated_at: Utc::now(),
        error,
    }
}

fn portfolio_insight(portfolio: &PortfolioContext, market_apy: f64) -> Insight {
    let totals = &portfolio.totals;
    let mut content = format!(
        "{} active strategies across {} chains are worth {} at a weighted {:.2}% APY",
        totals.active_strategies,
        totals.active_chains,
        format_usd(totals.total_current_value),
        totals.weighted_apy
    );
    if market_apy > 0.0 {
        let relation = if totals.weighted_apy >= market_apy { "above" } else { "below" };
        content.push_str(&format!(", {relation} the {market_apy:.2}% market average"));
    }
    content.push('.');
    if let Some(level) = portfolio.risk.risk_level {
        content.push_str(&format!(
            " Overall risk is {level} (score {:.1}).",
            portfolio.risk.avg_risk_score
        ));
    }
    Insight {
        kind: InsightKind::Portfolio,
        title: default_title(InsightKind::Portfolio).to_string(),
        content,
    }
}
