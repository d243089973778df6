use crate::domain::opportunity::Opportunity;
use anyhow::ensure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MAX_INSIGHTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Trend,
    Opportunity,
    Portfolio,
    Warning,
    #[serde(other)]
    Note,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSource {
    Llm,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStats {
    pub avg_apy: f64,
    pub total_tvl: f64,
    pub risk_distribution: BTreeMap<String, usize>,
}

impl MarketStats {
    pub fn from_opportunities(opps: &[Opportunity]) -> Self {
        let total_tvl = opps.iter().map(|o| o.tvl_usd).sum();
        let avg_apy = if opps.is_empty() {
            0.0
        } else {
            opps.iter().map(|o| o.apy).sum::<f64>() / opps.len() as f64
        };
        let mut risk_distribution = BTreeMap::new();
        for o in opps {
            *risk_distribution.entry(o.risk_level.to_string()).or_insert(0) += 1;
        }
        Self {
            avg_apy,
            total_tvl,
            risk_distribution,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightReport {
    pub summary: String,
    pub insights: Vec<Insight>,
    pub source: InsightSource,
    pub opportunities_analyzed: usize,
    pub stats: MarketStats,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shape the model is asked to emit. Everything but the summary may be missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInsightReport {
    pub summary: String,
    #[serde(default)]
    pub insights: Vec<LlmInsight>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInsight {
    #[serde(default = "default_kind", alias = "type")]
    pub kind: InsightKind,
    #[serde(default)]
    pub title: String,
    pub content: String,
}

fn default_kind() -> InsightKind {
    InsightKind::Note
}

impl LlmInsightReport {
    pub fn validate_and_into_parts(self) -> anyhow::Result<(String, Vec<Insight>)> {
        let summary = self.summary.trim().to_string();
        ensure!(!summary.is_empty(), "LLM summary must be non-empty");

        let insights = self
            .insights
            .into_iter()
            .filter_map(|i| {
                let content = i.content.trim().to_string();
                if content.is_empty() {
                    return None;
                }
                let title = match i.title.trim() {
                    "" => default_title(i.kind).to_string(),
                    t => t.to_string(),
                };
                Some(Insight {
                    kind: i.kind,
                    title,
                    content,
                })
            })
            .take(MAX_INSIGHTS)
            .collect();

        Ok((summary, insights))
    }
}

pub fn default_title(kind: InsightKind) -> &'static str {
    match kind {
        InsightKind::Trend => "Market Trend",
        InsightKind::Opportunity => "Top Opportunity",
        InsightKind::Portfolio => "Portfolio Analysis",
        InsightKind::Warning => "Risk Warning",
        InsightKind::Note => "Observation",
    }
}
