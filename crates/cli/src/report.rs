use chrono::{DateTime, Utc};
use hiram_core::aggregator::{filter_opportunities, sort_opportunities, OpportunityQuery, SortKey};
use hiram_core::domain::fees::{FeeBreakdown, StakingInfo};
use hiram_core::domain::format_usd;
use hiram_core::domain::insight::InsightReport;
use hiram_core::domain::opportunity::Opportunity;
use hiram_core::domain::projection::{CompoundFrequency, Projection};
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write;

const RULE_WIDTH: usize = 50;

#[derive(Debug, Clone)]
pub struct YieldFilter {
    pub chains: Vec<String>,
    pub min_yield: f64,
    pub min_tvl: f64,
    pub max_results: usize,
}

/// Best opportunities across the requested chains, highest APY first.
pub fn select_yields(all: &[Opportunity], filter: &YieldFilter) -> Vec<Opportunity> {
    let mut picked: Vec<Opportunity> = filter
        .chains
        .iter()
        .flat_map(|chain| {
            filter_opportunities(
                all,
                &OpportunityQuery {
                    chain: Some(chain.clone()),
                    min_apy: filter.min_yield,
                    min_tvl: filter.min_tvl,
                    limit: filter.max_results,
                    ..OpportunityQuery::default()
                },
            )
        })
        .collect();
    // Repeated or case-variant chains select the same pools more than once.
    let mut seen = HashSet::new();
    picked.retain(|o| seen.insert(o.id.clone()));
    sort_opportunities(&mut picked, SortKey::Apy);
    picked.truncate(filter.max_results);
    picked
}

fn banner(out: &mut String, title: &str) {
    let rule = "=".repeat(RULE_WIDTH);
    let _ = writeln!(out, "{rule}\n{title}\n{rule}");
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n{title}\n{}", "-".repeat(RULE_WIDTH));
}

pub fn render_yield_report(picked: &[Opportunity], generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    banner(&mut out, "YIELD REPORT");

    section(&mut out, "TOP YIELD OPPORTUNITIES");
    if picked.is_empty() {
        let _ = writeln!(out, "No yield opportunities matched the criteria.");
    }
    for (i, o) in picked.iter().enumerate() {
        let _ = writeln!(out, "{}. {} - {} - {}", i + 1, o.chain, o.project, o.symbol);
        let _ = writeln!(
            out,
            "   APY: {:.2}% | TVL: {} | Risk: {}\n",
            o.apy,
            format_usd(o.tvl_usd),
            o.risk_level
        );
    }

    if !picked.is_empty() {
        let avg_apy = picked.iter().map(|o| o.apy).sum::<f64>() / picked.len() as f64;
        let total_tvl: f64 = picked.iter().map(|o| o.tvl_usd).sum();
        let chains: BTreeSet<&str> = picked.iter().map(|o| o.chain.as_str()).collect();
        let projects: BTreeSet<&str> = picked.iter().map(|o| o.project.as_str()).collect();

        section(&mut out, "STATISTICS");
        let _ = writeln!(out, "Average APY: {avg_apy:.2}%");
        let _ = writeln!(out, "Total TVL: {}", format_usd(total_tvl));
        let _ = writeln!(out, "Chains: {}", chains.into_iter().collect::<Vec<_>>().join(", "));
        let _ = writeln!(out, "Protocols: {}", projects.into_iter().collect::<Vec<_>>().join(", "));
    }

    let _ = writeln!(out);
    banner(
        &mut out,
        &format!("Report generated at: {}", generated_at.format("%Y-%m-%d %H:%M:%S")),
    );
    out
}

pub fn render_insights(report: &InsightReport) -> String {
    let mut out = String::new();
    banner(&mut out, "MARKET INSIGHTS");
    let _ = writeln!(out, "{}", report.summary);
    for insight in &report.insights {
        let _ = writeln!(out, "\n[{:?}] {}\n{}", insight.kind, insight.title, insight.content);
    }
    if let Some(err) = &report.error {
        let _ = writeln!(out, "\n(LLM unavailable: {err})");
    }
    out
}

pub fn render_fees(staking: &StakingInfo, fee: Option<&FeeBreakdown>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Staked: {:.2} HIRAM (tier {}, {:.0}% fee discount, {:.1}% staking APY)",
        staking.amount, staking.tier, staking.fee_discount, staking.apy
    );
    match &staking.next_tier {
        Some(next) => {
            let _ = writeln!(
                out,
                "Next tier: {} at {:.0} HIRAM ({:.0} more)",
                next.tier,
                next.amount,
                (next.amount - staking.amount).max(0.0)
            );
        }
        None => {
            let _ = writeln!(out, "Highest tier reached");
        }
    }
    if let Some(fee) = fee {
        let _ = writeln!(
            out,
            "Profit {}: fee {:.3}% = {}, net {}",
            format_usd(fee.profit_amount),
            fee.effective_fee_percent,
            format_usd(fee.fee_amount),
            format_usd(fee.net_profit)
        );
    }
    out
}

pub fn render_projection(
    p: &Projection,
    apy: f64,
    days: u32,
    frequency: CompoundFrequency,
) -> String {
    format!(
        "{} at {apy:.2}% APY for {days} days ({} compounding)\nFinal value: {}\nProfit: {} ({:.2}% ROI)\n",
        format_usd(p.initial_value),
        frequency.as_str(),
        format_usd(p.final_value),
        format_usd(p.profit),
        p.roi_pct
    )
}
