use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hiram_core::aggregator::YieldAggregator;
use hiram_core::config::Settings;
use hiram_core::domain::fees::{calculate_fee, StakingInfo};
use hiram_core::domain::projection::{project_return, CompoundFrequency};
use hiram_core::ingest::DefiLlamaClient;
use hiram_core::insights::InsightService;

mod report;

#[derive(Debug, Parser)]
#[command(name = "hiramabiff-cli", version, about = "DeFi yield tools")]
struct Args {
    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find the best yields across chains.
    Yield {
        #[arg(long, num_args = 1.., default_values = ["Solana", "Ethereum"])]
        chains: Vec<String>,
        /// Minimum APY in percent.
        #[arg(long, default_value_t = 5.0)]
        min_yield: f64,
        #[arg(long, default_value_t = 500_000.0)]
        min_tvl: f64,
        #[arg(long, default_value_t = 5)]
        max_results: usize,
    },
    /// Generate market insights for the top-scored opportunities.
    Insights {
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Show the HIRAM staking tier and, optionally, the fee on a profit.
    Fees {
        #[arg(long)]
        staked: f64,
        #[arg(long)]
        profit: Option<f64>,
    },
    /// Project compound growth of an investment.
    Project {
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        apy: f64,
        #[arg(long, default_value_t = 365)]
        days: u32,
        #[arg(long, default_value = "daily")]
        frequency: CompoundFrequency,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let res = run(args.command, &settings).await;
    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "command failed");
    }
    res
}

async fn run(command: Command, settings: &Settings) -> anyhow::Result<()> {
    match command {
        Command::Yield {
            chains,
            min_yield,
            min_tvl,
            max_results,
        } => {
            tracing::info!(?chains, min_yield, min_tvl, "starting yield finder");
            let aggregator = aggregator(settings)?;
            let all = aggregator.all(false).await?;
            let picked = report::select_yields(
                &all,
                &report::YieldFilter {
                    chains,
                    min_yield,
                    min_tvl,
                    max_results,
                },
            );
            if picked.is_empty() {
                tracing::warn!("no yield opportunities found matching the criteria");
            }
            print!("{}", report::render_yield_report(&picked, chrono::Utc::now()));
        }
        Command::Insights { top } => {
            let aggregator = aggregator(settings)?;
            let insights = InsightService::from_settings(settings)?;
            let ranked = aggregator.top_by_score(top).await?;
            let out = insights.report(&ranked, None, false).await?;
            print!("{}", report::render_insights(&out));
        }
        Command::Fees { staked, profit } => {
            anyhow::ensure!(staked.is_finite() && staked >= 0.0, "--staked must be non-negative");
            let fee = profit.map(|p| calculate_fee(p, staked)).transpose()?;
            print!("{}", report::render_fees(&StakingInfo::for_amount(staked), fee.as_ref()));
        }
        Command::Project {
            amount,
            apy,
            days,
            frequency,
        } => {
            let projection = project_return(amount, apy, days, frequency)?;
            print!("{}", report::render_projection(&projection, apy, days, frequency));
        }
    }
    Ok(())
}

fn aggregator(settings: &Settings) -> anyhow::Result<YieldAggregator> {
    let source = Arc::new(DefiLlamaClient::from_settings(settings)?);
    Ok(YieldAggregator::new(source, settings.cache_ttl))
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yield_defaults_match_documented_flags() {
        let args = Args::try_parse_from(["hiramabiff-cli", "yield"]).unwrap();
        let Command::Yield {
            chains,
            min_yield,
            min_tvl,
            max_results,
        } = args.command
        else {
            panic!("expected yield command");
        };
        assert_eq!(chains, vec!["Solana", "Ethereum"]);
        assert_eq!(min_yield, 5.0);
        assert_eq!(min_tvl, 500_000.0);
        assert_eq!(max_results, 5);
    }

    #[test]
    fn project_parses_frequency() {
        let args = Args::try_parse_from([
            "hiramabiff-cli",
            "--verbose",
            "project",
            "--amount",
            "1000",
            "--apy",
            "12",
            "--frequency",
            "monthly",
        ])
        .unwrap();
        assert!(args.verbose);
        assert!(matches!(
            args.command,
            Command::Project {
                days: 365,
                frequency: CompoundFrequency::Monthly,
                ..
            }
        ));
        assert!(Args::try_parse_from([
            "hiramabiff-cli",
            "project",
            "--amount",
            "1",
            "--apy",
            "1",
            "--frequency",
            "hourly",
        ])
        .is_err());
    }
}
