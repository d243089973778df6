mod error;
mod routes;

use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hiram_core::aggregator::YieldAggregator;
use hiram_core::config::Settings;
use hiram_core::ingest::DefiLlamaClient;
use hiram_core::insights::InsightService;
use hiram_core::portfolio::PortfolioBook;
use hiram_core::prices::PriceFeed;

const DEFAULT_PORT: u16 = 8889;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    if settings.alchemy_api_key.is_some() {
        tracing::info!("ALCHEMY_API_KEY set; wallet data is still served from the mock wallet");
    }

    let pool = connect_db(&settings).await;
    let portfolio = match &pool {
        Some(pool) => match hiram_core::storage::portfolio::load_strategies(pool).await {
            Ok(strategies) => {
                tracing::info!(strategies = strategies.len(), "restored portfolio");
                PortfolioBook::from_strategies(strategies)
            }
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "failed to load portfolio; starting empty");
                PortfolioBook::new()
            }
        },
        None => PortfolioBook::new(),
    };

    let source = Arc::new(DefiLlamaClient::from_settings(&settings)?);
    let aggregator = YieldAggregator::new(source, settings.cache_ttl);
    let insights = InsightService::from_settings(&settings)?;
    let prices = PriceFeed::from_settings(&settings)?;
    tracing::info!(
        source = aggregator.source_name(),
        prices = prices.source_name(),
        llm = insights.has_llm(),
        "services ready"
    );

    let state = routes::AppState::new(aggregator, insights, portfolio, pool).with_prices(prices);
    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Persistence is optional: without a database the portfolio lives in memory only.
async fn connect_db(settings: &Settings) -> Option<PgPool> {
    let Some(db_url) = settings.database_url.as_deref() else {
        tracing::info!("DATABASE_URL not set; portfolio will not be persisted");
        return None;
    };

    match sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
    {
        Ok(pool) => match hiram_core::storage::migrate(&pool).await {
            Ok(()) => Some(pool),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db migrations failed; portfolio persistence disabled");
                None
            }
        },
        Err(e) => {
            let err = anyhow::Error::new(e);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "db connect failed; portfolio persistence disabled");
            None
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
