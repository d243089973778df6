use crate::error::ApiError;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use hiram_core::aggregator::{OpportunityQuery, SortKey, YieldAggregator, DEFAULT_LIMIT};
use hiram_core::domain::fees::{self, FeeBreakdown, FeeTier, StakingInfo, BASE_FEE_PERCENT};
use hiram_core::domain::insight::InsightReport;
use hiram_core::domain::opportunity::{Opportunity, RiskLevel};
use hiram_core::domain::projection::CompoundFrequency;
use hiram_core::domain::wallet::{FeeRecord, TokenHolding, TransactionKind, WalletStatus};
use hiram_core::insights::InsightService;
use hiram_core::portfolio::{
    Optimization, Performance, PortfolioBook, PortfolioRisk, PortfolioView,
};
use hiram_core::prices::PriceFeed;
use hiram_core::wallet::{MockWallet, StakeReceipt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<YieldAggregator>,
    pub insights: Arc<InsightService>,
    pub wallet: Arc<Mutex<MockWallet>>,
    pub portfolio: Arc<Mutex<PortfolioBook>>,
    pub prices: Option<Arc<PriceFeed>>,
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(
        aggregator: YieldAggregator,
        insights: InsightService,
        portfolio: PortfolioBook,
        pool: Option<PgPool>,
    ) -> Self {
        Self {
            aggregator: Arc::new(aggregator),
            insights: Arc::new(insights),
            wallet: Arc::new(Mutex::new(MockWallet::default())),
            portfolio: Arc::new(Mutex::new(portfolio)),
            prices: None,
            pool,
        }
    }

    /// Revalue wallet holdings from live quotes instead of the seeded prices.
    pub fn with_prices(mut self, prices: PriceFeed) -> Self {
        self.prices = Some(Arc::new(prices));
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/dashboard", get(dashboard))
        .route("/api/opportunities", get(opportunities))
        .route("/api/market", get(market))
        .route("/api/generate-insights", get(generate_insights))
        .route("/api/portfolio", get(portfolio))
        .route("/api/portfolio/add-strategy", post(add_strategy))
        .route("/api/portfolio/remove-strategy", post(remove_strategy))
        .route("/api/portfolio/performance", get(performance))
        .route("/api/portfolio/risk", get(portfolio_risk))
        .route("/api/portfolio/optimization", get(optimization))
        .route("/api/wallet/status", get(wallet_status))
        .route("/api/wallet/connect", post(connect_wallet))
        .route("/api/connect-wallet", post(connect_wallet))
        .route("/api/wallet/disconnect", post(disconnect_wallet))
        .route("/api/wallet/data", get(wallet_data))
        .route("/api/wallet/stake-hiram", post(stake_hiram))
        .route("/api/wallet/unstake-hiram", post(unstake_hiram))
        .route("/api/wallet/staking-info", get(staking_info))
        .route("/api/wallet/fee-history", get(fee_history))
        .route("/api/fees/tiers", get(fee_tiers))
        .route("/api/fees/calculate", get(calculate_fee))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(p)| p)
        .map_err(|rej| ApiError::bad_request(rej.body_text()))
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(b)| b)
        .map_err(|rej| ApiError::bad_request(rej.body_text()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Latest scored feed, or `None` when upstream is down and nothing is cached.
/// Refreshes token prices for a connected wallet. Seeded prices stay on failure.
async fn refresh_wallet_prices(state: &AppState) {
    let Some(prices) = &state.prices else {
        return;
    };
    if !state.wallet.lock().await.is_connected() {
        return;
    }
    prices.revalue(&state.wallet).await;
}

async fn latest_feed(state: &AppState) -> Option<Arc<Vec<Opportunity>>> {
    match state.aggregator.all(false).await {
        Ok(all) => Some(all),
        Err(err) => {
            tracing::warn!(
                error = %format!("{err:#}"),
                "opportunity feed unavailable; portfolio values not refreshed"
            );
            None
        }
    }
}

// ---- opportunities & market ----

#[derive(Debug, Default, Deserialize)]
struct OpportunitiesParams {
    limit: Option<usize>,
    #[serde(alias = "minApy")]
    min_apy: Option<f64>,
    #[serde(alias = "minTvl")]
    min_tvl: Option<f64>,
    #[serde(alias = "maxRisk")]
    max_risk: Option<f64>,
    chain: Option<String>,
    project: Option<String>,
    #[serde(alias = "riskLevel")]
    risk_level: Option<String>,
    sort: Option<String>,
}

impl OpportunitiesParams {
    fn into_query(self) -> Result<OpportunityQuery, ApiError> {
        let defaults = OpportunityQuery::default();
        let risk_level = non_blank(self.risk_level)
            .map(|s| s.parse::<RiskLevel>())
            .transpose()
            .map_err(ApiError::rejected)?;
        let sort = non_blank(self.sort)
            .map(|s| s.parse::<SortKey>())
            .transpose()
            .map_err(ApiError::rejected)?
            .unwrap_or(defaults.sort);

        Ok(OpportunityQuery {
            chain: non_blank(self.chain),
            project: non_blank(self.project),
            min_apy: self.min_apy.unwrap_or(defaults.min_apy),
            min_tvl: self.min_tvl.unwrap_or(defaults.min_tvl),
            max_risk: self.max_risk.unwrap_or(defaults.max_risk),
            risk_level,
            sort,
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
        })
    }
}

async fn opportunities(
    State(state): State<AppState>,
    params: Result<Query<OpportunitiesParams>, QueryRejection>,
) -> Result<Json<Vec<Opportunity>>, ApiError> {
    let query = query_params(params)?.into_query()?;
    let out = state
        .aggregator
        .query(&query)
        .await
        .map_err(ApiError::upstream)?;
    Ok(Json(out))
}

#[derive(Debug, Default, Deserialize)]
struct MarketParams {
    chain: Option<String>,
    project: Option<String>,
}

async fn market(
    State(state): State<AppState>,
    params: Result<Query<MarketParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let params = query_params(params)?;

    if let Some(chain) = non_blank(params.chain) {
        let stats = state
            .aggregator
            .stats_by_chain()
            .await
            .map_err(ApiError::upstream)?;
        let (_, found) = stats
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&chain))
            .ok_or_else(|| ApiError::not_found(format!("Chain {chain} not found")))?;
        return Ok(Json(found).into_response());
    }

    if let Some(project) = non_blank(params.project) {
        let stats = state
            .aggregator
            .stats_by_project()
            .await
            .map_err(ApiError::upstream)?;
        let (_, found) = stats
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&project))
            .ok_or_else(|| ApiError::not_found(format!("Project {project} not found")))?;
        return Ok(Json(found).into_response());
    }

    let overview = state
        .aggregator
        .market_overview()
        .await
        .map_err(ApiError::upstream)?;
    Ok(Json(overview).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct InsightParams {
    #[serde(default)]
    refresh: bool,
}

async fn generate_insights(
    State(state): State<AppState>,
    params: Result<Query<InsightParams>, QueryRejection>,
) -> Result<Json<InsightReport>, ApiError> {
    let params = query_params(params)?;
    let all = state
        .aggregator
        .all(false)
        .await
        .map_err(ApiError::upstream)?;
    let portfolio = {
        let mut book = state.portfolio.lock().await;
        book.refresh(&all, Utc::now());
        book.insight_context()
    };
    let report = state
        .insights
        .report(&all, portfolio.as_ref(), params.refresh)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(report))
}

// ---- dashboard & portfolio ----

#[derive(Debug, Serialize)]
struct DashboardView {
    total_value: f64,
    total_invested: f64,
    total_returns: f64,
    total_value_change: f64,
    avg_apy: f64,
    active_strategies: usize,
    active_chains: usize,
    risk_level: Option<String>,
    risk_score: f64,
    wallet_connected: bool,
    wallet_balance: f64,
    wallet_staked: f64,
    wallet_yield: f64,
    wallet_yield_pct: f64,
    wallet_tokens: Vec<TokenHolding>,
}

async fn dashboard(State(state): State<AppState>) -> Json<DashboardView> {
    let feed = latest_feed(&state).await;
    let (totals, risk) = {
        let mut book = state.portfolio.lock().await;
        if let Some(all) = &feed {
            book.refresh(all, Utc::now());
        }
        (book.totals(), book.risk())
    };
    refresh_wallet_prices(&state).await;
    let snapshot = state.wallet.lock().await.data().ok();
    let summary = snapshot.as_ref().map(|s| s.summary());

    Json(DashboardView {
        total_value: totals.total_current_value,
        total_invested: totals.total_invested,
        total_returns: totals.total_returns,
        total_value_change: totals.total_returns_pct,
        avg_apy: totals.weighted_apy,
        active_strategies: totals.active_strategies,
        active_chains: totals.active_chains,
        risk_level: risk.risk_level.map(|l| l.to_string()),
        risk_score: risk.avg_risk_score,
        wallet_connected: snapshot.is_some(),
        wallet_balance: summary.map(|s| s.balance_usd).unwrap_or(0.0),
        wallet_staked: summary.map(|s| s.staked_usd).unwrap_or(0.0),
        wallet_yield: summary.map(|s| s.annual_yield_usd).unwrap_or(0.0),
        wallet_yield_pct: summary.map(|s| s.yield_pct).unwrap_or(0.0),
        wallet_tokens: snapshot.map(|s| s.tokens).unwrap_or_default(),
    })
}

async fn portfolio(State(state): State<AppState>) -> Json<PortfolioView> {
    let feed = latest_feed(&state).await;
    let mut book = state.portfolio.lock().await;
    if let Some(all) = &feed {
        book.refresh(all, Utc::now());
    }
    Json(book.view())
}

#[derive(Debug, Deserialize)]
struct AddStrategyBody {
    opportunity_id: Option<String>,
    invested_amount: Option<f64>,
    duration: Option<u32>,
    compound_frequency: Option<String>,
}

async fn add_strategy(
    State(state): State<AppState>,
    body: Result<Json<AddStrategyBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = json_body(body)?;
    let (Some(opportunity_id), Some(invested_amount)) =
        (non_blank(body.opportunity_id), body.invested_amount)
    else {
        return Err(ApiError::bad_request("Missing required parameters"));
    };
    let frequency = match non_blank(body.compound_frequency) {
        Some(f) => f.parse::<CompoundFrequency>().map_err(ApiError::rejected)?,
        None => CompoundFrequency::default(),
    };

    let opp = state
        .aggregator
        .find(&opportunity_id)
        .await
        .map_err(ApiError::upstream)?
        .ok_or_else(|| ApiError::bad_request(format!("Opportunity {opportunity_id} not found")))?;

    let strategy = state
        .portfolio
        .lock()
        .await
        .add_strategy(&opp, invested_amount, body.duration.unwrap_or(365), frequency, Utc::now())
        .map_err(ApiError::rejected)?;

    if let Some(pool) = &state.pool {
        if let Err(err) = hiram_core::storage::portfolio::upsert_strategy(pool, &strategy).await {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, strategy_id = %strategy.id, "failed to persist strategy");
        }
    }

    record_wallet_activity(
        &state,
        TransactionKind::Deposit,
        &strategy.project,
        &strategy.symbol,
        invested_amount,
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": format!("Added strategy for {} on {}", strategy.symbol, strategy.project),
        "strategy": strategy,
    })))
}

#[derive(Debug, Deserialize)]
struct RemoveStrategyBody {
    strategy_id: Option<String>,
}

async fn remove_strategy(
    State(state): State<AppState>,
    body: Result<Json<RemoveStrategyBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = json_body(body)?;
    let raw_id = non_blank(body.strategy_id)
        .ok_or_else(|| ApiError::bad_request("Missing strategy_id parameter"))?;
    let id = Uuid::parse_str(&raw_id)
        .map_err(|_| ApiError::bad_request(format!("Strategy {raw_id} not found")))?;

    let removed = state
        .portfolio
        .lock()
        .await
        .remove_strategy(id)
        .map_err(ApiError::rejected)?;

    if let Some(pool) = &state.pool {
        if let Err(err) = hiram_core::storage::portfolio::delete_strategy(pool, id).await {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, strategy_id = %id, "failed to delete persisted strategy");
        }
    }

    record_wallet_activity(
        &state,
        TransactionKind::Withdraw,
        &removed.project,
        &removed.symbol,
        removed.current_value,
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": format!("Removed strategy for {} on {}", removed.symbol, removed.project),
        "removed_strategy": removed,
    })))
}

/// Mirrors portfolio moves into the mock wallet history when one is connected.
async fn record_wallet_activity(
    state: &AppState,
    kind: TransactionKind,
    protocol: &str,
    asset: &str,
    amount: f64,
) {
    let mut wallet = state.wallet.lock().await;
    if !wallet.is_connected() {
        return;
    }
    if let Err(err) = wallet.record_transaction(kind, protocol, asset, amount) {
        tracing::warn!(error = %err, "failed to record mock wallet transaction");
    }
}

#[derive(Debug, Default, Deserialize)]
struct PerformanceParams {
    period: Option<String>,
}

async fn performance(
    State(state): State<AppState>,
    params: Result<Query<PerformanceParams>, QueryRejection>,
) -> Result<Json<Performance>, ApiError> {
    let period = non_blank(query_params(params)?.period).unwrap_or_else(|| "1y".to_string());
    let feed = latest_feed(&state).await;
    let mut book = state.portfolio.lock().await;
    if let Some(all) = &feed {
        book.refresh(all, Utc::now());
    }
    let perf = book
        .performance(&period, Utc::now())
        .map_err(ApiError::rejected)?;
    Ok(Json(perf))
}

async fn portfolio_risk(State(state): State<AppState>) -> Json<PortfolioRisk> {
    Json(state.portfolio.lock().await.risk())
}

async fn optimization(State(state): State<AppState>) -> Result<Json<Optimization>, ApiError> {
    let all = state
        .aggregator
        .all(false)
        .await
        .map_err(ApiError::upstream)?;
    let mut book = state.portfolio.lock().await;
    book.refresh(&all, Utc::now());
    let out = book.optimization(&all).map_err(ApiError::rejected)?;
    Ok(Json(out))
}

// ---- wallet ----

async fn wallet_status(State(state): State<AppState>) -> Json<WalletStatus> {
    Json(state.wallet.lock().await.status())
}

#[derive(Debug, Deserialize)]
struct ConnectBody {
    wallet_type: Option<String>,
    #[serde(alias = "address")]
    wallet_address: Option<String>,
}

async fn connect_wallet(
    State(state): State<AppState>,
    body: Result<Json<ConnectBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = json_body(body)?;
    let wallet_type = non_blank(body.wallet_type)
        .ok_or_else(|| ApiError::bad_request("Missing wallet_type parameter"))?;

    let status = state
        .wallet
        .lock()
        .await
        .connect(&wallet_type, body.wallet_address)
        .map_err(ApiError::rejected)?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Connected to {wallet_type} wallet"),
        "wallet_address": status.address,
        "wallet_type": status.wallet_type,
    })))
}

async fn disconnect_wallet(State(state): State<AppState>) -> Json<Value> {
    state.wallet.lock().await.disconnect();
    Json(json!({ "success": true, "message": "Wallet disconnected" }))
}

async fn wallet_data(State(state): State<AppState>) -> Result<Response, ApiError> {
    refresh_wallet_prices(&state).await;
    let snapshot = state
        .wallet
        .lock()
        .await
        .data()
        .map_err(ApiError::rejected)?;
    Ok(Json(snapshot).into_response())
}

#[derive(Debug, Deserialize)]
struct AmountBody {
    amount: Option<f64>,
}

async fn stake_hiram(
    State(state): State<AppState>,
    body: Result<Json<AmountBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let amount = json_body(body)?
        .amount
        .ok_or_else(|| ApiError::bad_request("Missing amount parameter"))?;
    let receipt = state
        .wallet
        .lock()
        .await
        .stake_hiram(amount)
        .map_err(ApiError::rejected)?;
    Ok(Json(receipt_json(receipt)))
}

async fn unstake_hiram(
    State(state): State<AppState>,
    body: Result<Json<AmountBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let amount = json_body(body)?
        .amount
        .ok_or_else(|| ApiError::bad_request("Missing amount parameter"))?;
    let receipt = state
        .wallet
        .lock()
        .await
        .unstake_hiram(amount)
        .map_err(ApiError::rejected)?;
    Ok(Json(receipt_json(receipt)))
}

fn receipt_json(receipt: StakeReceipt) -> Value {
    json!({
        "success": true,
        "transaction": receipt.transaction,
        "new_staking_amount": receipt.new_staking_amount,
        "new_tier": receipt.new_tier,
        "fee_discount": receipt.fee_discount,
    })
}

async fn staking_info(State(state): State<AppState>) -> Result<Json<StakingInfo>, ApiError> {
    let info = state
        .wallet
        .lock()
        .await
        .staking_info()
        .map_err(ApiError::rejected)?;
    Ok(Json(info))
}

async fn fee_history(State(state): State<AppState>) -> Result<Json<Vec<FeeRecord>>, ApiError> {
    let history = state
        .wallet
        .lock()
        .await
        .fee_history()
        .map_err(ApiError::rejected)?;
    Ok(Json(history))
}

// ---- fees ----

#[derive(Debug, Serialize)]
struct FeeTable {
    base_fee_percent: f64,
    tiers: Vec<FeeTier>,
}

async fn fee_tiers() -> Json<FeeTable> {
    Json(FeeTable {
        base_fee_percent: BASE_FEE_PERCENT,
        tiers: fees::FEE_TIERS.to_vec(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct FeeParams {
    profit: Option<f64>,
    staked: Option<f64>,
}

async fn calculate_fee(
    State(state): State<AppState>,
    params: Result<Query<FeeParams>, QueryRejection>,
) -> Result<Json<FeeBreakdown>, ApiError> {
    let params = query_params(params)?;
    let profit = params
        .profit
        .ok_or_else(|| ApiError::bad_request("Missing profit parameter"))?;
    let staked = match params.staked {
        Some(s) => s,
        None => {
            let wallet = state.wallet.lock().await;
            if wallet.is_connected() {
                wallet.staked_hiram()
            } else {
                0.0
            }
        }
    };
    let breakdown = fees::calculate_fee(profit, staked).map_err(ApiError::rejected)?;
    Ok(Json(breakdown))
}
