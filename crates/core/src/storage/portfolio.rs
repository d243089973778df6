use crate::portfolio::Strategy;
use anyhow::Context;
use sqlx::types::Json;
use uuid::Uuid;

pub async fn load_strategies(pool: &sqlx::PgPool) -> anyhow::Result<Vec<Strategy>> {
    let rows: Vec<(Json<Strategy>,)> =
        sqlx::query_as("SELECT strategy FROM portfolio_strategies ORDER BY created_at, id")
            .persistent(false)
            .fetch_all(pool)
            .await
            .context("select portfolio_strategies failed")?;
    Ok(rows.into_iter().map(|(Json(s),)| s).collect())
}

/// Inserts or replaces the stored copy of `strategy`.
pub async fn upsert_strategy(pool: &sqlx::PgPool, strategy: &Strategy) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO portfolio_strategies (id, opportunity_id, invested_amount, created_at, strategy) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (id) DO UPDATE SET strategy = EXCLUDED.strategy",
    )
    .persistent(false)
    .bind(strategy.id)
    .bind(&strategy.opportunity_id)
    .bind(strategy.invested_amount)
    .bind(strategy.created_at)
    .bind(Json(strategy))
    .execute(pool)
    .await
    .with_context(|| format!("upsert portfolio_strategies failed (id={})", strategy.id))?;
    Ok(())
}

pub async fn delete_strategy(pool: &sqlx::PgPool, id: Uuid) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM portfolio_strategies WHERE id = $1")
        .persistent(false)
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("delete portfolio_strategies failed (id={id})"))?;
    Ok(res.rows_affected() > 0)
}
