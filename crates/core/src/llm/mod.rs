pub mod error;
pub mod json;
pub mod openai;

pub use openai::OpenAiClient;

use crate::domain::insight::{Insight, MarketStats};
use crate::domain::opportunity::Opportunity;
use crate::portfolio::PortfolioContext;

#[derive(Debug, Clone)]
pub struct InsightInput {
    /// Highest-scored opportunities, best first.
    pub opportunities: Vec<Opportunity>,
    pub stats: MarketStats,
    pub portfolio: Option<PortfolioContext>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedInsights {
    pub summary: String,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn generate_insights(&self, input: InsightInput) -> anyhow::Result<GeneratedInsights>;
}
