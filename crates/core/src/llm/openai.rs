use crate::config::Settings;
use crate::domain::format_usd;
use crate::llm::error::{FailureStage, LlmDiagnosticsError};
use crate::llm::json;
use crate::llm::{GeneratedInsights, InsightInput, LlmClient, Provider};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_MAX_TOKENS: u32 = 350;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const TEMPERATURE: f32 = 0.7;

/// Opportunities listed in the prompt; the rest only feed the aggregate stats.
pub const PROMPT_OPPORTUNITIES: usize = 10;

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_openai_api_key()?.to_string();
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("OPENAI_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("OPENAI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> anyhow::Result<(serde_json::Value, ChatCompletionResponse)> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("OpenAI request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read OpenAI response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            let reason = status.canonical_reason().unwrap_or("unexpected status");
            return Err(LlmDiagnosticsError::new(Provider::OpenAI, FailureStage::Http, reason)
                .with_status(status.as_u16())
                .with_raw_output(text)
                .with_response_json(raw_response_json)
                .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse OpenAI response JSON: {text}"))?;
        let parsed = serde_json::from_value::<ChatCompletionResponse>(raw_json.clone())
            .context("failed to decode OpenAI response into ChatCompletionResponse")?;
        Ok((raw_json, parsed))
    }

    fn system_prompt() -> String {
        [
            "You are an expert in DeFi yield analysis, focused on Solana.",
            "Provide concise, valuable insights for yield farmers.",
            "Return ONLY a JSON object with this shape:",
            "{",
            "  \"summary\": \"2-3 sentence market assessment\",",
            "  \"insights\": [",
            "    {\"kind\": \"trend|opportunity|warning\", \"title\": \"short title\", \"content\": \"one or two sentences\"}",
            "  ]",
            "}",
        ]
        .join("\n")
    }

    fn user_prompt(input: &InsightInput) -> String {
        let listed = input
            .opportunities
            .iter()
            .take(PROMPT_OPPORTUNITIES)
            .enumerate()
            .map(|(i, o)| {
                format!(
                    "{}. {} - {}: {:.2}% APY, {} TVL, Risk: {}",
                    i + 1,
                    o.project,
                    o.symbol,
                    o.apy,
                    format_usd(o.tvl_usd),
                    o.risk_level
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let risk = input
            .stats
            .risk_distribution
            .iter()
            .map(|(level, count)| format!("{level}: {count}"))
            .collect::<Vec<_>>()
            .join(", ");

        let (holdings, portfolio_task) = match &input.portfolio {
            Some(p) => {
                let positions = p
                    .positions
                    .iter()
                    .map(|pos| {
                        format!(
                            "- {} - {} on {}: {} invested, {} now, {:.2}% APY, Risk: {}",
                            pos.project,
                            pos.symbol,
                            pos.chain,
                            format_usd(pos.invested_amount),
                            format_usd(pos.current_value),
                            pos.current_apy,
                            pos.risk_level
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                let level = p
                    .risk
                    .risk_level
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                (
                    format!(
                        "\n\nCurrent Portfolio:\n{positions}\n\
Total Value: {}\n\
Weighted APY: {:.2}%\n\
Portfolio Risk: {level} ({:.1})",
                        format_usd(p.totals.total_current_value),
                        p.totals.weighted_apy,
                        p.risk.avg_risk_score
                    ),
                    "\n5. One portfolio insight comparing the current positions with the market",
                )
            }
            None => (String::new(), ""),
        };

        format!(
            "Analyze these top yield farming opportunities:\n\n{listed}\n\n\
Additional Stats:\n\
Average APY: {:.2}%\n\
Total TVL: {}\n\
Risk Distribution: {risk}{holdings}\n\n\
Provide a concise analysis including:\n\
1. Overall market assessment (2-3 sentences) as the summary\n\
2. Best opportunities by risk level (2-3 opportunity insights)\n\
3. One notable trend or observation\n\
4. One cautionary note as a warning{portfolio_task}\n\n\
Keep the total response under 250 words.",
            input.stats.avg_apy,
            format_usd(input.stats.total_tvl),
        )
    }

    fn response_text(res: &ChatCompletionResponse) -> Option<&str> {
        res.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    async fn generate_insights(&self, input: InsightInput) -> anyhow::Result<GeneratedInsights> {
        let req = ChatCompletionRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: TEMPERATURE,
            messages: vec![
                Message {
                    role: "system",
                    content: Self::system_prompt(),
                },
                Message {
                    role: "user",
                    content: Self::user_prompt(&input),
                },
            ],
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let (raw_json, res) = self.create_completion(req).await?;

        if let Some(choice) = res.choices.first() {
            if choice.finish_reason.as_deref() == Some("length") {
                tracing::warn!(
                    max_tokens = self.max_tokens,
                    "OpenAI finish_reason=length; reply may be truncated"
                );
            }
        }

        let Some(text) = Self::response_text(&res) else {
            return Err(LlmDiagnosticsError::new(
                Provider::OpenAI,
                FailureStage::EmptyResponse,
                "no message content in first choice",
            )
            .with_response_json(Some(raw_json))
            .into());
        };

        json::parse_report(text).map_err(|err| {
            anyhow::Error::new(
                LlmDiagnosticsError::new(Provider::OpenAI, FailureStage::Parse, err.to_string())
                    .with_raw_output(text)
                    .with_response_json(Some(raw_json)),
            )
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::tests::llama;
    use crate::domain::insight::MarketStats;
    use crate::domain::opportunity::Opportunity;
    use crate::domain::projection::CompoundFrequency;
    use crate::portfolio::PortfolioBook;
    use chrono::Utc;
    use serde_json::json;

    fn input() -> InsightInput {
        let opportunities: Vec<Opportunity> = (0..12)
            .map(|i| {
                Opportunity::from_pool(&llama(
                    &format!("p{i}"),
                    "Solana",
                    "raydium",
                    20.0 - i as f64,
                    12_500_000.0,
                ))
            })
            .collect();
        let stats = MarketStats::from_opportunities(&opportunities);
        InsightInput {
            opportunities,
            stats,
            portfolio: None,
        }
    }

    #[test]
    fn prompt_lists_top_ten_with_stats() {
        let prompt = OpenAiClient::user_prompt(&input());
        assert!(prompt.contains("1. raydium - P0-USDC: 20.00% APY, $12,500,000.00 TVL, Risk: Low"));
        assert!(prompt.contains("10. raydium - P9-USDC"));
        assert!(!prompt.contains("11. "));
        assert!(prompt.contains("Total TVL: $150,000,000.00"));
        assert!(prompt.contains("Risk Distribution: Low: 12"));
        assert!(!prompt.contains("Current Portfolio:"));
    }

    #[test]
    fn prompt_describes_held_positions() {
        let mut input = input();
        let mut book = PortfolioBook::new();
        let now = Utc::now();
        book.add_strategy(&input.opportunities[0], 1_000.0, 30, CompoundFrequency::Daily, now)
            .unwrap();
        input.portfolio = book.insight_context();

        let prompt = OpenAiClient::user_prompt(&input);
        let first_position = "Current Portfolio:\n- raydium - P0-USDC on Solana: $1,000.00 invested,";
        assert!(prompt.contains(first_position));
        assert!(prompt.contains("Total Value: $1,000.00"));
        assert!(prompt.contains("5. One portfolio insight"));
    }

    #[test]
    fn request_serializes_json_response_format() {
        let req = ChatCompletionRequest {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: TEMPERATURE,
            messages: vec![Message {
                role: "user",
                content: "hi".to_string(),
            }],
            response_format: Some(ResponseFormat { kind: "json_object" }),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "gpt-3.5-turbo");
        assert_eq!(v["max_tokens"], 350);
        assert_eq!(v["response_format"]["type"], "json_object");
    }

    #[test]
    fn response_text_reads_first_choice() {
        let res: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [
                {
                    "index": 0,
                    "message": {"role": "assistant", "content": "  {\"summary\": \"ok\"} "},
                    "finish_reason": "stop"
                }
            ]
        }))
        .unwrap();
        assert_eq!(OpenAiClient::response_text(&res), Some("{\"summary\": \"ok\"}"));

        let empty: ChatCompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(OpenAiClient::response_text(&empty), None);
    }
}
