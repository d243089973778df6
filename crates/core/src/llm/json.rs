use crate::domain::insight::LlmInsightReport;
use crate::llm::GeneratedInsights;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// Parses a model reply into insights. Replies that are not JSON at all are
/// kept verbatim as the summary with no itemised insights.
pub fn parse_report(text: &str) -> anyhow::Result<GeneratedInsights> {
    let trimmed = text.trim();
    anyhow::ensure!(!trimmed.is_empty(), "LLM returned an empty reply");

    let json_str = extract_json(trimmed).unwrap_or_else(|| trimmed.to_string());
    match serde_json::from_str::<LlmInsightReport>(&json_str) {
        Ok(report) => {
            let (summary, insights) = report.validate_and_into_parts()?;
            Ok(GeneratedInsights { summary, insights })
        }
        Err(err) => {
            tracing::debug!(error = %err, "LLM reply is not structured; using it as plain summary");
            Ok(GeneratedInsights {
                summary: trimmed.to_string(),
                insights: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::insight::InsightKind;
    use serde_json::json;

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"a\":1}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let s = "prefix {\"a\":1} suffix";
        assert_eq!(extract_json(s), Some("{\"a\":1}".to_string()));
    }

    #[test]
    fn parse_report_accepts_fenced_json() {
        let body = json!({
            "summary": "Solana yields are healthy.",
            "insights": [
                {"kind": "opportunity", "title": "Raydium", "content": "SOL-USDC pays 22%."},
                {"kind": "warning", "content": "Watch reward emissions."}
            ]
        });
        let reply = format!("```json\n{body}\n```");
        let parsed = parse_report(&reply).unwrap();
        assert_eq!(parsed.summary, "Solana yields are healthy.");
        assert_eq!(parsed.insights.len(), 2);
        assert_eq!(parsed.insights[1].kind, InsightKind::Warning);
        assert_eq!(parsed.insights[1].title, "Risk Warning");
    }

    #[test]
    fn parse_report_keeps_prose_as_summary() {
        let reply = "  Overall the market is calm.\n- Orca looks good.  ";
        let parsed = parse_report(reply).unwrap();
        assert_eq!(parsed.summary, "Overall the market is calm.\n- Orca looks good.");
        assert!(parsed.insights.is_empty());
    }

    #[test]
    fn parse_report_rejects_blank_summary_and_empty_reply() {
        assert!(parse_report("{\"summary\": \"  \", \"insights\": []}").is_err());
        assert!(parse_report("   ").is_err());
    }
}
