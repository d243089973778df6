use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Http,
    EmptyResponse,
    Parse,
}

impl FailureStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::EmptyResponse => "empty_response",
            Self::Parse => "parse",
        }
    }
}

/// Insight generation failure with whatever the model sent back attached.
#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: FailureStage,
    pub status: Option<u16>,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl LlmDiagnosticsError {
    pub fn new(provider: Provider, stage: FailureStage, detail: impl Into<String>) -> Self {
        Self {
            provider,
            stage,
            status: None,
            detail: detail.into(),
            raw_output: None,
            raw_response_json: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }

    pub fn with_response_json(mut self, json: Option<Value>) -> Self {
        self.raw_response_json = json;
        self
    }

    /// Rate limits and upstream 5xx are worth another try later; bad output is not.
    pub fn is_transient(&self) -> bool {
        matches!(self.status, Some(429) | Some(500..=599))
    }
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "insight generation failed (provider={:?}, stage={}",
            self.provider,
            self.stage.as_str()
        )?;
        if let Some(status) = self.status {
            write!(f, ", status={status}")?;
        }
        write!(f, "): {}", self.detail)
    }
}

impl std::error::Error for LlmDiagnosticsError {}
