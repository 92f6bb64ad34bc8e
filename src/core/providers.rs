use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire shape a streaming endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Resolve the shape actually spoken by `endpoint`.
    ///
    /// Several hosts expose an OpenAI-compatible surface behind a different
    /// base provider (Gemini's `/openai/` path, Ollama's `/v1/` path), so the
    /// URL wins over the configured kind whenever it names such a surface.
    pub fn resolve(configured: ProviderKind, endpoint: &str) -> ProviderKind {
        let url = endpoint.to_ascii_lowercase();

        if url.contains("/openai/")
            || url.contains("/v1/chat/completions")
            || url.ends_with("/chat/completions")
        {
            return ProviderKind::OpenAi;
        }
        if url.contains("generativelanguage.googleapis.com") {
            return ProviderKind::Gemini;
        }
        if url.contains("/api/chat") {
            return ProviderKind::Ollama;
        }
        configured
    }

    /// Streaming endpoint path relative to the base URL.
    pub fn stream_path(self, model: &str) -> String {
        match self {
            ProviderKind::Ollama => "api/chat".to_string(),
            ProviderKind::OpenAi => "chat/completions".to_string(),
            ProviderKind::Gemini => format!("models/{model}:streamGenerateContent?alt=sse"),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" | "openai-compatible" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(format!("unknown provider kind: {other}")),
        }
    }
}

/// Per-model "available" flags.
///
/// A failed stream clears the flag so the next send can surface the problem
/// before retrying; a successful stream sets it again. Models never seen are
/// assumed available.
#[derive(Debug, Default, Clone)]
pub struct ModelAvailability {
    flags: HashMap<String, bool>,
}

impl ModelAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self, model: &str) -> bool {
        self.flags.get(model).copied().unwrap_or(true)
    }

    pub fn mark_available(&mut self, model: &str) {
        self.flags.insert(model.to_string(), true);
    }

    pub fn mark_unavailable(&mut self, model: &str) {
        self.flags.insert(model.to_string(), false);
    }
}
