//! Provider response normalization.
//!
//! Each provider family streams differently shaped JSON chunks. The adapters
//! in this module turn one decoded chunk into zero or more
//! [`ChatCompletionEvent`]s so that everything downstream of the transport
//! deals with a single event model.
//!
//! Adapters never synthesize [`ChatCompletionEvent::Finished`] on their own;
//! they only translate an explicit done flag or finish reason. Closing the
//! transport is the authoritative end of a stream and is handled by the
//! stream consumer in [`crate::core::pipeline`].

mod gemini;
mod ollama;
mod openai;

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;

use serde_json::Value;
use tracing::warn;

use crate::api::{ChatResponse, GeminiChunk, OllamaChunk};
use crate::core::providers::ProviderKind;

/// One normalized unit of streamed output.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCompletionEvent {
    TextDelta { text: String },
    InlineMedia { mime_type: String, data: Vec<u8> },
    FileMedia { mime_type: String, uri: String },
    StatsUpdate { stats: ChatStatics },
    Finished,
    Failure { message: String },
}

impl ChatCompletionEvent {
    pub fn text(text: impl Into<String>) -> Self {
        ChatCompletionEvent::TextDelta { text: text.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ChatCompletionEvent::Failure {
            message: message.into(),
        }
    }
}

/// Generation statistics. Durations are nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatStatics {
    pub total_duration: Option<u64>,
    pub load_duration: Option<u64>,
    pub prompt_eval_count: Option<u64>,
    pub prompt_eval_duration: Option<u64>,
    pub eval_count: Option<u64>,
    pub eval_duration: Option<u64>,
}

impl ChatStatics {
    pub fn is_empty(&self) -> bool {
        *self == ChatStatics::default()
    }

    /// Generated tokens per second, when both counters are known and the
    /// duration is non-zero.
    pub fn tokens_per_second(&self) -> Option<f64> {
        let count = self.eval_count?;
        let duration = self.eval_duration?;
        if duration == 0 {
            return None;
        }
        Some(count as f64 / (duration as f64 / 1_000_000_000.0))
    }

    pub fn prompt_tokens_per_second(&self) -> Option<f64> {
        let count = self.prompt_eval_count?;
        let duration = self.prompt_eval_duration?;
        if duration == 0 {
            return None;
        }
        Some(count as f64 / (duration as f64 / 1_000_000_000.0))
    }

    /// Overwrite every field `other` sets, keeping the rest.
    pub fn merge(&mut self, other: &ChatStatics) {
        fn take(slot: &mut Option<u64>, value: Option<u64>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.total_duration, other.total_duration);
        take(&mut self.load_duration, other.load_duration);
        take(&mut self.prompt_eval_count, other.prompt_eval_count);
        take(&mut self.prompt_eval_duration, other.prompt_eval_duration);
        take(&mut self.eval_count, other.eval_count);
        take(&mut self.eval_duration, other.eval_duration);
    }
}

/// Errors raised while decoding a provider chunk.
#[derive(Debug)]
pub enum NormalizeError {
    /// The payload was not valid JSON or did not match the provider shape.
    Decode {
        provider: ProviderKind,
        source: serde_json::Error,
    },
    /// Gemini inline media whose base64 body could not be decoded.
    InlineMedia {
        mime_type: String,
        source: base64::DecodeError,
    },
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::Decode { provider, source } => {
                write!(f, "Failed to decode {provider} stream chunk: {source}")
            }
            NormalizeError::InlineMedia { mime_type, source } => {
                write!(f, "Failed to decode inline {mime_type} data: {source}")
            }
        }
    }
}

impl StdError for NormalizeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            NormalizeError::Decode { source, .. } => Some(source),
            NormalizeError::InlineMedia { source, .. } => Some(source),
        }
    }
}

/// Stateful per-message normalizer.
///
/// The only state carried between chunks is the set of text parts already
/// emitted, used to drop the repeated parts some providers resend.
#[derive(Debug, Clone)]
pub struct Normalizer {
    kind: ProviderKind,
    seen_text: HashSet<String>,
}

impl Normalizer {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            seen_text: HashSet::new(),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Start a new message: forget previously seen text.
    pub fn reset(&mut self) {
        self.seen_text.clear();
    }

    /// Normalize one raw payload (an NDJSON line or an SSE `data:` body).
    ///
    /// Blank payloads yield nothing; undecodable ones yield a single
    /// [`ChatCompletionEvent::Failure`].
    pub fn normalize_payload(&mut self, payload: &str) -> Vec<ChatCompletionEvent> {
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => self.normalize_value(value),
            Err(source) => {
                let err = NormalizeError::Decode {
                    provider: self.kind,
                    source,
                };
                warn!(provider = %self.kind, error = %err, "undecodable stream payload");
                vec![ChatCompletionEvent::failure(err.to_string())]
            }
        }
    }

    /// Normalize one already-decoded chunk object.
    pub fn normalize_value(&mut self, value: Value) -> Vec<ChatCompletionEvent> {
        if value.is_null() {
            return Vec::new();
        }
        if value.get("error").is_some() {
            let summary = extract_error_summary(&value)
                .filter(|summary| !summary.is_empty())
                .unwrap_or_else(|| value.to_string());
            return vec![ChatCompletionEvent::failure(format!("API Error: {summary}"))];
        }

        let decoded = match self.kind {
            ProviderKind::Ollama => serde_json::from_value::<OllamaChunk>(value)
                .map(|chunk| ollama::normalize(&chunk)),
            ProviderKind::OpenAi => serde_json::from_value::<ChatResponse>(value)
                .map(|chunk| openai::normalize(&chunk)),
            ProviderKind::Gemini => serde_json::from_value::<GeminiChunk>(value)
                .map(|chunk| gemini::normalize(&chunk, &mut self.seen_text)),
        };

        decoded.unwrap_or_else(|source| {
            let err = NormalizeError::Decode {
                provider: self.kind,
                source,
            };
            warn!(provider = %self.kind, error = %err, "stream chunk did not match provider shape");
            vec![ChatCompletionEvent::failure(err.to_string())]
        })
    }
}

/// Pull a one-line human readable summary out of a provider error body.
pub fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

#[cfg(test)]
mod tests;
