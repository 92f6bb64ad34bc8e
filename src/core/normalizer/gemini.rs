use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

use crate::api::GeminiChunk;

use super::{ChatCompletionEvent, ChatStatics, NormalizeError};

/// Gemini may resend text parts it already streamed when a response spans
/// several candidates or parts; `seen` holds every text part emitted for the
/// current message so repeats are dropped. Whitespace-only parts are exempt,
/// they carry no identity and legitimately repeat.
pub(super) fn normalize(chunk: &GeminiChunk, seen: &mut HashSet<String>) -> Vec<ChatCompletionEvent> {
    let mut events = Vec::new();
    let mut finished = false;

    for candidate in &chunk.candidates {
        finished |= candidate.finish_reason.is_some();

        let Some(content) = &candidate.content else {
            continue;
        };

        for part in &content.parts {
            if let Some(text) = part.text.as_deref() {
                if text.is_empty() {
                    continue;
                }
                if !text.trim().is_empty() && !seen.insert(text.to_string()) {
                    debug!(len = text.len(), "dropping repeated gemini text part");
                    continue;
                }
                events.push(ChatCompletionEvent::text(text));
            }

            if let Some(inline) = &part.inline_data {
                match STANDARD.decode(inline.data.as_bytes()) {
                    Ok(data) => events.push(ChatCompletionEvent::InlineMedia {
                        mime_type: inline.mime_type.clone(),
                        data,
                    }),
                    Err(source) => {
                        let err = NormalizeError::InlineMedia {
                            mime_type: inline.mime_type.clone(),
                            source,
                        };
                        events.push(ChatCompletionEvent::failure(err.to_string()));
                    }
                }
            }

            if let Some(file) = &part.file_data {
                events.push(ChatCompletionEvent::FileMedia {
                    mime_type: file.mime_type.clone(),
                    uri: file.file_uri.clone(),
                });
            }
        }
    }

    if let Some(usage) = &chunk.usage_metadata {
        let stats = ChatStatics {
            prompt_eval_count: usage.prompt_token_count,
            eval_count: usage.candidates_token_count,
            ..ChatStatics::default()
        };
        if !stats.is_empty() {
            events.push(ChatCompletionEvent::StatsUpdate { stats });
        }
    }

    if finished {
        events.push(ChatCompletionEvent::Finished);
    }

    events
}
