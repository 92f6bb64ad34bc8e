use crate::api::OllamaChunk;

use super::{ChatCompletionEvent, ChatStatics};

pub(super) fn normalize(chunk: &OllamaChunk) -> Vec<ChatCompletionEvent> {
    let mut events = Vec::new();

    if let Some(message) = &chunk.message {
        if !message.content.is_empty() {
            events.push(ChatCompletionEvent::text(message.content.clone()));
        }
    }

    let stats = ChatStatics {
        total_duration: chunk.total_duration,
        load_duration: chunk.load_duration,
        prompt_eval_count: chunk.prompt_eval_count,
        prompt_eval_duration: chunk.prompt_eval_duration,
        eval_count: chunk.eval_count,
        eval_duration: chunk.eval_duration,
    };
    if !stats.is_empty() {
        events.push(ChatCompletionEvent::StatsUpdate { stats });
    }

    if chunk.done {
        events.push(ChatCompletionEvent::Finished);
    }

    events
}
