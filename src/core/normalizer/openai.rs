use crate::api::ChatResponse;

use super::{ChatCompletionEvent, ChatStatics};

pub(super) fn normalize(chunk: &ChatResponse) -> Vec<ChatCompletionEvent> {
    let mut events = Vec::new();
    let mut finished = false;

    for choice in &chunk.choices {
        if let Some(content) = choice.delta.content.as_deref() {
            if !content.is_empty() {
                events.push(ChatCompletionEvent::text(content));
            }
        }
        finished |= choice.finish_reason.is_some();
    }

    if let Some(usage) = &chunk.usage {
        let stats = ChatStatics {
            prompt_eval_count: usage.prompt_tokens,
            eval_count: usage.completion_tokens,
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
