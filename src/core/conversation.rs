use tracing::{debug, warn};

use crate::api::ChatMessage;
use crate::core::message::Message;
use crate::core::pipeline::{RenderSnapshot, StreamOutcome};
use crate::core::providers::ModelAvailability;

/// A transcript plus the per-model availability flags it updates.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    availability: ModelAvailability,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn availability(&self) -> &ModelAvailability {
        &self.availability
    }

    pub fn is_model_available(&self, model: &str) -> bool {
        self.availability.is_available(model)
    }

    /// Messages to send upstream; client notices are left out.
    pub fn api_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter_map(Message::to_api_message)
            .collect()
    }

    /// Persist the result of one assistant stream.
    ///
    /// Whatever text arrived is kept as the assistant message, even when the
    /// stream failed or was cancelled. A failure also appends a system notice
    /// and marks `model` unavailable until a later stream succeeds.
    pub fn record_stream(
        &mut self,
        model: &str,
        outcome: &StreamOutcome,
        snapshot: &RenderSnapshot,
    ) {
        let source = &snapshot.source_thinking;
        let (text, thinking) = if source.has_thinking() {
            (source.real_text.clone(), source.think_text.clone())
        } else {
            (snapshot.completed.trim().to_string(), String::new())
        };

        if !text.is_empty() || !thinking.is_empty() {
            self.messages
                .push(Message::assistant(text).with_thinking(thinking));
        }

        match outcome {
            StreamOutcome::Completed => {
                self.availability.mark_available(model);
                debug!(model, "stream completed");
            }
            StreamOutcome::Cancelled => debug!(model, "stream cancelled by user"),
            StreamOutcome::Failed(error) => {
                warn!(model, error = %error, "stream failed; marking model unavailable");
                self.messages.push(Message::stream_failure(error));
                self.availability.mark_unavailable(model);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;
    use crate::core::thinking::ThinkingExtractor;

    fn snapshot(text: &str) -> RenderSnapshot {
        RenderSnapshot {
            completed: text.to_string(),
            source_thinking: ThinkingExtractor::default().extract(text, true),
            finished: true,
            ..RenderSnapshot::default()
        }
    }

    #[test]
    fn failure_appends_system_message_and_marks_model_unavailable() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        conversation.record_stream(
            "llama3",
            &StreamOutcome::Failed("API Error: overloaded".into()),
            &snapshot("partial"),
        );

        let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::System]);
        assert!(conversation.messages()[2].content.contains("overloaded"));
        assert!(!conversation.is_model_available("llama3"));
        assert!(conversation.is_model_available("other"));
        assert_eq!(conversation.api_messages().len(), 2);
    }

    #[test]
    fn success_restores_availability() {
        let mut conversation = Conversation::new();
        conversation.record_stream("m", &StreamOutcome::Failed("x".into()), &snapshot(""));
        assert!(!conversation.is_model_available("m"));

        conversation.record_stream("m", &StreamOutcome::Completed, &snapshot("fine"));
        assert!(conversation.is_model_available("m"));
        assert_eq!(
            conversation.messages().last().map(|m| m.content.as_str()),
            Some("fine")
        );
    }

    #[test]
    fn thinking_is_stored_beside_the_answer() {
        let mut conversation = Conversation::new();
        conversation.record_stream(
            "m",
            &StreamOutcome::Completed,
            &snapshot("<think>why</think>because"),
        );
        let message = &conversation.messages()[0];
        assert_eq!(message.content, "because");
        assert_eq!(message.thinking.as_deref(), Some("why"));
    }

    #[test]
    fn stored_answer_is_the_raw_model_text() {
        use std::sync::Arc;

        use crate::core::aggregator::FlushPolicy;
        use crate::core::normalizer::ChatCompletionEvent;
        use crate::core::pipeline::MessagePipeline;
        use crate::core::segmenter::emoji::EmojiTable;
        use crate::core::segmenter::Segmenter;

        let answer = "Chart:\n```mermaid\npie\n\"A\" : 1\n```\nand <div>x</div> end \\[y\\]";
        let segmenter = Arc::new(Segmenter::new(Arc::new(EmojiTable::default())));
        let mut pipeline =
            MessagePipeline::new(segmenter, ThinkingExtractor::default(), FlushPolicy::default());
        pipeline.apply(ChatCompletionEvent::text(format!("<think>try $y$</think>{answer}")));
        pipeline.finalize();

        let mut conversation = Conversation::new();
        conversation.record_stream("m", &StreamOutcome::Completed, &pipeline.snapshot());
        let message = &conversation.messages()[0];
        assert_eq!(message.content, answer);
        assert_eq!(message.thinking.as_deref(), Some("try $y$"));
    }

    #[test]
    fn cancelled_empty_stream_adds_nothing() {
        let mut conversation = Conversation::new();
        conversation.record_stream("m", &StreamOutcome::Cancelled, &snapshot(""));
        assert!(conversation.messages().is_empty());
        assert!(conversation.is_model_available("m"));
    }
}
