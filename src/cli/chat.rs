use std::error::Error;
use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cli::print_snapshot;
use crate::core::chat_stream::{ChatStreamService, StreamParams};
use crate::core::config::Config;
use crate::core::conversation::Conversation;
use crate::core::pipeline::{drive_stream, ChannelSource, MessagePipeline, StreamOutcome};
use crate::core::segmenter::Segmenter;
use crate::core::thinking::ThinkingExtractor;

/// Tracks how much of the visible text has been echoed to the terminal.
#[derive(Debug, Default)]
struct LivePreview {
    printed: usize,
}

impl LivePreview {
    /// Text newly visible since the last call. Nothing is returned when the
    /// visible text no longer extends what was already shown.
    fn advance(&mut self, visible: &str) -> Option<String> {
        let fresh = visible.get(self.printed..)?;
        if fresh.is_empty() {
            return None;
        }
        self.printed = visible.len();
        Some(fresh.to_string())
    }
}

pub async fn run_chat(
    config: &Config,
    prompt: String,
    provider_id: Option<&str>,
    model: Option<String>,
    segmenter: Arc<Segmenter>,
    extractor: ThinkingExtractor,
) -> Result<(), Box<dyn Error>> {
    let provider = config
        .resolve_provider(provider_id)
        .ok_or_else(|| format!("Unknown provider: {}", provider_id.unwrap_or("(default)")))?;
    let model = model
        .or_else(|| config.default_model.clone())
        .ok_or("No model given; pass --model or set default_model in the config")?;

    let mut conversation = Conversation::new();
    conversation.push_user(prompt);

    let (service, rx) = ChatStreamService::new();
    let cancel_token = CancellationToken::new();
    let stream_id = 1;
    service.spawn_stream(StreamParams {
        client: reqwest::Client::new(),
        base_url: provider.base_url.clone(),
        api_key: provider.api_key(),
        provider: provider.kind,
        model: model.clone(),
        api_messages: conversation.api_messages(),
        cancel_token: cancel_token.clone(),
        stream_id,
    });

    let interrupt = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received; cancelling stream");
            interrupt.cancel();
        }
    });

    let mut pipeline = MessagePipeline::new(segmenter, extractor, config.flush_policy());
    let mut source = ChannelSource::new(rx, stream_id);
    let mut preview = LivePreview::default();
    let outcome = drive_stream(&mut pipeline, &mut source, &cancel_token, |snapshot| {
        if snapshot.finished {
            return;
        }
        let visible = format!("{}{}", snapshot.completed, snapshot.streaming);
        if let Some(fresh) = preview.advance(&visible) {
            let mut stderr = std::io::stderr().lock();
            let _ = stderr.write_all(fresh.as_bytes());
            let _ = stderr.flush();
        }
    })
    .await;
    if preview.printed > 0 {
        eprintln!();
    }

    let snapshot = pipeline.snapshot();
    print_snapshot(&snapshot);
    conversation.record_stream(&model, &outcome, &snapshot);

    match outcome {
        StreamOutcome::Failed(message) => {
            warn!(provider = %provider.id, model = %model, "chat stream failed");
            Err(message.into())
        }
        StreamOutcome::Cancelled => {
            eprintln!("(cancelled)");
            Ok(())
        }
        StreamOutcome::Completed => Ok(()),
    }
}
