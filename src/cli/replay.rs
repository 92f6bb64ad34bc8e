use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::print_snapshot;
use crate::core::chat_stream::replay_body;
use crate::core::config::Config;
use crate::core::pipeline::{drive_stream, ChannelSource, MessagePipeline, StreamOutcome};
use crate::core::providers::ProviderKind;
use crate::core::segmenter::Segmenter;
use crate::core::thinking::ThinkingExtractor;

const REPLAY_STREAM_ID: u64 = 0;

/// Run a captured response body through framing, normalization and the
/// message pipeline, then print the final snapshot.
pub async fn run_replay(
    capture: &Path,
    provider: ProviderKind,
    config: &Config,
    segmenter: Arc<Segmenter>,
    extractor: ThinkingExtractor,
) -> Result<(), Box<dyn Error>> {
    let body = std::fs::read(capture)?;
    let (tx, rx) = mpsc::unbounded_channel();
    replay_body(&body, provider, &tx, REPLAY_STREAM_ID);
    drop(tx);

    let mut pipeline = MessagePipeline::new(segmenter, extractor, config.flush_policy());
    let mut source = ChannelSource::new(rx, REPLAY_STREAM_ID);
    let cancel = CancellationToken::new();
    let mut updates = 0usize;
    let outcome = drive_stream(&mut pipeline, &mut source, &cancel, |_| updates += 1).await;
    debug!(updates, ?outcome, "replay finished");

    print_snapshot(&pipeline.snapshot());
    match outcome {
        StreamOutcome::Failed(message) => Err(message.into()),
        StreamOutcome::Completed | StreamOutcome::Cancelled => Ok(()),
    }
}
