//! The stream consumer: applies normalized events to one message's buffer,
//! segments what became visible and publishes render snapshots.
//!
//! This is the one place that turns the end of the transport into
//! [`ChatCompletionEvent::Finished`], and the one place that guarantees
//! [`StreamBuffer::finalize`] runs however the stream ends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::aggregator::{Clock, FlushPolicy, ProcessOutcome, StreamBuffer, SystemClock};
use crate::core::chat_stream::{StreamMessage, StreamReceiver};
use crate::core::normalizer::{ChatCompletionEvent, ChatStatics};
use crate::core::segmenter::code::has_open_fence;
use crate::core::segmenter::{ProcessedContent, Segmenter};
use crate::core::thinking::{ThinkingExtractor, ThinkingSegment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaAttachment {
    Inline { mime_type: String, data: Vec<u8> },
    File { mime_type: String, uri: String },
}

/// Everything a renderer needs for one message at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RenderSnapshot {
    pub completed: String,
    pub streaming: String,
    pub processed: ProcessedContent,
    /// Thinking split over `processed.content`, for rendering.
    pub thinking: ThinkingSegment,
    /// Thinking split over the raw text, for storage.
    pub source_thinking: ThinkingSegment,
    pub stats: ChatStatics,
    pub media: Vec<MediaAttachment>,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Per-message pipeline state. Owned by exactly one consumer task.
pub struct MessagePipeline<C: Clock = SystemClock> {
    buffer: StreamBuffer<C>,
    segmenter: Arc<Segmenter>,
    extractor: ThinkingExtractor,
    completed_processed: ProcessedContent,
    streaming_processed: ProcessedContent,
    processed: ProcessedContent,
    thinking: ThinkingSegment,
    source_thinking: ThinkingSegment,
    stats: ChatStatics,
    media: Vec<MediaAttachment>,
    failure: Option<String>,
    finished: bool,
}

impl MessagePipeline<SystemClock> {
    pub fn new(
        segmenter: Arc<Segmenter>,
        extractor: ThinkingExtractor,
        policy: FlushPolicy,
    ) -> Self {
        Self::with_clock(segmenter, extractor, policy, SystemClock)
    }
}

impl<C: Clock> MessagePipeline<C> {
    pub fn with_clock(
        segmenter: Arc<Segmenter>,
        extractor: ThinkingExtractor,
        policy: FlushPolicy,
        clock: C,
    ) -> Self {
        Self {
            buffer: StreamBuffer::with_clock(policy, clock),
            segmenter,
            extractor,
            completed_processed: ProcessedContent::default(),
            streaming_processed: ProcessedContent::default(),
            processed: ProcessedContent::default(),
            thinking: ThinkingSegment::default(),
            source_thinking: ThinkingSegment::default(),
            stats: ChatStatics::default(),
            media: Vec::new(),
            failure: None,
            finished: false,
        }
    }

    pub fn buffer(&self) -> &StreamBuffer<C> {
        &self.buffer
    }

    pub fn processed(&self) -> &ProcessedContent {
        &self.processed
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn time_until_flush(&self) -> Option<Duration> {
        self.buffer.time_until_flush()
    }

    /// Apply one event in arrival order. Returns true when the visible state
    /// changed.
    pub fn apply(&mut self, event: ChatCompletionEvent) -> bool {
        if self.finished {
            debug!("event after stream end ignored");
            return false;
        }

        match event {
            ChatCompletionEvent::TextDelta { text } => {
                let outcome = self.buffer.push_delta(&text);
                self.absorb(outcome)
            }
            ChatCompletionEvent::InlineMedia { mime_type, data } => {
                self.media.push(MediaAttachment::Inline { mime_type, data });
                true
            }
            ChatCompletionEvent::FileMedia { mime_type, uri } => {
                self.media.push(MediaAttachment::File { mime_type, uri });
                true
            }
            ChatCompletionEvent::StatsUpdate { stats } => {
                self.stats.merge(&stats);
                true
            }
            ChatCompletionEvent::Finished => {
                self.finalize();
                true
            }
            ChatCompletionEvent::Failure { message } => {
                self.failure = Some(message);
                self.finalize();
                true
            }
        }
    }

    /// Let pending text through once its flush interval has passed.
    pub fn tick(&mut self) -> bool {
        if self.finished {
            return false;
        }
        let outcome = self.buffer.tick();
        self.absorb(outcome)
    }

    /// Fold everything into the completed span. Later calls are no-ops.
    pub fn finalize(&mut self) {
        if self.finished {
            return;
        }
        self.buffer.finalize();
        self.finished = true;
        self.completed_processed = self.segmenter.preprocess(self.buffer.completed_content());
        self.streaming_processed = ProcessedContent::default();
        self.refresh();
        debug!(
            length = self.buffer.completed_content().len(),
            placeholders = self.processed.cache.len(),
            failed = self.failure.is_some(),
            "message finalized"
        );
    }

    /// Only the spans that changed are segmented again: the streaming tail on
    /// every flush, the completed head only when a commit grew it. While the
    /// head ends inside an open code fence the tail belongs to that fence, so
    /// both are segmented together.
    fn absorb(&mut self, outcome: ProcessOutcome) -> bool {
        if !outcome.changed() {
            return false;
        }
        if has_open_fence(self.buffer.completed_content()) {
            self.completed_processed = self.segmenter.preprocess(&self.buffer.reconstructed());
            self.streaming_processed = ProcessedContent::default();
            self.refresh();
            return true;
        }
        if outcome.committed || outcome.reset {
            self.completed_processed = self.segmenter.preprocess(self.buffer.completed_content());
        }
        self.streaming_processed = self.segmenter.preprocess(self.buffer.streaming_content());
        self.refresh();
        true
    }

    fn refresh(&mut self) {
        self.processed = self.completed_processed.join(&self.streaming_processed);
        self.thinking = self.split_thinking(&self.processed.content);
        let source = self.buffer.reconstructed();
        self.source_thinking = self.split_thinking(&source);
    }

    fn split_thinking(&self, text: &str) -> ThinkingSegment {
        let code = self.segmenter.code_ranges(text);
        self.extractor.extract_outside(text, self.finished, &code)
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        RenderSnapshot {
            completed: self.buffer.completed_content().to_string(),
            streaming: self.buffer.streaming_content().to_string(),
            processed: self.processed.clone(),
            thinking: self.thinking.clone(),
            source_thinking: self.source_thinking.clone(),
            stats: self.stats,
            media: self.media.clone(),
            finished: self.finished,
        }
    }
}

/// Where a consumer pulls normalized events from.
#[async_trait]
pub trait EventSource: Send {
    /// The next event, or `None` once the transport has closed.
    async fn next_event(&mut self) -> Option<ChatCompletionEvent>;
}

/// Events for one stream id from the transport channel. Messages tagged
/// with another id belong to a stale stream and are dropped.
pub struct ChannelSource {
    rx: StreamReceiver,
    stream_id: u64,
}

impl ChannelSource {
    pub fn new(rx: StreamReceiver, stream_id: u64) -> Self {
        Self { rx, stream_id }
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Option<ChatCompletionEvent> {
        while let Some((message, id)) = self.rx.recv().await {
            if id != self.stream_id {
                debug!(id, current = self.stream_id, "dropping message from stale stream");
                continue;
            }
            return match message {
                StreamMessage::Event(event) => Some(event),
                StreamMessage::End => None,
            };
        }
        None
    }
}

/// Replay of recorded events.
#[async_trait]
impl EventSource for VecDeque<ChatCompletionEvent> {
    async fn next_event(&mut self) -> Option<ChatCompletionEvent> {
        self.pop_front()
    }
}

/// Consume `source` into `pipeline` until the stream finishes, fails or is
/// cancelled, calling `on_update` whenever the visible state changes.
///
/// A source that closes without a finish signal is treated as finished.
/// The pipeline is finalized on every exit path.
pub async fn drive_stream<C, S, F>(
    pipeline: &mut MessagePipeline<C>,
    source: &mut S,
    cancel: &CancellationToken,
    mut on_update: F,
) -> StreamOutcome
where
    C: Clock,
    S: EventSource + ?Sized,
    F: FnMut(&RenderSnapshot),
{
    let outcome = loop {
        let wait = pipeline.time_until_flush();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("stream consumer cancelled");
                break StreamOutcome::Cancelled;
            }
            event = source.next_event() => {
                let event = event.unwrap_or_else(|| {
                    debug!("transport closed; treating as finished");
                    ChatCompletionEvent::Finished
                });
                match event {
                    ChatCompletionEvent::Finished => break StreamOutcome::Completed,
                    ChatCompletionEvent::Failure { message } => {
                        pipeline.apply(ChatCompletionEvent::failure(message.clone()));
                        break StreamOutcome::Failed(message);
                    }
                    other => {
                        if pipeline.apply(other) {
                            on_update(&pipeline.snapshot());
                        }
                    }
                }
            }
            _ = tokio::time::sleep(wait.unwrap_or_default()), if wait.is_some() => {
                if pipeline.tick() {
                    on_update(&pipeline.snapshot());
                }
            }
        }
    };

    pipeline.finalize();
    on_update(&pipeline.snapshot());
    outcome
}
