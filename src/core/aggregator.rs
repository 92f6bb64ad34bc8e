//! Flush/commit gated accumulation of streamed text.
//!
//! A [`StreamBuffer`] receives the cumulative text of one in-flight response
//! and decides when new text becomes visible (a *flush* into
//! `streaming_content`) and when visible text becomes settled (a *commit*
//! into `completed_content`). Only the streaming tail is re-segmented at
//! high frequency; the completed head changes rarely.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_FLUSH_INTERVAL_COMPLETE: Duration = Duration::from_secs(10);

const PARAGRAPH_BREAK: &str = "\n\n";

/// Time source for the flush and commit gates.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests and replays.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Minimum time between flushes of pending text into the visible span.
    pub flush_interval: Duration,
    /// Minimum time between commits of the visible span into the settled span.
    pub flush_interval_complete: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_interval_complete: DEFAULT_FLUSH_INTERVAL_COMPLETE,
        }
    }
}

/// What a call to [`StreamBuffer::process`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub flushed: bool,
    pub committed: bool,
    pub reset: bool,
}

impl ProcessOutcome {
    pub fn changed(&self) -> bool {
        self.flushed || self.committed || self.reset
    }
}

/// Per-response text buffer.
///
/// `completed_content + streaming_content` always equals the flushed prefix
/// of `raw_accumulated`; [`StreamBuffer::finalize`] may add one paragraph
/// break at the join.
pub struct StreamBuffer<C: Clock = SystemClock> {
    policy: FlushPolicy,
    clock: C,
    raw_accumulated: String,
    streaming_content: String,
    completed_content: String,
    last_processed_len: usize,
    last_flush: Option<Instant>,
    last_commit: Instant,
}

impl StreamBuffer<SystemClock> {
    pub fn new(policy: FlushPolicy) -> Self {
        Self::with_clock(policy, SystemClock)
    }
}

impl<C: Clock> StreamBuffer<C> {
    pub fn with_clock(policy: FlushPolicy, clock: C) -> Self {
        let last_commit = clock.now();
        Self {
            policy,
            clock,
            raw_accumulated: String::new(),
            streaming_content: String::new(),
            completed_content: String::new(),
            last_processed_len: 0,
            last_flush: None,
            last_commit,
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn raw_accumulated(&self) -> &str {
        &self.raw_accumulated
    }

    pub fn streaming_content(&self) -> &str {
        &self.streaming_content
    }

    pub fn completed_content(&self) -> &str {
        &self.completed_content
    }

    /// Visible text: the settled head followed by the streaming tail.
    pub fn reconstructed(&self) -> String {
        let mut text =
            String::with_capacity(self.completed_content.len() + self.streaming_content.len());
        text.push_str(&self.completed_content);
        text.push_str(&self.streaming_content);
        text
    }

    /// Bytes received but not yet flushed.
    pub fn pending_len(&self) -> usize {
        self.raw_accumulated.len() - self.last_processed_len
    }

    /// When the next flush becomes eligible, if text is pending.
    pub fn next_flush_at(&self) -> Option<Instant> {
        if self.pending_len() == 0 {
            return None;
        }
        Some(
            self.last_flush
                .map_or_else(|| self.clock.now(), |at| at + self.policy.flush_interval),
        )
    }

    /// How long until pending text may flush; zero if it already may.
    pub fn time_until_flush(&self) -> Option<Duration> {
        self.next_flush_at()
            .map(|at| at.saturating_duration_since(self.clock.now()))
    }

    /// Feed the cumulative text seen so far.
    ///
    /// Text no longer than what was already flushed is ignored, except for
    /// empty text which restarts the buffer.
    pub fn process(&mut self, new_full_text: &str) -> ProcessOutcome {
        if new_full_text.is_empty() {
            let had_content = !self.raw_accumulated.is_empty();
            self.reset();
            return ProcessOutcome {
                reset: had_content,
                ..ProcessOutcome::default()
            };
        }

        if new_full_text.len() <= self.last_processed_len {
            return ProcessOutcome::default();
        }

        if new_full_text.len() > self.raw_accumulated.len() {
            match new_full_text.get(self.raw_accumulated.len()..) {
                Some(extra) if new_full_text.starts_with(self.raw_accumulated.as_str()) => {
                    self.raw_accumulated.push_str(extra);
                }
                _ => {
                    warn!(
                        known = self.raw_accumulated.len(),
                        offered = new_full_text.len(),
                        "cumulative text diverged from accumulated prefix; ignoring"
                    );
                    return ProcessOutcome::default();
                }
            }
        }

        self.gate()
    }

    /// Append a delta to the accumulated text and run the gates.
    pub fn push_delta(&mut self, delta: &str) -> ProcessOutcome {
        if delta.is_empty() {
            return self.tick();
        }
        self.raw_accumulated.push_str(delta);
        self.gate()
    }

    /// Re-evaluate the gates without new text, letting pending text through
    /// once its flush interval has elapsed.
    pub fn tick(&mut self) -> ProcessOutcome {
        if self.raw_accumulated.is_empty() {
            return ProcessOutcome::default();
        }
        self.gate()
    }

    fn gate(&mut self) -> ProcessOutcome {
        let now = self.clock.now();
        let mut outcome = ProcessOutcome::default();

        let flush_due = self
            .last_flush
            .is_none_or(|at| now.duration_since(at) >= self.policy.flush_interval);
        if flush_due && self.pending_len() > 0 {
            self.streaming_content
                .push_str(&self.raw_accumulated[self.last_processed_len..]);
            self.last_processed_len = self.raw_accumulated.len();
            self.last_flush = Some(now);
            outcome.flushed = true;
        }

        let commit_due =
            now.duration_since(self.last_commit) >= self.policy.flush_interval_complete;
        if commit_due && !self.streaming_content.is_empty() {
            debug!(
                committed = self.streaming_content.len(),
                "committing streaming span"
            );
            self.completed_content.push_str(&self.streaming_content);
            self.streaming_content.clear();
            self.last_commit = now;
            outcome.committed = true;
        }

        outcome
    }

    /// Fold everything still in flight into the completed span.
    ///
    /// Safe to call more than once; a second call finds nothing to fold.
    pub fn finalize(&mut self) {
        if self.pending_len() > 0 {
            self.streaming_content
                .push_str(&self.raw_accumulated[self.last_processed_len..]);
            self.last_processed_len = self.raw_accumulated.len();
        }

        if !self.streaming_content.is_empty() {
            let needs_break = !self.completed_content.is_empty()
                && !self.completed_content.ends_with('\n')
                && !self.streaming_content.starts_with('\n');
            if needs_break {
                self.completed_content.push_str(PARAGRAPH_BREAK);
            }
            self.completed_content.push_str(&self.streaming_content);
            self.streaming_content.clear();
        }

        self.last_flush = None;
        self.last_commit = self.clock.now();
    }

    /// Drop all content and trackers.
    pub fn reset(&mut self) {
        self.raw_accumulated.clear();
        self.streaming_content.clear();
        self.completed_content.clear();
        self.last_processed_len = 0;
        self.last_flush = None;
        self.last_commit = self.clock.now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> (StreamBuffer<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        (
            StreamBuffer::with_clock(FlushPolicy::default(), clock.clone()),
            clock,
        )
    }

    #[test]
    fn first_text_flushes_immediately() {
        let (mut buffer, _clock) = buffer();
        let outcome = buffer.process("Hello");
        assert!(outcome.flushed);
        assert_eq!(buffer.streaming_content(), "Hello");
        assert_eq!(buffer.completed_content(), "");
    }

    #[test]
    fn text_inside_flush_interval_stays_pending_then_lands_whole() {
        let (mut buffer, clock) = buffer();
        buffer.process("Hello");

        clock.advance(Duration::from_millis(100));
        assert!(!buffer.process("Hello, wor").flushed);
        clock.advance(Duration::from_millis(100));
        assert!(!buffer.process("Hello, world").flushed);
        assert_eq!(buffer.streaming_content(), "Hello");
        assert_eq!(buffer.pending_len(), ", world".len());
        assert_eq!(buffer.time_until_flush(), Some(Duration::from_millis(300)));

        clock.advance(Duration::from_millis(400));
        assert!(buffer.process("Hello, world!").flushed);
        assert_eq!(buffer.streaming_content(), "Hello, world!");
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn shorter_or_equal_text_is_ignored() {
        let (mut buffer, clock) = buffer();
        buffer.process("abcdef");
        clock.advance(Duration::from_secs(1));
        assert_eq!(buffer.process("abc"), ProcessOutcome::default());
        assert_eq!(buffer.process("abcdef"), ProcessOutcome::default());
        assert_eq!(buffer.streaming_content(), "abcdef");
    }

    #[test]
    fn empty_text_resets_everything() {
        let (mut buffer, _clock) = buffer();
        buffer.process("abc");
        let outcome = buffer.process("");
        assert!(outcome.reset);
        assert_eq!(buffer.raw_accumulated(), "");
        assert_eq!(buffer.reconstructed(), "");

        assert!(buffer.process("new start").flushed);
        assert_eq!(buffer.streaming_content(), "new start");
    }

    #[test]
    fn commit_moves_streaming_into_completed() {
        let (mut buffer, clock) = buffer();
        buffer.process("first part. ");
        clock.advance(Duration::from_secs(10));
        let outcome = buffer.process("first part. second part.");
        assert!(outcome.flushed);
        assert!(outcome.committed);
        assert_eq!(buffer.completed_content(), "first part. second part.");
        assert_eq!(buffer.streaming_content(), "");

        clock.advance(Duration::from_secs(1));
        buffer.process("first part. second part. tail");
        assert_eq!(buffer.streaming_content(), " tail");
        assert_eq!(buffer.reconstructed(), "first part. second part. tail");
    }

    #[test]
    fn finalize_flushes_pending_and_inserts_paragraph_break() {
        let (mut buffer, clock) = buffer();
        buffer.process("head");
        clock.advance(Duration::from_secs(10));
        buffer.process("head!");
        clock.advance(Duration::from_millis(600));
        buffer.process("head!tail");
        clock.advance(Duration::from_millis(100));
        buffer.process("head!tail end");

        buffer.finalize();
        assert_eq!(buffer.completed_content(), "head!\n\ntail end");
        assert_eq!(buffer.streaming_content(), "");
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn finalize_skips_break_at_existing_newline() {
        let (mut buffer, clock) = buffer();
        buffer.process("line one\n");
        clock.advance(Duration::from_secs(10));
        buffer.process("line one\n");
        buffer.tick();
        clock.advance(Duration::from_secs(1));
        buffer.process("line one\nline two");
        buffer.finalize();
        assert_eq!(buffer.completed_content(), "line one\nline two");
    }

    #[test]
    fn finalize_is_idempotent() {
        let (mut buffer, _clock) = buffer();
        buffer.finalize();
        assert_eq!(buffer.completed_content(), "");

        buffer.process("only text");
        buffer.finalize();
        buffer.finalize();
        assert_eq!(buffer.completed_content(), "only text");
    }

    #[test]
    fn tick_releases_pending_text_after_interval() {
        let (mut buffer, clock) = buffer();
        buffer.push_delta("a");
        buffer.push_delta("b");
        assert_eq!(buffer.streaming_content(), "a");
        let due = buffer.next_flush_at().expect("pending text");

        clock.advance(Duration::from_millis(500));
        assert!(clock.now() >= due);
        assert!(buffer.tick().flushed);
        assert_eq!(buffer.streaming_content(), "ab");
        assert_eq!(buffer.next_flush_at(), None);
    }

    #[test]
    fn reconstruction_never_loses_text() {
        let (mut buffer, clock) = buffer();
        let source = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let mut last_len = 0;

        for (step, end) in (1..=source.len()).step_by(7).enumerate() {
            clock.advance(Duration::from_millis(if step % 3 == 0 { 700 } else { 90 }));
            buffer.process(&source[..end]);

            let visible = buffer.reconstructed();
            assert!(visible.len() >= last_len);
            assert!(source.starts_with(&visible));
            last_len = visible.len();
        }

        buffer.process(&source);
        buffer.finalize();
        let completed = buffer.completed_content();
        assert!(
            completed == source || completed.replacen("\n\n", "", 1) == source,
            "completed content diverged from input"
        );
    }

    #[test]
    fn divergent_cumulative_text_is_ignored() {
        let (mut buffer, clock) = buffer();
        buffer.process("abc");
        clock.advance(Duration::from_secs(1));
        assert_eq!(buffer.process("xyz123"), ProcessOutcome::default());
        assert_eq!(buffer.raw_accumulated(), "abc");
    }
}
