use std::error::Error as StdError;
use std::fmt;

use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ChatMessage, ChatRequest, GeminiRequest};
use crate::core::normalizer::{extract_error_summary, ChatCompletionEvent, Normalizer};
use crate::core::providers::ProviderKind;
use crate::utils::url::{construct_api_url, is_complete_endpoint};

#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessage {
    Event(ChatCompletionEvent),
    /// The transport closed. Not a completion signal on its own.
    End,
}

pub type StreamSender = mpsc::UnboundedSender<(StreamMessage, u64)>;
pub type StreamReceiver = mpsc::UnboundedReceiver<(StreamMessage, u64)>;

/// Errors raised before a response body starts streaming.
#[derive(Debug)]
pub enum TransportError {
    Request(reqwest::Error),
    Status { code: u16, body: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Request(err) => f.write_str(&format_api_error(&err.to_string())),
            TransportError::Status { code, body } => {
                write!(f, "HTTP {code}: {}", format_api_error(body))
            }
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TransportError::Request(err) => Some(err),
            TransportError::Status { .. } => None,
        }
    }
}

/// JSON payload carried by one body line.
///
/// SSE bodies (OpenAI, Gemini) carry it after `data:`; Ollama streams bare
/// JSON objects, one per line. Comments, `event:` lines and blanks carry
/// nothing.
fn line_payload(line: &str) -> Option<&str> {
    if let Some(payload) = line.strip_prefix("data:") {
        return Some(payload.trim_start());
    }
    if line.starts_with('{') {
        return Some(line);
    }
    None
}

/// Forward the events carried by one line. Returns true when the stream is
/// over and nothing further should be read.
fn process_stream_line(
    line: &str,
    normalizer: &mut Normalizer,
    tx: &StreamSender,
    stream_id: u64,
) -> bool {
    let Some(payload) = line_payload(line) else {
        return false;
    };

    if payload == "[DONE]" {
        let _ = tx.send((StreamMessage::End, stream_id));
        return true;
    }

    let mut failed = false;
    for event in normalizer.normalize_payload(payload) {
        failed |= matches!(event, ChatCompletionEvent::Failure { .. });
        let _ = tx.send((StreamMessage::Event(event), stream_id));
    }

    if failed {
        let _ = tx.send((StreamMessage::End, stream_id));
    }
    failed
}

pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            return match extract_error_summary(&json_value).filter(|s| !s.is_empty()) {
                Some(summary) => format!("API Error: {summary}\n```json\n{pretty_json}\n```"),
                None => format!("API Error:\n```json\n{pretty_json}\n```"),
            };
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{trimmed}\n```")
    } else {
        format!("API Error:\n```\n{trimmed}\n```")
    }
}

/// Effective provider family and streaming URL for a configured endpoint.
pub fn stream_endpoint(
    base_url: &str,
    configured: ProviderKind,
    model: &str,
) -> (ProviderKind, String) {
    let kind = ProviderKind::resolve(configured, base_url);
    if is_complete_endpoint(base_url) {
        return (kind, base_url.trim_end_matches('/').to_string());
    }
    (kind, construct_api_url(base_url, &kind.stream_path(model)))
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: String,
    pub provider: ProviderKind,
    pub model: String,
    pub api_messages: Vec<ChatMessage>,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

#[derive(Clone)]
pub struct ChatStreamService {
    tx: StreamSender,
}

impl ChatStreamService {
    pub fn new() -> (Self, StreamReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let cancel_token = params.cancel_token.clone();
            let stream_id = params.stream_id;
            tokio::select! {
                _ = run_stream(params, &tx) => {}
                _ = cancel_token.cancelled() => {
                    debug!(stream_id, "stream cancelled");
                }
            }
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}

async fn send_request(
    params: &StreamParams,
) -> Result<(ProviderKind, reqwest::Response), TransportError> {
    let (kind, url) = stream_endpoint(&params.base_url, params.provider, &params.model);
    debug!(stream_id = params.stream_id, provider = %kind, url = %url, "starting stream");

    let request = params
        .client
        .post(url)
        .header("Content-Type", "application/json");
    let request = crate::utils::auth::add_auth_headers(request, kind, &params.api_key);
    let request = match kind {
        ProviderKind::Gemini => request.json(&GeminiRequest::from_messages(&params.api_messages)),
        ProviderKind::Ollama | ProviderKind::OpenAi => request.json(&ChatRequest {
            model: params.model.clone(),
            messages: params.api_messages.clone(),
            stream: true,
        }),
    };

    let response = request.send().await.map_err(TransportError::Request)?;
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        return Err(TransportError::Status {
            code: status.as_u16(),
            body,
        });
    }
    Ok((kind, response))
}

async fn run_stream(params: StreamParams, tx: &StreamSender) {
    let stream_id = params.stream_id;
    let (kind, response) = match send_request(&params).await {
        Ok(ok) => ok,
        Err(err) => {
            warn!(stream_id, error = %err, "stream request failed");
            let _ = tx.send((
                StreamMessage::Event(ChatCompletionEvent::failure(err.to_string())),
                stream_id,
            ));
            let _ = tx.send((StreamMessage::End, stream_id));
            return;
        }
    };

    let mut normalizer = Normalizer::new(kind);
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        if params.cancel_token.is_cancelled() {
            return;
        }

        let chunk_bytes = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(stream_id, error = %err, "stream interrupted");
                let message = format!("Stream interrupted: {err}");
                let _ = tx.send((
                    StreamMessage::Event(ChatCompletionEvent::failure(message)),
                    stream_id,
                ));
                let _ = tx.send((StreamMessage::End, stream_id));
                return;
            }
        };
        buffer.extend_from_slice(&chunk_bytes);
        if drain_lines(&mut buffer, &mut normalizer, tx, stream_id) {
            return;
        }
    }

    // Ollama may omit the newline after its final object.
    if process_line_bytes(&buffer, &mut normalizer, tx, stream_id) {
        return;
    }

    let _ = tx.send((StreamMessage::End, stream_id));
}

/// Decode one raw body line and forward its events. A line that is not
/// UTF-8 fails the stream.
fn process_line_bytes(
    line: &[u8],
    normalizer: &mut Normalizer,
    tx: &StreamSender,
    stream_id: u64,
) -> bool {
    match std::str::from_utf8(line) {
        Ok(line) => process_stream_line(line.trim(), normalizer, tx, stream_id),
        Err(err) => {
            warn!(stream_id, error = %err, "invalid UTF-8 in stream");
            let message = format!("Invalid UTF-8 in stream: {err}");
            let _ = tx.send((
                StreamMessage::Event(ChatCompletionEvent::failure(message)),
                stream_id,
            ));
            let _ = tx.send((StreamMessage::End, stream_id));
            true
        }
    }
}

/// Forward every complete line in `buffer`, leaving any trailing partial
/// line in place. Returns true when the stream is over.
fn drain_lines(
    buffer: &mut Vec<u8>,
    normalizer: &mut Normalizer,
    tx: &StreamSender,
    stream_id: u64,
) -> bool {
    while let Some(newline_pos) = memchr(b'\n', buffer) {
        let should_end = process_line_bytes(&buffer[..newline_pos], normalizer, tx, stream_id);
        buffer.drain(..=newline_pos);
        if should_end {
            return true;
        }
    }
    false
}

/// Feed a recorded response body through the same line framing as a live
/// stream.
pub fn replay_body(body: &[u8], provider: ProviderKind, tx: &StreamSender, stream_id: u64) {
    let mut normalizer = Normalizer::new(provider);
    let mut buffer = body.to_vec();
    if drain_lines(&mut buffer, &mut normalizer, tx, stream_id) {
        return;
    }
    if process_line_bytes(&buffer, &mut normalizer, tx, stream_id) {
        return;
    }
    let _ = tx.send((StreamMessage::End, stream_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut StreamReceiver) -> Vec<(StreamMessage, u64)> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn sse_lines_with_and_without_space_after_data() {
        let (service, mut rx) = ChatStreamService::new();
        let mut normalizer = Normalizer::new(ProviderKind::OpenAi);

        for (line, expected) in [
            (r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#, "Hello"),
            (r#"data:{"choices":[{"delta":{"content":"World"}}]}"#, "World"),
        ] {
            assert!(!process_stream_line(line, &mut normalizer, &service.tx, 7));
            let received = drain(&mut rx);
            assert_eq!(
                received,
                vec![(StreamMessage::Event(ChatCompletionEvent::text(expected)), 7)]
            );
        }

        assert!(process_stream_line("data: [DONE]", &mut normalizer, &service.tx, 7));
        assert_eq!(drain(&mut rx), vec![(StreamMessage::End, 7)]);
    }

    #[test]
    fn ndjson_lines_are_read_as_ollama_chunks() {
        let (service, mut rx) = ChatStreamService::new();
        let mut normalizer = Normalizer::new(ProviderKind::Ollama);
        let line = r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#;

        assert!(!process_stream_line(line, &mut normalizer, &service.tx, 1));
        assert_eq!(
            drain(&mut rx),
            vec![(StreamMessage::Event(ChatCompletionEvent::text("Hi")), 1)]
        );
    }

    #[test]
    fn replayed_body_ends_once_without_trailing_newline() {
        let (service, mut rx) = ChatStreamService::new();
        let body = "{\"message\":{\"content\":\"A\"},\"done\":false}\r\n\n{\"message\":{\"content\":\"B\"},\"done\":false}";

        replay_body(body.as_bytes(), ProviderKind::Ollama, &service.tx, 3);
        assert_eq!(
            drain(&mut rx),
            vec![
                (StreamMessage::Event(ChatCompletionEvent::text("A")), 3),
                (StreamMessage::Event(ChatCompletionEvent::text("B")), 3),
                (StreamMessage::End, 3),
            ]
        );
    }

    #[test]
    fn invalid_utf8_line_fails_the_stream() {
        let (service, mut rx) = ChatStreamService::new();
        let mut body = br#"{"message":{"content":"ok"},"done":false}"#.to_vec();
        body.push(b'\n');
        body.extend_from_slice(b"{\"message\":{\"content\":\"A\xff\"},\"done\":false}\n");
        body.extend_from_slice(br#"{"message":{"content":"never"},"done":true}"#);

        replay_body(&body, ProviderKind::Ollama, &service.tx, 4);
        let received = drain(&mut rx);
        assert_eq!(received.len(), 3);
        assert_eq!(
            received[0],
            (StreamMessage::Event(ChatCompletionEvent::text("ok")), 4)
        );
        match &received[1].0 {
            StreamMessage::Event(ChatCompletionEvent::Failure { message }) => {
                assert!(message.starts_with("Invalid UTF-8 in stream"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(received[2], (StreamMessage::End, 4));
    }

    #[test]
    fn invalid_utf8_in_trailing_partial_line_fails_the_stream() {
        let (service, mut rx) = ChatStreamService::new();
        let mut normalizer = Normalizer::new(ProviderKind::Ollama);
        let mut buffer = b"{\"message\":{\"content\":\"\xfe".to_vec();

        assert!(!drain_lines(&mut buffer, &mut normalizer, &service.tx, 2));
        assert!(drain(&mut rx).is_empty());
        assert!(process_line_bytes(&buffer, &mut normalizer, &service.tx, 2));
        let received = drain(&mut rx);
        assert!(matches!(
            &received[0].0,
            StreamMessage::Event(ChatCompletionEvent::Failure { .. })
        ));
        assert_eq!(received[1], (StreamMessage::End, 2));
    }

    #[test]
    fn comments_and_event_lines_carry_nothing() {
        let (service, mut rx) = ChatStreamService::new();
        let mut normalizer = Normalizer::new(ProviderKind::OpenAi);

        for line in ["", ": keep-alive", "event: message", "id: 4"] {
            assert!(!process_stream_line(line, &mut normalizer, &service.tx, 1));
        }
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn error_payload_fails_and_ends_the_stream() {
        let (service, mut rx) = ChatStreamService::new();
        let mut normalizer = Normalizer::new(ProviderKind::OpenAi);
        let line = r#"data: {"error":{"message":"internal server error"}}"#;

        assert!(process_stream_line(line, &mut normalizer, &service.tx, 99));
        let received = drain(&mut rx);
        assert_eq!(received.len(), 2);
        match &received[0].0 {
            StreamMessage::Event(ChatCompletionEvent::Failure { message }) => {
                assert!(message.contains("internal server error"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(received[1], (StreamMessage::End, 99));
    }

    #[test]
    fn finish_reason_is_forwarded_without_ending_the_read_loop() {
        let (service, mut rx) = ChatStreamService::new();
        let mut normalizer = Normalizer::new(ProviderKind::OpenAi);
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;

        assert!(!process_stream_line(line, &mut normalizer, &service.tx, 3));
        assert_eq!(
            drain(&mut rx),
            vec![(StreamMessage::Event(ChatCompletionEvent::Finished), 3)]
        );
    }

    #[test]
    fn stream_endpoint_builds_paths_per_provider() {
        assert_eq!(
            stream_endpoint("http://localhost:11434/", ProviderKind::Ollama, "llama3"),
            (
                ProviderKind::Ollama,
                "http://localhost:11434/api/chat".to_string()
            )
        );
        assert_eq!(
            stream_endpoint(
                "https://generativelanguage.googleapis.com/v1beta",
                ProviderKind::Gemini,
                "gemini-2.0-flash"
            ),
            (
                ProviderKind::Gemini,
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
                    .to_string()
            )
        );
    }

    #[test]
    fn openai_compatible_endpoint_overrides_configured_provider() {
        let (kind, url) = stream_endpoint(
            "https://generativelanguage.googleapis.com/v1beta/openai/",
            ProviderKind::Gemini,
            "gemini-2.0-flash",
        );
        assert_eq!(kind, ProviderKind::OpenAi);
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
        );

        let (kind, url) = stream_endpoint(
            "http://localhost:11434/v1/chat/completions",
            ProviderKind::Ollama,
            "llama3",
        );
        assert_eq!(kind, ProviderKind::OpenAi);
        assert_eq!(url, "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn status_errors_are_formatted() {
        let err = TransportError::Status {
            code: 429,
            body: r#"{"error":{"message":"slow down"}}"#.into(),
        };
        assert!(err.to_string().starts_with("HTTP 429: API Error: slow down"));
    }

    #[test]
    fn format_api_error_prettifies_json_with_summary() {
        let raw = r#"{"error":{"message":"model overloaded","type":"invalid_request_error"}}"#;
        let expected = r#"API Error: model overloaded
```json
{
  "error": {
    "message": "model overloaded",
    "type": "invalid_request_error"
  }
}
```"#;
        assert_eq!(format_api_error(raw), expected);
    }

    #[test]
    fn format_api_error_handles_json_without_summary() {
        let expected = "API Error:\n```json\n{\n  \"status\": \"failed\"\n}\n```";
        assert_eq!(format_api_error(r#"{"status":"failed"}"#), expected);
    }

    #[test]
    fn format_api_error_handles_xml_plaintext_and_empty() {
        assert_eq!(
            format_api_error("<error>bad</error>"),
            "API Error:\n```xml\n<error>bad</error>\n```"
        );
        assert_eq!(
            format_api_error("api failure"),
            "API Error:\n```\napi failure\n```"
        );
        assert_eq!(format_api_error("  "), "API Error:\n```\n<empty>\n```");
    }
}
