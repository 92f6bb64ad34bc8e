use super::*;

fn texts(events: &[ChatCompletionEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match event {
            ChatCompletionEvent::TextDelta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn ollama_text_then_done_with_stats() {
    let mut normalizer = Normalizer::new(ProviderKind::Ollama);

    let first = normalizer.normalize_payload(
        r#"{"model":"llama3","message":{"role":"assistant","content":"Hel"},"done":false}"#,
    );
    assert_eq!(first, vec![ChatCompletionEvent::text("Hel")]);

    let last = normalizer.normalize_payload(
        r#"{"message":{"role":"assistant","content":"lo"},"done":true,"done_reason":"stop",
            "total_duration":5000000000,"eval_count":40,"eval_duration":2000000000}"#,
    );
    assert_eq!(last.len(), 3);
    assert_eq!(last[0], ChatCompletionEvent::text("lo"));
    match &last[1] {
        ChatCompletionEvent::StatsUpdate { stats } => {
            assert_eq!(stats.eval_count, Some(40));
            assert_eq!(stats.tokens_per_second(), Some(20.0));
            assert_eq!(stats.load_duration, None);
        }
        other => panic!("expected stats, got {other:?}"),
    }
    assert_eq!(last[2], ChatCompletionEvent::Finished);
}

#[test]
fn openai_delta_and_finish_reason() {
    let mut normalizer = Normalizer::new(ProviderKind::OpenAi);

    let role_only =
        normalizer.normalize_payload(r#"{"choices":[{"delta":{"role":"assistant"}}],"model":"m"}"#);
    assert!(role_only.is_empty());

    let text = normalizer
        .normalize_payload(r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#);
    assert_eq!(text, vec![ChatCompletionEvent::text("Hi")]);

    let done =
        normalizer.normalize_payload(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
    assert_eq!(done, vec![ChatCompletionEvent::Finished]);
}

#[test]
fn openai_usage_only_chunk_yields_stats() {
    let mut normalizer = Normalizer::new(ProviderKind::OpenAi);
    let events = normalizer.normalize_payload(
        r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":34,"total_tokens":46}}"#,
    );
    assert_eq!(
        events,
        vec![ChatCompletionEvent::StatsUpdate {
            stats: ChatStatics {
                prompt_eval_count: Some(12),
                eval_count: Some(34),
                ..ChatStatics::default()
            }
        }]
    );
}

#[test]
fn gemini_repeated_text_parts_are_dropped() {
    let mut normalizer = Normalizer::new(ProviderKind::Gemini);
    let chunk = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Same sentence."}]}}]}"#;

    let mut events = normalizer.normalize_payload(chunk);
    events.extend(normalizer.normalize_payload(chunk));

    assert_eq!(texts(&events), vec!["Same sentence."]);
}

#[test]
fn gemini_dedup_resets_per_message() {
    let mut normalizer = Normalizer::new(ProviderKind::Gemini);
    let chunk = r#"{"candidates":[{"content":{"parts":[{"text":"Hello"}]}}]}"#;

    assert_eq!(texts(&normalizer.normalize_payload(chunk)), vec!["Hello"]);
    normalizer.reset();
    assert_eq!(texts(&normalizer.normalize_payload(chunk)), vec!["Hello"]);
}

#[test]
fn gemini_whitespace_parts_are_not_deduplicated() {
    let mut normalizer = Normalizer::new(ProviderKind::Gemini);
    let chunk = r#"{"candidates":[{"content":{"parts":[{"text":"\n\n"}]}}]}"#;

    let mut events = normalizer.normalize_payload(chunk);
    events.extend(normalizer.normalize_payload(chunk));
    assert_eq!(texts(&events), vec!["\n\n", "\n\n"]);
}

#[test]
fn gemini_media_usage_and_finish() {
    let mut normalizer = Normalizer::new(ProviderKind::Gemini);
    let events = normalizer.normalize_payload(
        r#"{"candidates":[{"content":{"role":"model","parts":[
                {"text":"Here is the chart"},
                {"inlineData":{"mimeType":"image/png","data":"AAEC"}},
                {"fileData":{"mimeType":"application/pdf","fileUri":"gs://bucket/report.pdf"}}
            ]},"finishReason":"STOP"}],
            "usageMetadata":{"promptTokenCount":7,"candidatesTokenCount":9}}"#,
    );

    assert_eq!(events.len(), 5);
    assert_eq!(events[0], ChatCompletionEvent::text("Here is the chart"));
    assert_eq!(
        events[1],
        ChatCompletionEvent::InlineMedia {
            mime_type: "image/png".to_string(),
            data: vec![0, 1, 2],
        }
    );
    assert_eq!(
        events[2],
        ChatCompletionEvent::FileMedia {
            mime_type: "application/pdf".to_string(),
            uri: "gs://bucket/report.pdf".to_string(),
        }
    );
    assert!(matches!(
        events[3],
        ChatCompletionEvent::StatsUpdate { stats } if stats.eval_count == Some(9)
    ));
    assert_eq!(events[4], ChatCompletionEvent::Finished);
}

#[test]
fn gemini_bad_inline_media_becomes_failure() {
    let mut normalizer = Normalizer::new(ProviderKind::Gemini);
    let events = normalizer.normalize_payload(
        r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"!!"}}]}}]}"#,
    );
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ChatCompletionEvent::Failure { message } if message.contains("image/png")
    ));
}

#[test]
fn degenerate_payloads_yield_nothing() {
    for kind in [ProviderKind::Ollama, ProviderKind::OpenAi, ProviderKind::Gemini] {
        let mut normalizer = Normalizer::new(kind);
        assert!(normalizer.normalize_payload("").is_empty());
        assert!(normalizer.normalize_payload("   ").is_empty());
        assert!(normalizer.normalize_payload("{}").is_empty());
        assert!(normalizer.normalize_payload("null").is_empty());
    }
}

#[test]
fn malformed_json_maps_to_failure() {
    let mut normalizer = Normalizer::new(ProviderKind::OpenAi);
    let events = normalizer.normalize_payload("{not json");
    assert_eq!(events.len(), 1);
    match &events[0] {
        ChatCompletionEvent::Failure { message } => {
            assert!(message.starts_with("Failed to decode openai stream chunk"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn error_objects_map_to_failure_summary() {
    let mut normalizer = Normalizer::new(ProviderKind::Ollama);
    let events = normalizer.normalize_payload(r#"{"error":"model 'nope' not found"}"#);
    assert_eq!(
        events,
        vec![ChatCompletionEvent::failure("API Error: model 'nope' not found")]
    );

    let mut normalizer = Normalizer::new(ProviderKind::OpenAi);
    let events = normalizer
        .normalize_payload(r#"{"error":{"message":"rate   limited","type":"requests"}}"#);
    assert_eq!(
        events,
        vec![ChatCompletionEvent::failure("API Error: rate limited")]
    );
}

#[test]
fn tokens_per_second_requires_counts_and_duration() {
    let stats = ChatStatics {
        eval_count: Some(10),
        eval_duration: Some(0),
        ..ChatStatics::default()
    };
    assert_eq!(stats.tokens_per_second(), None);

    let stats = ChatStatics {
        eval_count: None,
        eval_duration: Some(1_000_000_000),
        ..ChatStatics::default()
    };
    assert_eq!(stats.tokens_per_second(), None);

    let stats = ChatStatics {
        prompt_eval_count: Some(30),
        prompt_eval_duration: Some(500_000_000),
        ..ChatStatics::default()
    };
    assert_eq!(stats.prompt_tokens_per_second(), Some(60.0));
    assert_eq!(stats.tokens_per_second(), None);
}

#[test]
fn stats_merge_keeps_unset_fields() {
    let mut stats = ChatStatics {
        prompt_eval_count: Some(3),
        ..ChatStatics::default()
    };
    stats.merge(&ChatStatics {
        eval_count: Some(8),
        ..ChatStatics::default()
    });
    assert_eq!(stats.prompt_eval_count, Some(3));
    assert_eq!(stats.eval_count, Some(8));
}
