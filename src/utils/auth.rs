//! Authentication utilities for API requests

use crate::core::providers::ProviderKind;

/// Add provider-specific authentication headers to an HTTP request
///
/// - Gemini: `x-goog-api-key`
/// - Everything else: `Authorization: Bearer`
///
/// Local Ollama servers usually run without a key; an empty key adds no
/// header at all.
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    kind: ProviderKind,
    api_key: &str,
) -> reqwest::RequestBuilder {
    if api_key.is_empty() {
        return request;
    }

    match kind {
        ProviderKind::Gemini => request.header("x-goog-api-key", api_key),
        ProviderKind::Ollama | ProviderKind::OpenAi => {
            request.header("Authorization", format!("Bearer {api_key}"))
        }
    }
}
