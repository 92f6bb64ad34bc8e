use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::aggregator::{FlushPolicy, DEFAULT_FLUSH_INTERVAL, DEFAULT_FLUSH_INTERVAL_COMPLETE};
use crate::core::providers::ProviderKind;
use crate::core::segmenter::emoji::{EmojiTable, EmojiTableError};
use crate::core::thinking::{TagPair, TagPairError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable holding the API key. Unset means no key.
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    pub fn new(
        id: impl Into<String>,
        kind: ProviderKind,
        base_url: impl Into<String>,
        api_key_env: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            base_url: base_url.into(),
            api_key_env: api_key_env.map(str::to_string),
        }
    }

    /// API key from the configured environment variable, empty when unset.
    pub fn api_key(&self) -> String {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_default()
    }
}

/// Providers available without any configuration.
pub fn builtin_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new("ollama", ProviderKind::Ollama, "http://localhost:11434", None),
        ProviderConfig::new(
            "openai",
            ProviderKind::OpenAi,
            "https://api.openai.com/v1",
            Some("OPENAI_API_KEY"),
        ),
        ProviderConfig::new(
            "gemini",
            ProviderKind::Gemini,
            "https://generativelanguage.googleapis.com/v1beta",
            Some("GEMINI_API_KEY"),
        ),
    ]
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
    /// Minimum milliseconds between flushes of streamed text
    pub flush_interval_ms: Option<u64>,
    /// Minimum milliseconds between commits of visible text
    pub flush_interval_complete_ms: Option<u64>,
    /// Thinking delimiters as "start end, start end"
    pub thinking_tags: Option<String>,
    /// JSON file mapping emoji shortcodes to glyphs; the bundled table is
    /// used when unset
    pub emoji_table: Option<PathBuf>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Get a user-friendly display string for a path, using `~` for the home
/// directory on Unix-like systems.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            if let Ok(relative) = path.strip_prefix(PathBuf::from(home)) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            flush_interval: self
                .flush_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_FLUSH_INTERVAL),
            flush_interval_complete: self
                .flush_interval_complete_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_FLUSH_INTERVAL_COMPLETE),
        }
    }

    /// Configured thinking tag pairs, or the defaults when none are set.
    pub fn thinking_pairs(&self) -> Result<Vec<TagPair>, TagPairError> {
        let pairs = match self.thinking_tags.as_deref() {
            Some(value) => TagPair::parse_list(value)?,
            None => Vec::new(),
        };
        if pairs.is_empty() {
            return Ok(TagPair::defaults());
        }
        Ok(pairs)
    }

    pub fn load_emoji_table(&self) -> Result<EmojiTable, EmojiTableError> {
        match &self.emoji_table {
            Some(path) => EmojiTable::load(path),
            None => EmojiTable::bundled(),
        }
    }

    /// Configured providers first, then built-ins not shadowed by id.
    pub fn all_providers(&self) -> Vec<ProviderConfig> {
        let mut providers = self.providers.clone();
        for builtin in builtin_providers() {
            if !providers.iter().any(|p| p.id.eq_ignore_ascii_case(&builtin.id)) {
                providers.push(builtin);
            }
        }
        providers
    }

    pub fn get_provider(&self, id: &str) -> Option<ProviderConfig> {
        self.all_providers()
            .into_iter()
            .find(|p| p.id.eq_ignore_ascii_case(id))
    }

    /// The provider named explicitly, else the default provider, else the
    /// first one available.
    pub fn resolve_provider(&self, requested: Option<&str>) -> Option<ProviderConfig> {
        match requested.or(self.default_provider.as_deref()) {
            Some(id) => self.get_provider(id),
            None => self.all_providers().into_iter().next(),
        }
    }
}
