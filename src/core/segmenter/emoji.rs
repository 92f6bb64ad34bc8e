//! Emoji shortcode table and the `:name:` replacement stage.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use super::edits::EditList;
use super::SegmentError;

const BUNDLED_TABLE: &str = include_str!("../../../resources/emoji.json");

pub(super) const SHORTCODE_PATTERN: &str = r":([A-Za-z0-9_+\-]+):";

/// Errors that can occur when loading an emoji table.
#[derive(Debug)]
pub enum EmojiTableError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
}

impl fmt::Display for EmojiTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmojiTableError::Read { path, source } => {
                write!(f, "Failed to read emoji table at {}: {}", path.display(), source)
            }
            EmojiTableError::Parse {
                path: Some(path),
                source,
            } => write!(f, "Failed to parse emoji table at {}: {}", path.display(), source),
            EmojiTableError::Parse { path: None, source } => {
                write!(f, "Failed to parse emoji table: {source}")
            }
        }
    }
}

impl StdError for EmojiTableError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            EmojiTableError::Read { source, .. } => Some(source),
            EmojiTableError::Parse { source, .. } => Some(source),
        }
    }
}

/// Shortcode (without colons) to glyph lookup.
///
/// Built once at bootstrap and injected into the segmenter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmojiTable {
    glyphs: HashMap<String, String>,
}

impl EmojiTable {
    pub fn new(glyphs: HashMap<String, String>) -> Self {
        Self { glyphs }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            glyphs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The table shipped with the crate.
    pub fn bundled() -> Result<Self, EmojiTableError> {
        Self::from_json_str(BUNDLED_TABLE)
    }

    pub fn from_json_str(json: &str) -> Result<Self, EmojiTableError> {
        serde_json::from_str(json)
            .map(Self::new)
            .map_err(|source| EmojiTableError::Parse { path: None, source })
    }

    pub fn load(path: &Path) -> Result<Self, EmojiTableError> {
        let contents = fs::read_to_string(path).map_err(|source| EmojiTableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents)
            .map(Self::new)
            .map_err(|source| EmojiTableError::Parse {
                path: Some(path.to_path_buf()),
                source,
            })
    }

    pub fn get(&self, shortcode: &str) -> Option<&str> {
        self.glyphs.get(shortcode).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

/// Replace every known `:shortcode:` with its glyph.
///
/// An unknown code is left verbatim and its closing colon may open the next
/// shortcode, so `12:30:smile:` still resolves `:smile:`.
pub(super) fn replace_shortcodes(
    text: &str,
    table: &EmojiTable,
    pattern: &Regex,
) -> Result<String, SegmentError> {
    if table.is_empty() || !text.contains(':') {
        return Ok(text.to_string());
    }

    let mut edits = EditList::new();
    let mut position = 0;
    while let Some(captures) = pattern.captures_at(text, position) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            break;
        };
        match table.get(name.as_str()) {
            Some(glyph) => {
                edits.push(whole.range(), glyph)?;
                position = whole.end();
            }
            None => position = whole.end() - 1,
        }
    }

    Ok(edits.apply(text))
}
