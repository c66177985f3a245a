use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A chapter cut out of the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub original_title: String,
    pub content: String,
    /// Explicit number encoded in the heading, e.g. 7 for "Chapter 7".
    pub index_hint: Option<u32>,
}

impl Chapter {
    pub fn new(original_title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            original_title: original_title.into(),
            content: content.into(),
            index_hint: None,
        }
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// One length-balanced piece of a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Part {
    pub original_title: String,
    pub content: String,
    /// 1-based position within the chapter.
    pub part: usize,
    pub total: usize,
}

/// Which parser tier produced the chapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Regex,
    LlmPattern,
    FallbackParagraph,
    FallbackSentence,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Regex => "regex",
            Strategy::LlmPattern => "llm_pattern",
            Strategy::FallbackParagraph => "fallback_paragraph",
            Strategy::FallbackSentence => "fallback_sentence",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generic segmentation used when no heading is found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    #[default]
    Paragraph,
    Sentence,
}

impl FallbackMode {
    pub fn strategy(&self) -> Strategy {
        match self {
            FallbackMode::Paragraph => Strategy::FallbackParagraph,
            FallbackMode::Sentence => Strategy::FallbackSentence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub chapters: Vec<Chapter>,
    pub strategy: Strategy,
    /// Text found before the first detected heading, trimmed. Kept as a
    /// preamble rather than dropped or promoted to a chapter.
    pub leading_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleFormatInput {
    pub original_title: String,
    pub chapter_num: Option<u32>,
    pub part: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleSource {
    Llm,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedTitle {
    pub title: String,
    pub source: TitleSource,
}

/// Entry sent to the assistant when formatting titles.
#[derive(Debug, Clone, Serialize)]
pub struct TitleRequest {
    pub index: usize,
    pub original_title: String,
    pub chapter_num: Option<u32>,
    pub part: usize,
    pub total: usize,
    pub fallback_title: String,
}

/// Language classification returned by the assistant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LanguageHint {
    pub language: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    Heuristic,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageDetection {
    pub language: String,
    pub confidence: f64,
    pub source: DetectionSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderChapter {
    pub title: String,
    pub content: String,
}

/// Everything decided for a document, ready to render.
#[derive(Debug, Clone)]
pub struct Chapterized {
    pub language: String,
    pub strategy: Strategy,
    pub leading_text: String,
    pub input_chapter_count: usize,
    pub chapters: Vec<RenderChapter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub output_path: PathBuf,
    pub detected_language: String,
    pub parse_strategy: Strategy,
    pub input_chapter_count: usize,
    pub output_chapter_count: usize,
}
