use crate::models::{Chapter, FallbackMode, ParseResult, Strategy};
use crate::services::detector::build_detection_samples;
use crate::services::formatter::extract_chapter_number;
use crate::services::llm::Assistant;
use crate::utils::text::{normalize_newlines, split_by_paragraph, split_by_sentence};
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

/// Heading patterns tried in order against every trimmed, non-empty line.
const HEADING_PATTERNS: &[&str] = &[
    r"^第[一二三四五六七八九十百千万零〇\d]+[章节篇回]\b.*", // 第一章 开端, 第12回
    r"^[一二三四五六七八九十百千万零〇]+[、.]\s*.+",         // 一、出发
    r"^(序章|楔子|番外)\b.*",                                // special sections
    r"^chapter\s*\d+\b.*",                                   // Chapter 7: Return
    r"^part\s*\d+\b.*",                                      // Part 2
    r"^(prologue|epilogue)\b.*",
    r"^\d+[.\s]+.+", // 12. Title
];

static DEFAULT_HEADINGS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    HEADING_PATTERNS
        .iter()
        .filter_map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .ok()
        })
        .collect()
});

/// How fallback chapters are labelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackLabels {
    /// 第N段 / 第N句
    #[default]
    Chinese,
    /// Paragraph N / Sentence N
    English,
}

impl FallbackLabels {
    fn label(&self, mode: FallbackMode, index: usize) -> String {
        match (self, mode) {
            (FallbackLabels::Chinese, FallbackMode::Paragraph) => format!("第{index}段"),
            (FallbackLabels::Chinese, FallbackMode::Sentence) => format!("第{index}句"),
            (FallbackLabels::English, FallbackMode::Paragraph) => format!("Paragraph {index}"),
            (FallbackLabels::English, FallbackMode::Sentence) => format!("Sentence {index}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub fallback_mode: FallbackMode,
    /// Chunk size for sentence fallback.
    pub target_chars: usize,
    /// Window size and count of the sample shown to the assistant.
    pub sample_size: usize,
    pub sample_count: usize,
    pub labels: FallbackLabels,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            fallback_mode: FallbackMode::Paragraph,
            target_chars: 1000,
            sample_size: 2000,
            sample_count: 3,
            labels: FallbackLabels::Chinese,
        }
    }
}

/// Turns raw text into ordered chapters: default heading patterns first, then
/// a pattern proposed by the assistant, then generic paragraph or sentence
/// segmentation. Never fails.
pub async fn parse<A: Assistant>(
    text: &str,
    assistant: Option<&A>,
    options: &ParseOptions,
) -> ParseResult {
    let text = normalize_newlines(text);

    if let Some((chapters, leading_text)) = split_at_headings(&text, &DEFAULT_HEADINGS) {
        tracing::debug!(chapters = chapters.len(), "headings found by default patterns");
        return ParseResult {
            chapters,
            strategy: Strategy::Regex,
            leading_text,
        };
    }

    if let Some(assistant) = assistant {
        if let Some((chapters, leading_text)) = chapters_from_assistant(&text, assistant, options).await
        {
            tracing::info!(chapters = chapters.len(), "headings found by assistant pattern");
            return ParseResult {
                chapters,
                strategy: Strategy::LlmPattern,
                leading_text,
            };
        }
    }

    let chapters = fallback_chapters(&text, options);
    tracing::info!(
        mode = ?options.fallback_mode,
        chapters = chapters.len(),
        "no headings detected, using fallback segmentation"
    );
    ParseResult {
        chapters,
        strategy: options.fallback_mode.strategy(),
        leading_text: String::new(),
    }
}

/// Cuts `text` at every line matching one of `patterns`. Returns `None` when
/// no line matches; otherwise the chapters and the trimmed text preceding the
/// first heading.
pub fn split_at_headings(text: &str, patterns: &[Regex]) -> Option<(Vec<Chapter>, String)> {
    let lines: Vec<&str> = text.lines().collect();

    let heading_indices: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && patterns.iter().any(|regex| regex.is_match(line))
        })
        .map(|(idx, _)| idx)
        .collect();

    let first = *heading_indices.first()?;
    let leading_text = lines[..first].join("\n").trim().to_string();

    let chapters = heading_indices
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = heading_indices.get(i + 1).copied().unwrap_or(lines.len());
            let heading = lines[start].trim();
            Chapter {
                original_title: heading.to_string(),
                content: lines[start + 1..end].join("\n").trim().to_string(),
                index_hint: extract_chapter_number(heading),
            }
        })
        .collect();

    Some((chapters, leading_text))
}

/// Compiles an assistant-proposed heading pattern, anchored at line start and
/// case-insensitive.
pub fn compile_heading_pattern(pattern: &str) -> Option<Regex> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return None;
    }
    match RegexBuilder::new(&format!("^(?:{pattern})"))
        .case_insensitive(true)
        .size_limit(1 << 20)
        .build()
    {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::debug!(pattern, "discarding invalid heading pattern: {e}");
            None
        }
    }
}

async fn chapters_from_assistant<A: Assistant>(
    text: &str,
    assistant: &A,
    options: &ParseOptions,
) -> Option<(Vec<Chapter>, String)> {
    let sample = build_detection_samples(text, options.sample_size, options.sample_count);
    let pattern = assistant.detect_heading_pattern(&sample).await?;
    let regex = compile_heading_pattern(&pattern)?;
    let found = split_at_headings(text, std::slice::from_ref(&regex));
    if found.is_none() {
        tracing::debug!(%pattern, "assistant pattern matched no line");
    }
    found
}

fn fallback_chapters(text: &str, options: &ParseOptions) -> Vec<Chapter> {
    let mode = options.fallback_mode;
    let segments = match mode {
        FallbackMode::Paragraph => split_by_paragraph(text),
        FallbackMode::Sentence => split_by_sentence(text, options.target_chars),
    };

    if segments.is_empty() {
        return vec![Chapter::new(
            options.labels.label(FallbackMode::Paragraph, 1),
            text.trim(),
        )];
    }

    segments
        .into_iter()
        .enumerate()
        .map(|(idx, segment)| Chapter::new(options.labels.label(mode, idx + 1), segment))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LanguageHint, TitleRequest};
    use crate::services::llm::Offline;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PatternAssistant {
        pattern: Option<String>,
        calls: AtomicUsize,
    }

    impl PatternAssistant {
        fn new(pattern: Option<&str>) -> Self {
            Self {
                pattern: pattern.map(str::to_string),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Assistant for PatternAssistant {
        async fn classify_language(&self, _sample: &str) -> Option<LanguageHint> {
            None
        }

        async fn detect_heading_pattern(&self, _sample: &str) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pattern.clone()
        }

        async fn format_titles(&self, _entries: &[TitleRequest], _language: &str) -> Option<Vec<String>> {
            None
        }
    }

    async fn parse_offline(text: &str, options: &ParseOptions) -> ParseResult {
        parse(text, None::<&Offline>, options).await
    }

    #[tokio::test]
    async fn test_chinese_headings_use_regex() {
        let result = parse_offline("第一章 开端\n正文一。\n\n第二章 发展\n正文二。", &ParseOptions::default()).await;
        assert_eq!(result.strategy, Strategy::Regex);
        let titles: Vec<_> = result.chapters.iter().map(|c| c.original_title.as_str()).collect();
        assert_eq!(titles, vec!["第一章 开端", "第二章 发展"]);
        assert_eq!(result.chapters[0].content, "正文一。");
        assert_eq!(result.chapters[1].content, "正文二。");
        assert_eq!(result.chapters[0].index_hint, Some(1));
    }

    #[tokio::test]
    async fn test_leading_text_is_retained_not_chaptered() {
        let text = "这是开篇背景介绍。\n用于说明世界观。\n\n第一章 起点\n这里是正文。";
        let result = parse_offline(text, &ParseOptions::default()).await;
        assert_eq!(result.strategy, Strategy::Regex);
        assert_eq!(result.chapters.len(), 1);
        assert!(result.chapters[0].original_title.starts_with("第一章"));
        assert_eq!(result.leading_text, "这是开篇背景介绍。\n用于说明世界观。");
    }

    #[tokio::test]
    async fn test_english_and_special_headings() {
        let text = "Prologue\nIt began.\nChapter 1: Start\nBody one.\nPART 2\nBody two.\n楔子\n引言。\n一、出发\n走。\n12. Twelve\nBody.";
        let result = parse_offline(text, &ParseOptions::default()).await;
        let titles: Vec<_> = result.chapters.iter().map(|c| c.original_title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Prologue", "Chapter 1: Start", "PART 2", "楔子", "一、出发", "12. Twelve"]
        );
        assert_eq!(result.chapters[5].index_hint, Some(12));
    }

    #[tokio::test]
    async fn test_crlf_input_is_normalized() {
        let result = parse_offline("Chapter 1\r\nA.\r\nChapter 2\r\nB.", &ParseOptions::default()).await;
        assert_eq!(result.chapters.len(), 2);
        assert_eq!(result.chapters[0].content, "A.");
    }

    #[tokio::test]
    async fn test_empty_chapter_between_headings() {
        let result = parse_offline("第1章\n第2章\n内容", &ParseOptions::default()).await;
        assert_eq!(result.chapters.len(), 2);
        assert_eq!(result.chapters[0].content, "");
        assert_eq!(result.chapters[1].content, "内容");
    }

    #[tokio::test]
    async fn test_assistant_pattern_used_when_no_default_heading() {
        let assistant = PatternAssistant::new(Some(r"@@\d+"));
        let text = "@@1 opening\nline\n@@2 second\nline";
        let result = parse(text, Some(&assistant), &ParseOptions::default()).await;
        assert_eq!(result.strategy, Strategy::LlmPattern);
        assert_eq!(result.chapters.len(), 2);
        assert_eq!(result.chapters[1].original_title, "@@2 second");
    }

    #[tokio::test]
    async fn test_assistant_not_consulted_when_regex_succeeds() {
        let assistant = PatternAssistant::new(Some(r"@@\d+"));
        let result = parse("Chapter 1\nbody", Some(&assistant), &ParseOptions::default()).await;
        assert_eq!(result.strategy, Strategy::Regex);
        assert_eq!(assistant.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_assistant_pattern_falls_through() {
        let assistant = PatternAssistant::new(Some(r"(unclosed"));
        let text = "first paragraph\n\nsecond paragraph";
        let result = parse(text, Some(&assistant), &ParseOptions::default()).await;
        assert_eq!(result.strategy, Strategy::FallbackParagraph);
        assert_eq!(assistant.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmatched_or_absent_pattern_falls_through() {
        for pattern in [Some("^NEVER$"), Some("   "), None] {
            let assistant = PatternAssistant::new(pattern);
            let result = parse("alpha\n\nbeta", Some(&assistant), &ParseOptions::default()).await;
            assert_eq!(result.strategy, Strategy::FallbackParagraph);
        }
    }

    #[tokio::test]
    async fn test_paragraph_fallback() {
        let result = parse_offline("没有标题的第一段。\n\n没有标题的第二段。", &ParseOptions::default()).await;
        assert_eq!(result.strategy, Strategy::FallbackParagraph);
        let titles: Vec<_> = result.chapters.iter().map(|c| c.original_title.as_str()).collect();
        assert_eq!(titles, vec!["第1段", "第2段"]);
        assert!(result.leading_text.is_empty());
    }

    #[tokio::test]
    async fn test_sentence_fallback_packs_to_target() {
        let options = ParseOptions {
            fallback_mode: FallbackMode::Sentence,
            target_chars: 12,
            ..ParseOptions::default()
        };
        let text = "这是没有章节标题的文本。第一句结束。第二句继续。第三句结束。";
        let result = parse_offline(text, &options).await;
        assert_eq!(result.strategy, Strategy::FallbackSentence);
        assert!(result.chapters.len() >= 2);
        assert_eq!(result.chapters[0].original_title, "第1句");
        let joined: String = result.chapters.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[tokio::test]
    async fn test_english_fallback_labels() {
        let options = ParseOptions {
            labels: FallbackLabels::English,
            ..ParseOptions::default()
        };
        let result = parse_offline("one\n\ntwo", &options).await;
        assert_eq!(result.chapters[1].original_title, "Paragraph 2");
    }

    #[tokio::test]
    async fn test_whitespace_document_becomes_single_chapter() {
        let result = parse_offline("  \n\n ", &ParseOptions::default()).await;
        assert_eq!(result.chapters.len(), 1);
        assert_eq!(result.chapters[0].original_title, "第1段");
        assert_eq!(result.chapters[0].content, "");
    }

    #[test]
    fn test_heading_requires_word_boundary() {
        assert!(split_at_headings("第一章开端\n正文", &DEFAULT_HEADINGS).is_none());
        assert!(split_at_headings("第一章 开端\n正文", &DEFAULT_HEADINGS).is_some());
    }

    #[test]
    fn test_compile_heading_pattern_anchors_at_line_start() {
        let regex = compile_heading_pattern("book \\d+").unwrap();
        assert!(regex.is_match("BOOK 3 The Road"));
        assert!(!regex.is_match("the book 3"));
        assert!(compile_heading_pattern("[").is_none());
        assert!(compile_heading_pattern("").is_none());
    }
}
