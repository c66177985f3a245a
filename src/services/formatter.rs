use crate::models::{FormattedTitle, TitleFormatInput, TitleRequest, TitleSource};
use crate::services::llm::Assistant;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

const CJK_NUMERALS: &str = "零〇一二两三四五六七八九十百千万";

/// Largest chapter number taken from a heading. Bigger values are treated as
/// noise rather than as numbering.
pub const MAX_CHAPTER_NUMBER: u32 = 999_999;

static CHAPTER_NUMBER: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"第\s*(\d+)\s*[章节回]".to_string(),
        format!(r"第\s*([{CJK_NUMERALS}]+)\s*[章节回]"),
        r"(?i)chapter\s*(\d+)".to_string(),
        r"(?i)\bc\s*(\d+)\b".to_string(),
        r"^\s*(\d+)(?:[.\s]|$)".to_string(),
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static HEADING_MARKER: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"^第\s*[\d{CJK_NUMERALS}]+\s*[章节回篇][:：\-\s]*"),
        r"(?i)^chapter\s*\d+[:：\-\s]*".to_string(),
        r"(?i)^c\s*\d+\b[:：\-\s]*".to_string(),
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(num|title|part|total)\}").expect("valid placeholder regex"));

/// Value of a Chinese numeral such as 十二, 一百零五 or 二〇二四.
pub fn parse_cjk_numeral(text: &str) -> Option<u32> {
    if text.is_empty() || text.chars().count() > 12 {
        return None;
    }

    let mut total: u64 = 0;
    let mut section: u64 = 0;
    let mut digit: Option<u64> = None;

    for ch in text.chars() {
        let value = match ch {
            '零' | '〇' => Some(0),
            '一' => Some(1),
            '二' | '两' => Some(2),
            '三' => Some(3),
            '四' => Some(4),
            '五' => Some(5),
            '六' => Some(6),
            '七' => Some(7),
            '八' => Some(8),
            '九' => Some(9),
            _ => None,
        };
        if let Some(value) = value {
            // Digits written positionally, as in 二〇二四.
            digit = Some(digit.map_or(value, |prev| prev * 10 + value));
            continue;
        }
        let unit = match ch {
            '十' => 10,
            '百' => 100,
            '千' => 1000,
            '万' => {
                total += (section + digit.take().unwrap_or(0)) * 10_000;
                section = 0;
                continue;
            }
            _ => return None,
        };
        section += digit.take().unwrap_or(1) * unit;
    }

    u32::try_from(total + section + digit.unwrap_or(0)).ok()
}

/// Explicit chapter number encoded in a heading: 第12章, 第十二章, Chapter 7,
/// c88 or a bare leading "12.".
pub fn extract_chapter_number(title: &str) -> Option<u32> {
    CHAPTER_NUMBER.iter().find_map(|regex| {
        let raw = regex.captures(title)?.get(1)?.as_str();
        raw.parse()
            .ok()
            .or_else(|| parse_cjk_numeral(raw))
            .filter(|&num| num <= MAX_CHAPTER_NUMBER)
    })
}

/// Running chapter serial for one document. Each assignment is strictly
/// greater than the previous one and honors a larger explicit number up to
/// [`MAX_CHAPTER_NUMBER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberingCursor {
    next: u32,
}

impl Default for NumberingCursor {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl NumberingCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, hint: Option<u32>) -> u32 {
        let hint = hint.filter(|&hint| hint <= MAX_CHAPTER_NUMBER);
        let num = hint.map_or(self.next, |hint| hint.max(self.next));
        self.next = num.saturating_add(1);
        num
    }
}

/// Heading text with any leading chapter marker removed. Falls back to the
/// whole heading when nothing else is left.
pub fn strip_heading_marker(title: &str) -> String {
    let original = title.trim();
    let mut stripped = original.to_string();
    for regex in HEADING_MARKER.iter() {
        stripped = regex.replace(&stripped, "").into_owned();
    }
    let stripped = stripped.trim();
    if stripped.is_empty() {
        original.to_string()
    } else {
        stripped.to_string()
    }
}

fn template_for<'a>(formats: &'a HashMap<String, String>, language: &str, is_split: bool) -> &'a str {
    let (key, default) = match (language == "zh", is_split) {
        (true, true) => ("zh", "第{num}章：{title} ({part}/{total})"),
        (true, false) => ("zh_no_split", "第{num}章：{title}"),
        (false, true) => ("en", "Chapter {num}: {title} (part {part})"),
        (false, false) => ("en_no_split", "Chapter {num}: {title}"),
    };
    formats.get(key).map(String::as_str).unwrap_or(default)
}

/// Title built without the assistant.
pub fn local_title(
    entry: &TitleFormatInput,
    chapter_num: u32,
    language: &str,
    formats: &HashMap<String, String>,
) -> String {
    let title = strip_heading_marker(&entry.original_title);
    let template = template_for(formats, language, entry.total > 1);
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "num" => chapter_num.to_string(),
            "title" => title.clone(),
            "part" => entry.part.to_string(),
            _ => entry.total.to_string(),
        })
        .into_owned()
}

/// Formats every entry. Local titles are always computed; with an assistant
/// they are offered per batch and replaced only when the batch answer has
/// exactly one title per entry.
pub async fn format_titles<A: Assistant>(
    entries: &[TitleFormatInput],
    language: &str,
    formats: &HashMap<String, String>,
    batch_size: usize,
    assistant: Option<&A>,
) -> Vec<FormattedTitle> {
    let mut cursor = NumberingCursor::new();
    let numbered: Vec<u32> = entries
        .iter()
        .map(|entry| {
            let hint = entry
                .chapter_num
                .or_else(|| extract_chapter_number(&entry.original_title));
            cursor.assign(hint)
        })
        .collect();

    let fallback_titles: Vec<String> = entries
        .iter()
        .zip(&numbered)
        .map(|(entry, &num)| local_title(entry, num, language, formats))
        .collect();

    let Some(assistant) = assistant else {
        return fallback_titles
            .into_iter()
            .map(|title| FormattedTitle {
                title,
                source: TitleSource::Local,
            })
            .collect();
    };

    let size = batch_size.max(1);
    let mut titles = Vec::with_capacity(entries.len());

    for (batch_idx, (entry_chunk, fallback_chunk)) in entries
        .chunks(size)
        .zip(fallback_titles.chunks(size))
        .enumerate()
    {
        let offset = batch_idx * size;
        let requests: Vec<TitleRequest> = entry_chunk
            .iter()
            .zip(fallback_chunk)
            .enumerate()
            .map(|(idx, (entry, fallback))| TitleRequest {
                index: idx,
                original_title: entry.original_title.clone(),
                chapter_num: Some(numbered[offset + idx]),
                part: entry.part,
                total: entry.total,
                fallback_title: fallback.clone(),
            })
            .collect();

        match assistant.format_titles(&requests, language).await {
            Some(formatted) if formatted.len() == entry_chunk.len() => {
                titles.extend(formatted.into_iter().zip(fallback_chunk).map(|(title, fallback)| {
                    let title = title.trim();
                    if title.is_empty() {
                        fallback.clone()
                    } else {
                        title.to_string()
                    }
                }));
            }
            answer => {
                tracing::debug!(
                    batch = batch_idx,
                    expected = entry_chunk.len(),
                    received = ?answer.map(|titles| titles.len()),
                    "title batch rejected, using local titles"
                );
                titles.extend(fallback_chunk.iter().cloned());
            }
        }
    }

    titles
        .into_iter()
        .zip(fallback_titles)
        .map(|(title, fallback)| {
            let source = if title != fallback {
                TitleSource::Llm
            } else {
                TitleSource::Local
            };
            FormattedTitle { title, source }
        })
        .collect()
}
