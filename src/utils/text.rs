//! Text primitives shared by the parser and the splitter. All lengths and
//! positions here count characters, not bytes.

use regex::Regex;
use std::sync::LazyLock;

/// Punctuation that ends a sentence.
pub const SENTENCE_ENDINGS: &[char] = &['。', '.', '!', '?', '！', '？'];

/// Closing quotes and brackets that must stay attached to the sentence before
/// them.
pub const CLOSING_MARKS: &[char] = &[
    '”', '」', '』', '》', '】', '〕', '）', ')', ']', '}', '"', '\'', '’',
];

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("valid paragraph regex"));

pub fn is_sentence_ending(ch: char) -> bool {
    SENTENCE_ENDINGS.contains(&ch)
}

pub fn is_closing_mark(ch: char) -> bool {
    CLOSING_MARKS.contains(&ch)
}

pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Drops a leading UTF-8 byte order mark.
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)
}

/// Slices `text` by character positions, clamped to its length.
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let byte_at = |pos: usize| {
        text.char_indices()
            .nth(pos)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len())
    };
    let start_byte = byte_at(start);
    let end_byte = byte_at(end.max(start));
    &text[start_byte..end_byte]
}

/// Takes `sample_count` windows of `sample_size` characters at evenly spaced
/// offsets. Text no longer than one window is returned whole.
pub fn sample_text_chunks(text: &str, sample_size: usize, sample_count: usize) -> Vec<String> {
    let normalized = normalize_newlines(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let sample_size = sample_size.max(100);
    let sample_count = sample_count.max(1);
    let len = normalized.chars().count();

    if len <= sample_size {
        return vec![normalized];
    }
    if sample_count == 1 {
        return vec![char_slice(&normalized, 0, sample_size).to_string()];
    }

    let max_start = len - sample_size;
    (0..sample_count)
        .map(|i| {
            let pos = (max_start as f64 * i as f64 / (sample_count - 1) as f64).round() as usize;
            char_slice(&normalized, pos, pos + sample_size).to_string()
        })
        .collect()
}

/// Splits on blank-line runs, dropping empty paragraphs.
pub fn split_by_paragraph(text: &str) -> Vec<String> {
    let normalized = normalize_newlines(text);
    PARAGRAPH_BREAK
        .split(&normalized)
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect()
}

/// Byte spans of sentences, each ending after its terminal punctuation and any
/// closing marks that follow it. A trailing fragment without punctuation is
/// its own sentence.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if !is_sentence_ending(ch) {
            continue;
        }
        let mut end = idx + ch.len_utf8();
        while let Some(&(next_idx, next)) = chars.peek() {
            if !is_closing_mark(next) {
                break;
            }
            end = next_idx + next.len_utf8();
            chars.next();
        }
        if !text[start..end].trim().is_empty() {
            spans.push((start, end));
        }
        start = end;
    }

    if !text[start..].trim().is_empty() {
        spans.push((start, text.len()));
    }
    spans
}

/// Segments `text` into sentences and greedily packs them into chunks of at
/// most `target_chars` characters. A sentence longer than the target becomes a
/// chunk of its own.
pub fn split_by_sentence(text: &str, target_chars: usize) -> Vec<String> {
    let normalized = normalize_newlines(text);
    let normalized = normalized.trim();
    if normalized.is_empty() {
        return Vec::new();
    }

    let spans = sentence_spans(normalized);
    if spans.is_empty() {
        return vec![normalized.to_string()];
    }

    let target_chars = target_chars.max(1);
    let mut chunks = Vec::new();
    let mut chunk_start: Option<usize> = None;
    let mut chunk_end = 0;
    let mut current_len = 0;

    for (start, end) in spans {
        let sentence_len = normalized[start..end].trim().chars().count();
        if let Some(begin) = chunk_start {
            if current_len + sentence_len > target_chars {
                chunks.push(normalized[begin..chunk_end].trim().to_string());
                chunk_start = Some(start);
                chunk_end = end;
                current_len = sentence_len;
                continue;
            }
        } else {
            chunk_start = Some(start);
        }
        chunk_end = end;
        current_len += sentence_len;
    }

    if let Some(begin) = chunk_start {
        chunks.push(normalized[begin..chunk_end].trim().to_string());
    }

    chunks.retain(|chunk| !chunk.is_empty());
    chunks
}
