//! Length balancing: subdivides an over-long chapter into near-equal parts,
//! cutting at paragraph, sentence or comma boundaries before resorting to a
//! hard cut. Positions and lengths count characters.

use crate::config::SplitterConfig;
use crate::models::{Chapter, Part};
use crate::utils::text::{is_closing_mark, is_sentence_ending};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitOptions {
    pub target_chars: usize,
    pub min_ratio: f64,
    pub max_ratio: f64,
    /// Characters searched on each side of the ideal cut position.
    pub search_range: usize,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self::from(&SplitterConfig::default())
    }
}

impl From<&SplitterConfig> for SplitOptions {
    fn from(config: &SplitterConfig) -> Self {
        Self {
            target_chars: config.target_chars,
            min_ratio: config.min_ratio,
            max_ratio: config.max_ratio,
            search_range: config.split_search_range,
        }
    }
}

/// Number of parts a body of `char_count` characters should be cut into.
///
/// Starts from `char_count / target` rounded (ties round down), adds one part
/// if the average would exceed `target * max_ratio`, then removes parts while
/// the average would fall below `target * min_ratio`.
pub fn calculate_split_count(char_count: usize, target: usize, min_ratio: f64, max_ratio: f64) -> usize {
    if char_count == 0 {
        return 1;
    }

    let target = target.max(1);
    let min_chars = ((target as f64 * min_ratio).floor() as usize).max(1);
    let max_chars = ((target as f64 * max_ratio).floor() as usize).max(min_chars);

    let rounds_up = char_count % target > target / 2;
    let mut count = (char_count / target + usize::from(rounds_up)).max(1);

    if char_count > max_chars.saturating_mul(count) {
        count += 1;
    }
    while count > 1 && char_count < min_chars.saturating_mul(count) {
        count -= 1;
    }
    count
}

fn closest(candidates: impl Iterator<Item = usize>, target: usize) -> Option<usize> {
    candidates.min_by_key(|&pos| pos.abs_diff(target))
}

fn split_point_in(chars: &[char], target_pos: usize, search_range: usize) -> usize {
    let len = chars.len();
    if len == 0 {
        return 0;
    }

    let start = target_pos.saturating_sub(search_range).min(len);
    let end = target_pos.saturating_add(search_range).min(len);

    // Runs of two or more newlines; cut after the run.
    let paragraph_breaks = (start..end).filter_map(|i| {
        if chars[i] != '\n' || (i > start && chars[i - 1] == '\n') {
            return None;
        }
        let run_end = (i..end).find(|&j| chars[j] != '\n').unwrap_or(end);
        (run_end - i >= 2).then_some(run_end)
    });
    if let Some(pos) = closest(paragraph_breaks, target_pos) {
        return pos;
    }

    // Cut after the punctuation and any closing marks glued to it.
    let sentence_breaks = (start..end)
        .filter(|&i| is_sentence_ending(chars[i]))
        .map(|i| {
            let mut pos = i + 1;
            while pos < len && is_closing_mark(chars[pos]) {
                pos += 1;
            }
            pos
        });
    if let Some(pos) = closest(sentence_breaks, target_pos) {
        return pos;
    }

    let comma_breaks = (start..end)
        .filter(|&i| matches!(chars[i], ',' | '，'))
        .map(|i| i + 1);
    if let Some(pos) = closest(comma_breaks, target_pos) {
        return pos;
    }

    target_pos.min(len - 1).max(1)
}

/// Best character position to cut `text` near `target_pos`, searching
/// `search_range` characters on either side: paragraph breaks first, then
/// sentence ends, then commas, each tier picking the candidate closest to the
/// target. Falls back to `target_pos` clamped to `[1, len - 1]`.
pub fn find_split_point(text: &str, target_pos: usize, search_range: usize) -> usize {
    let chars: Vec<char> = text.chars().collect();
    split_point_in(&chars, target_pos, search_range)
}

fn cut(chars: &[char], point: usize) -> (String, String) {
    let (left, right) = chars.split_at(point.min(chars.len()));
    (
        left.iter().collect::<String>().trim().to_string(),
        right.iter().collect::<String>().trim().to_string(),
    )
}

/// Splits `content` into near-equal pieces. Each cut is placed within what is
/// left after the previous one, so the final piece count may differ from the
/// initial estimate. Blank content yields a single empty piece.
pub fn split_content(content: &str, options: &SplitOptions) -> Vec<String> {
    let normalized = content.trim();
    if normalized.is_empty() {
        return vec![String::new()];
    }

    let total_chars = normalized.chars().count();
    let split_count = calculate_split_count(
        total_chars,
        options.target_chars,
        options.min_ratio,
        options.max_ratio,
    );
    if split_count == 1 {
        return vec![normalized.to_string()];
    }

    let mut pieces = Vec::with_capacity(split_count);
    let mut remaining: Vec<char> = normalized.chars().collect();
    let mut remaining_count = split_count;

    while remaining_count > 1 && !remaining.is_empty() {
        let target_pos = (remaining.len() / remaining_count).max(1);
        let point = split_point_in(&remaining, target_pos, options.search_range);

        let (mut left, mut right) = cut(&remaining, point);
        if left.is_empty() || right.is_empty() {
            (left, right) = cut(&remaining, target_pos);
        }

        pieces.push(left);
        remaining = right.chars().collect();
        remaining_count -= 1;
    }

    pieces.push(remaining.into_iter().collect::<String>());
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

/// Splits one chapter into numbered parts sharing its title.
pub fn split_chapter(chapter: &Chapter, options: &SplitOptions) -> Vec<Part> {
    let pieces = split_content(&chapter.content, options);
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(idx, content)| Part {
            original_title: chapter.original_title.clone(),
            content,
            part: idx + 1,
            total,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::text::CLOSING_MARKS;

    fn options(target_chars: usize, search_range: usize) -> SplitOptions {
        SplitOptions {
            target_chars,
            min_ratio: 0.7,
            max_ratio: 1.3,
            search_range,
        }
    }

    #[test]
    fn test_calculate_split_count_basic() {
        assert_eq!(calculate_split_count(1000, 1000, 0.7, 1.3), 1);
        assert_eq!(calculate_split_count(3200, 1000, 0.7, 1.3), 3);
        assert_eq!(calculate_split_count(0, 1000, 0.7, 1.3), 1);
        assert_eq!(calculate_split_count(10, 1000, 0.7, 1.3), 1);
    }

    #[test]
    fn test_calculate_split_count_ties_favor_fewer_parts() {
        assert_eq!(calculate_split_count(2500, 1000, 0.7, 1.3), 2);
        assert_eq!(calculate_split_count(2501, 1000, 0.7, 1.3), 3);
    }

    #[test]
    fn test_calculate_split_count_bumps_then_backs_off() {
        // 1301 / 1 exceeds max, but 1301 / 2 falls under min.
        assert_eq!(calculate_split_count(1301, 1000, 0.7, 1.3), 1);
        // 1400 / 2 sits exactly on min.
        assert_eq!(calculate_split_count(1400, 1000, 0.7, 1.3), 2);
    }

    #[test]
    fn test_calculate_split_count_extreme_ratios() {
        assert_eq!(calculate_split_count(10_000, 1000, 0.7, 1e19), 10);
        assert_eq!(calculate_split_count(10_000, 1000, 1e19, 1e19), 1);
        assert_eq!(calculate_split_count(usize::MAX, 1, 0.7, 1.3), usize::MAX);
    }

    #[test]
    fn test_find_split_point_prefers_paragraph() {
        let text = format!("{}\n\n{}", "A".repeat(120), "B".repeat(120));
        let point = find_split_point(&text, 121, 30);
        assert_eq!(point, 122);
    }

    #[test]
    fn test_find_split_point_paragraph_beats_closer_sentence() {
        let text = format!("{}\n\n{}. {}", "a".repeat(50), "b".repeat(5), "c".repeat(50));
        assert_eq!(find_split_point(&text, 58, 20), 52);
    }

    #[test]
    fn test_find_split_point_keeps_closing_quote_with_sentence() {
        let text = "他说：「先吃一周的药，如果问题没有改善就要复诊了。」然后继续安排复诊。";
        let chars: Vec<char> = text.chars().collect();
        let target = chars.iter().position(|&c| c == '。').unwrap() + 1;
        let point = find_split_point(text, target, 30);
        let left: String = chars[..point].iter().collect();
        assert!(left.ends_with("。」"));
    }

    #[test]
    fn test_find_split_point_uses_comma_tier() {
        let text = "aaaa,bbbbbbbbbb,cccc";
        assert_eq!(find_split_point(text, 14, 20), 16);
    }

    #[test]
    fn test_find_split_point_hard_fallback_is_clamped() {
        assert_eq!(find_split_point("abcdef", 3, 1), 3);
        assert_eq!(find_split_point("abcdef", 50, 1), 5);
        assert_eq!(find_split_point("abcdef", 0, 0), 1);
        assert_eq!(find_split_point("", 3, 10), 0);
    }

    #[test]
    fn test_split_content_does_not_start_piece_with_closing_quote() {
        let content = "他说：「现在还不能确定具体的原因，先吃一周的药，如果问题没有改善就要复诊了。」然后继续讨论治疗方案和复查时间。";
        let pieces = split_content(content, &options(35, 40));
        assert!(pieces.len() >= 2);
        assert!(pieces[0].ends_with("。」"));
        assert!(!pieces[1].starts_with('」'));
    }

    #[test]
    fn test_split_content_does_not_start_with_nested_closing_marks() {
        let content = "He said, \"Take this medicine for one week.\")]} \
                       Then return in 7 days for follow-up and additional checks.";
        let pieces = split_content(content, &options(40, 60));
        assert!(pieces.len() >= 2);
        assert!(pieces[0].ends_with(".\")]}"));
        assert!(!pieces[1].starts_with(CLOSING_MARKS));
    }

    #[test]
    fn test_split_content_short_body_is_single_trimmed_piece() {
        let pieces = split_content("  short body  ", &options(1000, 200));
        assert_eq!(pieces, vec!["short body"]);
    }

    #[test]
    fn test_split_content_blank_body() {
        assert_eq!(split_content(" \n ", &options(1000, 200)), vec![String::new()]);
    }

    #[test]
    fn test_split_content_without_boundaries_hard_cuts() {
        let body = "x".repeat(3000);
        let pieces = split_content(&body, &options(1000, 50));
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|piece| piece.len() == 1000));
    }

    #[test]
    fn test_split_chapter_multiple_parts() {
        let content = format!("{}\n\n{}", "这是一段内容。".repeat(100), "第二段内容。".repeat(120));
        let chapter = Chapter::new("第1章 测试", content);
        let parts = split_chapter(&chapter, &options(300, 200));
        assert!(parts.len() >= 2);
        assert_eq!(parts[0].part, 1);
        assert!(parts.iter().all(|p| p.total == parts.len()));
        assert!(parts.iter().all(|p| p.original_title == "第1章 测试"));
        assert!(parts.iter().all(|p| !p.content.is_empty()));
        for (idx, part) in parts.iter().enumerate() {
            assert_eq!(part.part, idx + 1);
        }
    }

    #[test]
    fn test_split_chapter_empty_content() {
        let parts = split_chapter(&Chapter::new("空", ""), &SplitOptions::default());
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content, "");
        assert_eq!(parts[0].total, 1);
    }
}
