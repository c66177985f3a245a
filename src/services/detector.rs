use crate::models::{DetectionSource, LanguageDetection};
use crate::services::llm::Assistant;
use crate::utils::text::{char_slice, sample_text_chunks};

/// Characters of the document inspected by the classifier.
pub const LANGUAGE_SAMPLE_CHARS: usize = 500;

const SAMPLE_BREAK: &str = "\n\n--- SAMPLE BREAK ---\n\n";

fn is_cjk(ch: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&ch)
}

/// Classifies by the ratio of CJK ideographs to ASCII letters.
pub fn heuristic_language(sample: &str) -> LanguageDetection {
    let detection = |language: &str, confidence: f64| LanguageDetection {
        language: language.to_string(),
        confidence,
        source: DetectionSource::Heuristic,
    };

    if sample.trim().is_empty() {
        return detection("unknown", 0.0);
    }

    let zh_chars = sample.chars().filter(|&ch| is_cjk(ch)).count();
    let latin_chars = sample.chars().filter(char::is_ascii_alphabetic).count();
    if zh_chars == 0 && latin_chars == 0 {
        return detection("unknown", 0.1);
    }

    let total = (zh_chars + latin_chars) as f64;
    let zh_ratio = zh_chars as f64 / total;
    let latin_ratio = latin_chars as f64 / total;

    if zh_ratio >= 0.6 {
        detection("zh", zh_ratio)
    } else if latin_ratio >= 0.6 {
        detection("en", latin_ratio)
    } else {
        detection("mixed", zh_ratio.max(latin_ratio))
    }
}

/// Heuristic classification, replaced by the assistant's answer when it
/// gives one.
pub async fn detect_language<A: Assistant>(text: &str, assistant: Option<&A>) -> LanguageDetection {
    let sample = char_slice(text, 0, LANGUAGE_SAMPLE_CHARS);
    let heuristic = heuristic_language(sample);

    let Some(assistant) = assistant else {
        return heuristic;
    };
    match assistant.classify_language(sample).await {
        Some(hint) => {
            tracing::debug!(
                heuristic = %heuristic.language,
                assistant = %hint.language,
                "language classified by assistant"
            );
            LanguageDetection {
                language: hint.language,
                confidence: hint.confidence.unwrap_or(0.7),
                source: DetectionSource::Llm,
            }
        }
        None => heuristic,
    }
}

/// Chooses the title template family for a detected language.
pub fn template_language(detected: &str) -> &'static str {
    match detected {
        "zh" | "mixed" => "zh",
        _ => "en",
    }
}

/// Joins evenly spaced sample windows into the text shown to the assistant.
pub fn build_detection_samples(text: &str, sample_size: usize, sample_count: usize) -> String {
    sample_text_chunks(text, sample_size, sample_count).join(SAMPLE_BREAK)
}
