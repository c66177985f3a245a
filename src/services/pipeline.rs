use crate::config::{AppConfig, SplitterConfig};
use crate::error::{Error, Result};
use crate::models::{Chapter, Chapterized, ParseResult, ProcessResult, RenderChapter, TitleFormatInput};
use crate::services::chapterizer::{FallbackLabels, ParseOptions, parse};
use crate::services::detector::{detect_language, template_language};
use crate::services::formatter::{NumberingCursor, format_titles};
use crate::services::llm::{Assistant, LLMClient};
use crate::services::renderer::{RenderOptions, render, write_output};
use crate::services::splitter::{SplitOptions, split_chapter};
use crate::utils::text::{normalize_newlines, strip_bom};
use std::path::Path;

/// Reads a UTF-8 document (BOM tolerated) and normalizes its line endings.
pub fn read_document(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|source| Error::ReadInput {
        path: path.to_path_buf(),
        source,
    })?;
    decode_document(&bytes, &path.display().to_string())
}

/// Decodes uploaded or read bytes. `label` names the source in errors.
pub fn decode_document(bytes: &[u8], label: &str) -> Result<String> {
    let text = std::str::from_utf8(strip_bom(bytes))
        .map_err(|_| Error::InvalidUtf8(label.to_string()))?;
    if text.trim().is_empty() {
        return Err(Error::EmptyDocument(label.to_string()));
    }
    Ok(normalize_newlines(text))
}

/// Splits every chapter into parts and numbers the parts through one
/// [`NumberingCursor`] seeded by each chapter's explicit number. Returns the
/// title inputs and part bodies in document order.
pub fn balance_chapters(
    chapters: &[Chapter],
    options: &SplitOptions,
) -> (Vec<TitleFormatInput>, Vec<String>) {
    let mut cursor = NumberingCursor::new();
    let mut title_inputs = Vec::new();
    let mut contents = Vec::new();

    for chapter in chapters {
        let parts = split_chapter(chapter, options);
        tracing::debug!(
            title = %chapter.original_title,
            chars = chapter.char_count(),
            parts = parts.len(),
            "chapter balanced"
        );
        for part in parts {
            title_inputs.push(TitleFormatInput {
                chapter_num: Some(cursor.assign(chapter.index_hint)),
                original_title: part.original_title,
                part: part.part,
                total: part.total,
            });
            contents.push(part.content);
        }
    }
    (title_inputs, contents)
}

/// Detection, parsing, splitting, numbering, title formatting and rendering
/// for one document at a time.
pub struct Pipeline<A = LLMClient> {
    config: AppConfig,
    assistant: Option<A>,
}

impl Pipeline<LLMClient> {
    /// Builds the pipeline with the assistant selected by `config.llm`.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let assistant =
            LLMClient::from_config(&config.llm).map_err(|e| Error::Config(format!("{e:#}")))?;
        if let Some(client) = &assistant {
            tracing::info!(provider = client.provider(), model = client.model(), "LLM assistant enabled");
        }
        Ok(Self { config, assistant })
    }
}

impl<A: Assistant> Pipeline<A> {
    pub fn with_assistant(config: AppConfig, assistant: Option<A>) -> Self {
        Self { config, assistant }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn has_assistant(&self) -> bool {
        self.assistant.is_some()
    }

    /// Decides every chapter title and body for `text`. Assistant failures
    /// only ever degrade to local behavior.
    pub async fn process_text(&self, text: &str) -> Chapterized {
        self.process_text_with(text, &self.config.splitter).await
    }

    /// Like [`Pipeline::process_text`] with a per-call splitter configuration.
    pub async fn process_text_with(&self, text: &str, splitter: &SplitterConfig) -> Chapterized {
        let assistant = self.assistant.as_ref();
        let detection_config = &self.config.llm.chapter_detection;

        let detection = detect_language(text, assistant).await;
        let language = template_language(&detection.language);
        tracing::info!(
            language = %detection.language,
            source = ?detection.source,
            confidence = detection.confidence,
            "language detected"
        );

        let options = ParseOptions {
            fallback_mode: self.config.fallback.no_chapter_detected,
            target_chars: splitter.target_chars,
            sample_size: detection_config.sample_size,
            sample_count: detection_config.sample_count,
            labels: if language == "zh" {
                FallbackLabels::Chinese
            } else {
                FallbackLabels::English
            },
        };
        let parser_assistant = assistant.filter(|_| detection_config.enable_llm_fallback);
        let ParseResult {
            chapters,
            strategy,
            leading_text,
        } = parse(text, parser_assistant, &options).await;
        let input_chapter_count = chapters.len();

        let split_options = SplitOptions::from(splitter);
        let balanced =
            tokio::task::spawn_blocking(move || balance_chapters(&chapters, &split_options)).await;
        let (title_inputs, contents) = match balanced {
            Ok(balanced) => balanced,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        };

        let titles = format_titles(
            &title_inputs,
            language,
            &self.config.formats,
            self.config.llm.title_formatting.batch_size,
            assistant,
        )
        .await;

        let chapters: Vec<RenderChapter> = titles
            .into_iter()
            .zip(contents)
            .map(|(title, content)| RenderChapter {
                title: title.title,
                content,
            })
            .collect();

        tracing::info!(
            %strategy,
            input_chapters = input_chapter_count,
            output_chapters = chapters.len(),
            "document chapterized"
        );

        Chapterized {
            language: detection.language,
            strategy,
            leading_text,
            input_chapter_count,
            chapters,
        }
    }

    /// Renders a chapterized document in the configured output format.
    pub fn render(&self, chapterized: &Chapterized, book_title: &str) -> Result<Vec<u8>> {
        let output = &self.config.output;
        let options = RenderOptions {
            separator: &self.config.splitter.separator,
            blank_lines: output.blank_lines_between_chapters,
            encoding: &output.encoding,
            format: output.format,
            book_title,
            language: template_language(&chapterized.language),
        };
        render(&chapterized.chapters, &chapterized.leading_text, &options)
    }

    /// Reads `input`, processes it and writes the result to `output` in one
    /// piece. Only input and output problems are errors.
    pub async fn process(&self, input: &Path, output: &Path) -> Result<ProcessResult> {
        let text = read_document(input)?;
        let chapterized = self.process_text(&text).await;

        let book_title = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = self.render(&chapterized, &book_title)?;
        write_output(output, &bytes)?;
        tracing::info!(output = %output.display(), bytes = bytes.len(), "output written");

        Ok(ProcessResult {
            output_path: output.to_path_buf(),
            detected_language: chapterized.language,
            parse_strategy: chapterized.strategy,
            input_chapter_count: chapterized.input_chapter_count,
            output_chapter_count: chapterized.chapters.len(),
        })
    }
}
