use crate::config::OutputFormat;
use crate::error::{Error, Result};
use crate::models::RenderChapter;
use epub_builder::{EpubBuilder, EpubContent, ReferenceType, ZipLibrary};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RenderOptions<'a> {
    pub separator: &'a str,
    pub blank_lines: usize,
    pub encoding: &'a str,
    pub format: OutputFormat,
    /// Book title and language, used by EPUB metadata.
    pub book_title: &'a str,
    pub language: &'a str,
}

/// `<stem>_split.<ext>` next to the input.
pub fn default_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}_split.{}", format.extension()))
}

/// Wraps each title as `{sep}{title}{sep}` above its content and separates
/// chapters by `blank_lines` empty lines. Leading text, if any, comes first.
pub fn render_text(
    chapters: &[RenderChapter],
    separator: &str,
    blank_lines: usize,
    leading_text: &str,
) -> String {
    let gap = "\n".repeat(blank_lines + 1);

    let mut blocks: Vec<String> = Vec::with_capacity(chapters.len() + 1);
    let leading = leading_text.trim();
    if !leading.is_empty() {
        blocks.push(leading.to_string());
    }
    blocks.extend(chapters.iter().map(|chapter| {
        format!("{separator}{}{separator}\n{}", chapter.title, chapter.content.trim())
            .trim()
            .to_string()
    }));

    if blocks.is_empty() {
        return String::new();
    }
    let mut output = blocks.join(&gap);
    output.push('\n');
    output
}

/// Encodes `text` with a WHATWG encoding label such as `utf-8` or `gbk`.
pub fn encode_text(text: &str, label: &str) -> Result<Vec<u8>> {
    let encoding = encoding_rs::Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| Error::UnknownEncoding(label.to_string()))?;
    let (bytes, used, had_errors) = encoding.encode(text);
    if had_errors {
        tracing::warn!(
            encoding = used.name(),
            "some characters are not representable and were replaced"
        );
    }
    Ok(bytes.into_owned())
}

fn epub_err(e: impl std::fmt::Display) -> Error {
    Error::Epub(e.to_string())
}

fn xhtml_page(title: &str, body: &str, language: &str) -> String {
    let title = html_escape::encode_text(title);
    let language = html_escape::encode_double_quoted_attribute(language);
    let paragraphs: String = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| format!("<p>{}</p>\n", html_escape::encode_text(line)))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" lang="{language}" xml:lang="{language}">
<head>
<meta charset="utf-8"/>
<title>{title}</title>
</head>
<body>
<h1>{title}</h1>
{paragraphs}</body>
</html>
"#
    )
}

/// Builds an EPUB with one page per chapter, the leading text as a preface
/// and an inline table of contents.
pub fn render_epub(
    chapters: &[RenderChapter],
    leading_text: &str,
    book_title: &str,
    language: &str,
) -> Result<Vec<u8>> {
    let mut builder = EpubBuilder::new(ZipLibrary::new().map_err(epub_err)?).map_err(epub_err)?;
    builder
        .metadata("title", book_title)
        .map_err(epub_err)?
        .metadata("lang", language)
        .map_err(epub_err)?
        .metadata("generator", "chaptersplit")
        .map_err(epub_err)?;
    builder.inline_toc();

    let leading = leading_text.trim();
    if !leading.is_empty() {
        let page = xhtml_page(book_title, leading, language);
        builder
            .add_content(
                EpubContent::new("preface.xhtml", page.as_bytes())
                    .title(book_title)
                    .reftype(ReferenceType::Preface),
            )
            .map_err(epub_err)?;
    }

    for (idx, chapter) in chapters.iter().enumerate() {
        let page = xhtml_page(&chapter.title, &chapter.content, language);
        builder
            .add_content(
                EpubContent::new(format!("chapter_{}.xhtml", idx + 1), page.as_bytes())
                    .title(chapter.title.as_str())
                    .reftype(ReferenceType::Text),
            )
            .map_err(epub_err)?;
    }

    let mut buffer = Vec::new();
    builder.generate(&mut buffer).map_err(epub_err)?;
    Ok(buffer)
}

/// Produces the final bytes for the configured output format.
pub fn render(
    chapters: &[RenderChapter],
    leading_text: &str,
    options: &RenderOptions<'_>,
) -> Result<Vec<u8>> {
    match options.format {
        OutputFormat::Text => {
            let text = render_text(chapters, options.separator, options.blank_lines, leading_text);
            encode_text(&text, options.encoding)
        }
        OutputFormat::Epub => render_epub(chapters, leading_text, options.book_title, options.language),
    }
}

/// Writes the whole output at once through a sibling temporary file, so a
/// failed run never leaves a half-written result at `path`.
pub fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    let write_err = |source| Error::WriteOutput {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = path.with_file_name(format!(".{file_name}.partial"));
    std::fs::write(&partial, bytes).map_err(write_err)?;
    std::fs::rename(&partial, path).map_err(write_err)
}
