//! Fatal errors. Anything the assistant does wrong is not an error here; it
//! degrades to local behavior instead.

use std::path::PathBuf;

/// Errors that abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input file is missing or unreadable.
    #[error("failed to read input {path}: {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input bytes are not UTF-8.
    #[error("input {0} is not valid UTF-8")]
    InvalidUtf8(String),

    /// The document holds nothing but whitespace.
    #[error("input {0} is empty")]
    EmptyDocument(String),

    /// The rendered output could not be written.
    #[error("failed to write output {path}: {source}")]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `output.encoding` names no known encoding.
    #[error("unknown output encoding: {0}")]
    UnknownEncoding(String),

    /// Configuration could not be loaded or is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// EPUB assembly failed.
    #[error("epub generation failed: {0}")]
    Epub(String),
}

/// Result type for chaptersplit operations.
pub type Result<T> = std::result::Result<T, Error>;
