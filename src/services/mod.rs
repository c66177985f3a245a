pub mod chapterizer;
pub mod detector;
pub mod formatter;
pub mod llm;
pub mod pipeline;
pub mod renderer;
pub mod splitter;
