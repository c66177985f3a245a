//! Chapter discovery and re-segmentation for long plain-text novels.

pub mod config;
pub mod error;
pub mod models;
pub mod server;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
pub use services::pipeline::Pipeline;
