//! Workflow utilities shared by the research steps
//!
//! - **json**: JSON extraction from model output
//! - **text**: truncation and log previews

pub mod json;
pub mod text;

pub use json::extract_json;
pub use text::{preview, truncate_chars};
