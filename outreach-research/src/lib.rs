// Configuration loading
pub mod config;

// SQLite persistence
pub mod database;

// Error types
pub mod error;

// Tracing setup
pub mod logging;

// LLM provider adapters
pub mod providers;

// Report rendering
pub mod report;

// Research workflow module
pub mod research;

// Shared helpers
pub mod workflow_utils;

pub use error::ResearchError;
pub use research::ResearchOrchestrator;
