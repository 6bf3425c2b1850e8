//! Research workflow module
//!
//! Three sequential steps per company, each persisted before the next one
//! starts: deep research, strategic analysis and report generation. The
//! orchestrator in [`workflow`] drives them; [`guard`] prevents duplicate
//! runs and [`state`] decides where a run resumes.

pub mod cli;
pub mod guard;
pub mod prompts;
pub mod state;
pub mod step1_deep_research;
pub mod step2_strategic_analysis;
pub mod step3_report;
pub mod types;
pub mod validation;
pub mod workflow;

// Re-export commonly used types
pub use state::{derive_state, derive_status, WorkflowState};
pub use types::{AgentRecommendation, ReportOutcome, ResearchSubject, StrategicAnalysis};
pub use workflow::ResearchOrchestrator;
