//! Shared contract for the outreach research workflow
//!
//! Callers of the workflow (HTTP routes, background-job callbacks, the CLI)
//! depend on this crate only. It defines:
//!
//! - [`Step`]: the three sequential research stages
//! - [`WorkflowStatus`]: the typed form of the persisted `status` column,
//!   with a lenient codec for legacy free-text values
//! - [`WorkflowResult`] and [`StatusCheck`]: what every entry point returns
//! - [`WorkflowLog`]: structured workflow events and the `log_*!` macros
//! - [`ResearchRuntime`]: the trait the orchestrator implements

// Re-export async trait for implementors
pub use async_trait::async_trait;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tenant partition key; every subject row belongs to exactly one tenant
pub type TenantId = Uuid;

/// Opaque subject (company) identifier
pub type SubjectId = i64;

/// Tracing target used for all workflow events
pub const EVENT_TARGET: &str = "research_workflow";

/// One of the three sequential research stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    DeepResearch,
    StrategicAnalysis,
    ReportGeneration,
}

impl Step {
    pub const ALL: [Step; 3] = [
        Step::DeepResearch,
        Step::StrategicAnalysis,
        Step::ReportGeneration,
    ];

    /// 1-based position in the pipeline
    pub fn number(self) -> u8 {
        match self {
            Step::DeepResearch => 1,
            Step::StrategicAnalysis => 2,
            Step::ReportGeneration => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Step> {
        match n {
            1 => Some(Step::DeepResearch),
            2 => Some(Step::StrategicAnalysis),
            3 => Some(Step::ReportGeneration),
            _ => None,
        }
    }

    /// The step that auto-progression moves to after this one
    pub fn next(self) -> Option<Step> {
        Step::from_number(self.number() + 1)
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            Step::DeepResearch => "Deep Research",
            Step::StrategicAnalysis => "Strategic Analysis",
            Step::ReportGeneration => "Report Generation",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step_{}", self.number())
    }
}

/// Typed workflow status
///
/// The database keeps the status as free text for compatibility with rows
/// written by older deployments. This enum is the only thing the workflow
/// reasons about; [`WorkflowStatus::as_status_string`] and
/// [`WorkflowStatus::from_column`] are the persistence boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum WorkflowStatus {
    NotStarted,
    /// A step is running; `None` for the generic legacy `in_progress` token
    InProgress(Option<Step>),
    /// Step 1 was handed to a provider background job
    BackgroundJobRunning,
    StepCompleted(Step),
    StepError(Step),
    Completed,
    Failed(String),
    /// Unrecognised legacy value, preserved verbatim
    Other(String),
}

impl WorkflowStatus {
    /// True when a run currently owns the subject (subject to staleness)
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::InProgress(_) | WorkflowStatus::BackgroundJobRunning
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, WorkflowStatus::StepError(_) | WorkflowStatus::Failed(_))
    }

    /// Step named by the status, if any
    pub fn step(&self) -> Option<Step> {
        match self {
            WorkflowStatus::InProgress(step) => *step,
            WorkflowStatus::BackgroundJobRunning => Some(Step::DeepResearch),
            WorkflowStatus::StepCompleted(step) | WorkflowStatus::StepError(step) => Some(*step),
            _ => None,
        }
    }

    /// Free-text form written to the `status` column
    pub fn as_status_string(&self) -> String {
        match self {
            WorkflowStatus::NotStarted => "not_started".to_string(),
            WorkflowStatus::InProgress(None) => "in_progress".to_string(),
            WorkflowStatus::InProgress(Some(step)) => {
                format!("in_progress_step_{}", step.number())
            }
            WorkflowStatus::BackgroundJobRunning => "background_job_running".to_string(),
            WorkflowStatus::StepCompleted(step) => format!("step_{}_completed", step.number()),
            WorkflowStatus::StepError(step) => format!("step_{}_error", step.number()),
            WorkflowStatus::Completed => "completed".to_string(),
            WorkflowStatus::Failed(reason) if reason.is_empty() => "failed".to_string(),
            WorkflowStatus::Failed(reason) => format!("failed: {}", reason),
            WorkflowStatus::Other(raw) => raw.clone(),
        }
    }

    /// Lenient read of a nullable status column
    pub fn from_column(value: Option<&str>) -> WorkflowStatus {
        match value {
            None => WorkflowStatus::NotStarted,
            Some(raw) => raw
                .parse()
                .unwrap_or_else(|_| WorkflowStatus::Other(raw.to_string())),
        }
    }

    /// Every status string that [`is_in_progress`](Self::is_in_progress) accepts
    ///
    /// Used to build conditional updates that must agree with the in-memory check.
    pub fn in_progress_tokens() -> Vec<String> {
        let mut tokens = vec![
            "in_progress".to_string(),
            "processing".to_string(),
            "running".to_string(),
            "background_job_running".to_string(),
        ];
        for step in Step::ALL {
            tokens.push(format!("in_progress_step_{}", step.number()));
            tokens.push(format!("step_{}_in_progress", step.number()));
        }
        tokens
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_status_string())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(reason) = s.strip_prefix("failed:") {
            return Ok(WorkflowStatus::Failed(reason.trim().to_string()));
        }

        match s {
            "" | "not_started" | "pending" => return Ok(WorkflowStatus::NotStarted),
            "in_progress" | "processing" | "running" => {
                return Ok(WorkflowStatus::InProgress(None))
            }
            "background_job_running" => return Ok(WorkflowStatus::BackgroundJobRunning),
            "completed" | "complete" => return Ok(WorkflowStatus::Completed),
            "failed" | "error" => return Ok(WorkflowStatus::Failed(String::new())),
            _ => {}
        }

        if let Some(n) = s.strip_prefix("in_progress_step_") {
            if let Some(step) = parse_step_number(n) {
                return Ok(WorkflowStatus::InProgress(Some(step)));
            }
        }

        if let Some(rest) = s.strip_prefix("step_") {
            if let Some((n, suffix)) = rest.split_once('_') {
                if let Some(step) = parse_step_number(n) {
                    match suffix {
                        "in_progress" => return Ok(WorkflowStatus::InProgress(Some(step))),
                        "completed" | "complete" => {
                            return Ok(WorkflowStatus::StepCompleted(step))
                        }
                        "error" | "failed" => return Ok(WorkflowStatus::StepError(step)),
                        _ => {}
                    }
                }
            }
        }

        Err(format!("Unknown workflow status: {s}"))
    }
}

fn parse_step_number(s: &str) -> Option<Step> {
    s.parse::<u8>().ok().and_then(Step::from_number)
}

/// Result of every workflow entry point
///
/// Entry points never return `Err`; failures are described here so callers
/// can render `{ "success": false, "error": ... }` directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    /// Last step the run executed or attempted
    pub step_reached: Option<Step>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable error tag (`guard_blocked`, `provider_error`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Persisted status after the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl WorkflowResult {
    pub fn succeeded(step_reached: Option<Step>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            step_reached,
            message: message.into(),
            error: None,
            error_kind: None,
            status: None,
            started_at: None,
        }
    }

    pub fn failed(
        step_reached: Option<Step>,
        error_kind: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            success: false,
            step_reached,
            message: error.clone(),
            error: Some(error),
            error_kind: Some(error_kind.into()),
            status: None,
            started_at: None,
        }
    }

    /// Attach the persisted status and start time
    pub fn with_status(mut self, status: &WorkflowStatus, started_at: Option<DateTime<Utc>>) -> Self {
        self.status = Some(status.as_status_string());
        self.started_at = started_at;
        self
    }
}

/// Answer of the duplicate-trigger guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCheck {
    pub already_in_progress: bool,
    pub status: WorkflowStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub provider: Option<String>,
    /// An in-progress marker exists but is older than the staleness window
    pub stale: bool,
}

impl StatusCheck {
    /// Permissive answer used when the persisted state cannot be read
    pub fn allow_unknown() -> Self {
        Self {
            already_in_progress: false,
            status: WorkflowStatus::NotStarted,
            started_at: None,
            provider: None,
            stale: false,
        }
    }
}

/// Structured logging events emitted by the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowLog {
    /// A run was accepted and is about to execute `entry_step`
    WorkflowStarted {
        subject_id: SubjectId,
        entry_step: Step,
        provider: String,
        force_refresh: bool,
    },
    StepStarted {
        subject_id: SubjectId,
        step: Step,
        provider: String,
    },
    StepCompleted {
        subject_id: SubjectId,
        step: Step,
        summary: Option<String>,
    },
    StepFailed {
        subject_id: SubjectId,
        step: Step,
        error: String,
    },
    /// Soft validation finding; the step still succeeded
    ValidationWarning {
        subject_id: SubjectId,
        step: Step,
        warning: String,
    },
    /// Provider call downgraded to a simpler completion
    ProviderFallback {
        subject_id: SubjectId,
        provider: String,
        mode: String,
        reason: String,
    },
    BackgroundJobStarted {
        subject_id: SubjectId,
        job_id: String,
    },
    /// A trigger was rejected because a fresh run owns the subject
    GuardBlocked {
        subject_id: SubjectId,
        status: String,
    },
    WorkflowCompleted {
        subject_id: SubjectId,
    },
}

impl WorkflowLog {
    /// Stable tag used for indexing persisted events
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkflowLog::WorkflowStarted { .. } => "workflow_started",
            WorkflowLog::StepStarted { .. } => "step_started",
            WorkflowLog::StepCompleted { .. } => "step_completed",
            WorkflowLog::StepFailed { .. } => "step_failed",
            WorkflowLog::ValidationWarning { .. } => "validation_warning",
            WorkflowLog::ProviderFallback { .. } => "provider_fallback",
            WorkflowLog::BackgroundJobStarted { .. } => "background_job_started",
            WorkflowLog::GuardBlocked { .. } => "guard_blocked",
            WorkflowLog::WorkflowCompleted { .. } => "workflow_completed",
        }
    }

    pub fn subject_id(&self) -> SubjectId {
        match self {
            WorkflowLog::WorkflowStarted { subject_id, .. }
            | WorkflowLog::StepStarted { subject_id, .. }
            | WorkflowLog::StepCompleted { subject_id, .. }
            | WorkflowLog::StepFailed { subject_id, .. }
            | WorkflowLog::ValidationWarning { subject_id, .. }
            | WorkflowLog::ProviderFallback { subject_id, .. }
            | WorkflowLog::BackgroundJobStarted { subject_id, .. }
            | WorkflowLog::GuardBlocked { subject_id, .. }
            | WorkflowLog::WorkflowCompleted { subject_id } => *subject_id,
        }
    }

    /// Emit this event and hand it back
    pub fn emitted(self) -> Self {
        self.emit();
        self
    }

    /// Emit this event through `tracing`
    pub fn emit(&self) {
        let payload = serde_json::to_string(self).unwrap_or_default();
        match self {
            WorkflowLog::StepFailed { .. }
            | WorkflowLog::GuardBlocked { .. }
            | WorkflowLog::ValidationWarning { .. }
            | WorkflowLog::ProviderFallback { .. } => {
                tracing::warn!(target: EVENT_TARGET, event = self.event_type(), %payload);
            }
            _ => {
                tracing::info!(target: EVENT_TARGET, event = self.event_type(), %payload);
            }
        }
    }
}

/// Helper macros for workflow logging
///
/// Each macro emits the event through `tracing` and evaluates to it, so
/// callers can also persist it.
#[macro_export]
macro_rules! log_workflow_start {
    ($subject:expr, $step:expr, $provider:expr, $force:expr) => {
        $crate::WorkflowLog::WorkflowStarted {
            subject_id: $subject,
            entry_step: $step,
            provider: $provider.to_string(),
            force_refresh: $force,
        }
        .emitted()
    };
}

#[macro_export]
macro_rules! log_step_start {
    ($subject:expr, $step:expr, $provider:expr) => {
        $crate::WorkflowLog::StepStarted {
            subject_id: $subject,
            step: $step,
            provider: $provider.to_string(),
        }
        .emitted()
    };
}

#[macro_export]
macro_rules! log_step_complete {
    ($subject:expr, $step:expr) => {
        $crate::WorkflowLog::StepCompleted {
            subject_id: $subject,
            step: $step,
            summary: None,
        }
        .emitted()
    };
    ($subject:expr, $step:expr, $summary:expr) => {
        $crate::WorkflowLog::StepCompleted {
            subject_id: $subject,
            step: $step,
            summary: Some($summary.to_string()),
        }
        .emitted()
    };
}

#[macro_export]
macro_rules! log_step_failed {
    ($subject:expr, $step:expr, $error:expr) => {
        $crate::WorkflowLog::StepFailed {
            subject_id: $subject,
            step: $step,
            error: $error.to_string(),
        }
        .emitted()
    };
}

#[macro_export]
macro_rules! log_validation_warning {
    ($subject:expr, $step:expr, $warning:expr) => {
        $crate::WorkflowLog::ValidationWarning {
            subject_id: $subject,
            step: $step,
            warning: $warning.to_string(),
        }
        .emitted()
    };
}

#[macro_export]
macro_rules! log_provider_fallback {
    ($subject:expr, $provider:expr, $mode:expr, $reason:expr) => {
        $crate::WorkflowLog::ProviderFallback {
            subject_id: $subject,
            provider: $provider.to_string(),
            mode: $mode.to_string(),
            reason: $reason.to_string(),
        }
        .emitted()
    };
}

#[macro_export]
macro_rules! log_background_job {
    ($subject:expr, $job_id:expr) => {
        $crate::WorkflowLog::BackgroundJobStarted {
            subject_id: $subject,
            job_id: $job_id.to_string(),
        }
        .emitted()
    };
}

#[macro_export]
macro_rules! log_guard_blocked {
    ($subject:expr, $status:expr) => {
        $crate::WorkflowLog::GuardBlocked {
            subject_id: $subject,
            status: $status.to_string(),
        }
        .emitted()
    };
}

#[macro_export]
macro_rules! log_workflow_complete {
    ($subject:expr) => {
        $crate::WorkflowLog::WorkflowCompleted {
            subject_id: $subject,
        }
        .emitted()
    };
}

/// Runtime trait for the research workflow
///
/// This provides a unified API for HTTP routes, the CLI and background-job
/// callbacks. None of the methods fail with `Err`: failures are reported in
/// the returned [`WorkflowResult`].
#[async_trait]
pub trait ResearchRuntime: Send + Sync {
    /// Start (or resume) research for a subject
    async fn start_research(
        &self,
        tenant: TenantId,
        subject_id: SubjectId,
        provider: &str,
        force_refresh: bool,
    ) -> WorkflowResult;

    /// Duplicate-trigger guard
    fn check_status(&self, tenant: TenantId, subject_id: SubjectId) -> StatusCheck;

    /// Deliver the text of a finished step 1 background job and continue the run
    async fn complete_background_job(
        &self,
        tenant: TenantId,
        subject_id: SubjectId,
        provider: &str,
        research_text: String,
    ) -> WorkflowResult;

    /// Poll the provider for a pending step 1 background job
    async fn poll_background_job(&self, tenant: TenantId, subject_id: SubjectId) -> WorkflowResult;
}
