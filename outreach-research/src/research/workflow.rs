//! Workflow orchestration for company research
//!
//! [`ResearchOrchestrator`] owns the three-step state machine:
//!
//! ```text
//! NotStarted -> Step 1 (deep research) -> Step 2 (strategic analysis) -> Step 3 (report) -> Completed
//!                  |
//!                  +-> background job -> complete_background_job / poll_background_job -> Step 2 ...
//! ```
//!
//! A run enters at the first step that is not done (see
//! [`derive_state`]) and auto-progresses until it completes, fails or hands
//! step 1 to a provider background job. Every step attempt first records
//! `status`, `provider` and `started_at`, which is what the duplicate-trigger
//! guard reads.
//!
//! Entry points never return `Err` and never panic. Every outcome, including
//! persistence failures, is reported as a [`WorkflowResult`].

use async_trait::async_trait;
use chrono::Utc;
use outreach_research_sdk::{
    log_background_job, log_guard_blocked, log_provider_fallback, log_step_complete, log_step_failed,
    log_step_start, log_validation_warning, log_workflow_complete, log_workflow_start, ResearchRuntime, StatusCheck,
    Step, SubjectId, TenantId, WorkflowLog, WorkflowResult, WorkflowStatus,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, WorkflowSettings};
use crate::database::Database;
use crate::error::ResearchError;
use crate::providers::{normalize_provider_name, InvokeMode, JobPoll, ProviderError, ProviderRegistry};
use crate::report::{HtmlReportRenderer, ReportRenderer};
use crate::research::guard;
use crate::research::state::{derive_state, derive_status, error_value};
use crate::research::step1_deep_research::{accept_research_text, run_deep_research, DeepResearchOutcome};
use crate::research::step2_strategic_analysis::run_strategic_analysis;
use crate::research::step3_report::run_report_generation;
use crate::research::types::ResearchSubject;
use crate::workflow_utils::preview;

/// How far a single step got
#[derive(Debug, Clone, PartialEq)]
enum StepProgress {
    Done,
    BackgroundJob { job_id: String },
}

pub struct ResearchOrchestrator {
    db: Arc<Database>,
    providers: Arc<ProviderRegistry>,
    renderer: Arc<dyn ReportRenderer>,
    settings: WorkflowSettings,
}

impl ResearchOrchestrator {
    pub fn new(
        db: Arc<Database>,
        providers: Arc<ProviderRegistry>,
        renderer: Arc<dyn ReportRenderer>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            db,
            providers,
            renderer,
            settings,
        }
    }

    /// Open the configured database and build every configured provider
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let db = Database::new(config.database_path.clone())?;
        db.initialize_schema()?;
        let providers = ProviderRegistry::from_config(config)?;

        Ok(Self::new(
            Arc::new(db),
            Arc::new(providers),
            Arc::new(HtmlReportRenderer),
            config.workflow.clone(),
        ))
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Start or resume research for a subject
    pub async fn start(
        &self,
        tenant: TenantId,
        subject_id: SubjectId,
        provider: &str,
        force_refresh: bool,
    ) -> WorkflowResult {
        let provider = normalize_provider_name(provider);
        if let Err(e) = self.providers.get(&provider) {
            return self.reject(tenant, subject_id, None, e.into());
        }

        let mut subject = match self.load_subject(tenant, subject_id) {
            Ok(subject) => subject,
            Err(e) => return self.reject(tenant, subject_id, None, e),
        };

        let mut entry = if force_refresh {
            Step::DeepResearch
        } else {
            match derive_state(&subject).next_step() {
                Some(step) => step,
                None => return already_completed(&subject),
            }
        };

        if !force_refresh {
            let now = Utc::now();
            let stale_before = now - self.settings.staleness();
            match self
                .db
                .try_claim_subject(tenant, subject_id, entry, &provider, now, stale_before)
            {
                Ok(true) => {}
                Ok(false) => return self.guard_blocked(tenant, subject_id),
                Err(e) => return self.reject(tenant, subject_id, Some(entry), ResearchError::persistence(e)),
            }

            // another run may have finished between the read and the claim
            subject = match self.load_subject(tenant, subject_id) {
                Ok(subject) => subject,
                Err(e) => return self.fail_step(tenant, subject_id, entry, e),
            };
            entry = match derive_state(&subject).next_step() {
                Some(step) => step,
                None => {
                    if let Err(e) = self.db.update_status(tenant, subject_id, &derive_status(&subject)) {
                        return self.reject(tenant, subject_id, None, ResearchError::persistence(e));
                    }
                    return already_completed(&subject);
                }
            };
        }

        tracing::info!(
            subject_id,
            company = %subject.name,
            entry_step = %entry,
            %provider,
            force_refresh,
            "starting research"
        );
        let event = log_workflow_start!(subject_id, entry, &provider, force_refresh);
        self.persist_event(tenant, &event);

        self.run_from(tenant, subject, entry, &provider).await
    }

    /// Run [`start`](Self::start) on its own task
    pub fn spawn_research(
        self: &Arc<Self>,
        tenant: TenantId,
        subject_id: SubjectId,
        provider: String,
        force_refresh: bool,
    ) -> JoinHandle<WorkflowResult> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator
                .start(tenant, subject_id, &provider, force_refresh)
                .await
        })
    }

    /// Accept the text of a finished step 1 background job and continue the run
    pub async fn complete_background_job(
        &self,
        tenant: TenantId,
        subject_id: SubjectId,
        provider: &str,
        research_text: String,
    ) -> WorkflowResult {
        let subject = match self.load_subject(tenant, subject_id) {
            Ok(subject) => subject,
            Err(e) => return self.reject(tenant, subject_id, Some(Step::DeepResearch), e),
        };
        if subject.background_job_id.is_none() && subject.status != WorkflowStatus::BackgroundJobRunning {
            tracing::warn!(subject_id, status = %subject.status, "background job result without a pending job");
            let err = ResearchError::InvalidInput(format!("subject {} has no pending background job", subject_id));
            return self.reject(tenant, subject_id, Some(Step::DeepResearch), err);
        }

        let text = match accept_research_text(&research_text) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(subject_id, error = %e, "rejected background job result");
                let err = ResearchError::InvalidInput(e.to_string());
                return self.reject(tenant, subject_id, Some(Step::DeepResearch), err);
            }
        };

        let provider = self.resolve_provider(provider, &subject);

        if let Err(e) = self
            .db
            .save_step_result(tenant, subject_id, Step::DeepResearch, &text)
        {
            return self.reject(
                tenant,
                subject_id,
                Some(Step::DeepResearch),
                ResearchError::persistence(e),
            );
        }
        let event = log_step_complete!(subject_id, Step::DeepResearch, "delivered by background job");
        self.persist_event(tenant, &event);

        let subject = match self.load_subject(tenant, subject_id) {
            Ok(subject) => subject,
            Err(e) => return self.reject(tenant, subject_id, Some(Step::StrategicAnalysis), e),
        };
        self.run_from(tenant, subject, Step::StrategicAnalysis, &provider)
            .await
    }

    /// Ask the provider whether the pending step 1 background job finished
    pub async fn poll_background_job(&self, tenant: TenantId, subject_id: SubjectId) -> WorkflowResult {
        let subject = match self.load_subject(tenant, subject_id) {
            Ok(subject) => subject,
            Err(e) => return self.reject(tenant, subject_id, Some(Step::DeepResearch), e),
        };
        let Some(job_id) = subject.background_job_id.clone() else {
            let err = ResearchError::InvalidInput(format!("subject {} has no pending background job", subject_id));
            return self.reject(tenant, subject_id, Some(Step::DeepResearch), err);
        };
        let provider = self.resolve_provider("", &subject);

        match self.providers.poll_job(&provider, &job_id).await {
            Ok(JobPoll::Pending) => {
                tracing::debug!(subject_id, %job_id, "background job still running");
                self.with_current_status(
                    tenant,
                    subject_id,
                    WorkflowResult::succeeded(
                        Some(Step::DeepResearch),
                        format!("background job {} still running", job_id),
                    ),
                )
            }
            Ok(JobPoll::Completed(text)) => {
                tracing::info!(subject_id, %job_id, "background job completed");
                self.complete_background_job(tenant, subject_id, &provider, text)
                    .await
            }
            Ok(JobPoll::Failed(reason)) => {
                let err = ProviderError::InvalidResponse(format!("background job {} failed: {}", job_id, reason));
                self.fail_step(tenant, subject_id, Step::DeepResearch, err.into())
            }
            // transient: leave the job pending and let the caller poll again
            Err(e) => self.reject(tenant, subject_id, Some(Step::DeepResearch), e.into()),
        }
    }

    /// Duplicate-trigger guard for callers deciding whether to enqueue a run
    pub fn check_status(&self, tenant: TenantId, subject_id: SubjectId) -> StatusCheck {
        guard::check_status(&self.db, tenant, subject_id, self.settings.staleness(), Utc::now())
    }

    /// Clear every research field so the next run starts at step 1
    pub fn reset_research(&self, tenant: TenantId, subject_id: SubjectId) -> WorkflowResult {
        match self.db.reset_research(tenant, subject_id) {
            Ok(true) => {
                tracing::info!(subject_id, "research reset");
                WorkflowResult::succeeded(None, "research reset")
                    .with_status(&WorkflowStatus::NotStarted, None)
            }
            Ok(false) => self.reject(tenant, subject_id, None, ResearchError::SubjectNotFound(subject_id)),
            Err(e) => self.reject(tenant, subject_id, None, ResearchError::persistence(e)),
        }
    }

    async fn run_from(
        &self,
        tenant: TenantId,
        mut subject: ResearchSubject,
        mut step: Step,
        provider: &str,
    ) -> WorkflowResult {
        let subject_id = subject.id;

        loop {
            match self.execute_step(tenant, &subject, step, provider).await {
                Ok(StepProgress::Done) => {}
                Ok(StepProgress::BackgroundJob { job_id }) => {
                    return self.with_current_status(
                        tenant,
                        subject_id,
                        WorkflowResult::succeeded(
                            Some(step),
                            format!("deep research running as background job {}", job_id),
                        ),
                    );
                }
                Err(e) => return self.fail_step(tenant, subject_id, step, e),
            }

            let Some(next) = step.next() else {
                break;
            };
            subject = match self.load_subject(tenant, subject_id) {
                Ok(subject) => subject,
                Err(e) => return self.fail_step(tenant, subject_id, next, e),
            };
            step = next;
        }

        tracing::info!(subject_id, "research completed");
        let event = log_workflow_complete!(subject_id);
        self.persist_event(tenant, &event);

        self.with_current_status(
            tenant,
            subject_id,
            WorkflowResult::succeeded(Some(Step::ReportGeneration), "research completed"),
        )
    }

    async fn execute_step(
        &self,
        tenant: TenantId,
        subject: &ResearchSubject,
        step: Step,
        provider: &str,
    ) -> Result<StepProgress, ResearchError> {
        let subject_id = subject.id;
        self.db
            .mark_step_started(tenant, subject_id, step, provider, Utc::now())
            .map_err(ResearchError::persistence)?;
        let event = log_step_start!(subject_id, step, provider);
        self.persist_event(tenant, &event);

        let on_fallback = |primary: &str, mode: InvokeMode, err: &ProviderError| {
            let event = log_provider_fallback!(subject_id, primary, mode, err);
            self.persist_event(tenant, &event);
        };

        let summary = match step {
            Step::DeepResearch => {
                let outcome = run_deep_research(
                    &self.providers,
                    &subject.name,
                    subject.website.as_deref(),
                    subject_id,
                    provider,
                    &on_fallback,
                )
                .await?;

                match outcome {
                    DeepResearchOutcome::Completed(text) => {
                        self.db
                            .save_step_result(tenant, subject_id, step, &text)
                            .map_err(ResearchError::persistence)?;
                        preview(&text, 120)
                    }
                    DeepResearchOutcome::BackgroundJob { job_id } => {
                        self.db
                            .set_background_job(tenant, subject_id, &job_id, provider, Utc::now())
                            .map_err(ResearchError::persistence)?;
                        let event = log_background_job!(subject_id, &job_id);
                        self.persist_event(tenant, &event);
                        return Ok(StepProgress::BackgroundJob { job_id });
                    }
                }
            }
            Step::StrategicAnalysis => {
                let outcome = run_strategic_analysis(
                    &self.providers,
                    &subject.name,
                    subject.step1_result.as_deref(),
                    provider,
                    &on_fallback,
                )
                .await?;

                for warning in &outcome.warnings {
                    let event = log_validation_warning!(subject_id, step, warning);
                    self.persist_event(tenant, &event);
                }

                self.db
                    .save_strategic_analysis(
                        tenant,
                        subject_id,
                        &outcome.json_string,
                        &outcome.analysis.ai_agent_recommendations.priorities,
                    )
                    .map_err(ResearchError::persistence)?;
                format!(
                    "{} imperatives, {} recommendations",
                    outcome.analysis.strategic_imperatives.len(),
                    outcome.analysis.ai_agent_recommendations.priorities.len()
                )
            }
            Step::ReportGeneration => {
                let report = run_report_generation(
                    &self.providers,
                    self.renderer.as_ref(),
                    &subject.name,
                    subject.step1_result.as_deref(),
                    subject.step2_result.as_deref(),
                    provider,
                    &on_fallback,
                )
                .await?;

                self.db
                    .save_report(tenant, subject_id, &report, Utc::now())
                    .map_err(ResearchError::persistence)?;
                if report.degraded_html {
                    "report saved with plain-text HTML".to_string()
                } else {
                    format!("report saved ({} chars)", report.report_text.chars().count())
                }
            }
        };

        let event = log_step_complete!(subject_id, step, summary);
        self.persist_event(tenant, &event);
        Ok(StepProgress::Done)
    }

    /// Persist a step failure and build the failure result
    ///
    /// Provider, validation and input errors also replace the step field
    /// with an `ERROR:` value; the step is retried on the next run.
    fn fail_step(
        &self,
        tenant: TenantId,
        subject_id: SubjectId,
        step: Step,
        err: ResearchError,
    ) -> WorkflowResult {
        let message = err.to_string();
        tracing::error!(subject_id, step = %step, kind = err.kind(), error = %message, "research step failed");

        let field_value = match err {
            ResearchError::Provider(_) | ResearchError::Validation(_) | ResearchError::InvalidInput(_) => {
                Some(error_value(&message))
            }
            _ => None,
        };
        let status = WorkflowStatus::Failed(format!("{}: {}", step, message));

        if let Err(e) = self
            .db
            .save_step_error(tenant, subject_id, step, &status, field_value.as_deref())
        {
            tracing::error!(subject_id, error = %format!("{:#}", e), "could not persist step failure");
        }

        let event = log_step_failed!(subject_id, step, &message);
        self.persist_event(tenant, &event);

        self.with_current_status(
            tenant,
            subject_id,
            WorkflowResult::failed(Some(step), err.kind(), message),
        )
    }

    /// Failure result for errors raised before any step ran; nothing is persisted
    fn reject(
        &self,
        tenant: TenantId,
        subject_id: SubjectId,
        step: Option<Step>,
        err: ResearchError,
    ) -> WorkflowResult {
        tracing::warn!(subject_id, kind = err.kind(), error = %err, "research request rejected");
        let result = WorkflowResult::failed(step, err.kind(), err.to_string());
        match err {
            ResearchError::SubjectNotFound(_) => result,
            _ => self.with_current_status(tenant, subject_id, result),
        }
    }

    fn guard_blocked(&self, tenant: TenantId, subject_id: SubjectId) -> WorkflowResult {
        let check = self.check_status(tenant, subject_id);
        let event = log_guard_blocked!(subject_id, &check.status);
        self.persist_event(tenant, &event);

        let err = ResearchError::GuardBlocked {
            status: check.status.as_status_string(),
            started_at: check.started_at,
        };
        WorkflowResult::failed(check.status.step(), err.kind(), err.to_string())
            .with_status(&check.status, check.started_at)
    }

    fn load_subject(&self, tenant: TenantId, subject_id: SubjectId) -> Result<ResearchSubject, ResearchError> {
        self.db
            .get_company(tenant, subject_id)
            .map_err(ResearchError::persistence)?
            .ok_or(ResearchError::SubjectNotFound(subject_id))
    }

    /// Requested provider, else the one recorded on the subject, else the default
    fn resolve_provider(&self, requested: &str, subject: &ResearchSubject) -> String {
        let name = Some(requested)
            .filter(|p| !p.trim().is_empty())
            .or(subject.provider.as_deref())
            .unwrap_or(self.settings.default_provider.as_str());
        normalize_provider_name(name)
    }

    fn with_current_status(&self, tenant: TenantId, subject_id: SubjectId, result: WorkflowResult) -> WorkflowResult {
        match self.db.get_research_status(tenant, subject_id) {
            Ok(Some(row)) => result.with_status(&row.status, row.started_at),
            _ => result,
        }
    }

    fn persist_event(&self, tenant: TenantId, event: &WorkflowLog) {
        if let Err(e) = self.db.insert_event(tenant, event.subject_id(), event) {
            tracing::warn!(
                subject_id = event.subject_id(),
                event = event.event_type(),
                error = %format!("{:#}", e),
                "could not persist workflow event"
            );
        }
    }
}

fn already_completed(subject: &ResearchSubject) -> WorkflowResult {
    tracing::info!(subject_id = subject.id, "research already completed; nothing to run");
    WorkflowResult::succeeded(None, "research already completed")
        .with_status(&WorkflowStatus::Completed, subject.started_at)
}

#[async_trait]
impl ResearchRuntime for ResearchOrchestrator {
    async fn start_research(
        &self,
        tenant: TenantId,
        subject_id: SubjectId,
        provider: &str,
        force_refresh: bool,
    ) -> WorkflowResult {
        self.start(tenant, subject_id, provider, force_refresh).await
    }

    fn check_status(&self, tenant: TenantId, subject_id: SubjectId) -> StatusCheck {
        ResearchOrchestrator::check_status(self, tenant, subject_id)
    }

    async fn complete_background_job(
        &self,
        tenant: TenantId,
        subject_id: SubjectId,
        provider: &str,
        research_text: String,
    ) -> WorkflowResult {
        ResearchOrchestrator::complete_background_job(self, tenant, subject_id, provider, research_text).await
    }

    async fn poll_background_job(&self, tenant: TenantId, subject_id: SubjectId) -> WorkflowResult {
        ResearchOrchestrator::poll_background_job(self, tenant, subject_id).await
    }
}
