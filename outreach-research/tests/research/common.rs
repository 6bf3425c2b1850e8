//! Common test utilities for research workflow tests

use async_trait::async_trait;
use outreach_research::config::WorkflowSettings;
use outreach_research::database::Database;
use outreach_research::providers::{
    JobPoll, ProviderError, ProviderOutput, ProviderRegistry, ResearchProvider,
};
use outreach_research::report::HtmlReportRenderer;
use outreach_research::ResearchOrchestrator;
use outreach_research_sdk::{SubjectId, TenantId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const RESEARCH_TEXT: &str = "Acme Corp manufactures industrial anvils for the construction \
    market. Revenue grew 12% last year on the back of a new distribution partnership.";

pub const REPORT_TEXT: &str = "Acme Corp is a **growing** anvil maker.\n\n## Opportunities\n\n\
    - Distribution partnership\n- Automation opportunity";

/// Provider double answering from per-operation queues
///
/// An exhausted queue answers with a non-degradable error so a test never
/// silently falls back.
pub struct ScriptedProvider {
    name: String,
    deep: Mutex<VecDeque<Result<ProviderOutput, ProviderError>>>,
    structured: Mutex<VecDeque<Result<String, ProviderError>>>,
    completions: Mutex<VecDeque<Result<String, ProviderError>>>,
    polls: Mutex<VecDeque<Result<JobPoll, ProviderError>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            deep: Mutex::new(VecDeque::new()),
            structured: Mutex::new(VecDeque::new()),
            completions: Mutex::new(VecDeque::new()),
            polls: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn deep_text(self, text: &str) -> Self {
        self.deep.lock().unwrap().push_back(Ok(ProviderOutput::Text(text.to_string())));
        self
    }

    pub fn deep_job(self, job_id: &str) -> Self {
        self.deep.lock().unwrap().push_back(Ok(ProviderOutput::BackgroundJob {
            job_id: job_id.to_string(),
        }));
        self
    }

    pub fn deep_error(self, err: ProviderError) -> Self {
        self.deep.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn structured(self, text: &str) -> Self {
        self.structured.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn completion(self, text: &str) -> Self {
        self.completions.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn completion_error(self, err: ProviderError) -> Self {
        self.completions.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn poll(self, poll: JobPoll) -> Self {
        self.polls.lock().unwrap().push_back(Ok(poll));
        self
    }

    pub fn poll_error(self, err: ProviderError) -> Self {
        self.polls.lock().unwrap().push_back(Err(err));
        self
    }

    /// Operation names in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(op, _)| op.clone()).collect()
    }

    /// Prompts sent to one operation
    pub fn prompts(&self, op: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == op)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    fn record(&self, op: &str, prompt: &str) {
        self.calls.lock().unwrap().push((op.to_string(), prompt.to_string()));
    }
}

fn exhausted<T>(op: &str) -> Result<T, ProviderError> {
    Err(ProviderError::InvalidResponse(format!("no scripted {} response", op)))
}

#[async_trait]
impl ResearchProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deep_research(&self, prompt: &str) -> Result<ProviderOutput, ProviderError> {
        self.record("deep_research", prompt);
        tokio::task::yield_now().await;
        self.deep.lock().unwrap().pop_front().unwrap_or_else(|| exhausted("deep_research"))
    }

    async fn structured_completion(&self, prompt: &str, _system: &str) -> Result<String, ProviderError> {
        self.record("structured", prompt);
        self.structured.lock().unwrap().pop_front().unwrap_or_else(|| exhausted("structured"))
    }

    async fn completion(&self, prompt: &str, _system: &str) -> Result<String, ProviderError> {
        self.record("completion", prompt);
        self.completions.lock().unwrap().pop_front().unwrap_or_else(|| exhausted("completion"))
    }

    async fn poll_job(&self, job_id: &str) -> Result<JobPoll, ProviderError> {
        self.record("poll", job_id);
        self.polls.lock().unwrap().pop_front().unwrap_or_else(|| exhausted("poll"))
    }
}

/// Orchestrator over an in-memory database with one scripted provider
pub struct Fixture {
    pub db: Arc<Database>,
    pub orchestrator: Arc<ResearchOrchestrator>,
    pub provider: Arc<ScriptedProvider>,
    pub tenant: TenantId,
    pub subject_id: SubjectId,
}

impl Fixture {
    pub fn new(provider: ScriptedProvider) -> Self {
        let db = Arc::new(create_test_db());
        let provider = Arc::new(provider);
        let name = provider.name().to_string();
        let registry = ProviderRegistry::new().with_provider(&name, provider.clone());
        let orchestrator = Arc::new(ResearchOrchestrator::new(
            db.clone(),
            Arc::new(registry),
            Arc::new(HtmlReportRenderer),
            WorkflowSettings::default(),
        ));

        let tenant = Uuid::new_v4();
        let subject_id = db
            .insert_company(tenant, "Acme Corp", Some("https://acme.example"))
            .unwrap();

        Self {
            db,
            orchestrator,
            provider,
            tenant,
            subject_id,
        }
    }

    pub fn subject(&self) -> outreach_research::research::ResearchSubject {
        self.db.get_company(self.tenant, self.subject_id).unwrap().unwrap()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.db
            .get_events(self.tenant, self.subject_id, None)
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }
}

pub fn create_test_db() -> Database {
    let db = Database::new_in_memory().unwrap();
    db.initialize_schema().unwrap();
    db
}

/// A strategic analysis that satisfies every hard and soft rule
pub fn valid_analysis_json() -> String {
    serde_json::json!({
        "introduction": "Acme Corp is a mid-sized industrial manufacturer whose growth now depends on \
            scaling distribution without adding headcount in sales operations.",
        "strategic_imperatives": [
            {
                "title": "Scale distribution",
                "context": "New partnership doubles order volume",
                "ai_agent_opportunity": "Order intake agent",
                "expected_impact": "Faster fulfilment"
            },
            {
                "title": "Protect margins",
                "context": "Steel prices are volatile",
                "ai_agent_opportunity": "Procurement monitoring agent",
                "expected_impact": "Lower input costs"
            }
        ],
        "ai_agent_recommendations": {
            "introduction": "Two agents address the imperatives directly.",
            "priorities": [
                {
                    "imperative_reference": "Scale distribution",
                    "title": "Order Intake Agent",
                    "use_case": "Reads partner purchase orders and books them",
                    "business_impact": "Cuts order handling time by half"
                },
                {
                    "imperative_reference": "Protect margins",
                    "title": "Procurement Agent",
                    "use_case": "Tracks steel prices and suggests buy windows",
                    "business_impact": "Reduces material spend"
                }
            ]
        },
        "expected_business_impact": [
            "Shorter order cycle",
            "Lower procurement cost",
            "Sales team focused on new accounts"
        ]
    })
    .to_string()
}

/// Provider scripted for one full successful run
pub fn happy_provider(name: &str) -> ScriptedProvider {
    ScriptedProvider::new(name)
        .deep_text(RESEARCH_TEXT)
        .structured(&valid_analysis_json())
        .completion(REPORT_TEXT)
}
