//! SQLite persistence for research subjects and their workflow events
//!
//! Every query that touches a subject filters by tenant: a subject id from
//! another tenant behaves exactly like a missing one.
//!
//! # Database Schema
//!
//! 1. **companies** - research subjects, one column per step result plus the
//!    status / provider / started_at markers read by the guard
//! 2. **research_events** - append-only structured workflow log (schema v2)
//! 3. **schema_version** - database schema version for migrations
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use outreach_research::database::Database;
//! use uuid::Uuid;
//!
//! # fn main() -> anyhow::Result<()> {
//! let db = Database::new(outreach_research::config::default_database_path())?;
//! db.initialize_schema()?;
//!
//! let tenant = Uuid::new_v4();
//! let id = db.insert_company(tenant, "Acme Corp", Some("https://acme.example"))?;
//! let subject = db.get_company(tenant, id)?;
//! assert!(subject.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! Timestamps are stored as RFC3339 UTC with a fixed precision so that
//! string comparison in SQL matches chronological order.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use outreach_research_sdk::{Step, SubjectId, TenantId, WorkflowLog, WorkflowStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::research::types::{
    is_background_marker, AgentRecommendation, ReportOutcome, ResearchStatusRow, ResearchSubject,
};

const SUBJECT_COLUMNS: &str = r#"
    id, tenant_id, name, website, step1_result, step2_result, step3_result,
    status, provider, started_at, completed_at, background_job_id,
    report_html, report_markdown, ai_agent_recommendations, created_at, updated_at
"#;

/// Database wrapper for research persistence
///
/// The connection is shared behind a mutex that is held for one statement
/// (or one transaction) at a time, never across an `.await`.
pub struct Database {
    conn: Mutex<Connection>,
}

/// A stored workflow event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEvent {
    pub company_id: SubjectId,
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub event: WorkflowLog,
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn step_column(step: Step) -> &'static str {
    match step {
        Step::DeepResearch => "step1_result",
        Step::StrategicAnalysis => "step2_result",
        Step::ReportGeneration => "step3_result",
    }
}

impl Database {
    /// Create a new database connection at the specified path
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Initialize database schema with all tables and indexes
    pub fn initialize_schema(&self) -> Result<()> {
        {
            let conn = self.conn()?;
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS companies (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tenant_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    website TEXT,

                    -- Step results
                    step1_result TEXT,
                    step2_result TEXT,
                    step3_result TEXT,

                    -- Progress markers read by the duplicate-trigger guard
                    status TEXT,
                    provider TEXT,
                    started_at TEXT,
                    completed_at TEXT,
                    background_job_id TEXT,

                    -- Report artifacts
                    report_html TEXT,
                    report_markdown TEXT,
                    ai_agent_recommendations TEXT,

                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_companies_tenant ON companies(tenant_id, id);
                CREATE INDEX IF NOT EXISTS idx_companies_status ON companies(status);

                CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                );

                INSERT OR IGNORE INTO schema_version (version) VALUES (1);
                "#,
            )?;
        }

        self.migrate_to_v2()?;
        Ok(())
    }

    /// Migrate database schema to version 2 (research event log)
    pub fn migrate_to_v2(&self) -> Result<()> {
        let current = self.get_schema_version()?;

        if current < 2 {
            self.conn()?.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS research_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tenant_id TEXT NOT NULL,
                    company_id INTEGER NOT NULL,
                    sequence INTEGER NOT NULL,
                    timestamp TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    event_data TEXT NOT NULL,

                    FOREIGN KEY(company_id) REFERENCES companies(id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_events_company
                ON research_events(company_id, sequence);

                INSERT OR REPLACE INTO schema_version (version) VALUES (2);
                "#,
            )?;
        }

        Ok(())
    }

    /// Get current schema version
    pub fn get_schema_version(&self) -> Result<i32> {
        let version: Option<i32> = self.conn()?.query_row(
            "SELECT MAX(version) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version.unwrap_or(0))
    }

    /// Insert a new research subject, returning its id
    pub fn insert_company(
        &self,
        tenant: TenantId,
        name: &str,
        website: Option<&str>,
    ) -> Result<SubjectId> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("company name must not be empty");
        }
        let now = format_timestamp(Utc::now());

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO companies (tenant_id, name, website, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
            params![
                tenant.to_string(),
                name,
                website.map(str::trim).filter(|w| !w.is_empty()),
                WorkflowStatus::NotStarted.as_status_string(),
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a single subject, scoped to `tenant`
    pub fn get_company(&self, tenant: TenantId, id: SubjectId) -> Result<Option<ResearchSubject>> {
        let query = format!(
            "SELECT {} FROM companies WHERE id = ?1 AND tenant_id = ?2",
            SUBJECT_COLUMNS
        );
        let subject = self
            .conn()?
            .query_row(&query, params![id, tenant.to_string()], map_subject_row)
            .optional()?;
        Ok(subject)
    }

    /// All subjects of a tenant, newest first
    pub fn list_companies(&self, tenant: TenantId) -> Result<Vec<ResearchSubject>> {
        let query = format!(
            "SELECT {} FROM companies WHERE tenant_id = ?1 ORDER BY id DESC",
            SUBJECT_COLUMNS
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&query)?;
        let subjects = stmt
            .query_map(params![tenant.to_string()], map_subject_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subjects)
    }

    /// Status columns only, for the guard
    pub fn get_research_status(
        &self,
        tenant: TenantId,
        id: SubjectId,
    ) -> Result<Option<ResearchStatusRow>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT status, started_at, provider FROM companies WHERE id = ?1 AND tenant_id = ?2",
                params![id, tenant.to_string()],
                |row| {
                    let status: Option<String> = row.get(0)?;
                    let started_at: Option<String> = row.get(1)?;
                    let provider: Option<String> = row.get(2)?;
                    Ok((status, started_at, provider))
                },
            )
            .optional()?;

        let Some((status, started_at, provider)) = row else {
            return Ok(None);
        };
        Ok(Some(ResearchStatusRow {
            status: WorkflowStatus::from_column(status.as_deref()),
            started_at: started_at.as_deref().map(parse_timestamp).transpose()?,
            provider,
        }))
    }

    /// Atomically mark the subject in progress unless a fresh run owns it
    ///
    /// Returns `false` when `started_at` is at or after `stale_before` and the
    /// status is an in-progress token or a `step_N_completed` left by a run
    /// that is between two steps.
    pub fn try_claim_subject(
        &self,
        tenant: TenantId,
        id: SubjectId,
        step: Step,
        provider: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tokens = WorkflowStatus::in_progress_tokens();
        tokens.extend(
            Step::ALL
                .iter()
                .filter(|step| step.next().is_some())
                .map(|step| WorkflowStatus::StepCompleted(*step).as_status_string()),
        );
        let placeholders = (0..tokens.len())
            .map(|i| format!("?{}", i + 7))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            r#"
            UPDATE companies
            SET status = ?1, provider = ?2, started_at = ?3, updated_at = ?3
            WHERE id = ?4 AND tenant_id = ?5
              AND (
                status IS NULL
                OR status NOT IN ({placeholders})
                OR started_at IS NULL
                OR started_at < ?6
              )
            "#
        );

        let status = WorkflowStatus::InProgress(Some(step)).as_status_string();
        let now = format_timestamp(now);
        let tenant = tenant.to_string();
        let stale_before = format_timestamp(stale_before);

        let mut values: Vec<&dyn rusqlite::ToSql> =
            vec![&status, &provider, &now, &id, &tenant, &stale_before];
        values.extend(tokens.iter().map(|t| t as &dyn rusqlite::ToSql));

        let changed = self.conn()?.execute(&query, values.as_slice())?;
        Ok(changed == 1)
    }

    /// Record the start of a step attempt
    pub fn mark_step_started(
        &self,
        tenant: TenantId,
        id: SubjectId,
        step: Step,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now = format_timestamp(now);
        self.update_subject(
            tenant,
            id,
            "status = ?3, provider = ?4, started_at = ?5, updated_at = ?5",
            &[
                &WorkflowStatus::InProgress(Some(step)).as_status_string(),
                &provider,
                &now,
            ],
        )
    }

    /// Persist genuine step content and mark the step completed
    pub fn save_step_result(
        &self,
        tenant: TenantId,
        id: SubjectId,
        step: Step,
        text: &str,
    ) -> Result<()> {
        if is_background_marker(text) {
            anyhow::bail!("refusing to persist the background job marker as {}", step);
        }
        let set = match step {
            Step::DeepResearch => format!(
                "{} = ?3, status = ?4, background_job_id = NULL, updated_at = ?5",
                step_column(step)
            ),
            _ => format!("{} = ?3, status = ?4, updated_at = ?5", step_column(step)),
        };
        self.update_subject(
            tenant,
            id,
            &set,
            &[
                &text,
                &WorkflowStatus::StepCompleted(step).as_status_string(),
                &format_timestamp(Utc::now()),
            ],
        )
    }

    /// Persist the step 2 JSON and replace the recommendations projection
    pub fn save_strategic_analysis(
        &self,
        tenant: TenantId,
        id: SubjectId,
        json: &str,
        recommendations: &[AgentRecommendation],
    ) -> Result<()> {
        let recommendations = serde_json::to_string(recommendations)?;
        let now = format_timestamp(Utc::now());

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            r#"
            UPDATE companies
            SET step2_result = ?1, ai_agent_recommendations = ?2, status = ?3, updated_at = ?4
            WHERE id = ?5 AND tenant_id = ?6
            "#,
            params![
                json,
                recommendations,
                WorkflowStatus::StepCompleted(Step::StrategicAnalysis).as_status_string(),
                now,
                id,
                tenant.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(anyhow!("subject {} not found", id));
        }
        tx.commit()?;
        Ok(())
    }

    /// Persist the step 3 artifacts and mark the run completed
    pub fn save_report(
        &self,
        tenant: TenantId,
        id: SubjectId,
        report: &ReportOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let completed_at = format_timestamp(completed_at);
        self.update_subject(
            tenant,
            id,
            r#"step3_result = ?3, report_html = ?4, report_markdown = ?5,
               status = ?6, completed_at = ?7, updated_at = ?7"#,
            &[
                &report.report_text,
                &report.html,
                &report.markdown,
                &WorkflowStatus::Completed.as_status_string(),
                &completed_at,
            ],
        )
    }

    /// Record a step failure; `field_value` (an `ERROR:` string) is written
    /// to the step field when given. A step 1 failure also drops any
    /// pending background job.
    pub fn save_step_error(
        &self,
        tenant: TenantId,
        id: SubjectId,
        step: Step,
        status: &WorkflowStatus,
        field_value: Option<&str>,
    ) -> Result<()> {
        let now = format_timestamp(Utc::now());
        let status = status.as_status_string();
        let clear_job = if step == Step::DeepResearch {
            ", background_job_id = NULL"
        } else {
            ""
        };
        match field_value {
            Some(value) => self.update_subject(
                tenant,
                id,
                &format!("{} = ?3, status = ?4, updated_at = ?5{}", step_column(step), clear_job),
                &[&value, &status, &now],
            ),
            None => self.update_subject(
                tenant,
                id,
                &format!("status = ?3, updated_at = ?4{}", clear_job),
                &[&status, &now],
            ),
        }
    }

    /// Step 1 was queued at the provider; the step field stays untouched
    pub fn set_background_job(
        &self,
        tenant: TenantId,
        id: SubjectId,
        job_id: &str,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now = format_timestamp(now);
        self.update_subject(
            tenant,
            id,
            "status = ?3, background_job_id = ?4, provider = ?5, started_at = ?6, updated_at = ?6",
            &[
                &WorkflowStatus::BackgroundJobRunning.as_status_string(),
                &job_id,
                &provider,
                &now,
            ],
        )
    }

    pub fn update_status(&self, tenant: TenantId, id: SubjectId, status: &WorkflowStatus) -> Result<()> {
        self.update_subject(
            tenant,
            id,
            "status = ?3, updated_at = ?4",
            &[&status.as_status_string(), &format_timestamp(Utc::now())],
        )
    }

    /// Null every research field, returning the subject to "not started"
    pub fn reset_research(&self, tenant: TenantId, id: SubjectId) -> Result<bool> {
        let changed = self.conn()?.execute(
            r#"
            UPDATE companies
            SET step1_result = NULL, step2_result = NULL, step3_result = NULL,
                status = ?1, provider = NULL, started_at = NULL, completed_at = NULL,
                background_job_id = NULL, report_html = NULL, report_markdown = NULL,
                ai_agent_recommendations = NULL, updated_at = ?2
            WHERE id = ?3 AND tenant_id = ?4
            "#,
            params![
                WorkflowStatus::NotStarted.as_status_string(),
                format_timestamp(Utc::now()),
                id,
                tenant.to_string(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Delete a subject and, by cascade, its events
    pub fn delete_company(&self, tenant: TenantId, id: SubjectId) -> Result<bool> {
        let changed = self.conn()?.execute(
            "DELETE FROM companies WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Append a workflow event for a subject
    pub fn insert_event(&self, tenant: TenantId, company_id: SubjectId, event: &WorkflowLog) -> Result<()> {
        let data = serde_json::to_string(event)?;
        let timestamp = format_timestamp(Utc::now());

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO research_events (tenant_id, company_id, sequence, timestamp, event_type, event_data)
            VALUES (
                ?1, ?2,
                (SELECT COALESCE(MAX(sequence), 0) + 1 FROM research_events WHERE company_id = ?2),
                ?3, ?4, ?5
            )
            "#,
            params![tenant.to_string(), company_id, timestamp, event.event_type(), data],
        )?;
        Ok(())
    }

    /// Events of a subject in sequence order
    pub fn get_events(
        &self,
        tenant: TenantId,
        company_id: SubjectId,
        limit: Option<usize>,
    ) -> Result<Vec<PersistedEvent>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT company_id, sequence, timestamp, event_type, event_data
            FROM research_events
            WHERE company_id = ?1 AND tenant_id = ?2
            ORDER BY sequence ASC
            LIMIT ?3
            "#,
        )?;
        let rows = stmt
            .query_map(params![company_id, tenant.to_string(), limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(company_id, sequence, timestamp, event_type, data)| {
                Ok(PersistedEvent {
                    company_id,
                    sequence,
                    timestamp: parse_timestamp(&timestamp)?,
                    event_type,
                    event: serde_json::from_str(&data)
                        .map_err(|e| anyhow!("Failed to parse event: {}", e))?,
                })
            })
            .collect()
    }

    pub fn get_event_count(&self, tenant: TenantId, company_id: SubjectId) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM research_events WHERE company_id = ?1 AND tenant_id = ?2",
            params![company_id, tenant.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Run `UPDATE companies SET <set> WHERE id = ?1 AND tenant_id = ?2`
    ///
    /// `set` refers to `values` starting at `?3`.
    fn update_subject(
        &self,
        tenant: TenantId,
        id: SubjectId,
        set: &str,
        values: &[&dyn rusqlite::ToSql],
    ) -> Result<()> {
        let query = format!("UPDATE companies SET {} WHERE id = ?1 AND tenant_id = ?2", set);
        let tenant = tenant.to_string();
        let mut all: Vec<&dyn rusqlite::ToSql> = vec![&id, &tenant];
        all.extend_from_slice(values);

        let changed = self.conn()?.execute(&query, all.as_slice())?;
        if changed == 0 {
            return Err(anyhow!("subject {} not found", id));
        }
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid timestamp '{}'", value))?
        .with_timezone(&Utc))
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn row_timestamp(row: &Row, column: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(column)?;
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_error(column, e))
        })
        .transpose()
}

/// Map a database row to ResearchSubject
fn map_subject_row(row: &Row) -> rusqlite::Result<ResearchSubject> {
    let tenant_str: String = row.get(1)?;
    let tenant_id = Uuid::parse_str(&tenant_str).map_err(|e| conversion_error(1, e))?;

    let status: Option<String> = row.get(7)?;

    let recommendations: Option<String> = row.get(14)?;
    let ai_agent_recommendations = match recommendations {
        Some(json) if !json.trim().is_empty() => {
            serde_json::from_str(&json).map_err(|e| conversion_error(14, e))?
        }
        _ => Vec::new(),
    };

    let created_at = row_timestamp(row, 15)?
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(15, "created_at".into(), rusqlite::types::Type::Null))?;
    let updated_at = row_timestamp(row, 16)?
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(16, "updated_at".into(), rusqlite::types::Type::Null))?;

    Ok(ResearchSubject {
        id: row.get(0)?,
        tenant_id,
        name: row.get(2)?,
        website: row.get(3)?,
        step1_result: row.get(4)?,
        step2_result: row.get(5)?,
        step3_result: row.get(6)?,
        status: WorkflowStatus::from_column(status.as_deref()),
        provider: row.get(8)?,
        started_at: row_timestamp(row, 9)?,
        completed_at: row_timestamp(row, 10)?,
        background_job_id: row.get(11)?,
        report_html: row.get(12)?,
        report_markdown: row.get(13)?,
        ai_agent_recommendations,
        created_at,
        updated_at,
    })
}
