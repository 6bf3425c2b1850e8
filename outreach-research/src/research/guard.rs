//! Duplicate-trigger guard
//!
//! Answers "is a fresh run already working on this subject?". The answer is
//! advisory and fails open: if the status cannot be read the caller is
//! allowed to proceed. The orchestrator's conditional claim
//! ([`Database::try_claim_subject`]) is what actually serializes runs.

use chrono::{DateTime, Duration, Utc};
use outreach_research_sdk::{StatusCheck, SubjectId, TenantId};

use crate::database::Database;
use crate::research::types::ResearchStatusRow;

/// Decide from the persisted status columns alone
///
/// An in-progress status blocks when `now - started_at <= staleness`.
/// Anything older, or an in-progress status without a start time, is stale.
pub fn evaluate(row: &ResearchStatusRow, staleness: Duration, now: DateTime<Utc>) -> StatusCheck {
    let mut check = StatusCheck {
        already_in_progress: false,
        status: row.status.clone(),
        started_at: row.started_at,
        provider: row.provider.clone(),
        stale: false,
    };

    if !row.status.is_in_progress() {
        return check;
    }

    match row.started_at {
        Some(started_at) if now - started_at <= staleness => {
            check.already_in_progress = true;
        }
        _ => check.stale = true,
    }
    check
}

/// Guard check against the database
pub fn check_status(
    db: &Database,
    tenant: TenantId,
    subject_id: SubjectId,
    staleness: Duration,
    now: DateTime<Utc>,
) -> StatusCheck {
    let row = match db.get_research_status(tenant, subject_id) {
        Ok(Some(row)) => row,
        Ok(None) => return StatusCheck::allow_unknown(),
        Err(e) => {
            tracing::warn!(
                subject_id,
                error = %format!("{:#}", e),
                "could not read research status; allowing the run"
            );
            return StatusCheck::allow_unknown();
        }
    };

    let check = evaluate(&row, staleness, now);
    if check.stale {
        tracing::warn!(
            subject_id,
            status = %check.status,
            started_at = ?check.started_at,
            "research marked in progress but stale; treating as stuck"
        );
    }
    check
}
