use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};
use validator::Validate;

use super::roster::Roster;
use crate::db::{lock_session_for_write, upsert_attendance};
use crate::error::AppError;
use crate::models::{Attendance, AttendanceStatus};

/// One student's mark within a session.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AttendanceEntry {
    pub student_id: i64,
    pub status: AttendanceStatus,
    #[validate(length(max = 500, message = "Comment must be at most 500 characters"))]
    pub comment: Option<String>,
}

/// Marks a single student. Same semantics as a one-entry bulk mark.
#[instrument(skip(pool))]
pub async fn mark_attendance(
    pool: &Pool<Sqlite>,
    session_id: i64,
    entry: AttendanceEntry,
) -> Result<Attendance, AppError> {
    mark_bulk_attendance(pool, session_id, std::slice::from_ref(&entry))
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal("Upsert returned no attendance record".to_string()))
}

/// Validates every entry against the session roster, then upserts them all in
/// one transaction. Any failure rolls back the whole batch.
#[instrument(skip(pool, entries), fields(entries = entries.len()))]
pub async fn mark_bulk_attendance(
    pool: &Pool<Sqlite>,
    session_id: i64,
    entries: &[AttendanceEntry],
) -> Result<Vec<Attendance>, AppError> {
    info!("Marking attendance");
    let mut tx = pool.begin().await?;

    if !lock_session_for_write(&mut tx, session_id).await? {
        return Err(AppError::SessionNotFound(session_id));
    }

    let roster = Roster::load(&mut tx, session_id).await?;
    roster.ensure_all(entries.iter().map(|entry| entry.student_id))?;

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let record = upsert_attendance(
            &mut tx,
            entry.student_id,
            session_id,
            entry.status,
            entry.comment.as_deref(),
        )
        .await?;
        records.push(record);
    }

    tx.commit().await?;

    info!(
        session_id,
        class_id = roster.session().class_id,
        marked = records.len(),
        "Attendance committed"
    );
    Ok(records)
}
