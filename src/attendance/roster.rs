use std::collections::HashSet;

use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{instrument, warn};

use crate::db::find_session_with_roster;
use crate::error::AppError;
use crate::models::{Session, SessionWithRoster};

/// The students enrolled in a session's class at the moment it was loaded.
#[derive(Debug, Clone)]
pub struct Roster {
    session: Session,
    student_ids: HashSet<i64>,
}

impl From<SessionWithRoster> for Roster {
    fn from(loaded: SessionWithRoster) -> Self {
        Self {
            student_ids: loaded.students.iter().map(|s| s.id).collect(),
            session: loaded.session,
        }
    }
}

impl Roster {
    /// Resolves the session and its class's current students. Never cached:
    /// class membership may change between calls.
    #[instrument(skip(conn))]
    pub async fn load(conn: &mut SqliteConnection, session_id: i64) -> Result<Self, AppError> {
        match find_session_with_roster(conn, session_id).await? {
            Some(loaded) => Ok(Roster::from(loaded)),
            None => Err(AppError::SessionNotFound(session_id)),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn contains(&self, student_id: i64) -> bool {
        self.student_ids.contains(&student_id)
    }

    pub fn ensure_member(&self, student_id: i64) -> Result<(), AppError> {
        if self.contains(student_id) {
            Ok(())
        } else {
            warn!(
                student_id,
                session_id = self.session.id,
                class_id = self.session.class_id,
                "Rejected attendance for student outside the class roster"
            );
            Err(AppError::StudentNotInRoster {
                student_id,
                session_id: self.session.id,
            })
        }
    }

    /// Fails on the first student outside the roster.
    pub fn ensure_all<I>(&self, student_ids: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = i64>,
    {
        student_ids
            .into_iter()
            .try_for_each(|student_id| self.ensure_member(student_id))
    }
}

/// Read-only view of a session and the students currently enrolled in its class.
#[instrument(skip(pool))]
pub async fn session_roster(
    pool: &Pool<Sqlite>,
    session_id: i64,
) -> Result<SessionWithRoster, AppError> {
    let mut conn = pool.acquire().await?;
    find_session_with_roster(&mut conn, session_id)
        .await?
        .ok_or(AppError::SessionNotFound(session_id))
}
