use std::str::FromStr;
use std::time::Duration;

use crate::{
    auth::{DbUser, DbUserSession, Role, User, UserSession},
    error::AppError,
    models::{
        Attendance, AttendanceFilter, AttendanceRecord, AttendanceStatus, Class, EnrolledStudent,
        Session, SessionSummary, SessionWithRoster, Student, Subject,
    },
};
use chrono::{NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{info, instrument};

#[cfg(not(test))]
const PASSWORD_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PASSWORD_HASH_COST: u32 = 4;

const USER_COLUMNS: &str = "id, email, role, first_name, last_name";

const SESSION_SUMMARY_SELECT: &str = "SELECT s.id, s.date, s.class_id, c.name AS class_name,
        s.subject_id, sub.name AS subject_name, s.teacher_id,
        (u.first_name || ' ' || u.last_name) AS teacher_name
     FROM sessions s
     JOIN classes c ON c.id = s.class_id
     JOIN subjects sub ON sub.id = s.subject_id
     JOIN users u ON u.id = s.teacher_id";

const ATTENDANCE_RECORD_SELECT: &str = "SELECT a.id, a.student_id, a.session_id, a.status, a.comment,
        st.first_name AS student_first_name, st.last_name AS student_last_name,
        s.date AS session_date, s.class_id, c.name AS class_name,
        sub.name AS subject_name, s.teacher_id,
        (u.first_name || ' ' || u.last_name) AS teacher_name
     FROM attendances a
     JOIN students st ON st.id = a.student_id
     JOIN sessions s ON s.id = a.session_id
     JOIN classes c ON c.id = s.class_id
     JOIN subjects sub ON sub.id = s.subject_id
     JOIN users u ON u.id = s.teacher_id";

#[instrument]
pub async fn connect(database_url: &str) -> Result<SqlitePool, AppError> {
    info!("Connecting to SQLite database");
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

// Users

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_email(pool: &Pool<Sqlite>, email: &str) -> Result<Option<User>, AppError> {
    info!("Finding user by email");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

#[instrument]
pub async fn get_all_users(pool: &Pool<Sqlite>) -> Result<Vec<User>, AppError> {
    let rows = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY last_name, first_name"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(User::try_from).collect()
}

#[instrument(skip_all, fields(email))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let hash = sqlx::query_scalar::<_, String>("SELECT password FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    match hash {
        Some(hash) => match bcrypt::verify(password, &hash) {
            Ok(true) => find_user_by_email(pool, email).await,
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

#[instrument(skip_all, fields(email, role = %role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
    role: Role,
    first_name: &str,
    last_name: &str,
) -> Result<i64, AppError> {
    info!("Creating new user");

    if find_user_by_email(pool, email).await?.is_some() {
        return Err(AppError::Validation(format!(
            "Email '{}' is already registered",
            email
        )));
    }

    let hashed_password = bcrypt::hash(password, PASSWORD_HASH_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (email, password, role, first_name, last_name) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(email)
    .bind(hashed_password)
    .bind(role.as_str())
    .bind(first_name)
    .bind(last_name)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

// Login sessions

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(pool: &Pool<Sqlite>, token: &str) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// Classes

#[instrument]
pub async fn get_all_classes(pool: &Pool<Sqlite>) -> Result<Vec<Class>, AppError> {
    info!("Getting all classes");
    let rows = sqlx::query_as::<_, Class>("SELECT id, name FROM classes ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[instrument]
pub async fn get_class(pool: &Pool<Sqlite>, id: i64) -> Result<Class, AppError> {
    info!("Getting class");
    sqlx::query_as::<_, Class>("SELECT id, name FROM classes WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Class with id {} not found", id)))
}

#[instrument]
pub async fn create_class(pool: &Pool<Sqlite>, name: &str) -> Result<i64, AppError> {
    info!("Creating class");
    let res = sqlx::query("INSERT INTO classes (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn update_class(pool: &Pool<Sqlite>, id: i64, name: &str) -> Result<(), AppError> {
    info!("Updating class");
    let res = sqlx::query("UPDATE classes SET name = ? WHERE id = ?")
        .bind(name)
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Class with id {} not found", id)));
    }
    Ok(())
}

#[instrument]
pub async fn delete_class(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting class");
    let res = sqlx::query("DELETE FROM classes WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Class with id {} not found", id)));
    }
    Ok(())
}

// Subjects

#[instrument]
pub async fn get_all_subjects(pool: &Pool<Sqlite>) -> Result<Vec<Subject>, AppError> {
    info!("Getting all subjects");
    let rows = sqlx::query_as::<_, Subject>("SELECT id, name FROM subjects ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[instrument]
pub async fn get_subject(pool: &Pool<Sqlite>, id: i64) -> Result<Subject, AppError> {
    info!("Getting subject");
    sqlx::query_as::<_, Subject>("SELECT id, name FROM subjects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subject with id {} not found", id)))
}

#[instrument]
pub async fn create_subject(pool: &Pool<Sqlite>, name: &str) -> Result<i64, AppError> {
    info!("Creating subject");
    let res = sqlx::query("INSERT INTO subjects (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn update_subject(pool: &Pool<Sqlite>, id: i64, name: &str) -> Result<(), AppError> {
    info!("Updating subject");
    let res = sqlx::query("UPDATE subjects SET name = ? WHERE id = ?")
        .bind(name)
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Subject with id {} not found", id)));
    }
    Ok(())
}

#[instrument]
pub async fn delete_subject(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting subject");
    let res = sqlx::query("DELETE FROM subjects WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Subject with id {} not found", id)));
    }
    Ok(())
}

// Students

#[instrument]
pub async fn get_students(
    pool: &Pool<Sqlite>,
    class_id: Option<i64>,
) -> Result<Vec<Student>, AppError> {
    info!("Getting students");
    let rows = match class_id {
        Some(class_id) => {
            sqlx::query_as::<_, Student>(
                "SELECT id, first_name, last_name, email, class_id FROM students
                 WHERE class_id = ?
                 ORDER BY first_name, last_name",
            )
            .bind(class_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Student>(
                "SELECT id, first_name, last_name, email, class_id FROM students
                 ORDER BY first_name, last_name",
            )
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

#[instrument]
pub async fn get_student(pool: &Pool<Sqlite>, id: i64) -> Result<Student, AppError> {
    info!("Getting student");
    sqlx::query_as::<_, Student>(
        "SELECT id, first_name, last_name, email, class_id FROM students WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Student with id {} not found", id)))
}

#[instrument]
pub async fn create_student(
    pool: &Pool<Sqlite>,
    first_name: &str,
    last_name: &str,
    email: Option<&str>,
    class_id: i64,
) -> Result<i64, AppError> {
    info!("Creating student");
    let res = sqlx::query(
        "INSERT INTO students (first_name, last_name, email, class_id) VALUES (?, ?, ?, ?)",
    )
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(class_id)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn update_student(
    pool: &Pool<Sqlite>,
    id: i64,
    first_name: &str,
    last_name: &str,
    email: Option<&str>,
    class_id: i64,
) -> Result<(), AppError> {
    info!("Updating student");
    let res = sqlx::query(
        "UPDATE students SET first_name = ?, last_name = ?, email = ?, class_id = ? WHERE id = ?",
    )
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(class_id)
    .bind(id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Student with id {} not found", id)));
    }
    Ok(())
}

#[instrument]
pub async fn delete_student(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting student");
    let res = sqlx::query("DELETE FROM students WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Student with id {} not found", id)));
    }
    Ok(())
}

// Sessions

#[instrument]
pub async fn get_sessions(
    pool: &Pool<Sqlite>,
    class_id: Option<i64>,
) -> Result<Vec<SessionSummary>, AppError> {
    info!("Getting sessions");
    let mut query = QueryBuilder::<Sqlite>::new(SESSION_SUMMARY_SELECT);
    if let Some(class_id) = class_id {
        query.push(" WHERE s.class_id = ").push_bind(class_id);
    }
    query.push(" ORDER BY s.date DESC, s.id DESC");

    let rows = query
        .build_query_as::<SessionSummary>()
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[instrument]
pub async fn get_session(pool: &Pool<Sqlite>, id: i64) -> Result<SessionSummary, AppError> {
    info!("Getting session");
    sqlx::query_as::<_, SessionSummary>(&format!("{SESSION_SUMMARY_SELECT} WHERE s.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::SessionNotFound(id))
}

#[instrument]
pub async fn create_session(
    pool: &Pool<Sqlite>,
    date: NaiveDateTime,
    class_id: i64,
    subject_id: i64,
    teacher_id: i64,
) -> Result<i64, AppError> {
    info!("Creating session");
    let res = sqlx::query(
        "INSERT INTO sessions (date, class_id, subject_id, teacher_id) VALUES (?, ?, ?, ?)",
    )
    .bind(date)
    .bind(class_id)
    .bind(subject_id)
    .bind(teacher_id)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn update_session(
    pool: &Pool<Sqlite>,
    id: i64,
    date: NaiveDateTime,
    class_id: i64,
    subject_id: i64,
    teacher_id: i64,
) -> Result<(), AppError> {
    info!("Updating session");
    let res = sqlx::query(
        "UPDATE sessions SET date = ?, class_id = ?, subject_id = ?, teacher_id = ? WHERE id = ?",
    )
    .bind(date)
    .bind(class_id)
    .bind(subject_id)
    .bind(teacher_id)
    .bind(id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::SessionNotFound(id));
    }
    Ok(())
}

#[instrument]
pub async fn delete_session(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting session");
    let res = sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::SessionNotFound(id));
    }
    Ok(())
}

// Attendance

/// Takes the SQLite write lock for the surrounding transaction by touching the
/// session row. Returns false when the session does not exist.
#[instrument(skip(conn))]
pub async fn lock_session_for_write(
    conn: &mut SqliteConnection,
    session_id: i64,
) -> Result<bool, AppError> {
    let res = sqlx::query("UPDATE sessions SET id = id WHERE id = ?")
        .bind(session_id)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip(conn))]
pub async fn find_session_with_roster(
    conn: &mut SqliteConnection,
    session_id: i64,
) -> Result<Option<SessionWithRoster>, AppError> {
    info!("Loading session with roster");
    let session = sqlx::query_as::<_, Session>(
        "SELECT id, date, class_id, subject_id, teacher_id FROM sessions WHERE id = ?",
    )
    .bind(session_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(session) = session else {
        return Ok(None);
    };

    let students = sqlx::query_as::<_, Student>(
        "SELECT id, first_name, last_name, email, class_id FROM students
         WHERE class_id = ?
         ORDER BY last_name, first_name",
    )
    .bind(session.class_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(SessionWithRoster { session, students }))
}

#[instrument(skip(conn, comment))]
pub async fn upsert_attendance(
    conn: &mut SqliteConnection,
    student_id: i64,
    session_id: i64,
    status: AttendanceStatus,
    comment: Option<&str>,
) -> Result<Attendance, AppError> {
    let record = sqlx::query_as::<_, Attendance>(
        "INSERT INTO attendances (student_id, session_id, status, comment)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(student_id, session_id) DO UPDATE SET
             status = excluded.status,
             comment = excluded.comment,
             updated_at = CURRENT_TIMESTAMP
         RETURNING id, student_id, session_id, status, comment, created_at, updated_at",
    )
    .bind(student_id)
    .bind(session_id)
    .bind(status)
    .bind(comment)
    .fetch_one(&mut *conn)
    .await?;

    Ok(record)
}

#[instrument(skip(pool))]
pub async fn find_attendance(
    pool: &Pool<Sqlite>,
    filter: &AttendanceFilter,
) -> Result<Vec<AttendanceRecord>, AppError> {
    info!("Finding attendance");
    let mut query = QueryBuilder::<Sqlite>::new(ATTENDANCE_RECORD_SELECT);
    query.push(" WHERE 1 = 1");

    if let Some(student_id) = filter.student_id {
        query.push(" AND a.student_id = ").push_bind(student_id);
    }
    if let Some(session_id) = filter.session_id {
        query.push(" AND a.session_id = ").push_bind(session_id);
    }
    if let Some(class_id) = filter.class_id {
        query.push(" AND s.class_id = ").push_bind(class_id);
    }
    if let Some(teacher_id) = filter.teacher_id {
        query.push(" AND s.teacher_id = ").push_bind(teacher_id);
    }
    if let Some(start) = filter.window.start {
        query.push(" AND date(s.date) >= ").push_bind(start);
    }
    if let Some(end) = filter.window.end {
        query.push(" AND date(s.date) <= ").push_bind(end);
    }

    query.push(" ORDER BY s.date DESC, st.last_name ASC, st.first_name ASC, a.id ASC");

    let rows = query
        .build_query_as::<AttendanceRecord>()
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

#[instrument]
pub async fn get_attendance(pool: &Pool<Sqlite>, id: i64) -> Result<Attendance, AppError> {
    sqlx::query_as::<_, Attendance>(
        "SELECT id, student_id, session_id, status, comment, created_at, updated_at
         FROM attendances WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::RecordNotFound(id))
}

#[instrument]
pub async fn delete_attendance(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting attendance record");
    let res = sqlx::query("DELETE FROM attendances WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::RecordNotFound(id));
    }
    Ok(())
}

/// One row per (session, student) pair for every session the teacher runs;
/// a student appears once for each of those sessions.
#[instrument]
pub async fn find_teacher_session_students(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
) -> Result<Vec<EnrolledStudent>, AppError> {
    info!("Finding students across teacher sessions");
    let rows = sqlx::query_as::<_, EnrolledStudent>(
        "SELECT st.id, st.first_name, st.last_name, st.email, st.class_id, c.name AS class_name
         FROM sessions s
         JOIN classes c ON c.id = s.class_id
         JOIN students st ON st.class_id = s.class_id
         WHERE s.teacher_id = ?
         ORDER BY s.date DESC, s.id, st.id",
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
