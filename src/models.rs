use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Late => "LATE",
            AttendanceStatus::Excused => "EXCUSED",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Class {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subject {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Student {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub class_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: i64,
    pub date: NaiveDateTime,
    pub class_id: i64,
    pub subject_id: i64,
    pub teacher_id: i64,
}

/// Session joined with the display names of what it references.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionSummary {
    pub id: i64,
    pub date: NaiveDateTime,
    pub class_id: i64,
    pub class_name: String,
    pub subject_id: i64,
    pub subject_name: String,
    pub teacher_id: i64,
    pub teacher_name: String,
}

/// A session together with the students currently enrolled in its class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWithRoster {
    pub session: Session,
    pub students: Vec<Student>,
}

/// One stored attendance row, keyed uniquely by (student_id, session_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attendance {
    pub id: i64,
    pub student_id: i64,
    pub session_id: i64,
    pub status: AttendanceStatus,
    pub comment: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Attendance row as returned by listings: the stored fields plus the
/// student and session context needed to display it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: i64,
    pub session_id: i64,
    pub status: AttendanceStatus,
    pub comment: Option<String>,
    pub student_first_name: String,
    pub student_last_name: String,
    pub session_date: NaiveDateTime,
    pub class_id: i64,
    pub class_name: String,
    pub subject_name: String,
    pub teacher_id: i64,
    pub teacher_name: String,
}

/// Inclusive calendar-date window applied to a session's date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }
}

/// Selection criteria for attendance listings. Unset fields do not filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttendanceFilter {
    pub student_id: Option<i64>,
    pub session_id: Option<i64>,
    pub class_id: Option<i64>,
    pub teacher_id: Option<i64>,
    pub window: DateWindow,
}

impl AttendanceFilter {
    pub fn for_student(student_id: i64, window: DateWindow) -> Self {
        Self {
            student_id: Some(student_id),
            window,
            ..Default::default()
        }
    }

    pub fn for_session(session_id: i64) -> Self {
        Self {
            session_id: Some(session_id),
            ..Default::default()
        }
    }

    pub fn for_class(class_id: i64, window: DateWindow) -> Self {
        Self {
            class_id: Some(class_id),
            window,
            ..Default::default()
        }
    }

    pub fn for_teacher(teacher_id: i64) -> Self {
        Self {
            teacher_id: Some(teacher_id),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceStats {
    pub total: u32,
    pub present: u32,
    pub absent: u32,
    pub late: u32,
    pub excused: u32,
    pub attendance_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentWithStats {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub class_id: i64,
    pub class_name: String,
    pub stats: AttendanceStats,
}

/// Student row joined with its class name, as reached through a teacher's sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnrolledStudent {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub class_id: i64,
    pub class_name: String,
}
