use std::collections::{BTreeMap, HashMap};

use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::db::{
    find_attendance, find_teacher_session_students, get_class, get_session, get_student, get_user,
};
use crate::error::AppError;
use crate::models::{
    AttendanceFilter, AttendanceRecord, AttendanceStats, AttendanceStatus, DateWindow,
    EnrolledStudent, StudentWithStats,
};

/// Percentage of `present` out of `total`, rounded half-up; zero when there
/// are no records.
pub fn attendance_rate(present: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let (present, total) = (u64::from(present), u64::from(total));
    ((present * 200 + total) / (total * 2)) as u32
}

impl AttendanceStats {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = AttendanceStatus>,
    {
        let mut stats = statuses
            .into_iter()
            .fold(AttendanceStats::default(), |mut stats, status| {
                stats.total += 1;
                match status {
                    AttendanceStatus::Present => stats.present += 1,
                    AttendanceStatus::Absent => stats.absent += 1,
                    AttendanceStatus::Late => stats.late += 1,
                    AttendanceStatus::Excused => stats.excused += 1,
                }
                stats
            });
        stats.attendance_rate = attendance_rate(stats.present, stats.total);
        stats
    }
}

/// Collapses per-session student rows into one entry per student and attaches
/// stats computed from `records`.
///
/// Students are deduplicated by id. Records are counted once per record id and
/// only for students on the merged roster; records belonging to anyone else
/// are ignored. Output is ordered by last name, first name, then id.
pub fn merge_roster_stats(
    students: Vec<EnrolledStudent>,
    records: &[AttendanceRecord],
) -> Vec<StudentWithStats> {
    let roster: BTreeMap<i64, EnrolledStudent> = students
        .into_iter()
        .map(|student| (student.id, student))
        .collect();

    let statuses_by_student: HashMap<i64, BTreeMap<i64, AttendanceStatus>> = records
        .iter()
        .filter(|record| roster.contains_key(&record.student_id))
        .fold(HashMap::new(), |mut acc, record| {
            acc.entry(record.student_id)
                .or_insert_with(BTreeMap::new)
                .insert(record.id, record.status);
            acc
        });

    let mut merged: Vec<StudentWithStats> = roster
        .into_values()
        .map(|student| {
            let stats = statuses_by_student
                .get(&student.id)
                .map(|statuses| AttendanceStats::from_statuses(statuses.values().copied()))
                .unwrap_or_default();
            StudentWithStats {
                id: student.id,
                first_name: student.first_name,
                last_name: student.last_name,
                email: student.email,
                class_id: student.class_id,
                class_name: student.class_name,
                stats,
            }
        })
        .collect();

    merged.sort_by(|a, b| {
        a.last_name
            .cmp(&b.last_name)
            .then_with(|| a.first_name.cmp(&b.first_name))
            .then_with(|| a.id.cmp(&b.id))
    });
    merged
}

#[instrument(skip(pool))]
pub async fn student_stats(
    pool: &Pool<Sqlite>,
    student_id: i64,
    window: DateWindow,
) -> Result<AttendanceStats, AppError> {
    info!("Computing student attendance stats");
    get_student(pool, student_id).await?;

    let records = find_attendance(pool, &AttendanceFilter::for_student(student_id, window)).await?;
    Ok(AttendanceStats::from_statuses(
        records.iter().map(|record| record.status),
    ))
}

#[instrument(skip(pool))]
pub async fn student_history(
    pool: &Pool<Sqlite>,
    student_id: i64,
    window: DateWindow,
) -> Result<Vec<AttendanceRecord>, AppError> {
    get_student(pool, student_id).await?;
    find_attendance(pool, &AttendanceFilter::for_student(student_id, window)).await
}

#[instrument(skip(pool))]
pub async fn session_attendance(
    pool: &Pool<Sqlite>,
    session_id: i64,
) -> Result<Vec<AttendanceRecord>, AppError> {
    get_session(pool, session_id).await?;
    find_attendance(pool, &AttendanceFilter::for_session(session_id)).await
}

/// Listing only: ordered by session date descending, then student last name.
#[instrument(skip(pool))]
pub async fn class_attendance(
    pool: &Pool<Sqlite>,
    class_id: i64,
    window: DateWindow,
) -> Result<Vec<AttendanceRecord>, AppError> {
    get_class(pool, class_id).await?;
    find_attendance(pool, &AttendanceFilter::for_class(class_id, window)).await
}

#[instrument(skip(pool))]
pub async fn teacher_students_with_stats(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
) -> Result<Vec<StudentWithStats>, AppError> {
    info!("Computing teacher roster stats");
    get_user(pool, teacher_id).await?;

    let students = find_teacher_session_students(pool, teacher_id).await?;
    let records = find_attendance(pool, &AttendanceFilter::for_teacher(teacher_id)).await?;

    Ok(merge_roster_stats(students, &records))
}
