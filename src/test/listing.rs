#[cfg(test)]
mod tests {
    use crate::attendance::{
        class_attendance, session_attendance, session_roster, student_history, student_stats,
        teacher_students_with_stats,
    };
    use crate::error::AppError;
    use crate::models::{AttendanceStats, AttendanceStatus::*, DateWindow};
    use crate::test::test_db::{TestDb, TestDbBuilder};
    use crate::test::test_utils::create_standard_test_db;
    use chrono::NaiveDate;
    use rocket::tokio;

    fn day(d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 9, d)
    }

    /// Lina has four marks in September: P (2nd), P (4th), A (9th), L (11th).
    async fn marked_db() -> TestDb {
        TestDbBuilder::new()
            .teacher("curie@school.test", "Marie", "Curie")
            .teacher("turing@school.test", "Alan", "Turing")
            .class("7A")
            .class("7B")
            .subject("Maths")
            .subject("Science")
            .student("lina", "Lina", "Haddad", "7A")
            .student("omar", "Omar", "Benali", "7A")
            .student("sami", "Sami", "Zeroual", "7B")
            .session("s1", "2024-09-02 08:30:00", "7A", "Maths", "curie@school.test")
            .session("s2", "2024-09-04 08:30:00", "7A", "Maths", "curie@school.test")
            .session("s3", "2024-09-09 13:00:00", "7A", "Science", "turing@school.test")
            .session("s4", "2024-09-11 23:30:00", "7A", "Maths", "curie@school.test")
            .session("s5", "2024-09-02 10:30:00", "7B", "Maths", "turing@school.test")
            .attendance("lina", "s1", Present)
            .attendance("lina", "s2", Present)
            .attendance("lina", "s3", Absent)
            .attendance("lina", "s4", Late)
            .attendance("omar", "s1", Absent)
            .attendance("omar", "s3", Present)
            .attendance("sami", "s5", Present)
            .build()
            .await
            .expect("Failed to build marked test database")
    }

    #[tokio::test]
    async fn student_stats_count_every_status() {
        let db = marked_db().await;

        let stats = student_stats(&db.pool, db.student_id("lina"), DateWindow::default())
            .await
            .unwrap();

        assert_eq!(
            stats,
            AttendanceStats {
                total: 4,
                present: 2,
                absent: 1,
                late: 1,
                excused: 0,
                attendance_rate: 50,
            }
        );
    }

    #[tokio::test]
    async fn student_without_records_has_zero_rate() {
        let db = create_standard_test_db().await;

        let stats = student_stats(&db.pool, db.student_id("yara"), DateWindow::default())
            .await
            .unwrap();

        assert_eq!(stats, AttendanceStats::default());
    }

    #[tokio::test]
    async fn unknown_student_is_not_found() {
        let db = create_standard_test_db().await;

        let result = student_stats(&db.pool, 4242, DateWindow::default()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn date_window_is_inclusive_on_both_ends() {
        let db = marked_db().await;
        let lina = db.student_id("lina");

        let stats = student_stats(&db.pool, lina, DateWindow::new(day(4), day(11)))
            .await
            .unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.present, 1);
        assert_eq!(stats.attendance_rate, 33);

        let history = student_history(&db.pool, lina, DateWindow::new(day(3), None))
            .await
            .unwrap();
        assert_eq!(history.len(), 3);

        let history = student_history(&db.pool, lina, DateWindow::new(None, day(2)))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].session_id, db.session_id("s1"));
    }

    #[tokio::test]
    async fn late_evening_session_belongs_to_its_calendar_day() {
        let db = marked_db().await;

        let history = student_history(&db.pool, db.student_id("lina"), DateWindow::new(day(11), day(11)))
            .await
            .unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, Late);
    }

    #[tokio::test]
    async fn student_history_is_newest_first_with_context() {
        let db = marked_db().await;

        let history = student_history(&db.pool, db.student_id("lina"), DateWindow::default())
            .await
            .unwrap();

        let sessions: Vec<i64> = history.iter().map(|r| r.session_id).collect();
        assert_eq!(
            sessions,
            vec![
                db.session_id("s4"),
                db.session_id("s3"),
                db.session_id("s2"),
                db.session_id("s1"),
            ]
        );
        assert_eq!(history[1].subject_name, "Science");
        assert_eq!(history[1].teacher_name, "Alan Turing");
        assert_eq!(history[0].class_name, "7A");
    }

    #[tokio::test]
    async fn class_listing_orders_by_date_then_last_name() {
        let db = marked_db().await;

        let records = class_attendance(&db.pool, db.class_id("7A"), DateWindow::default())
            .await
            .unwrap();

        let rows: Vec<(i64, &str)> = records
            .iter()
            .map(|r| (r.session_id, r.student_last_name.as_str()))
            .collect();
        assert_eq!(
            rows,
            vec![
                (db.session_id("s4"), "Haddad"),
                (db.session_id("s3"), "Benali"),
                (db.session_id("s3"), "Haddad"),
                (db.session_id("s2"), "Haddad"),
                (db.session_id("s1"), "Benali"),
                (db.session_id("s1"), "Haddad"),
            ]
        );
        assert!(records.iter().all(|r| r.class_id == db.class_id("7A")));
    }

    #[tokio::test]
    async fn class_listing_respects_window() {
        let db = marked_db().await;

        let records = class_attendance(&db.pool, db.class_id("7A"), DateWindow::new(day(9), day(9)))
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.session_id == db.session_id("s3")));
    }

    #[tokio::test]
    async fn unknown_class_is_not_found() {
        let db = marked_db().await;
        let result = class_attendance(&db.pool, 777, DateWindow::default()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn session_listing_only_contains_that_session() {
        let db = marked_db().await;

        let records = session_attendance(&db.pool, db.session_id("s1")).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].student_last_name, "Benali");
        assert_eq!(records[1].student_last_name, "Haddad");

        let result = session_attendance(&db.pool, 31337).await;
        assert!(matches!(result, Err(AppError::SessionNotFound(31337))));
    }

    #[tokio::test]
    async fn session_roster_lists_current_class_members() {
        let db = create_standard_test_db().await;

        let roster = session_roster(&db.pool, db.session_id("7a-mon")).await.unwrap();
        let names: Vec<&str> = roster.students.iter().map(|s| s.last_name.as_str()).collect();

        assert_eq!(names, vec!["Benali", "Haddad", "Mansour"]);
        assert_eq!(roster.session.class_id, db.class_id("7A"));
    }

    #[tokio::test]
    async fn teacher_roster_deduplicates_students_across_sessions() {
        let db = marked_db().await;

        let students = teacher_students_with_stats(&db.pool, db.user_id("curie@school.test"))
            .await
            .unwrap();

        let names: Vec<&str> = students.iter().map(|s| s.last_name.as_str()).collect();
        assert_eq!(names, vec!["Benali", "Haddad"]);

        // Only marks from Curie's sessions (s1, s2, s4) count.
        let omar = &students[0];
        assert_eq!(omar.stats.total, 1);
        assert_eq!(omar.stats.absent, 1);
        assert_eq!(omar.stats.attendance_rate, 0);

        let lina = &students[1];
        assert_eq!(lina.stats.total, 3);
        assert_eq!(lina.stats.present, 2);
        assert_eq!(lina.stats.late, 1);
        assert_eq!(lina.stats.attendance_rate, 67);
        assert_eq!(lina.class_name, "7A");
    }

    #[tokio::test]
    async fn teacher_roster_spans_every_class_taught() {
        let db = marked_db().await;

        let students = teacher_students_with_stats(&db.pool, db.user_id("turing@school.test"))
            .await
            .unwrap();

        let names: Vec<&str> = students.iter().map(|s| s.last_name.as_str()).collect();
        assert_eq!(names, vec!["Benali", "Haddad", "Zeroual"]);

        let sami = &students[2];
        assert_eq!(sami.class_name, "7B");
        assert_eq!(sami.stats.attendance_rate, 100);

        let lina = &students[1];
        assert_eq!(lina.stats.total, 1);
        assert_eq!(lina.stats.absent, 1);
    }

    #[tokio::test]
    async fn teacher_without_sessions_has_empty_roster() {
        let db = TestDbBuilder::new()
            .teacher("idle@school.test", "Ida", "Lovelace")
            .build()
            .await
            .unwrap();

        let students = teacher_students_with_stats(&db.pool, db.user_id("idle@school.test"))
            .await
            .unwrap();
        assert!(students.is_empty());

        let result = teacher_students_with_stats(&db.pool, 999).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
