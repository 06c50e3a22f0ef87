pub mod test_db {
    use crate::auth::Role;
    use crate::db::{create_class, create_session, create_student, create_subject, create_user};
    use crate::error::AppError;
    use crate::models::AttendanceStatus;
    use chrono::NaiveDateTime;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;
    use tracing::log::LevelFilter;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        classes: Vec<String>,
        subjects: Vec<String>,
        students: Vec<TestStudent>,
        sessions: Vec<TestSession>,
        attendances: Vec<TestAttendance>,
    }

    pub struct TestUser {
        pub email: String,
        pub first_name: String,
        pub last_name: String,
        pub role: Role,
    }

    pub struct TestStudent {
        pub key: String,
        pub first_name: String,
        pub last_name: String,
        pub class_name: String,
    }

    pub struct TestSession {
        pub key: String,
        pub date: String,
        pub class_name: String,
        pub subject_name: String,
        pub teacher_email: String,
    }

    pub struct TestAttendance {
        pub student_key: String,
        pub session_key: String,
        pub status: AttendanceStatus,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn teacher(self, email: &str, first_name: &str, last_name: &str) -> Self {
            self.user(email, first_name, last_name, Role::Teacher)
        }

        pub fn admin(self, email: &str, first_name: &str, last_name: &str) -> Self {
            self.user(email, first_name, last_name, Role::Admin)
        }

        fn user(mut self, email: &str, first_name: &str, last_name: &str, role: Role) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                role,
            });
            self
        }

        pub fn class(mut self, name: &str) -> Self {
            self.classes.push(name.to_string());
            self
        }

        pub fn subject(mut self, name: &str) -> Self {
            self.subjects.push(name.to_string());
            self
        }

        /// `key` is how later builder calls and `TestDb::student_id` refer to the student.
        pub fn student(mut self, key: &str, first_name: &str, last_name: &str, class_name: &str) -> Self {
            self.students.push(TestStudent {
                key: key.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                class_name: class_name.to_string(),
            });
            self
        }

        /// `date` is `YYYY-MM-DD HH:MM:SS`.
        pub fn session(
            mut self,
            key: &str,
            date: &str,
            class_name: &str,
            subject_name: &str,
            teacher_email: &str,
        ) -> Self {
            self.sessions.push(TestSession {
                key: key.to_string(),
                date: date.to_string(),
                class_name: class_name.to_string(),
                subject_name: subject_name.to_string(),
                teacher_email: teacher_email.to_string(),
            });
            self
        }

        pub fn attendance(mut self, student_key: &str, session_key: &str, status: AttendanceStatus) -> Self {
            self.attendances.push(TestAttendance {
                student_key: student_key.to_string(),
                session_key: session_key.to_string(),
                status,
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            // Each in-memory connection is its own database, so the pool holds exactly one.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?;

            self.build_with_pool(pool).await
        }

        /// Migrates and seeds an already connected pool.
        pub async fn build_with_pool(self, pool: Pool<Sqlite>) -> Result<TestDb, AppError> {
            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_ids = HashMap::new();
            let mut class_ids = HashMap::new();
            let mut subject_ids = HashMap::new();
            let mut student_ids = HashMap::new();
            let mut session_ids = HashMap::new();

            for user in &self.users {
                let id = create_user(
                    &pool,
                    &user.email,
                    STANDARD_PASSWORD,
                    user.role,
                    &user.first_name,
                    &user.last_name,
                )
                .await?;
                user_ids.insert(user.email.clone(), id);
            }

            for name in &self.classes {
                class_ids.insert(name.clone(), create_class(&pool, name).await?);
            }

            for name in &self.subjects {
                subject_ids.insert(name.clone(), create_subject(&pool, name).await?);
            }

            for student in &self.students {
                let class_id = lookup(&class_ids, &student.class_name)?;
                let id = create_student(
                    &pool,
                    &student.first_name,
                    &student.last_name,
                    None,
                    class_id,
                )
                .await?;
                student_ids.insert(student.key.clone(), id);
            }

            for session in &self.sessions {
                let date = NaiveDateTime::parse_from_str(&session.date, "%Y-%m-%d %H:%M:%S")
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                let id = create_session(
                    &pool,
                    date,
                    lookup(&class_ids, &session.class_name)?,
                    lookup(&subject_ids, &session.subject_name)?,
                    lookup(&user_ids, &session.teacher_email)?,
                )
                .await?;
                session_ids.insert(session.key.clone(), id);
            }

            for attendance in &self.attendances {
                sqlx::query("INSERT INTO attendances (student_id, session_id, status) VALUES (?, ?, ?)")
                    .bind(lookup(&student_ids, &attendance.student_key)?)
                    .bind(lookup(&session_ids, &attendance.session_key)?)
                    .bind(attendance.status)
                    .execute(&pool)
                    .await?;
            }

            Ok(TestDb {
                pool,
                user_ids,
                class_ids,
                subject_ids,
                student_ids,
                session_ids,
            })
        }
    }

    fn lookup(ids: &HashMap<String, i64>, key: &str) -> Result<i64, AppError> {
        ids.get(key)
            .copied()
            .ok_or_else(|| AppError::Internal(format!("Unknown test fixture '{}'", key)))
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_ids: HashMap<String, i64>,
        pub class_ids: HashMap<String, i64>,
        pub subject_ids: HashMap<String, i64>,
        pub student_ids: HashMap<String, i64>,
        pub session_ids: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, email: &str) -> i64 {
            self.user_ids[email]
        }

        pub fn class_id(&self, name: &str) -> i64 {
            self.class_ids[name]
        }

        pub fn subject_id(&self, name: &str) -> i64 {
            self.subject_ids[name]
        }

        pub fn student_id(&self, key: &str) -> i64 {
            self.student_ids[key]
        }

        pub fn session_id(&self, key: &str) -> i64 {
            self.session_ids[key]
        }

        pub async fn attendance_count(&self) -> i64 {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM attendances")
                .fetch_one(&self.pool)
                .await
                .unwrap()
        }
    }
}

pub mod test_utils {
    use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};
    use crate::init_rocket;
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    /// Two year groups sharing a subject. Ms Curie teaches 7A on two dates,
    /// Mr Turing teaches 7B once.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin("admin@school.test", "Grace", "Hopper")
            .teacher("curie@school.test", "Marie", "Curie")
            .teacher("turing@school.test", "Alan", "Turing")
            .class("7A")
            .class("7B")
            .subject("Maths")
            .student("lina", "Lina", "Haddad", "7A")
            .student("omar", "Omar", "Benali", "7A")
            .student("yara", "Yara", "Mansour", "7A")
            .student("sami", "Sami", "Zeroual", "7B")
            .session("7a-mon", "2024-09-02 08:30:00", "7A", "Maths", "curie@school.test")
            .session("7a-wed", "2024-09-04 08:30:00", "7A", "Maths", "curie@school.test")
            .session("7b-mon", "2024-09-02 10:30:00", "7B", "Maths", "turing@school.test")
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone()).await;
        let client = Client::tracked(rocket)
            .await
            .expect("valid rocket instance");
        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, email: &str) {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": email,
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok, "Login failed for {}", email);
    }
}
