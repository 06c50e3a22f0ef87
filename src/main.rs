#[macro_use]
extern crate rocket;

mod api;
mod attendance;
mod auth;
mod db;
mod env;
mod error;
mod models;
mod telemetry;
mod validation;
#[cfg(test)]
mod test;

use api::{
    api_create_class, api_create_session, api_create_student, api_create_subject,
    api_delete_attendance, api_delete_class, api_delete_session, api_delete_student,
    api_delete_subject, api_get_attendance, api_get_class, api_get_class_attendance, api_get_classes,
    api_get_session, api_get_session_attendance, api_get_sessions, api_get_student,
    api_get_student_attendance, api_get_student_stats, api_get_students, api_get_subject,
    api_get_subjects, api_get_teacher_students, api_get_users, api_login, api_logout,
    api_mark_attendance, api_mark_bulk_attendance, api_me, api_register_user, api_update_class,
    api_update_session, api_update_student, api_update_subject, health,
};
use auth::{forbidden_api, not_found_api, unauthorized_api, unprocessable_api};
use db::clean_expired_sessions;
use once_cell::sync::Lazy;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use std::sync::Mutex;
use telemetry::{OtelGuard, TelemetryFairing, init_tracing, shutdown_telemetry};
use tracing::{error, info};

pub static TELEMETRY_GUARD: Lazy<Mutex<Option<OtelGuard>>> = Lazy::new(|| Mutex::new(None));

const SESSION_CLEANUP_INTERVAL_SECS: u64 = 3600;

#[launch]
async fn rocket() -> _ {
    if let Err(e) = env::load_environment() {
        eprintln!("Failed to load environment: {}", e);
    }

    let guard = init_tracing();
    if let Ok(mut slot) = TELEMETRY_GUARD.lock() {
        *slot = guard;
    }

    let database_url =
        dotenvy::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://attendance.db".to_string());

    let pool = match db::connect(&database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            e.log_and_record("Database connection");
            panic!("Failed to connect to SQLite database: {}", e);
        }
    };

    info!("Running database migrations...");
    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            error!("Failed to run migrations: {}", e);
            panic!("Database migration failed: {}", e);
        }
    }

    let pool_clone = pool.clone();
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) if count > 0 => info!("Cleaned up {} expired sessions", count),
                Ok(_) => {}
                Err(e) => error!("Failed to clean expired sessions: {}", e),
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(
                SESSION_CLEANUP_INTERVAL_SECS,
            ))
            .await;
        }
    });

    init_rocket(pool)
        .await
        .attach(AdHoc::on_shutdown("Telemetry shutdown", |_| {
            Box::pin(async { shutdown_telemetry() })
        }))
}

pub async fn init_rocket(pool: SqlitePool) -> Rocket<Build> {
    info!("Starting attendance tracker");

    rocket::build()
        .manage(pool)
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_me,
                api_register_user,
                api_get_users,
                api_get_classes,
                api_get_class,
                api_create_class,
                api_update_class,
                api_delete_class,
                api_get_subjects,
                api_get_subject,
                api_create_subject,
                api_update_subject,
                api_delete_subject,
                api_get_students,
                api_get_student,
                api_create_student,
                api_update_student,
                api_delete_student,
                api_get_sessions,
                api_get_session,
                api_create_session,
                api_update_session,
                api_delete_session,
                api_mark_attendance,
                api_mark_bulk_attendance,
                api_get_attendance,
                api_get_session_attendance,
                api_get_student_attendance,
                api_get_student_stats,
                api_get_class_attendance,
                api_get_teacher_students,
                api_delete_attendance,
            ],
        )
        .register(
            "/api",
            catchers![unauthorized_api, forbidden_api, not_found_api, unprocessable_api],
        )
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
}
