use chrono::{NaiveDateTime, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::attendance::{
    AttendanceEntry, class_attendance, mark_attendance, mark_bulk_attendance, session_attendance,
    session_roster, student_history, student_stats, teacher_students_with_stats,
};
use crate::auth::{Permission, Role, SESSION_COOKIE, User, UserSession};
use crate::db::{
    authenticate_user, create_class, create_session, create_student, create_subject, create_user,
    create_user_session, delete_attendance, delete_class, delete_session, delete_student,
    delete_subject, get_all_classes, get_all_subjects, get_all_users, get_attendance, get_class, get_session,
    get_sessions, get_student, get_students, get_subject, get_user, invalidate_session,
    update_class, update_session, update_student, update_subject,
};
use crate::models::{
    Attendance, AttendanceRecord, AttendanceStats, AttendanceStatus, Class, SessionSummary,
    Student, StudentWithStats, Subject,
};
use crate::validation::{
    AppErrorExt, JsonValidateExt, ValidationResponse, parse_date_window,
};

type ApiError = Custom<Json<ValidationResponse>>;
type ApiResult<T> = Result<T, ApiError>;

const SESSION_HOURS: i64 = 1;

// Auth

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "A valid email is required"))]
    email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role.to_string(),
        }
    }
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<LoginResponse>> {
    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.email, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + chrono::Duration::hours(SESSION_HOURS);

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            cookies.add_private(
                Cookie::build((SESSION_COOKIE, token))
                    .same_site(SameSite::Lax)
                    .http_only(true)
                    .max_age(rocket::time::Duration::hours(SESSION_HOURS)),
            );

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid email or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(e) = invalidate_session(db, &token).await {
            e.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));
    Status::NoContent
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[derive(Deserialize, Validate)]
pub struct UserRegistrationRequest {
    #[validate(email(message = "A valid email is required"))]
    email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    first_name: String,
    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    last_name: String,
    role: String,
}

#[post("/users", data = "<registration>")]
pub async fn api_register_user(
    registration: Json<UserRegistrationRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<UserData>>> {
    user.require_permission(Permission::RegisterUsers)
        .validate_custom()?;
    let validated = registration.validate_custom()?;

    let role = Role::parse(&validated.role).map_err(|_| {
        Custom(
            Status::UnprocessableEntity,
            Json(ValidationResponse::with_error(
                "role",
                "Role must be ADMIN or TEACHER",
            )),
        )
    })?;

    let id = create_user(
        db,
        &validated.email,
        &validated.password,
        role,
        &validated.first_name,
        &validated.last_name,
    )
    .await
    .validate_custom()?;

    let created = get_user(db, id).await.validate_custom()?;
    Ok(Custom(Status::Created, Json(UserData::from(created))))
}

#[get("/users")]
pub async fn api_get_users(user: User, db: &State<Pool<Sqlite>>) -> ApiResult<Json<Vec<UserData>>> {
    user.require_permission(Permission::RegisterUsers)
        .validate_custom()?;

    let users = get_all_users(db).await.validate_custom()?;
    Ok(Json(users.into_iter().map(UserData::from).collect()))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

// Classes

#[derive(Deserialize, Validate)]
pub struct ClassRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    name: String,
}

#[derive(Serialize, Deserialize)]
pub struct ClassDetail {
    #[serde(flatten)]
    pub class: Class,
    pub students: Vec<Student>,
    pub sessions: Vec<SessionSummary>,
}

#[get("/classes")]
pub async fn api_get_classes(user: User, db: &State<Pool<Sqlite>>) -> ApiResult<Json<Vec<Class>>> {
    user.require_permission(Permission::ViewReferenceData)
        .validate_custom()?;
    Ok(Json(get_all_classes(db).await.validate_custom()?))
}

#[get("/classes/<id>")]
pub async fn api_get_class(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<ClassDetail>> {
    user.require_permission(Permission::ViewReferenceData)
        .validate_custom()?;

    let class = get_class(db, id).await.validate_custom()?;
    let students = get_students(db, Some(id)).await.validate_custom()?;
    let sessions = get_sessions(db, Some(id)).await.validate_custom()?;

    Ok(Json(ClassDetail {
        class,
        students,
        sessions,
    }))
}

#[post("/classes", data = "<request>")]
pub async fn api_create_class(
    request: Json<ClassRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<Class>>> {
    user.require_permission(Permission::ManageClasses)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    let id = create_class(db, &validated.name).await.validate_custom()?;
    let class = get_class(db, id).await.validate_custom()?;
    Ok(Custom(Status::Created, Json(class)))
}

#[put("/classes/<id>", data = "<request>")]
pub async fn api_update_class(
    id: i64,
    request: Json<ClassRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Class>> {
    user.require_permission(Permission::ManageClasses)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    update_class(db, id, &validated.name).await.validate_custom()?;
    Ok(Json(get_class(db, id).await.validate_custom()?))
}

#[delete("/classes/<id>")]
pub async fn api_delete_class(id: i64, user: User, db: &State<Pool<Sqlite>>) -> ApiResult<Status> {
    user.require_permission(Permission::ManageClasses)
        .validate_custom()?;
    delete_class(db, id).await.validate_custom()?;
    Ok(Status::NoContent)
}

// Subjects

#[derive(Deserialize, Validate)]
pub struct SubjectRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    name: String,
}

#[get("/subjects")]
pub async fn api_get_subjects(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<Subject>>> {
    user.require_permission(Permission::ViewReferenceData)
        .validate_custom()?;
    Ok(Json(get_all_subjects(db).await.validate_custom()?))
}

#[get("/subjects/<id>")]
pub async fn api_get_subject(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Subject>> {
    user.require_permission(Permission::ViewReferenceData)
        .validate_custom()?;
    Ok(Json(get_subject(db, id).await.validate_custom()?))
}

#[post("/subjects", data = "<request>")]
pub async fn api_create_subject(
    request: Json<SubjectRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<Subject>>> {
    user.require_permission(Permission::ManageSubjects)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    let id = create_subject(db, &validated.name).await.validate_custom()?;
    let subject = get_subject(db, id).await.validate_custom()?;
    Ok(Custom(Status::Created, Json(subject)))
}

#[put("/subjects/<id>", data = "<request>")]
pub async fn api_update_subject(
    id: i64,
    request: Json<SubjectRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Subject>> {
    user.require_permission(Permission::ManageSubjects)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    update_subject(db, id, &validated.name)
        .await
        .validate_custom()?;
    Ok(Json(get_subject(db, id).await.validate_custom()?))
}

#[delete("/subjects/<id>")]
pub async fn api_delete_subject(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    user.require_permission(Permission::ManageSubjects)
        .validate_custom()?;
    delete_subject(db, id).await.validate_custom()?;
    Ok(Status::NoContent)
}

// Students

#[derive(Deserialize, Validate)]
pub struct StudentRequest {
    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    first_name: String,
    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    last_name: String,
    #[validate(email(message = "Email must be valid"))]
    email: Option<String>,
    class_id: i64,
}

#[get("/students?<class_id>")]
pub async fn api_get_students(
    class_id: Option<i64>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<Student>>> {
    user.require_permission(Permission::ViewReferenceData)
        .validate_custom()?;
    Ok(Json(get_students(db, class_id).await.validate_custom()?))
}

#[get("/students/<id>")]
pub async fn api_get_student(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Student>> {
    user.require_permission(Permission::ViewReferenceData)
        .validate_custom()?;
    Ok(Json(get_student(db, id).await.validate_custom()?))
}

#[post("/students", data = "<request>")]
pub async fn api_create_student(
    request: Json<StudentRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<Student>>> {
    user.require_permission(Permission::ManageStudents)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    let id = create_student(
        db,
        &validated.first_name,
        &validated.last_name,
        validated.email.as_deref(),
        validated.class_id,
    )
    .await
    .validate_custom()?;
    let student = get_student(db, id).await.validate_custom()?;
    Ok(Custom(Status::Created, Json(student)))
}

#[put("/students/<id>", data = "<request>")]
pub async fn api_update_student(
    id: i64,
    request: Json<StudentRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Student>> {
    user.require_permission(Permission::ManageStudents)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    update_student(
        db,
        id,
        &validated.first_name,
        &validated.last_name,
        validated.email.as_deref(),
        validated.class_id,
    )
    .await
    .validate_custom()?;
    Ok(Json(get_student(db, id).await.validate_custom()?))
}

#[delete("/students/<id>")]
pub async fn api_delete_student(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    user.require_permission(Permission::ManageStudents)
        .validate_custom()?;
    delete_student(db, id).await.validate_custom()?;
    Ok(Status::NoContent)
}

// Sessions

#[derive(Deserialize, Validate)]
pub struct SessionRequest {
    date: NaiveDateTime,
    class_id: i64,
    subject_id: i64,
    teacher_id: i64,
}

#[derive(Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: SessionSummary,
    pub students: Vec<Student>,
    pub attendances: Vec<AttendanceRecord>,
}

#[get("/sessions?<class_id>")]
pub async fn api_get_sessions(
    class_id: Option<i64>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<SessionSummary>>> {
    user.require_permission(Permission::ViewReferenceData)
        .validate_custom()?;
    Ok(Json(get_sessions(db, class_id).await.validate_custom()?))
}

#[get("/sessions/<id>")]
pub async fn api_get_session(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<SessionDetail>> {
    user.require_permission(Permission::ViewReferenceData)
        .validate_custom()?;

    let session = get_session(db, id).await.validate_custom()?;
    let roster = session_roster(db, id).await.validate_custom()?;
    let attendances = session_attendance(db, id).await.validate_custom()?;

    Ok(Json(SessionDetail {
        session,
        students: roster.students,
        attendances,
    }))
}

#[post("/sessions", data = "<request>")]
pub async fn api_create_session(
    request: Json<SessionRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<SessionSummary>>> {
    user.require_permission(Permission::ManageSessions)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    let id = create_session(
        db,
        validated.date,
        validated.class_id,
        validated.subject_id,
        validated.teacher_id,
    )
    .await
    .validate_custom()?;
    let session = get_session(db, id).await.validate_custom()?;
    Ok(Custom(Status::Created, Json(session)))
}

#[put("/sessions/<id>", data = "<request>")]
pub async fn api_update_session(
    id: i64,
    request: Json<SessionRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<SessionSummary>> {
    user.require_permission(Permission::ManageSessions)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    update_session(
        db,
        id,
        validated.date,
        validated.class_id,
        validated.subject_id,
        validated.teacher_id,
    )
    .await
    .validate_custom()?;
    Ok(Json(get_session(db, id).await.validate_custom()?))
}

#[delete("/sessions/<id>")]
pub async fn api_delete_session(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    user.require_permission(Permission::ManageSessions)
        .validate_custom()?;
    delete_session(db, id).await.validate_custom()?;
    Ok(Status::NoContent)
}

// Attendance

#[derive(Deserialize, Validate)]
pub struct MarkAttendanceRequest {
    session_id: i64,
    student_id: i64,
    status: AttendanceStatus,
    #[validate(length(max = 500, message = "Comment must be at most 500 characters"))]
    comment: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct BulkAttendanceRequest {
    session_id: i64,
    #[validate(
        length(min = 1, message = "At least one attendance entry is required"),
        nested
    )]
    attendances: Vec<AttendanceEntry>,
}

#[post("/attendance", data = "<request>")]
pub async fn api_mark_attendance(
    request: Json<MarkAttendanceRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<Attendance>>> {
    user.require_permission(Permission::MarkAttendance)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    let entry = AttendanceEntry {
        student_id: validated.student_id,
        status: validated.status,
        comment: validated.comment,
    };

    let record = mark_attendance(db, validated.session_id, entry)
        .await
        .validate_custom()?;
    Ok(Custom(Status::Created, Json(record)))
}

#[post("/attendance/bulk", data = "<request>")]
pub async fn api_mark_bulk_attendance(
    request: Json<BulkAttendanceRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<Vec<Attendance>>>> {
    user.require_permission(Permission::MarkAttendance)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    let records = mark_bulk_attendance(db, validated.session_id, &validated.attendances)
        .await
        .validate_custom()?;
    Ok(Custom(Status::Created, Json(records)))
}

#[get("/attendance/session/<session_id>")]
pub async fn api_get_session_attendance(
    session_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<AttendanceRecord>>> {
    user.require_permission(Permission::ViewAttendance)
        .validate_custom()?;
    Ok(Json(
        session_attendance(db, session_id).await.validate_custom()?,
    ))
}

#[get("/attendance/student/<student_id>?<start_date>&<end_date>")]
pub async fn api_get_student_attendance(
    student_id: i64,
    start_date: Option<&str>,
    end_date: Option<&str>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<AttendanceRecord>>> {
    user.require_permission(Permission::ViewAttendance)
        .validate_custom()?;
    let window = parse_date_window(start_date, end_date).validate_custom()?;

    Ok(Json(
        student_history(db, student_id, window)
            .await
            .validate_custom()?,
    ))
}

#[get("/attendance/student/<student_id>/stats?<start_date>&<end_date>")]
pub async fn api_get_student_stats(
    student_id: i64,
    start_date: Option<&str>,
    end_date: Option<&str>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<AttendanceStats>> {
    user.require_permission(Permission::ViewAttendance)
        .validate_custom()?;
    let window = parse_date_window(start_date, end_date).validate_custom()?;

    Ok(Json(
        student_stats(db, student_id, window)
            .await
            .validate_custom()?,
    ))
}

#[get("/attendance/class/<class_id>?<start_date>&<end_date>")]
pub async fn api_get_class_attendance(
    class_id: i64,
    start_date: Option<&str>,
    end_date: Option<&str>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<AttendanceRecord>>> {
    user.require_permission(Permission::ViewAttendance)
        .validate_custom()?;
    let window = parse_date_window(start_date, end_date).validate_custom()?;

    Ok(Json(
        class_attendance(db, class_id, window)
            .await
            .validate_custom()?,
    ))
}

#[get("/attendance/teacher/<teacher_id>/students")]
pub async fn api_get_teacher_students(
    teacher_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<StudentWithStats>>> {
    user.require_permission(Permission::ViewAttendance)
        .validate_custom()?;
    if user.id != teacher_id {
        user.require_permission(Permission::ViewAllTeacherRosters)
            .validate_custom()?;
    }

    Ok(Json(
        teacher_students_with_stats(db, teacher_id)
            .await
            .validate_custom()?,
    ))
}

#[get("/attendance/<id>")]
pub async fn api_get_attendance(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Attendance>> {
    user.require_permission(Permission::ViewAttendance)
        .validate_custom()?;
    Ok(Json(get_attendance(db, id).await.validate_custom()?))
}

#[delete("/attendance/<id>")]
pub async fn api_delete_attendance(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    user.require_permission(Permission::DeleteAttendance)
        .validate_custom()?;
    delete_attendance(db, id).await.validate_custom()?;
    Ok(Status::NoContent)
}
