use crate::error::AppError;
use crate::models::DateWindow;
use chrono::NaiveDate;
use rocket::response::status::Custom;
use rocket::http::Status;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::instrument;
use validator::Validate;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ValidationResponse {
    pub status: String,
    pub errors: HashMap<String, Vec<String>>,
}

impl ValidationResponse {
    pub fn new(errors: HashMap<String, Vec<String>>) -> Self {
        Self {
            status: "error".to_string(),
            errors,
        }
    }

    pub fn with_error(field: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self::new(errors)
    }
}

pub trait ToValidationResponse {
    fn to_validation_response(self) -> Custom<Json<ValidationResponse>>;
}

impl ToValidationResponse for AppError {
    #[instrument]
    fn to_validation_response(self) -> Custom<Json<ValidationResponse>> {
        self.log_and_record("API Validation Error");
        let status = self.status_code();

        let (field, message) = match &self {
            AppError::SessionNotFound(_) => ("session_id", self.to_string()),
            AppError::StudentNotInRoster { .. } => ("student_id", self.to_string()),
            AppError::RecordNotFound(_) => ("attendance", self.to_string()),
            AppError::ConstraintViolation(msg) => {
                ("resource", format!("Conflicts with existing data: {}", msg))
            }
            AppError::Database(_) => ("database", "Database error".to_string()),
            AppError::Authentication(msg) => {
                ("authentication", format!("Authentication error: {}", msg))
            }
            AppError::Authorization(msg) => ("permission", format!("Permission denied: {}", msg)),
            AppError::NotFound(msg) => ("resource", format!("Not found: {}", msg)),
            AppError::Validation(msg) => ("request", msg.clone()),
            AppError::Internal(_) => ("server", "Internal server error".to_string()),
        };

        Custom(status, Json(ValidationResponse::with_error(field, &message)))
    }
}

impl From<validator::ValidationErrors> for ValidationResponse {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut error_map = HashMap::new();
        collect_field_errors(&errors, "", &mut error_map);
        Self::new(error_map)
    }
}

fn collect_field_errors(
    errors: &validator::ValidationErrors,
    prefix: &str,
    out: &mut HashMap<String, Vec<String>>,
) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };

        match kind {
            validator::ValidationErrorsKind::Field(field_errors) => {
                let messages = field_errors
                    .iter()
                    .map(|error| {
                        error
                            .message
                            .clone()
                            .unwrap_or_else(|| "Invalid value".into())
                            .to_string()
                    })
                    .collect();
                out.insert(path, messages);
            }
            validator::ValidationErrorsKind::Struct(nested) => {
                collect_field_errors(nested, &path, out);
            }
            validator::ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_field_errors(nested, &format!("{}[{}]", path, index), out);
                }
            }
        }
    }
}

pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, Custom<Json<ValidationResponse>>>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_custom(self) -> Result<T, Custom<Json<ValidationResponse>>> {
        let inner = self.into_inner();
        match inner.validate() {
            Ok(()) => Ok(inner),
            Err(errors) => {
                tracing::warn!(errors = %errors, "Request validation failed");
                Err(Custom(
                    Status::UnprocessableEntity,
                    Json(ValidationResponse::from(errors)),
                ))
            }
        }
    }
}

pub trait AppErrorExt<T> {
    fn validate_custom(self) -> Result<T, Custom<Json<ValidationResponse>>>;
}

impl<T> AppErrorExt<T> for Result<T, AppError> {
    fn validate_custom(self) -> Result<T, Custom<Json<ValidationResponse>>> {
        self.map_err(|e| e.to_validation_response())
    }
}

fn parse_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            NaiveDate::parse_from_str(v.trim(), DATE_FORMAT).map_err(|_| {
                AppError::Validation(format!("{} must be a date formatted as YYYY-MM-DD", field))
            })
        })
        .transpose()
}

/// Builds an inclusive date window from optional `start_date`/`end_date` query values.
pub fn parse_date_window(
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<DateWindow, AppError> {
    let start = parse_date("start_date", start_date)?;
    let end = parse_date("end_date", end_date)?;

    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(AppError::Validation(
                "start_date must not be after end_date".to_string(),
            ));
        }
    }

    Ok(DateWindow::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_accepts_open_bounds() {
        let window = parse_date_window(None, Some("2024-03-31")).unwrap();
        assert_eq!(window.start, None);
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2024, 3, 31));

        let window = parse_date_window(Some(""), None).unwrap();
        assert_eq!(window, DateWindow::default());
    }

    #[test]
    fn window_rejects_malformed_and_inverted_dates() {
        assert!(matches!(
            parse_date_window(Some("03/01/2024"), None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            parse_date_window(Some("2024-04-01"), Some("2024-03-01")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn denied_permission_becomes_forbidden_response() {
        let Custom(status, Json(body)) =
            AppError::Authorization("TEACHER may not ManageClasses".to_string())
                .to_validation_response();

        assert_eq!(status, Status::Forbidden);
        assert_eq!(body.status, "error");
        assert!(body.errors["permission"][0].contains("ManageClasses"));
    }

    #[test]
    fn roster_and_lookup_errors_keep_their_status() {
        let Custom(status, Json(body)) = AppError::StudentNotInRoster {
            student_id: 4,
            session_id: 9,
        }
        .to_validation_response();
        assert_eq!(status, Status::BadRequest);
        assert!(body.errors.contains_key("student_id"));

        let Custom(status, _) = AppError::SessionNotFound(9).to_validation_response();
        assert_eq!(status, Status::NotFound);

        let Custom(status, _) =
            AppError::ConstraintViolation("UNIQUE constraint failed".to_string())
                .to_validation_response();
        assert_eq!(status, Status::Conflict);
    }
}
