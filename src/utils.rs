use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;

use crate::openapi::ErrorResponse;

// 错误提示文案
pub mod messages {
    pub const NOT_FOUND: &str = "We could not find what you're looking for :/";
    pub const UNAUTHORIZED: &str = "401 Unauthorized";
    pub const ACCESS_PROHIBITED: &str =
        "You do not have permission to access this resource. Please contact your administrator for assistance.";
    pub const ID_TAKEN: &str = "Uh-oh! This id is already registered. Please choose another id string.";
    pub const INVALID_ID: &str = "Only alphanumeric characters and underscores are allowed in the id";

    pub fn default_error(err: impl std::fmt::Display) -> String {
        let err = err.to_string();
        if err.is_empty() {
            "Something went wrong :/".to_string()
        } else {
            format!("[ERROR: {}]", err)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    /// 记录不存在，与无权限一样返回 401，避免泄露存在性
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    /// 工具源码加载失败
    #[error("{0}")]
    LoadFailure(String),
    #[error("database error")]
    DatabaseError,
    #[error("internal server error")]
    InternalServerError,
}

impl AppError {
    pub fn not_found() -> Self {
        AppError::NotFound(messages::NOT_FOUND.to_string())
    }

    pub fn unauthorized() -> Self {
        AppError::Unauthorized(messages::UNAUTHORIZED.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) | AppError::LoadFailure(_) => StatusCode::BAD_REQUEST,
            AppError::DatabaseError | AppError::InternalServerError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        error!("database error: {}", err);
        AppError::DatabaseError
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// 工具ID必须是合法标识符：字母或下划线开头，后跟字母、数字或下划线
pub fn is_valid_tool_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

// 丢弃值为 null 的字段，null 与缺省等价
pub fn strip_nulls(form: Map<String, Value>) -> Map<String, Value> {
    form.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_tool_ids() {
        assert!(is_valid_tool_id("calc"));
        assert!(is_valid_tool_id("Calc"));
        assert!(is_valid_tool_id("_private_tool"));
        assert!(is_valid_tool_id("web_search2"));
    }

    #[test]
    fn test_invalid_tool_ids() {
        assert!(!is_valid_tool_id(""));
        assert!(!is_valid_tool_id("9bad!"));
        assert!(!is_valid_tool_id("9bad"));
        assert!(!is_valid_tool_id("has-dash"));
        assert!(!is_valid_tool_id("has space"));
        assert!(!is_valid_tool_id("server:0"));
    }

    #[test]
    fn test_strip_nulls_drops_only_null_values() {
        let form = json!({"a": 1, "b": null, "c": "", "d": false})
            .as_object()
            .cloned()
            .unwrap();

        let stripped = strip_nulls(form);
        assert_eq!(stripped.len(), 3);
        assert!(!stripped.contains_key("b"));
        assert_eq!(stripped["c"], json!(""));
        assert_eq!(stripped["d"], json!(false));
    }

    #[test]
    fn test_not_found_maps_to_unauthorized_status() {
        assert_eq!(AppError::not_found().status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::unauthorized().status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::LoadFailure("boom".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::DatabaseError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_default_error_message() {
        assert_eq!(messages::default_error(""), "Something went wrong :/");
        assert_eq!(messages::default_error("bad input"), "[ERROR: bad input]");
    }
}
