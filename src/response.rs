use actix_web::{error::JsonPayloadError, HttpRequest, HttpResponse};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const MAX_PAGE_SIZE: u64 = 100;

#[derive(Serialize)]
pub struct ResponseDto<T: Serialize> {
    pub data: Option<T>,
    pub code: i32,
    pub msg: String,
}

impl<T: Serialize> ResponseDto<T> {
    pub fn success(data: Option<T>) -> Self {
        Self {
            data,
            code: 0,
            msg: "".to_string(),
        }
    }
}

/// Shorthand for a successful JSON envelope.
pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(ResponseDto::success(Some(data)))
}

pub fn ok_empty() -> HttpResponse {
    HttpResponse::Ok().json(ResponseDto::<()>::success(None))
}

#[derive(Deserialize, Clone, Copy, Default)]
pub struct PageRequest {
    pub page: Option<u64>,
    pub size: Option<u64>,
}

impl PageRequest {
    /// Zero-based page index for sea-orm paginators.
    pub fn index(&self) -> u64 {
        self.page.unwrap_or(1).max(1) - 1
    }

    pub fn size(&self) -> u64 {
        self.size.unwrap_or(20).clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T: Serialize> {
    pub total: u64,
    pub total_page: u64,
    pub list: Vec<T>,
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let app_err = match err {
        JsonPayloadError::ContentType => AppError::param_error("unsupported content type"),
        JsonPayloadError::Deserialize(e) => AppError::param_error(format!("invalid request body: {}", e)),
        _ => AppError::param_error("invalid request body"),
    };
    app_err.into()
}

pub fn response_from_error(err: &AppError) -> HttpResponse {
    HttpResponse::Ok().json(ResponseDto::<()> {
        data: None,
        code: err.code(),
        msg: err.msg().to_string(),
    })
}

pub fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, false)
}
