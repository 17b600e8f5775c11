use crate::error::AppError;

pub mod ad;
pub mod category;
pub mod comment;
pub mod cors;
pub mod dashboard;
pub mod newsletter;
pub mod opinion;
pub mod post;
pub mod resource;
pub mod rss;
pub mod sys_config;
pub mod tag;
pub mod user;
pub mod video;

/// Trimmed value, `None` when missing or blank.
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn required(value: &Option<String>, field: &str) -> Result<String, AppError> {
    non_blank(value)
        .map(str::to_string)
        .ok_or_else(|| AppError::param_error(format!("{} is required", field)))
}
