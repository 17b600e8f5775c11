pub mod advertisement;
pub mod category;
pub mod comment;
pub mod newsletter_subscriber;
pub mod opinion;
pub mod post;
pub mod post_tag;
pub mod profile;
pub mod resource;
pub mod subcategory;
pub mod sys_config;
pub mod tag;
pub mod video;

pub const STATUS_DRAFT: &str = "DRAFT";
pub const STATUS_PUBLISHED: &str = "PUBLISHED";

/// Normalizes a client supplied publish status, defaulting to draft.
pub fn parse_status(input: Option<&str>) -> &'static str {
    match input.map(|s| s.trim().to_ascii_uppercase()) {
        Some(s) if s == STATUS_PUBLISHED => STATUS_PUBLISHED,
        _ => STATUS_DRAFT,
    }
}
