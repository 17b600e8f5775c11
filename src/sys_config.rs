use sea_orm::{DatabaseConnection, EntityTrait};

use crate::entity::sys_config;

pub const OPEN_REGISTER: &str = "OPEN_REGISTER";
pub const WEBSITE_TITLE: &str = "WEBSITE_TITLE";
pub const WEBSITE_DESCRIPTION: &str = "WEBSITE_DESCRIPTION";
pub const OPEN_COMMENT: &str = "OPEN_COMMENT";
pub const COMMENT_APPROVED: &str = "COMMENT_APPROVED";
pub const DOMAIN: &str = "DOMAIN";
pub const STORAGE_TYPE: &str = "STORAGE_TYPE";
pub const AWSS3_PARAM: &str = "AWSS3_PARAM";
pub const WEB_HOOK_URL: &str = "WEB_HOOK_URL";
pub const WEB_HOOK_TOKEN: &str = "WEB_HOOK_TOKEN";

/// Keys readable without logging in.
pub const FRONT_KEYS: [&str; 5] = [OPEN_REGISTER, WEBSITE_TITLE, WEBSITE_DESCRIPTION, OPEN_COMMENT, DOMAIN];

pub async fn get_string(db: &DatabaseConnection, key: &str) -> Result<Option<String>, sea_orm::DbErr> {
    let config = sys_config::Entity::find_by_id(key.to_string())
        .one(db)
        .await?;
    Ok(config.map(effective_value))
}

pub async fn get_boolean(db: &DatabaseConnection, key: &str) -> Result<bool, sea_orm::DbErr> {
    let value = get_string(db, key).await?;
    Ok(value.unwrap_or_default().to_lowercase() == "true")
}

/// A set value wins over the default; empty strings count as unset.
pub fn effective_value(model: sys_config::Model) -> String {
    match model.value {
        Some(v) if !v.is_empty() => v,
        _ => model.default_value.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(value: Option<&str>, default_value: Option<&str>) -> sys_config::Model {
        sys_config::Model {
            key: "K".to_string(),
            value: value.map(str::to_string),
            default_value: default_value.map(str::to_string),
        }
    }

    #[test]
    fn set_value_overrides_default() {
        assert_eq!(effective_value(model(Some("false"), Some("true"))), "false");
        assert_eq!(effective_value(model(Some(""), Some("true"))), "true");
        assert_eq!(effective_value(model(None, None)), "");
    }

    #[actix_web::test]
    async fn seeded_defaults_are_readable() {
        let db = crate::test_support::memory_db().await;
        assert!(get_boolean(&db, OPEN_COMMENT).await.unwrap());
        assert_eq!(get_string(&db, STORAGE_TYPE).await.unwrap().as_deref(), Some("LOCAL"));
        assert_eq!(get_string(&db, "MISSING").await.unwrap(), None);
    }
}
