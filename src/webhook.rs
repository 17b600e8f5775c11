use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{info, warn};
use rand::RngCore;
use sea_orm::{DatabaseConnection, EntityTrait, Set};
use serde::Serialize;

use crate::entity::{post, sys_config};
use crate::error::{db_error, AppError};
use crate::response::to_rfc3339;
use crate::sys_config as sys_config_store;

/// Generates the webhook signing token on first start.
pub async fn init_token(db: &DatabaseConnection) -> Result<(), AppError> {
    let token = sys_config_store::get_string(db, sys_config_store::WEB_HOOK_TOKEN)
        .await
        .map_err(db_error)?;
    if token.as_deref().map(|t| !t.is_empty()).unwrap_or(false) {
        return Ok(());
    }
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let active = sys_config::ActiveModel {
        key: Set(sys_config_store::WEB_HOOK_TOKEN.to_string()),
        value: Set(Some(STANDARD.encode(bytes))),
        ..Default::default()
    };
    sys_config::Entity::update(active).exec(db).await.map_err(db_error)?;
    info!("webhook token generated");
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishPayload {
    event: &'static str,
    id: i32,
    slug: String,
    title: String,
    url: String,
    published_at: Option<String>,
}

/// Tells the front end a post went live so it can revalidate cached pages.
/// Runs detached; failures only reach the log.
pub fn notify_published(db: DatabaseConnection, post_id: i32) {
    actix_web::rt::spawn(async move {
        if let Err(e) = notify(&db, post_id).await {
            warn!("publish webhook for post {} failed: {}", post_id, e);
        }
    });
}

async fn notify(db: &DatabaseConnection, post_id: i32) -> Result<(), AppError> {
    let url = sys_config_store::get_string(db, sys_config_store::WEB_HOOK_URL)
        .await
        .map_err(db_error)?
        .unwrap_or_default();
    if url.is_empty() {
        return Ok(());
    }
    let token = sys_config_store::get_string(db, sys_config_store::WEB_HOOK_TOKEN)
        .await
        .map_err(db_error)?
        .unwrap_or_default();
    let domain = sys_config_store::get_string(db, sys_config_store::DOMAIN)
        .await
        .map_err(db_error)?
        .unwrap_or_default();

    let item = post::Entity::find_by_id(post_id)
        .one(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::fail("post not found"))?;

    let payload = PublishPayload {
        event: "post.published",
        id: item.id,
        url: format!("{}/article/{}", domain.trim_end_matches('/'), item.slug),
        slug: item.slug,
        title: item.title,
        published_at: item.published_at.map(to_rfc3339),
    };

    let client = reqwest::Client::new();
    let mut req = client.post(url).json(&payload);
    if !token.is_empty() {
        req = req.header("token", token);
    }
    let resp = req.send().await.map_err(|e| AppError::fail(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(AppError::fail(format!("webhook responded {}", resp.status())));
    }
    Ok(())
}
