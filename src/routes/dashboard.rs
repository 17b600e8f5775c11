use actix_web::{web, HttpResponse};
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::auth::StaffUser;
use crate::entity::{STATUS_DRAFT, STATUS_PUBLISHED};
use crate::error::AppError;
use crate::response::ok;
use crate::sql::query_count;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/stats").route(web::post().to(stats)));
}

#[derive(Serialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub published_posts: i64,
    pub draft_posts: i64,
    pub pending_comments: i64,
    pub active_subscribers: i64,
    pub videos: i64,
    pub opinions: i64,
}

async fn stats(db: web::Data<DatabaseConnection>, _staff: StaffUser) -> Result<HttpResponse, AppError> {
    Ok(ok(collect_stats(db.get_ref()).await?))
}

pub async fn collect_stats(db: &DatabaseConnection) -> Result<DashboardStats, AppError> {
    Ok(DashboardStats {
        published_posts: query_count(
            db,
            "select count(1) as cnt from t_post where status = ?",
            vec![STATUS_PUBLISHED.into()],
        )
        .await?,
        draft_posts: query_count(
            db,
            "select count(1) as cnt from t_post where status = ?",
            vec![STATUS_DRAFT.into()],
        )
        .await?,
        pending_comments: query_count(db, "select count(1) as cnt from t_comment where approved = 0", vec![]).await?,
        active_subscribers: query_count(
            db,
            "select count(1) as cnt from t_newsletter_subscriber where is_active = 1",
            vec![],
        )
        .await?,
        videos: query_count(db, "select count(1) as cnt from t_video", vec![]).await?,
        opinions: query_count(db, "select count(1) as cnt from t_opinion", vec![]).await?,
    })
}
