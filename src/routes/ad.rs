use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};

use crate::auth::StaffUser;
use crate::entity::advertisement;
use crate::error::{db_error, AppError};
use crate::response::{ok, ok_empty, to_rfc3339};
use crate::routes::{non_blank, required};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/active").route(web::post().to(active)))
        .service(web::resource("/list").route(web::post().to(list)))
        .service(web::resource("/save").route(web::post().to(save)))
        .service(web::resource("/update").route(web::post().to(update)))
        .service(web::resource("/remove").route(web::post().to(remove)));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Header,
    Sidebar,
    InArticle,
    Footer,
}

impl Position {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().as_str() {
            "HEADER" => Some(Self::Header),
            "SIDEBAR" => Some(Self::Sidebar),
            "IN_ARTICLE" => Some(Self::InArticle),
            "FOOTER" => Some(Self::Footer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Header => "HEADER",
            Self::Sidebar => "SIDEBAR",
            Self::InArticle => "IN_ARTICLE",
            Self::Footer => "FOOTER",
        }
    }
}

/// Whether the ad should be served at `now`. Open-ended windows are allowed on either side.
pub fn is_running(ad: &advertisement::Model, now: DateTime<Utc>) -> bool {
    ad.is_active && ad.starts_at.map_or(true, |s| s <= now) && ad.ends_at.map_or(true, |e| now < e)
}

#[derive(Deserialize)]
struct PositionQuery {
    position: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveAdRequest {
    id: Option<i32>,
    title: Option<String>,
    image_url: Option<String>,
    link_url: Option<String>,
    position: Option<String>,
    is_active: Option<bool>,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    sort_order: Option<i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdDto {
    id: i32,
    title: String,
    image_url: String,
    link_url: Option<String>,
    position: String,
    is_active: bool,
    starts_at: Option<String>,
    ends_at: Option<String>,
    sort_order: i32,
}

impl From<advertisement::Model> for AdDto {
    fn from(a: advertisement::Model) -> Self {
        Self {
            id: a.id,
            title: a.title,
            image_url: a.image_url,
            link_url: a.link_url,
            position: a.position,
            is_active: a.is_active,
            starts_at: a.starts_at.map(to_rfc3339),
            ends_at: a.ends_at.map(to_rfc3339),
            sort_order: a.sort_order,
        }
    }
}

#[derive(Deserialize)]
struct IdQuery {
    id: i32,
}

async fn active(
    db: web::Data<DatabaseConnection>,
    query: web::Query<PositionQuery>,
) -> Result<HttpResponse, AppError> {
    let position = Position::parse(&query.position).ok_or_else(|| AppError::param_error("unknown ad position"))?;
    let rows = advertisement::Entity::find()
        .filter(advertisement::Column::Position.eq(position.as_str()))
        .filter(advertisement::Column::IsActive.eq(true))
        .order_by_asc(advertisement::Column::SortOrder)
        .order_by_asc(advertisement::Column::Id)
        .all(db.get_ref())
        .await
        .map_err(db_error)?;

    let now = Utc::now();
    let list = rows
        .into_iter()
        .filter(|a| is_running(a, now))
        .map(AdDto::from)
        .collect::<Vec<_>>();
    Ok(ok(list))
}

async fn list(db: web::Data<DatabaseConnection>, _staff: StaffUser) -> Result<HttpResponse, AppError> {
    let rows = advertisement::Entity::find()
        .order_by_asc(advertisement::Column::Position)
        .order_by_asc(advertisement::Column::SortOrder)
        .order_by_asc(advertisement::Column::Id)
        .all(db.get_ref())
        .await
        .map_err(db_error)?;
    Ok(ok(rows.into_iter().map(AdDto::from).collect::<Vec<_>>()))
}

async fn save(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SaveAdRequest>,
) -> Result<HttpResponse, AppError> {
    let title = required(&payload.title, "title")?;
    let image_url = required(&payload.image_url, "imageUrl")?;
    let position = payload
        .position
        .as_deref()
        .and_then(Position::parse)
        .ok_or_else(|| AppError::param_error("unknown ad position"))?;
    check_window(payload.starts_at, payload.ends_at)?;

    let now = Utc::now();
    let inserted = advertisement::ActiveModel {
        title: Set(title),
        image_url: Set(image_url),
        link_url: Set(payload.link_url.clone()),
        position: Set(position.as_str().to_string()),
        is_active: Set(payload.is_active.unwrap_or(true)),
        starts_at: Set(payload.starts_at),
        ends_at: Set(payload.ends_at),
        sort_order: Set(payload.sort_order.unwrap_or(0)),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    }
    .insert(db.get_ref())
    .await
    .map_err(db_error)?;
    Ok(ok(inserted.id))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SaveAdRequest>,
) -> Result<HttpResponse, AppError> {
    let id = payload.id.ok_or_else(|| AppError::param_error("id is required"))?;
    let exist = advertisement::Entity::find_by_id(id)
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::fail("ad not found"))?;

    let starts_at = payload.starts_at.or(exist.starts_at);
    let ends_at = payload.ends_at.or(exist.ends_at);
    check_window(starts_at, ends_at)?;

    let mut active: advertisement::ActiveModel = exist.into();
    if let Some(title) = non_blank(&payload.title) {
        active.title = Set(title.to_string());
    }
    if let Some(url) = non_blank(&payload.image_url) {
        active.image_url = Set(url.to_string());
    }
    if let Some(link) = payload.link_url.clone() {
        active.link_url = Set(Some(link));
    }
    if let Some(raw) = payload.position.as_deref() {
        let position = Position::parse(raw).ok_or_else(|| AppError::param_error("unknown ad position"))?;
        active.position = Set(position.as_str().to_string());
    }
    if let Some(v) = payload.is_active {
        active.is_active = Set(v);
    }
    if let Some(v) = payload.sort_order {
        active.sort_order = Set(v);
    }
    active.starts_at = Set(starts_at);
    active.ends_at = Set(ends_at);
    active.updated = Set(Some(Utc::now()));
    active.update(db.get_ref()).await.map_err(db_error)?;
    Ok(ok_empty())
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, AppError> {
    advertisement::Entity::delete_by_id(query.id)
        .exec(db.get_ref())
        .await
        .map_err(db_error)?;
    Ok(ok_empty())
}

fn check_window(starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>) -> Result<(), AppError> {
    match (starts_at, ends_at) {
        (Some(s), Some(e)) if e <= s => Err(AppError::param_error("ad must end after it starts")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::test_support::memory_db;

    fn ad(is_active: bool, starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>) -> advertisement::Model {
        advertisement::Model {
            id: 1,
            title: "বিজ্ঞাপন".to_string(),
            image_url: "/ad.png".to_string(),
            link_url: None,
            position: "HEADER".to_string(),
            is_active,
            starts_at,
            ends_at,
            sort_order: 0,
            created: None,
            updated: None,
        }
    }

    #[test]
    fn window_bounds_are_respected() {
        let now = Utc::now();
        let hour = Duration::hours(1);
        assert!(is_running(&ad(true, None, None), now));
        assert!(is_running(&ad(true, Some(now - hour), Some(now + hour)), now));
        assert!(!is_running(&ad(true, Some(now + hour), None), now));
        assert!(!is_running(&ad(true, None, Some(now - hour)), now));
        assert!(!is_running(&ad(true, None, Some(now)), now));
        assert!(!is_running(&ad(false, None, None), now));
    }

    #[test]
    fn positions_parse_case_insensitively() {
        assert_eq!(Position::parse("in_article"), Some(Position::InArticle));
        assert_eq!(Position::parse(" Footer "), Some(Position::Footer));
        assert_eq!(Position::parse("POPUP"), None);
        assert!(check_window(Some(Utc::now()), Some(Utc::now() - Duration::days(1))).is_err());
    }

    #[actix_web::test]
    async fn expired_ads_are_not_served() {
        let db = memory_db().await;
        let now = Utc::now();
        for (title, ends_at) in [("চলমান", now + Duration::days(1)), ("মেয়াদোত্তীর্ণ", now - Duration::days(1))] {
            advertisement::ActiveModel {
                title: Set(title.to_string()),
                image_url: Set("/ad.png".to_string()),
                position: Set("SIDEBAR".to_string()),
                is_active: Set(true),
                starts_at: Set(Some(now - Duration::days(7))),
                ends_at: Set(Some(ends_at)),
                sort_order: Set(0),
                ..Default::default()
            }
            .insert(&db)
            .await
            .unwrap();
        }

        let app = actix_web::test::init_service(
            actix_web::App::new()
                .app_data(web::Data::new(db.clone()))
                .service(web::scope("/api/ad").configure(super::config)),
        )
        .await;
        let req = actix_web::test::TestRequest::post()
            .uri("/api/ad/active?position=sidebar")
            .to_request();
        let body: serde_json::Value = actix_web::test::call_and_read_body_json(&app, req).await;
        let list = body["data"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["title"], "চলমান");
    }
}
