use actix_web::{web, HttpResponse};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

use crate::auth::{can_enter_admin, OptionalAuthUser, StaffUser};
use crate::entity::{opinion, parse_status, STATUS_PUBLISHED};
use crate::error::{db_error, AppError};
use crate::response::{ok, ok_empty, to_rfc3339, Page, PageRequest, ResponseDto};
use crate::routes::{non_blank, required};
use crate::slug::resolve_slug;
use crate::sql::{increment_view_count, is_duplicate};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/list").route(web::post().to(list)))
        .service(web::resource("/{id:\\d+}").route(web::post().to(get)))
        .service(web::resource("/slug/{slug}").route(web::post().to(get_by_slug)))
        .service(web::resource("/save").route(web::post().to(save)))
        .service(web::resource("/update").route(web::post().to(update)))
        .service(web::resource("/remove").route(web::post().to(remove)));
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListOpinionRequest {
    #[serde(flatten)]
    page: PageRequest,
    featured: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveOpinionRequest {
    id: Option<i32>,
    title: Option<String>,
    slug: Option<String>,
    content: Option<String>,
    author_name: Option<String>,
    author_title: Option<String>,
    author_image: Option<String>,
    is_featured: Option<bool>,
    status: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpinionDto {
    id: i32,
    title: String,
    slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    author_name: String,
    author_title: Option<String>,
    author_image: Option<String>,
    is_featured: bool,
    status: String,
    view_count: i32,
    published_at: Option<String>,
}

impl OpinionDto {
    fn new(o: opinion::Model, with_content: bool) -> Self {
        Self {
            id: o.id,
            title: o.title,
            slug: o.slug,
            content: if with_content { Some(o.content) } else { None },
            author_name: o.author_name,
            author_title: o.author_title,
            author_image: o.author_image,
            is_featured: o.is_featured,
            status: o.status,
            view_count: o.view_count,
            published_at: o.published_at.map(to_rfc3339),
        }
    }
}

#[derive(Deserialize)]
struct CountQuery {
    count: Option<bool>,
}

#[derive(Deserialize)]
struct IdQuery {
    id: i32,
}

async fn list(
    db: web::Data<DatabaseConnection>,
    payload: web::Json<ListOpinionRequest>,
) -> Result<HttpResponse, AppError> {
    let mut select = opinion::Entity::find().filter(opinion::Column::Status.eq(STATUS_PUBLISHED));
    if let Some(featured) = payload.featured {
        select = select.filter(opinion::Column::IsFeatured.eq(featured));
    }
    let paginator = select
        .order_by_desc(opinion::Column::PublishedAt)
        .order_by_desc(opinion::Column::Id)
        .paginate(db.get_ref(), payload.page.size());
    let counts = paginator.num_items_and_pages().await.map_err(db_error)?;
    let rows = paginator.fetch_page(payload.page.index()).await.map_err(db_error)?;

    Ok(ok(Page {
        total: counts.number_of_items,
        total_page: counts.number_of_pages,
        list: rows.into_iter().map(|o| OpinionDto::new(o, false)).collect(),
    }))
}

async fn get(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
    query: web::Query<CountQuery>,
) -> Result<HttpResponse, AppError> {
    let found = opinion::Entity::find_by_id(path.into_inner())
        .one(db.get_ref())
        .await
        .map_err(db_error)?;
    respond_detail(db.get_ref(), found, &auth, query.count.unwrap_or(false)).await
}

async fn get_by_slug(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<String>,
    query: web::Query<CountQuery>,
) -> Result<HttpResponse, AppError> {
    let found = opinion::Entity::find()
        .filter(opinion::Column::Slug.eq(path.into_inner()))
        .one(db.get_ref())
        .await
        .map_err(db_error)?;
    respond_detail(db.get_ref(), found, &auth, query.count.unwrap_or(false)).await
}

async fn respond_detail(
    db: &DatabaseConnection,
    found: Option<opinion::Model>,
    auth: &OptionalAuthUser,
    count: bool,
) -> Result<HttpResponse, AppError> {
    let found = found.filter(|o| o.status == STATUS_PUBLISHED || can_enter_admin(auth.0.as_ref()));
    let mut item = match found {
        Some(o) => o,
        None => return Ok(HttpResponse::Ok().json(ResponseDto::<OpinionDto>::success(None))),
    };
    if count && item.status == STATUS_PUBLISHED {
        increment_view_count(db, "t_opinion", item.id).await?;
        item.view_count += 1;
    }
    Ok(ok(OpinionDto::new(item, true)))
}

async fn save(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SaveOpinionRequest>,
) -> Result<HttpResponse, AppError> {
    let title = required(&payload.title, "title")?;
    let content = required(&payload.content, "content")?;
    let author_name = required(&payload.author_name, "authorName")?;

    let status = parse_status(payload.status.as_deref());
    let now = Utc::now();
    let inserted = opinion::ActiveModel {
        slug: Set(resolve_slug(payload.slug.as_deref(), &title)),
        title: Set(title),
        content: Set(content),
        author_name: Set(author_name),
        author_title: Set(payload.author_title.clone()),
        author_image: Set(payload.author_image.clone()),
        is_featured: Set(payload.is_featured.unwrap_or(false)),
        status: Set(status.to_string()),
        view_count: Set(0),
        published_at: Set(if status == STATUS_PUBLISHED { Some(now) } else { None }),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    }
    .insert(db.get_ref())
    .await
    .map_err(slug_conflict)?;
    Ok(ok(inserted.id))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SaveOpinionRequest>,
) -> Result<HttpResponse, AppError> {
    let id = payload.id.ok_or_else(|| AppError::param_error("id is required"))?;
    let exist = opinion::Entity::find_by_id(id)
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::fail("opinion not found"))?;

    let status = parse_status(Some(payload.status.as_deref().unwrap_or(&exist.status)));
    let first_publish = status == STATUS_PUBLISHED && exist.published_at.is_none();

    let mut active: opinion::ActiveModel = exist.into();
    if let Some(title) = non_blank(&payload.title) {
        active.title = Set(title.to_string());
    }
    if let Some(slug) = non_blank(&payload.slug) {
        active.slug = Set(resolve_slug(Some(slug), ""));
    }
    if let Some(content) = non_blank(&payload.content) {
        active.content = Set(content.to_string());
    }
    if let Some(name) = non_blank(&payload.author_name) {
        active.author_name = Set(name.to_string());
    }
    if let Some(v) = payload.author_title.clone() {
        active.author_title = Set(Some(v));
    }
    if let Some(v) = payload.author_image.clone() {
        active.author_image = Set(Some(v));
    }
    if let Some(v) = payload.is_featured {
        active.is_featured = Set(v);
    }
    active.status = Set(status.to_string());
    if first_publish {
        active.published_at = Set(Some(Utc::now()));
    }
    active.updated = Set(Some(Utc::now()));
    active.update(db.get_ref()).await.map_err(slug_conflict)?;
    Ok(ok_empty())
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, AppError> {
    opinion::Entity::delete_by_id(query.id)
        .exec(db.get_ref())
        .await
        .map_err(db_error)?;
    Ok(ok_empty())
}

fn slug_conflict(err: sea_orm::DbErr) -> AppError {
    if is_duplicate(&err) {
        AppError::fail("slug already exists")
    } else {
        db_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use serde_json::Value;

    use crate::auth::{issue_token, Role};
    use crate::config::AppConfig;
    use crate::test_support::{memory_db, seed_profile};

    #[actix_web::test]
    async fn staff_saves_opinion_readable_by_slug() {
        let db = memory_db().await;
        let config = AppConfig::for_test();
        let editor = seed_profile(&db, "editor", Role::Editor).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db.clone()))
                .app_data(web::Data::new(config.clone()))
                .service(web::scope("/api/opinion").configure(super::config)),
        )
        .await;

        let save = test::TestRequest::post()
            .uri("/api/opinion/save")
            .insert_header(("token", issue_token(&config, editor.id).unwrap()))
            .set_json(serde_json::json!({
                "title": "অর্থনীতির পথ",
                "slug": "arthoniti",
                "content": "মতামত",
                "authorName": "লেখক",
                "status": "PUBLISHED"
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, save).await;
        assert_eq!(body["code"], 0);

        let read = test::TestRequest::post()
            .uri("/api/opinion/slug/arthoniti?count=true")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, read).await;
        assert_eq!(body["data"]["authorName"], "লেখক");
        assert_eq!(body["data"]["viewCount"], 1);
    }

    #[actix_web::test]
    async fn draft_opinion_hidden_from_public() {
        let db = memory_db().await;
        let now = Utc::now();
        let draft = opinion::ActiveModel {
            title: Set("খসড়া".to_string()),
            slug: Set("draft-opinion".to_string()),
            content: Set("...".to_string()),
            author_name: Set("লেখক".to_string()),
            is_featured: Set(false),
            status: Set("DRAFT".to_string()),
            view_count: Set(0),
            created: Set(Some(now)),
            updated: Set(Some(now)),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let anonymous = OptionalAuthUser(None);
        let resp = respond_detail(&db, Some(draft), &anonymous, true).await.unwrap();
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["data"].is_null());
    }
}
