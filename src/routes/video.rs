use actix_web::{web, HttpResponse};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

use crate::auth::{can_enter_admin, OptionalAuthUser, StaffUser};
use crate::entity::{parse_status, video, STATUS_PUBLISHED};
use crate::error::{db_error, AppError};
use crate::response::{ok, ok_empty, to_rfc3339, Page, PageRequest, ResponseDto};
use crate::routes::category::check_taxonomy;
use crate::routes::{non_blank, required};
use crate::sql::increment_view_count;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/list").route(web::post().to(list)))
        .service(web::resource("/{id:\\d+}").route(web::post().to(get)))
        .service(web::resource("/save").route(web::post().to(save)))
        .service(web::resource("/update").route(web::post().to(update)))
        .service(web::resource("/remove").route(web::post().to(remove)));
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListVideoRequest {
    #[serde(flatten)]
    page: PageRequest,
    category_id: Option<i32>,
    featured: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveVideoRequest {
    id: Option<i32>,
    title: Option<String>,
    description: Option<String>,
    video_url: Option<String>,
    thumbnail_url: Option<String>,
    category_id: Option<i32>,
    is_featured: Option<bool>,
    status: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoDto {
    id: i32,
    title: String,
    description: Option<String>,
    video_url: String,
    thumbnail_url: Option<String>,
    category_id: Option<i32>,
    is_featured: bool,
    status: String,
    view_count: i32,
    published_at: Option<String>,
    created: Option<String>,
}

impl From<video::Model> for VideoDto {
    fn from(v: video::Model) -> Self {
        Self {
            id: v.id,
            title: v.title,
            description: v.description,
            video_url: v.video_url,
            thumbnail_url: v.thumbnail_url,
            category_id: v.category_id,
            is_featured: v.is_featured,
            status: v.status,
            view_count: v.view_count,
            published_at: v.published_at.map(to_rfc3339),
            created: v.created.map(to_rfc3339),
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
    payload: web::Json<ListVideoRequest>,
) -> Result<HttpResponse, AppError> {
    let mut select = video::Entity::find().filter(video::Column::Status.eq(STATUS_PUBLISHED));
    if let Some(cid) = payload.category_id {
        select = select.filter(video::Column::CategoryId.eq(cid));
    }
    if let Some(featured) = payload.featured {
        select = select.filter(video::Column::IsFeatured.eq(featured));
    }
    let paginator = select
        .order_by_desc(video::Column::PublishedAt)
        .order_by_desc(video::Column::Id)
        .paginate(db.get_ref(), payload.page.size());
    let counts = paginator.num_items_and_pages().await.map_err(db_error)?;
    let rows = paginator.fetch_page(payload.page.index()).await.map_err(db_error)?;

    Ok(ok(Page {
        total: counts.number_of_items,
        total_page: counts.number_of_pages,
        list: rows.into_iter().map(VideoDto::from).collect(),
    }))
}

async fn get(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
    query: web::Query<CountQuery>,
) -> Result<HttpResponse, AppError> {
    let found = video::Entity::find_by_id(path.into_inner())
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .filter(|v| v.status == STATUS_PUBLISHED || can_enter_admin(auth.0.as_ref()));
    let mut item = match found {
        Some(v) => v,
        None => return Ok(HttpResponse::Ok().json(ResponseDto::<VideoDto>::success(None))),
    };
    if query.count.unwrap_or(false) && item.status == STATUS_PUBLISHED {
        increment_view_count(db.get_ref(), "t_video", item.id).await?;
        item.view_count += 1;
    }
    Ok(ok(VideoDto::from(item)))
}

async fn save(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SaveVideoRequest>,
) -> Result<HttpResponse, AppError> {
    let title = required(&payload.title, "title")?;
    let video_url = required(&payload.video_url, "videoUrl")?;
    check_taxonomy(db.get_ref(), payload.category_id, None).await?;

    let status = parse_status(payload.status.as_deref());
    let now = Utc::now();
    let inserted = video::ActiveModel {
        title: Set(title),
        description: Set(payload.description.clone()),
        video_url: Set(video_url),
        thumbnail_url: Set(payload.thumbnail_url.clone()),
        category_id: Set(payload.category_id),
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
    .map_err(db_error)?;
    Ok(ok(inserted.id))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SaveVideoRequest>,
) -> Result<HttpResponse, AppError> {
    let id = payload.id.ok_or_else(|| AppError::param_error("id is required"))?;
    let exist = video::Entity::find_by_id(id)
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::fail("video not found"))?;
    if payload.category_id.is_some() {
        check_taxonomy(db.get_ref(), payload.category_id, None).await?;
    }

    let status = parse_status(Some(payload.status.as_deref().unwrap_or(&exist.status)));
    let first_publish = status == STATUS_PUBLISHED && exist.published_at.is_none();

    let mut active: video::ActiveModel = exist.into();
    if let Some(title) = non_blank(&payload.title) {
        active.title = Set(title.to_string());
    }
    if let Some(url) = non_blank(&payload.video_url) {
        active.video_url = Set(url.to_string());
    }
    if let Some(description) = payload.description.clone() {
        active.description = Set(Some(description));
    }
    if let Some(thumbnail) = payload.thumbnail_url.clone() {
        active.thumbnail_url = Set(Some(thumbnail));
    }
    if payload.category_id.is_some() {
        active.category_id = Set(payload.category_id);
    }
    if let Some(v) = payload.is_featured {
        active.is_featured = Set(v);
    }
    active.status = Set(status.to_string());
    if first_publish {
        active.published_at = Set(Some(Utc::now()));
    }
    active.updated = Set(Some(Utc::now()));
    active.update(db.get_ref()).await.map_err(db_error)?;
    Ok(ok_empty())
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, AppError> {
    video::Entity::delete_by_id(query.id)
        .exec(db.get_ref())
        .await
        .map_err(db_error)?;
    Ok(ok_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    use crate::auth::{issue_token, Role};
    use crate::config::AppConfig;
    use crate::entity::STATUS_DRAFT;
    use crate::test_support::{memory_db, seed_profile};

    fn request(uri: &str, token: Option<&str>, body: Value) -> test::TestRequest {
        let req = test::TestRequest::post().uri(uri).set_json(body);
        match token {
            Some(token) => req.insert_header(("token", token.to_string())),
            None => req,
        }
    }

    #[actix_web::test]
    async fn drafts_stay_behind_staff() {
        let db = memory_db().await;
        let config = AppConfig::for_test();
        let editor = seed_profile(&db, "editor", Role::Editor).await;
        let reader = seed_profile(&db, "reader", Role::User).await;
        let staff = issue_token(&config, editor.id).unwrap();
        let user = issue_token(&config, reader.id).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db.clone()))
                .app_data(web::Data::new(config.clone()))
                .service(web::scope("/api/video").configure(super::config)),
        )
        .await;

        let body = json!({"title": "t", "videoUrl": "u"});
        let req = request("/api/video/save", Some(&user), body).to_request();
        let refused: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(refused["code"], 5);
        let body = json!({"title": "বন্যা"});
        let req = request("/api/video/save", Some(&staff), body).to_request();
        let missing_url: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(missing_url["code"], 1);

        let body = json!({
            "title": "বন্যা পরিস্থিতি",
            "videoUrl": "https://cdn.example.com/flood.mp4",
            "status": "published"
        });
        let req = request("/api/video/save", Some(&staff), body).to_request();
        let live: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(live["code"], 0);
        let live_id = live["data"].as_i64().unwrap();
        let body = json!({"title": "সাক্ষাৎকার", "videoUrl": "https://cdn.example.com/interview.mp4"});
        let req = request("/api/video/save", Some(&staff), body).to_request();
        let draft: Value = test::call_and_read_body_json(&app, req).await;
        let draft_id = draft["data"].as_i64().unwrap();

        let req = request("/api/video/list", None, json!({})).to_request();
        let listing: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listing["data"]["total"], 1);
        assert_eq!(listing["data"]["list"][0]["id"], live_id);

        let draft_uri = format!("/api/video/{}", draft_id);
        let req = request(&draft_uri, None, json!({})).to_request();
        let anonymous: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(anonymous["code"], 0);
        assert!(anonymous["data"].is_null());
        let req = request(&draft_uri, Some(&staff), json!({})).to_request();
        let as_staff: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(as_staff["data"]["status"], STATUS_DRAFT);

        let counted_uri = format!("/api/video/{}?count=true", live_id);
        let req = request(&counted_uri, None, json!({})).to_request();
        let counted: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(counted["data"]["viewCount"], 1);
    }

    #[actix_web::test]
    async fn update_publishes_and_remove_deletes() {
        let db = memory_db().await;
        let config = AppConfig::for_test();
        let editor = seed_profile(&db, "editor", Role::Editor).await;
        let staff = issue_token(&config, editor.id).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db.clone()))
                .app_data(web::Data::new(config.clone()))
                .service(web::scope("/api/video").configure(super::config)),
        )
        .await;

        let body = json!({"title": "খসড়া", "videoUrl": "https://cdn.example.com/a.mp4"});
        let req = request("/api/video/save", Some(&staff), body).to_request();
        let saved: Value = test::call_and_read_body_json(&app, req).await;
        let id = saved["data"].as_i64().unwrap() as i32;

        let body = json!({"id": id, "title": "প্রকাশিত", "status": "PUBLISHED", "isFeatured": true});
        let req = request("/api/video/update", Some(&staff), body).to_request();
        let updated: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(updated["code"], 0);
        let stored = video::Entity::find_by_id(id).one(&db).await.unwrap().unwrap();
        assert_eq!(stored.title, "প্রকাশিত");
        assert_eq!(stored.status, STATUS_PUBLISHED);
        assert!(stored.is_featured);
        assert!(stored.published_at.is_some());

        let body = json!({"featured": true});
        let req = request("/api/video/list", None, body).to_request();
        let featured: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(featured["data"]["total"], 1);

        let body = json!({"id": 9999, "title": "x"});
        let req = request("/api/video/update", Some(&staff), body).to_request();
        let unknown: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(unknown["code"], 2);

        let remove_uri = format!("/api/video/remove?id={}", id);
        let req = request(&remove_uri, Some(&staff), json!({})).to_request();
        let removed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(removed["code"], 0);
        assert!(video::Entity::find_by_id(id).one(&db).await.unwrap().is_none());
        let req = request("/api/video/list", None, json!({})).to_request();
        let listing: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listing["data"]["total"], 0);
    }
}
