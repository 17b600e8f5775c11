use actix_web::{web, HttpResponse};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::auth::StaffUser;
use crate::entity::{category, post, subcategory};
use crate::error::{db_error, AppError};
use crate::response::{ok, ok_empty, ResponseDto};
use crate::slug::resolve_slug;
use crate::sql::{is_duplicate, map_tx_error};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/list").route(web::post().to(list)))
        .service(web::resource("/get").route(web::post().to(get_by_slug)))
        .service(web::resource("/save").route(web::post().to(save)))
        .service(web::resource("/update").route(web::post().to(update)))
        .service(web::resource("/remove").route(web::post().to(remove)))
        .service(web::resource("/saveSub").route(web::post().to(save_sub)))
        .service(web::resource("/updateSub").route(web::post().to(update_sub)))
        .service(web::resource("/removeSub").route(web::post().to(remove_sub)));
}

/// Compact reference embedded in post and video payloads.
#[derive(Serialize, Clone)]
pub struct CategoryRef {
    pub id: i32,
    pub name: String,
    pub slug: String,
}

impl From<&category::Model> for CategoryRef {
    fn from(m: &category::Model) -> Self {
        Self { id: m.id, name: m.name.clone(), slug: m.slug.clone() }
    }
}

impl From<&subcategory::Model> for CategoryRef {
    fn from(m: &subcategory::Model) -> Self {
        Self { id: m.id, name: m.name.clone(), slug: m.slug.clone() }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CategoryDto {
    id: i32,
    name: String,
    slug: String,
    description: Option<String>,
    sort_order: i32,
    subcategories: Vec<SubcategoryDto>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubcategoryDto {
    id: i32,
    category_id: i32,
    name: String,
    slug: String,
    sort_order: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveCategoryRequest {
    id: Option<i32>,
    name: Option<String>,
    slug: Option<String>,
    description: Option<String>,
    sort_order: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveSubcategoryRequest {
    id: Option<i32>,
    category_id: Option<i32>,
    name: Option<String>,
    slug: Option<String>,
    sort_order: Option<i32>,
}

#[derive(Deserialize)]
struct SlugQuery {
    slug: String,
}

#[derive(Deserialize)]
struct RemoveQuery {
    id: i32,
}

async fn list(db: web::Data<DatabaseConnection>) -> Result<HttpResponse, AppError> {
    let categories = category::Entity::find()
        .order_by_asc(category::Column::SortOrder)
        .order_by_asc(category::Column::Id)
        .all(db.get_ref())
        .await
        .map_err(db_error)?;
    let subs = subcategory::Entity::find()
        .order_by_asc(subcategory::Column::SortOrder)
        .order_by_asc(subcategory::Column::Id)
        .all(db.get_ref())
        .await
        .map_err(db_error)?;

    let list = categories
        .into_iter()
        .map(|c| {
            let children = subs.iter().filter(|s| s.category_id == c.id).map(to_sub_dto).collect();
            to_dto(c, children)
        })
        .collect::<Vec<_>>();
    Ok(ok(list))
}

async fn get_by_slug(
    db: web::Data<DatabaseConnection>,
    query: web::Query<SlugQuery>,
) -> Result<HttpResponse, AppError> {
    let found = category::Entity::find()
        .filter(category::Column::Slug.eq(query.slug.trim()))
        .one(db.get_ref())
        .await
        .map_err(db_error)?;
    let found = match found {
        Some(c) => c,
        None => return Ok(HttpResponse::Ok().json(ResponseDto::<CategoryDto>::success(None))),
    };
    let subs = subcategory::Entity::find()
        .filter(subcategory::Column::CategoryId.eq(found.id))
        .order_by_asc(subcategory::Column::SortOrder)
        .all(db.get_ref())
        .await
        .map_err(db_error)?;
    let children = subs.iter().map(to_sub_dto).collect();
    Ok(ok(to_dto(found, children)))
}

async fn save(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SaveCategoryRequest>,
) -> Result<HttpResponse, AppError> {
    let name = required_name(&payload.name)?;
    let now = Utc::now();
    let model = category::ActiveModel {
        slug: Set(resolve_slug(payload.slug.as_deref(), &name)),
        name: Set(name),
        description: Set(payload.description.clone()),
        sort_order: Set(payload.sort_order.unwrap_or(0)),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    };
    let inserted = model.insert(db.get_ref()).await.map_err(slug_conflict)?;
    Ok(ok(inserted.id))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SaveCategoryRequest>,
) -> Result<HttpResponse, AppError> {
    let id = payload.id.ok_or_else(|| AppError::param_error("id is required"))?;
    let mut active = category::ActiveModel {
        id: Set(id),
        updated: Set(Some(Utc::now())),
        ..Default::default()
    };
    if let Some(name) = payload.name.clone().filter(|n| !n.trim().is_empty()) {
        active.name = Set(name.trim().to_string());
    }
    if let Some(slug) = payload.slug.as_deref().filter(|s| !s.trim().is_empty()) {
        active.slug = Set(resolve_slug(Some(slug), ""));
    }
    if let Some(description) = payload.description.clone() {
        active.description = Set(Some(description));
    }
    if let Some(order) = payload.sort_order {
        active.sort_order = Set(order);
    }
    category::Entity::update(active)
        .exec(db.get_ref())
        .await
        .map_err(slug_conflict)?;
    Ok(ok_empty())
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    query: web::Query<RemoveQuery>,
) -> Result<HttpResponse, AppError> {
    let id = query.id;
    let used = post::Entity::find()
        .filter(post::Column::CategoryId.eq(id))
        .count(db.get_ref())
        .await
        .map_err(db_error)?;
    if used > 0 {
        return Err(AppError::fail(format!("category still has {} posts", used)));
    }

    db.transaction::<_, (), AppError>(|txn| {
        Box::pin(async move {
            subcategory::Entity::delete_many()
                .filter(subcategory::Column::CategoryId.eq(id))
                .exec(txn)
                .await
                .map_err(db_error)?;
            category::Entity::delete_by_id(id).exec(txn).await.map_err(db_error)?;
            Ok(())
        })
    })
    .await
    .map_err(map_tx_error)?;

    Ok(ok_empty())
}

async fn save_sub(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SaveSubcategoryRequest>,
) -> Result<HttpResponse, AppError> {
    let name = required_name(&payload.name)?;
    let category_id = payload
        .category_id
        .ok_or_else(|| AppError::param_error("categoryId is required"))?;
    category::Entity::find_by_id(category_id)
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::fail("category not found"))?;

    let now = Utc::now();
    let model = subcategory::ActiveModel {
        category_id: Set(category_id),
        slug: Set(resolve_slug(payload.slug.as_deref(), &name)),
        name: Set(name),
        sort_order: Set(payload.sort_order.unwrap_or(0)),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    };
    let inserted = model.insert(db.get_ref()).await.map_err(slug_conflict)?;
    Ok(ok(inserted.id))
}

async fn update_sub(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SaveSubcategoryRequest>,
) -> Result<HttpResponse, AppError> {
    let id = payload.id.ok_or_else(|| AppError::param_error("id is required"))?;
    let mut active = subcategory::ActiveModel {
        id: Set(id),
        updated: Set(Some(Utc::now())),
        ..Default::default()
    };
    if let Some(name) = payload.name.clone().filter(|n| !n.trim().is_empty()) {
        active.name = Set(name.trim().to_string());
    }
    if let Some(slug) = payload.slug.as_deref().filter(|s| !s.trim().is_empty()) {
        active.slug = Set(resolve_slug(Some(slug), ""));
    }
    if let Some(order) = payload.sort_order {
        active.sort_order = Set(order);
    }
    if let Some(category_id) = payload.category_id {
        category::Entity::find_by_id(category_id)
            .one(db.get_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| AppError::fail("category not found"))?;
        active.category_id = Set(category_id);
    }
    subcategory::Entity::update(active)
        .exec(db.get_ref())
        .await
        .map_err(slug_conflict)?;
    Ok(ok_empty())
}

async fn remove_sub(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    query: web::Query<RemoveQuery>,
) -> Result<HttpResponse, AppError> {
    let used = post::Entity::find()
        .filter(post::Column::SubcategoryId.eq(query.id))
        .count(db.get_ref())
        .await
        .map_err(db_error)?;
    if used > 0 {
        return Err(AppError::fail(format!("subcategory still has {} posts", used)));
    }
    subcategory::Entity::delete_by_id(query.id)
        .exec(db.get_ref())
        .await
        .map_err(db_error)?;
    Ok(ok_empty())
}

/// Checks that the referenced category exists and that the subcategory, if
/// any, hangs under it.
pub async fn check_taxonomy(
    db: &DatabaseConnection,
    category_id: Option<i32>,
    subcategory_id: Option<i32>,
) -> Result<(), AppError> {
    if let Some(cid) = category_id {
        category::Entity::find_by_id(cid)
            .one(db)
            .await
            .map_err(db_error)?
            .ok_or_else(|| AppError::fail("category not found"))?;
    }
    if let Some(sid) = subcategory_id {
        let sub = subcategory::Entity::find_by_id(sid)
            .one(db)
            .await
            .map_err(db_error)?
            .ok_or_else(|| AppError::fail("subcategory not found"))?;
        if category_id != Some(sub.category_id) {
            return Err(AppError::param_error("subcategory does not belong to the category"));
        }
    }
    Ok(())
}

fn required_name(name: &Option<String>) -> Result<String, AppError> {
    name.as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::param_error("name is required"))
}

fn slug_conflict(err: sea_orm::DbErr) -> AppError {
    if is_duplicate(&err) {
        return AppError::fail("slug already exists");
    }
    if matches!(err, sea_orm::DbErr::RecordNotUpdated) {
        return AppError::fail("record not found");
    }
    db_error(err)
}

fn to_dto(model: category::Model, subcategories: Vec<SubcategoryDto>) -> CategoryDto {
    CategoryDto {
        id: model.id,
        name: model.name,
        slug: model.slug,
        description: model.description,
        sort_order: model.sort_order,
        subcategories,
    }
}

fn to_sub_dto(model: &subcategory::Model) -> SubcategoryDto {
    SubcategoryDto {
        id: model.id,
        category_id: model.category_id,
        name: model.name.clone(),
        slug: model.slug.clone(),
        sort_order: model.sort_order,
    }
}
