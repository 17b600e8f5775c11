use actix_web::{web, HttpResponse};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::auth::StaffUser;
use crate::entity::{post_tag, tag, STATUS_PUBLISHED};
use crate::error::{db_error, AppError};
use crate::response::{ok, ok_empty};
use crate::slug::resolve_slug;
use crate::sql::{is_duplicate, map_tx_error, query_all};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/list").route(web::post().to(list)))
        .service(web::resource("/popular").route(web::post().to(popular)))
        .service(web::resource("/save").route(web::post().to(save)))
        .service(web::resource("/remove").route(web::post().to(remove)));
}

#[derive(Serialize, Clone)]
pub struct TagRef {
    pub id: i32,
    pub name: String,
    pub slug: String,
}

impl From<&tag::Model> for TagRef {
    fn from(m: &tag::Model) -> Self {
        Self { id: m.id, name: m.name.clone(), slug: m.slug.clone() }
    }
}

#[derive(Serialize)]
struct TagCountDto {
    id: i32,
    name: String,
    slug: String,
    count: i64,
}

#[derive(Deserialize)]
struct SaveTagRequest {
    name: Option<String>,
    slug: Option<String>,
}

#[derive(Deserialize)]
struct RemoveQuery {
    id: i32,
}

async fn list(db: web::Data<DatabaseConnection>) -> Result<HttpResponse, AppError> {
    let rows = tag::Entity::find()
        .order_by_asc(tag::Column::Name)
        .all(db.get_ref())
        .await
        .map_err(db_error)?;
    let list = rows.iter().map(TagRef::from).collect::<Vec<_>>();
    Ok(ok(list))
}

async fn popular(db: web::Data<DatabaseConnection>) -> Result<HttpResponse, AppError> {
    let rows = query_all(
        db.get_ref(),
        "select t.id as id, t.name as name, t.slug as slug, count(p.id) as cnt \
         from t_tag t join t_post_tag pt on pt.tag_id = t.id \
         join t_post p on p.id = pt.post_id and p.status = ? \
         group by t.id, t.name, t.slug order by cnt desc, t.id asc limit 10",
        vec![STATUS_PUBLISHED.into()],
    )
    .await?;

    let list = rows
        .into_iter()
        .map(|row| TagCountDto {
            id: row.try_get("", "id").unwrap_or(0),
            name: row.try_get("", "name").unwrap_or_default(),
            slug: row.try_get("", "slug").unwrap_or_default(),
            count: row.try_get("", "cnt").unwrap_or(0),
        })
        .collect::<Vec<_>>();
    Ok(ok(list))
}

async fn save(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SaveTagRequest>,
) -> Result<HttpResponse, AppError> {
    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::param_error("name is required"))?
        .to_string();
    let active = tag::ActiveModel {
        slug: Set(resolve_slug(payload.slug.as_deref(), &name)),
        name: Set(name),
        created: Set(Some(Utc::now())),
        ..Default::default()
    };
    let inserted = active.insert(db.get_ref()).await.map_err(|e| {
        if is_duplicate(&e) {
            AppError::fail("tag already exists")
        } else {
            db_error(e)
        }
    })?;
    Ok(ok(TagRef::from(&inserted)))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    query: web::Query<RemoveQuery>,
) -> Result<HttpResponse, AppError> {
    let id = query.id;
    db.transaction::<_, (), AppError>(|txn| {
        Box::pin(async move {
            post_tag::Entity::delete_many()
                .filter(post_tag::Column::TagId.eq(id))
                .exec(txn)
                .await
                .map_err(db_error)?;
            tag::Entity::delete_by_id(id).exec(txn).await.map_err(db_error)?;
            Ok(())
        })
    })
    .await
    .map_err(map_tx_error)?;
    Ok(ok_empty())
}

/// Replaces the tag set of a post. Unknown tag ids are ignored.
pub async fn replace_post_tags<C: ConnectionTrait>(db: &C, post_id: i32, tag_ids: &[i32]) -> Result<(), AppError> {
    post_tag::Entity::delete_many()
        .filter(post_tag::Column::PostId.eq(post_id))
        .exec(db)
        .await
        .map_err(db_error)?;
    if tag_ids.is_empty() {
        return Ok(());
    }

    let mut known = tag::Entity::find()
        .filter(tag::Column::Id.is_in(tag_ids.to_vec()))
        .all(db)
        .await
        .map_err(db_error)?
        .into_iter()
        .map(|t| t.id)
        .collect::<Vec<_>>();
    known.sort_unstable();
    known.dedup();
    if known.is_empty() {
        return Ok(());
    }

    let rows = known.into_iter().map(|tag_id| post_tag::ActiveModel {
        post_id: Set(post_id),
        tag_id: Set(tag_id),
    });
    post_tag::Entity::insert_many(rows)
        .exec_without_returning(db)
        .await
        .map_err(db_error)?;
    Ok(())
}
