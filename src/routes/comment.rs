use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::info;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthUser, OptionalAuthUser, StaffUser};
use crate::cache::CommentCache;
use crate::comment_tree::{build_comment_tree, depth_of, CommentNode, MAX_REPLY_DEPTH};
use crate::entity::{comment, post, profile, STATUS_PUBLISHED};
use crate::error::{db_error, AppError};
use crate::response::{ok, ok_empty, to_rfc3339, Page, PageRequest};
use crate::sql::exec_sql;
use crate::sys_config as sys_config_store;

const MAX_CONTENT_CHARS: usize = 2000;
/// Shown for comments whose author profile was removed.
const REMOVED_AUTHOR: &str = "প্রাক্তন ব্যবহারকারী";

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/add").route(web::post().to(add)))
        .service(web::resource("/query").route(web::post().to(query)))
        .service(web::resource("/pending").route(web::post().to(pending)))
        .service(web::resource("/setApproved").route(web::post().to(set_approved)))
        .service(web::resource("/postApprove").route(web::post().to(post_approve)))
        .service(web::resource("/remove").route(web::post().to(remove)));
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCommentRequest {
    pub post_id: i32,
    pub parent_id: Option<i32>,
    pub content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryCommentRequest {
    post_id: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDto {
    id: i32,
    post_id: i32,
    parent_id: Option<i32>,
    author_id: i32,
    author_name: String,
    author_avatar: Option<String>,
    content: String,
    approved: bool,
    created: Option<String>,
    depth: usize,
    orphaned: bool,
    can_reply: bool,
    replies: Vec<CommentDto>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryCommentResponse {
    total: usize,
    list: Vec<CommentDto>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingCommentDto {
    id: i32,
    post_id: i32,
    post_title: Option<String>,
    parent_id: Option<i32>,
    author_id: i32,
    author_name: String,
    content: String,
    created: Option<String>,
}

#[derive(Deserialize)]
struct SetApprovedQuery {
    id: i32,
    approved: bool,
}

#[derive(Deserialize)]
struct IdQuery {
    id: i32,
}

async fn add(
    db: web::Data<DatabaseConnection>,
    cache: web::Data<CommentCache>,
    auth: AuthUser,
    payload: web::Json<SaveCommentRequest>,
) -> Result<HttpResponse, AppError> {
    let saved = create_comment(db.get_ref(), cache.get_ref(), &auth, &payload).await?;
    Ok(ok(saved.id))
}

/// Validates and stores a comment, then drops the post's cached rows.
pub async fn create_comment(
    db: &DatabaseConnection,
    cache: &CommentCache,
    auth: &AuthUser,
    req: &SaveCommentRequest,
) -> Result<comment::Model, AppError> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(AppError::param_error("comment cannot be empty"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(AppError::param_error(format!(
            "comment is limited to {} characters",
            MAX_CONTENT_CHARS
        )));
    }

    let open_comment = sys_config_store::get_boolean(db, sys_config_store::OPEN_COMMENT)
        .await
        .map_err(db_error)?;
    if !open_comment {
        return Err(AppError::fail("comments are disabled"));
    }

    let target = published_post(db, req.post_id).await?;

    if let Some(parent_id) = req.parent_id {
        let parent = comment::Entity::find_by_id(parent_id)
            .one(db)
            .await
            .map_err(db_error)?
            .ok_or_else(|| AppError::fail("parent comment not found"))?;
        if parent.post_id != target.id {
            return Err(AppError::param_error("parent comment belongs to another post"));
        }
        let rows = cache.rows_for_post(db, target.id).await?;
        let depth = depth_of(&rows, parent.id).unwrap_or(MAX_REPLY_DEPTH);
        if depth >= MAX_REPLY_DEPTH {
            return Err(AppError::fail("reply depth limit reached"));
        }
    }

    let moderated = sys_config_store::get_boolean(db, sys_config_store::COMMENT_APPROVED)
        .await
        .map_err(db_error)?;
    let approved = auth.role.is_privileged() || !moderated;

    let now = Utc::now();
    let saved = comment::ActiveModel {
        post_id: Set(target.id),
        author_id: Set(auth.user_id),
        parent_id: Set(req.parent_id),
        content: Set(content.to_string()),
        approved: Set(approved),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(db_error)?;
    cache.invalidate(target.id);

    Ok(saved)
}

async fn query(
    db: web::Data<DatabaseConnection>,
    cache: web::Data<CommentCache>,
    auth: OptionalAuthUser,
    payload: web::Json<QueryCommentRequest>,
) -> Result<HttpResponse, AppError> {
    let forest = load_thread(db.get_ref(), cache.get_ref(), payload.post_id, auth.user_id()).await?;
    let total = count_nodes(&forest);
    Ok(ok(QueryCommentResponse { total, list: forest }))
}

/// The comment forest of a published post as seen by `viewer`. Unknown and
/// unpublished posts fail before anything is cached.
pub async fn load_thread(
    db: &DatabaseConnection,
    cache: &CommentCache,
    post_id: i32,
    viewer: Option<i32>,
) -> Result<Vec<CommentDto>, AppError> {
    let target = published_post(db, post_id).await?;
    let rows = cache.rows_for_post(db, target.id).await?;
    let forest = build_comment_tree((*rows).clone(), viewer);

    let mut author_ids = Vec::new();
    collect_authors(&forest, &mut author_ids);
    let authors = load_authors(db, author_ids).await?;

    Ok(forest.into_iter().map(|n| to_dto(n, &authors)).collect())
}

async fn pending(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<PageRequest>,
) -> Result<HttpResponse, AppError> {
    let paginator = comment::Entity::find()
        .filter(comment::Column::Approved.eq(false))
        .order_by_asc(comment::Column::Created)
        .order_by_asc(comment::Column::Id)
        .paginate(db.get_ref(), payload.size());
    let counts = paginator.num_items_and_pages().await.map_err(db_error)?;
    let rows = paginator.fetch_page(payload.index()).await.map_err(db_error)?;

    let authors = load_authors(db.get_ref(), rows.iter().map(|c| c.author_id).collect()).await?;
    let post_ids: Vec<i32> = rows.iter().map(|c| c.post_id).collect();
    let titles: HashMap<i32, String> = post::Entity::find()
        .filter(post::Column::Id.is_in(post_ids))
        .all(db.get_ref())
        .await
        .map_err(db_error)?
        .into_iter()
        .map(|p| (p.id, p.title))
        .collect();

    let list = rows
        .into_iter()
        .map(|c| PendingCommentDto {
            id: c.id,
            post_id: c.post_id,
            post_title: titles.get(&c.post_id).cloned(),
            parent_id: c.parent_id,
            author_id: c.author_id,
            author_name: author_name(&authors, c.author_id),
            content: c.content,
            created: c.created.map(to_rfc3339),
        })
        .collect();

    Ok(ok(Page {
        total: counts.number_of_items,
        total_page: counts.number_of_pages,
        list,
    }))
}

async fn set_approved(
    db: web::Data<DatabaseConnection>,
    cache: web::Data<CommentCache>,
    staff: StaffUser,
    query: web::Query<SetApprovedQuery>,
) -> Result<HttpResponse, AppError> {
    let found = comment::Entity::find_by_id(query.id)
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::fail("comment not found"))?;
    let post_id = found.post_id;

    let mut active: comment::ActiveModel = found.into();
    active.approved = Set(query.approved);
    active.updated = Set(Some(Utc::now()));
    active.update(db.get_ref()).await.map_err(db_error)?;
    cache.invalidate(post_id);
    info!("comment {} approved={} by {}", query.id, query.approved, staff.0.user_id);

    Ok(ok_empty())
}

async fn post_approve(
    db: web::Data<DatabaseConnection>,
    cache: web::Data<CommentCache>,
    _staff: StaffUser,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, AppError> {
    let affected = exec_sql(
        db.get_ref(),
        "update t_comment set approved = 1 where post_id = ? and approved = 0",
        vec![query.id.into()],
    )
    .await?;
    cache.invalidate(query.id);
    Ok(ok(affected))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    cache: web::Data<CommentCache>,
    staff: StaffUser,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, AppError> {
    let found = comment::Entity::find_by_id(query.id)
        .one(db.get_ref())
        .await
        .map_err(db_error)?;
    let found = match found {
        Some(c) => c,
        None => return Ok(ok_empty()),
    };

    // replies stay and resurface as orphans
    comment::Entity::delete_by_id(found.id)
        .exec(db.get_ref())
        .await
        .map_err(db_error)?;
    cache.invalidate(found.post_id);
    info!("comment {} removed by {}", found.id, staff.0.user_id);

    Ok(ok_empty())
}

async fn published_post(db: &DatabaseConnection, post_id: i32) -> Result<post::Model, AppError> {
    post::Entity::find_by_id(post_id)
        .one(db)
        .await
        .map_err(db_error)?
        .filter(|p| p.status == STATUS_PUBLISHED)
        .ok_or_else(|| AppError::fail("post not found"))
}

fn collect_authors(nodes: &[CommentNode], out: &mut Vec<i32>) {
    for n in nodes {
        out.push(n.comment.author_id);
        collect_authors(&n.replies, out);
    }
}

fn count_nodes(nodes: &[CommentDto]) -> usize {
    nodes.iter().map(|n| 1 + count_nodes(&n.replies)).sum()
}

async fn load_authors(db: &DatabaseConnection, mut ids: Vec<i32>) -> Result<HashMap<i32, profile::Model>, AppError> {
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = profile::Entity::find()
        .filter(profile::Column::Id.is_in(ids))
        .all(db)
        .await
        .map_err(db_error)?;
    Ok(rows.into_iter().map(|p| (p.id, p)).collect())
}

fn author_name(authors: &HashMap<i32, profile::Model>, id: i32) -> String {
    authors
        .get(&id)
        .map(|p| p.display_name.clone().unwrap_or_else(|| p.username.clone()))
        .unwrap_or_else(|| REMOVED_AUTHOR.to_string())
}

fn to_dto(node: CommentNode, authors: &HashMap<i32, profile::Model>) -> CommentDto {
    let can_reply = node.can_reply();
    let c = node.comment;
    CommentDto {
        id: c.id,
        post_id: c.post_id,
        parent_id: c.parent_id,
        author_id: c.author_id,
        author_name: author_name(authors, c.author_id),
        author_avatar: authors.get(&c.author_id).and_then(|p| p.avatar_url.clone()),
        content: c.content,
        approved: c.approved,
        created: c.created.map(to_rfc3339),
        depth: node.depth,
        orphaned: node.orphaned,
        can_reply,
        replies: node.replies.into_iter().map(|r| to_dto(r, authors)).collect(),
    }
}
