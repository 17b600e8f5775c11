use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::{debug, info};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Select, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::auth::{can_enter_admin, OptionalAuthUser, StaffUser};
use crate::cache::CommentCache;
use crate::entity::{
    category, comment, parse_status, post, post_tag, profile, subcategory, tag, STATUS_DRAFT, STATUS_PUBLISHED,
};
use crate::error::{db_error, AppError};
use crate::response::{ok, ok_empty, to_rfc3339, Page, PageRequest, ResponseDto};
use crate::routes::category::{check_taxonomy, CategoryRef};
use crate::routes::tag::{replace_post_tags, TagRef};
use crate::routes::{non_blank, required};
use crate::slug::resolve_slug;
use crate::sql::{increment_view_count, is_duplicate, map_tx_error};
use crate::webhook;

const RELATED_LIMIT: u64 = 4;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/list").route(web::post().to(list)))
        .service(web::resource("/adminList").route(web::post().to(admin_list)))
        .service(web::resource("/{id:\\d+}").route(web::post().to(get)))
        .service(web::resource("/slug/{slug}").route(web::post().to(get_by_slug)))
        .service(web::resource("/related").route(web::post().to(related)))
        .service(web::resource("/save").route(web::post().to(save)))
        .service(web::resource("/update").route(web::post().to(update)))
        .service(web::resource("/remove").route(web::post().to(remove)))
        .service(web::resource("/setStatus").route(web::post().to(set_status)));
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListPostRequest {
    #[serde(flatten)]
    pub page: PageRequest,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub tag: Option<String>,
    pub search: Option<String>,
    pub featured: Option<bool>,
    pub breaking: Option<bool>,
    pub sort: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavePostRequest {
    id: Option<i32>,
    title: Option<String>,
    slug: Option<String>,
    excerpt: Option<String>,
    content: Option<String>,
    featured_image: Option<String>,
    category_id: Option<i32>,
    subcategory_id: Option<i32>,
    tag_ids: Option<Vec<i32>>,
    status: Option<String>,
    is_featured: Option<bool>,
    is_breaking: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDto {
    id: i32,
    title: String,
    slug: String,
    excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    featured_image: Option<String>,
    category: Option<CategoryRef>,
    subcategory: Option<CategoryRef>,
    author: Option<AuthorDto>,
    tags: Vec<TagRef>,
    status: String,
    is_featured: bool,
    is_breaking: bool,
    view_count: i32,
    published_at: Option<String>,
    created: Option<String>,
    updated: Option<String>,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthorDto {
    id: i32,
    display_name: String,
    avatar_url: Option<String>,
}

impl From<&profile::Model> for AuthorDto {
    fn from(p: &profile::Model) -> Self {
        Self {
            id: p.id,
            display_name: p.display_name.clone().unwrap_or_else(|| p.username.clone()),
            avatar_url: p.avatar_url.clone(),
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

#[derive(Deserialize)]
struct SetStatusQuery {
    id: i32,
    status: String,
}

async fn list(
    db: web::Data<DatabaseConnection>,
    payload: web::Json<ListPostRequest>,
) -> Result<HttpResponse, AppError> {
    let page = query_posts(db.get_ref(), &payload, true).await?;
    Ok(ok(page))
}

async fn admin_list(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<ListPostRequest>,
) -> Result<HttpResponse, AppError> {
    let page = query_posts(db.get_ref(), &payload, false).await?;
    Ok(ok(page))
}

/// Lists posts matching the request. Public callers only ever see
/// published posts; staff may additionally filter by status.
pub async fn query_posts(
    db: &DatabaseConnection,
    req: &ListPostRequest,
    published_only: bool,
) -> Result<Page<PostDto>, AppError> {
    let empty = || Page { total: 0, total_page: 0, list: Vec::new() };
    let select = match filtered_select(db, req, published_only).await? {
        Some(select) => select,
        None => return Ok(empty()),
    };

    let paginator = select.paginate(db, req.page.size());
    let counts = paginator.num_items_and_pages().await.map_err(db_error)?;
    let rows = paginator.fetch_page(req.page.index()).await.map_err(db_error)?;
    let list = to_post_dtos(db, rows, false).await?;

    Ok(Page {
        total: counts.number_of_items,
        total_page: counts.number_of_pages,
        list,
    })
}

/// `None` when a slug filter names nothing, so the result is known empty.
async fn filtered_select(
    db: &DatabaseConnection,
    req: &ListPostRequest,
    published_only: bool,
) -> Result<Option<Select<post::Entity>>, AppError> {
    let mut select = post::Entity::find();

    if published_only {
        select = select.filter(post::Column::Status.eq(STATUS_PUBLISHED));
    } else if let Some(status) = non_blank(&req.status) {
        select = select.filter(post::Column::Status.eq(parse_status(Some(status))));
    }

    if let Some(slug) = non_blank(&req.category) {
        let found = category::Entity::find()
            .filter(category::Column::Slug.eq(slug))
            .one(db)
            .await
            .map_err(db_error)?;
        match found {
            Some(c) => select = select.filter(post::Column::CategoryId.eq(c.id)),
            None => return Ok(None),
        }
    }

    if let Some(slug) = non_blank(&req.subcategory) {
        let found = subcategory::Entity::find()
            .filter(subcategory::Column::Slug.eq(slug))
            .one(db)
            .await
            .map_err(db_error)?;
        match found {
            Some(s) => select = select.filter(post::Column::SubcategoryId.eq(s.id)),
            None => return Ok(None),
        }
    }

    if let Some(slug) = non_blank(&req.tag) {
        let found = tag::Entity::find()
            .filter(tag::Column::Slug.eq(slug))
            .one(db)
            .await
            .map_err(db_error)?;
        let found = match found {
            Some(t) => t,
            None => return Ok(None),
        };
        let post_ids = post_tag::Entity::find()
            .filter(post_tag::Column::TagId.eq(found.id))
            .all(db)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(|pt| pt.post_id)
            .collect::<Vec<_>>();
        if post_ids.is_empty() {
            return Ok(None);
        }
        select = select.filter(post::Column::Id.is_in(post_ids));
    }

    if let Some(search) = non_blank(&req.search) {
        select = select.filter(
            Condition::any()
                .add(post::Column::Title.contains(search))
                .add(post::Column::Excerpt.contains(search))
                .add(post::Column::Content.contains(search)),
        );
    }
    if req.featured == Some(true) {
        select = select.filter(post::Column::IsFeatured.eq(true));
    }
    if req.breaking == Some(true) {
        select = select.filter(post::Column::IsBreaking.eq(true));
    }

    select = match req.sort.as_deref() {
        Some("popular") => select.order_by_desc(post::Column::ViewCount),
        _ if published_only => select.order_by_desc(post::Column::PublishedAt),
        _ => select.order_by_desc(post::Column::Updated),
    };
    Ok(Some(select.order_by_desc(post::Column::Id)))
}

async fn get(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
    query: web::Query<CountQuery>,
) -> Result<HttpResponse, AppError> {
    let found = post::Entity::find_by_id(path.into_inner())
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
    let found = post::Entity::find()
        .filter(post::Column::Slug.eq(path.into_inner()))
        .one(db.get_ref())
        .await
        .map_err(db_error)?;
    respond_detail(db.get_ref(), found, &auth, query.count.unwrap_or(false)).await
}

async fn respond_detail(
    db: &DatabaseConnection,
    found: Option<post::Model>,
    auth: &OptionalAuthUser,
    count: bool,
) -> Result<HttpResponse, AppError> {
    // drafts are only previewable from the back office
    let found = found.filter(|p| p.status == STATUS_PUBLISHED || can_enter_admin(auth.0.as_ref()));
    let mut item = match found {
        Some(p) => p,
        None => return Ok(HttpResponse::Ok().json(ResponseDto::<PostDto>::success(None))),
    };

    if count && item.status == STATUS_PUBLISHED {
        increment_view_count(db, "t_post", item.id).await?;
        item.view_count += 1;
    }

    let mut dtos = to_post_dtos(db, vec![item], true).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(dtos.pop())))
}

async fn related(
    db: web::Data<DatabaseConnection>,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, AppError> {
    let base = post::Entity::find_by_id(query.id)
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::fail("post not found"))?;

    let mut select = post::Entity::find()
        .filter(post::Column::Status.eq(STATUS_PUBLISHED))
        .filter(post::Column::Id.ne(base.id));
    if let Some(cid) = base.category_id {
        select = select.filter(post::Column::CategoryId.eq(cid));
    }
    let rows = select
        .order_by_desc(post::Column::PublishedAt)
        .order_by_desc(post::Column::Id)
        .limit(RELATED_LIMIT)
        .all(db.get_ref())
        .await
        .map_err(db_error)?;

    Ok(ok(to_post_dtos(db.get_ref(), rows, false).await?))
}

async fn save(
    db: web::Data<DatabaseConnection>,
    staff: StaffUser,
    payload: web::Json<SavePostRequest>,
) -> Result<HttpResponse, AppError> {
    let title = required(&payload.title, "title")?;
    let content = required(&payload.content, "content")?;
    check_taxonomy(db.get_ref(), payload.category_id, payload.subcategory_id).await?;

    let status = parse_status(payload.status.as_deref());
    let now = Utc::now();
    let model = post::ActiveModel {
        slug: Set(resolve_slug(payload.slug.as_deref(), &title)),
        title: Set(title),
        excerpt: Set(payload.excerpt.clone()),
        content: Set(content),
        featured_image: Set(payload.featured_image.clone()),
        category_id: Set(payload.category_id),
        subcategory_id: Set(payload.subcategory_id),
        author_id: Set(staff.0.user_id),
        status: Set(status.to_string()),
        is_featured: Set(payload.is_featured.unwrap_or(false)),
        is_breaking: Set(payload.is_breaking.unwrap_or(false)),
        view_count: Set(0),
        published_at: Set(if status == STATUS_PUBLISHED { Some(now) } else { None }),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    };
    let tag_ids = payload.tag_ids.clone().unwrap_or_default();

    let inserted = db
        .transaction::<_, post::Model, AppError>(|txn| {
            Box::pin(async move {
                let inserted = model.insert(txn).await.map_err(slug_conflict)?;
                replace_post_tags(txn, inserted.id, &tag_ids).await?;
                Ok(inserted)
            })
        })
        .await
        .map_err(map_tx_error)?;
    debug!("post saved id={} status={}", inserted.id, inserted.status);

    if inserted.status == STATUS_PUBLISHED {
        webhook::notify_published(db.get_ref().clone(), inserted.id);
    }
    Ok(ok(inserted.id))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<SavePostRequest>,
) -> Result<HttpResponse, AppError> {
    let id = payload.id.ok_or_else(|| AppError::param_error("id is required"))?;
    let exist = post::Entity::find_by_id(id)
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::fail("post not found"))?;

    let category_id = payload.category_id.or(exist.category_id);
    let subcategory_id = match payload.category_id {
        // moving to another category drops a stale subcategory
        Some(cid) if Some(cid) != exist.category_id => payload.subcategory_id,
        _ => payload.subcategory_id.or(exist.subcategory_id),
    };
    check_taxonomy(db.get_ref(), category_id, subcategory_id).await?;

    let status = match payload.status.as_deref() {
        Some(s) => parse_status(Some(s)),
        None => parse_status(Some(&exist.status)),
    };
    let becomes_published = status == STATUS_PUBLISHED && exist.status != STATUS_PUBLISHED;
    let title = non_blank(&payload.title).map(str::to_string).unwrap_or(exist.title.clone());

    let mut active: post::ActiveModel = exist.clone().into();
    active.title = Set(title);
    if let Some(slug) = non_blank(&payload.slug) {
        active.slug = Set(resolve_slug(Some(slug), ""));
    }
    if let Some(excerpt) = payload.excerpt.clone() {
        active.excerpt = Set(Some(excerpt));
    }
    if let Some(content) = non_blank(&payload.content) {
        active.content = Set(content.to_string());
    }
    if let Some(image) = payload.featured_image.clone() {
        active.featured_image = Set(Some(image));
    }
    active.category_id = Set(category_id);
    active.subcategory_id = Set(subcategory_id);
    active.status = Set(status.to_string());
    if let Some(v) = payload.is_featured {
        active.is_featured = Set(v);
    }
    if let Some(v) = payload.is_breaking {
        active.is_breaking = Set(v);
    }
    if becomes_published && exist.published_at.is_none() {
        active.published_at = Set(Some(Utc::now()));
    }
    active.updated = Set(Some(Utc::now()));
    let tag_ids = payload.tag_ids.clone();

    db.transaction::<_, (), AppError>(|txn| {
        Box::pin(async move {
            active.update(txn).await.map_err(slug_conflict)?;
            if let Some(tag_ids) = tag_ids {
                replace_post_tags(txn, id, &tag_ids).await?;
            }
            Ok(())
        })
    })
    .await
    .map_err(map_tx_error)?;

    if becomes_published {
        webhook::notify_published(db.get_ref().clone(), id);
    }
    Ok(ok_empty())
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    cache: web::Data<CommentCache>,
    staff: StaffUser,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, AppError> {
    let id = query.id;
    db.transaction::<_, (), AppError>(|txn| {
        Box::pin(async move {
            post_tag::Entity::delete_many()
                .filter(post_tag::Column::PostId.eq(id))
                .exec(txn)
                .await
                .map_err(db_error)?;
            comment::Entity::delete_many()
                .filter(comment::Column::PostId.eq(id))
                .exec(txn)
                .await
                .map_err(db_error)?;
            post::Entity::delete_by_id(id).exec(txn).await.map_err(db_error)?;
            Ok(())
        })
    })
    .await
    .map_err(map_tx_error)?;
    cache.invalidate(id);
    info!("post {} removed by {}", id, staff.0.user_id);

    Ok(ok_empty())
}

async fn set_status(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    query: web::Query<SetStatusQuery>,
) -> Result<HttpResponse, AppError> {
    let exist = post::Entity::find_by_id(query.id)
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::fail("post not found"))?;
    let status = parse_status(Some(&query.status));
    if status == exist.status {
        return Ok(ok_empty());
    }

    let first_publish = status == STATUS_PUBLISHED && exist.published_at.is_none();
    let mut active: post::ActiveModel = exist.into();
    active.status = Set(status.to_string());
    active.updated = Set(Some(Utc::now()));
    if first_publish {
        active.published_at = Set(Some(Utc::now()));
    }
    active.update(db.get_ref()).await.map_err(db_error)?;

    if status == STATUS_PUBLISHED {
        webhook::notify_published(db.get_ref().clone(), query.id);
    } else {
        debug!("post {} moved back to {}", query.id, STATUS_DRAFT);
    }
    Ok(ok_empty())
}

/// Joins categories, authors and tags onto a batch of posts.
pub async fn to_post_dtos(
    db: &DatabaseConnection,
    rows: Vec<post::Model>,
    with_content: bool,
) -> Result<Vec<PostDto>, AppError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let post_ids: Vec<i32> = rows.iter().map(|p| p.id).collect();
    let category_ids: Vec<i32> = rows.iter().filter_map(|p| p.category_id).collect();
    let sub_ids: Vec<i32> = rows.iter().filter_map(|p| p.subcategory_id).collect();
    let author_ids: Vec<i32> = rows.iter().map(|p| p.author_id).collect();

    let categories: HashMap<i32, CategoryRef> = category::Entity::find()
        .filter(category::Column::Id.is_in(category_ids))
        .all(db)
        .await
        .map_err(db_error)?
        .iter()
        .map(|c| (c.id, CategoryRef::from(c)))
        .collect();
    let subcategories: HashMap<i32, CategoryRef> = subcategory::Entity::find()
        .filter(subcategory::Column::Id.is_in(sub_ids))
        .all(db)
        .await
        .map_err(db_error)?
        .iter()
        .map(|s| (s.id, CategoryRef::from(s)))
        .collect();
    let authors: HashMap<i32, AuthorDto> = profile::Entity::find()
        .filter(profile::Column::Id.is_in(author_ids))
        .all(db)
        .await
        .map_err(db_error)?
        .iter()
        .map(|p| (p.id, AuthorDto::from(p)))
        .collect();

    let links = post_tag::Entity::find()
        .filter(post_tag::Column::PostId.is_in(post_ids))
        .all(db)
        .await
        .map_err(db_error)?;
    let tag_ids: Vec<i32> = links.iter().map(|l| l.tag_id).collect();
    let tags: HashMap<i32, TagRef> = tag::Entity::find()
        .filter(tag::Column::Id.is_in(tag_ids))
        .all(db)
        .await
        .map_err(db_error)?
        .iter()
        .map(|t| (t.id, TagRef::from(t)))
        .collect();
    let mut tags_by_post: HashMap<i32, Vec<TagRef>> = HashMap::new();
    for link in links {
        if let Some(t) = tags.get(&link.tag_id) {
            tags_by_post.entry(link.post_id).or_default().push(t.clone());
        }
    }

    let list = rows
        .into_iter()
        .map(|p| PostDto {
            category: p.category_id.and_then(|id| categories.get(&id).cloned()),
            subcategory: p.subcategory_id.and_then(|id| subcategories.get(&id).cloned()),
            author: authors.get(&p.author_id).cloned(),
            tags: tags_by_post.remove(&p.id).unwrap_or_default(),
            content: if with_content { Some(p.content) } else { None },
            id: p.id,
            title: p.title,
            slug: p.slug,
            excerpt: p.excerpt,
            featured_image: p.featured_image,
            status: p.status,
            is_featured: p.is_featured,
            is_breaking: p.is_breaking,
            view_count: p.view_count,
            published_at: p.published_at.map(to_rfc3339),
            created: p.created.map(to_rfc3339),
            updated: p.updated.map(to_rfc3339),
        })
        .collect();
    Ok(list)
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
    use crate::test_support::{memory_db, seed_category, seed_post, seed_profile};

    fn request() -> ListPostRequest {
        ListPostRequest::default()
    }

    #[actix_web::test]
    async fn public_listing_hides_drafts() {
        let db = memory_db().await;
        let editor = seed_profile(&db, "editor", Role::Editor).await;
        seed_post(&db, editor.id, "live", STATUS_PUBLISHED, None).await;
        seed_post(&db, editor.id, "hidden", STATUS_DRAFT, None).await;

        let page = query_posts(&db, &request(), true).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.list[0].slug, "live");
        assert_eq!(page.list[0].author.as_ref().unwrap().display_name, "editor নাম");

        let page = query_posts(&db, &request(), false).await.unwrap();
        assert_eq!(page.total, 2);
    }

    #[actix_web::test]
    async fn category_and_tag_filters_narrow_results() {
        let db = memory_db().await;
        let editor = seed_profile(&db, "editor", Role::Editor).await;
        let sports = seed_category(&db, "khela").await;
        let tagged = seed_post(&db, editor.id, "goal", STATUS_PUBLISHED, Some(sports.id)).await;
        seed_post(&db, editor.id, "other", STATUS_PUBLISHED, None).await;

        let football = tag::ActiveModel {
            name: Set("ফুটবল".to_string()),
            slug: Set("football".to_string()),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();
        replace_post_tags(&db, tagged.id, &[football.id, football.id, 999]).await.unwrap();

        let mut req = request();
        req.category = Some("khela".to_string());
        let page = query_posts(&db, &req, true).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.list[0].category.as_ref().unwrap().slug, "khela");
        assert_eq!(page.list[0].tags.len(), 1);

        let mut req = request();
        req.tag = Some("football".to_string());
        let page = query_posts(&db, &req, true).await.unwrap();
        assert_eq!(page.list.iter().map(|p| p.id).collect::<Vec<_>>(), vec![tagged.id]);

        let mut req = request();
        req.category = Some("missing".to_string());
        assert_eq!(query_posts(&db, &req, true).await.unwrap().total, 0);
    }

    #[actix_web::test]
    async fn search_matches_title() {
        let db = memory_db().await;
        let editor = seed_profile(&db, "editor", Role::Editor).await;
        seed_post(&db, editor.id, "budget", STATUS_PUBLISHED, None).await;
        seed_post(&db, editor.id, "weather", STATUS_PUBLISHED, None).await;

        let mut req = request();
        req.search = Some("budget".to_string());
        let page = query_posts(&db, &req, true).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(page.list[0].content.is_none());
    }

    #[actix_web::test]
    async fn removing_post_drops_comments_tags_and_cached_thread() {
        let db = memory_db().await;
        let config = AppConfig::for_test();
        let cache = web::Data::new(CommentCache::new());
        let editor = seed_profile(&db, "editor", Role::Editor).await;
        let reader = seed_profile(&db, "reader", Role::User).await;
        let doomed = seed_post(&db, editor.id, "batil", STATUS_PUBLISHED, None).await;
        let kept = seed_post(&db, editor.id, "thakbe", STATUS_PUBLISHED, None).await;

        let politics = tag::ActiveModel {
            name: Set("রাজনীতি".to_string()),
            slug: Set("politics".to_string()),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();
        replace_post_tags(&db, doomed.id, &[politics.id]).await.unwrap();
        replace_post_tags(&db, kept.id, &[politics.id]).await.unwrap();
        for target in [doomed.id, kept.id] {
            comment::ActiveModel {
                post_id: Set(target),
                author_id: Set(editor.id),
                content: Set("মন্তব্য".to_string()),
                approved: Set(true),
                created: Set(Some(Utc::now())),
                ..Default::default()
            }
            .insert(&db)
            .await
            .unwrap();
        }
        assert_eq!(cache.rows_for_post(&db, doomed.id).await.unwrap().len(), 1);
        assert!(cache.is_cached(doomed.id));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db.clone()))
                .app_data(web::Data::new(config.clone()))
                .app_data(cache.clone())
                .service(web::scope("/api/post").configure(super::config)),
        )
        .await;
        let uri = format!("/api/post/remove?id={}", doomed.id);
        let refused = test::TestRequest::post()
            .uri(&uri)
            .insert_header(("token", issue_token(&config, reader.id).unwrap()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, refused).await;
        assert_eq!(body["code"], 5);
        assert!(cache.is_cached(doomed.id));

        let removed = test::TestRequest::post()
            .uri(&uri)
            .insert_header(("token", issue_token(&config, editor.id).unwrap()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, removed).await;
        assert_eq!(body["code"], 0);

        assert!(post::Entity::find_by_id(doomed.id).one(&db).await.unwrap().is_none());
        let comments_left = comment::Entity::find()
            .filter(comment::Column::PostId.eq(doomed.id))
            .count(&db)
            .await
            .unwrap();
        assert_eq!(comments_left, 0);
        let links_left = post_tag::Entity::find()
            .filter(post_tag::Column::PostId.eq(doomed.id))
            .count(&db)
            .await
            .unwrap();
        assert_eq!(links_left, 0);
        assert!(!cache.is_cached(doomed.id));

        let other_comments = comment::Entity::find()
            .filter(comment::Column::PostId.eq(kept.id))
            .count(&db)
            .await
            .unwrap();
        assert_eq!(other_comments, 1);
        let other_links = post_tag::Entity::find()
            .filter(post_tag::Column::PostId.eq(kept.id))
            .count(&db)
            .await
            .unwrap();
        assert_eq!(other_links, 1);
    }
}
