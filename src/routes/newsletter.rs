use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

use crate::auth::StaffUser;
use crate::entity::newsletter_subscriber;
use crate::error::{db_error, AppError};
use crate::response::{ok, ok_empty, to_rfc3339, Page, PageRequest};

static EMAIL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$").ok());

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/subscribe").route(web::post().to(subscribe)))
        .service(web::resource("/unsubscribe").route(web::post().to(unsubscribe)))
        .service(web::resource("/list").route(web::post().to(list)))
        .service(web::resource("/remove").route(web::post().to(remove)));
}

#[derive(Deserialize)]
pub struct EmailRequest {
    pub email: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListSubscriberRequest {
    #[serde(flatten)]
    page: PageRequest,
    active: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriberDto {
    id: i32,
    email: String,
    is_active: bool,
    created: Option<String>,
}

#[derive(Deserialize)]
struct IdQuery {
    id: i32,
}

/// Lower-cased, trimmed address, or a parameter error when it does not look like an email.
pub fn normalize_email(raw: Option<&str>) -> Result<String, AppError> {
    let re = EMAIL_RE.as_ref().ok_or_else(AppError::system_exception)?;
    let email = raw.map(str::trim).unwrap_or_default().to_lowercase();
    if email.len() > 254 || !re.is_match(&email) {
        return Err(AppError::param_error("invalid email address"));
    }
    Ok(email)
}

async fn subscribe(
    db: web::Data<DatabaseConnection>,
    payload: web::Json<EmailRequest>,
) -> Result<HttpResponse, AppError> {
    let email = normalize_email(payload.email.as_deref())?;
    subscribe_email(db.get_ref(), &email).await?;
    Ok(ok_empty())
}

pub async fn subscribe_email(db: &DatabaseConnection, email: &str) -> Result<(), AppError> {
    let exist = newsletter_subscriber::Entity::find()
        .filter(newsletter_subscriber::Column::Email.eq(email))
        .one(db)
        .await
        .map_err(db_error)?;

    let now = Utc::now();
    match exist {
        Some(s) if s.is_active => Err(AppError::fail("already subscribed")),
        Some(s) => {
            let mut active: newsletter_subscriber::ActiveModel = s.into();
            active.is_active = Set(true);
            active.updated = Set(Some(now));
            active.update(db).await.map_err(db_error)?;
            info!("newsletter subscription reactivated");
            Ok(())
        }
        None => {
            newsletter_subscriber::ActiveModel {
                email: Set(email.to_string()),
                is_active: Set(true),
                created: Set(Some(now)),
                updated: Set(Some(now)),
                ..Default::default()
            }
            .insert(db)
            .await
            .map_err(db_error)?;
            Ok(())
        }
    }
}

async fn unsubscribe(
    db: web::Data<DatabaseConnection>,
    payload: web::Json<EmailRequest>,
) -> Result<HttpResponse, AppError> {
    let email = normalize_email(payload.email.as_deref())?;
    let exist = newsletter_subscriber::Entity::find()
        .filter(newsletter_subscriber::Column::Email.eq(email))
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .filter(|s| s.is_active)
        .ok_or_else(|| AppError::fail("not subscribed"))?;

    let mut active: newsletter_subscriber::ActiveModel = exist.into();
    active.is_active = Set(false);
    active.updated = Set(Some(Utc::now()));
    active.update(db.get_ref()).await.map_err(db_error)?;
    Ok(ok_empty())
}

async fn list(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    payload: web::Json<ListSubscriberRequest>,
) -> Result<HttpResponse, AppError> {
    let mut select = newsletter_subscriber::Entity::find();
    if let Some(active) = payload.active {
        select = select.filter(newsletter_subscriber::Column::IsActive.eq(active));
    }
    let paginator = select
        .order_by_desc(newsletter_subscriber::Column::Id)
        .paginate(db.get_ref(), payload.page.size());
    let counts = paginator.num_items_and_pages().await.map_err(db_error)?;
    let rows = paginator.fetch_page(payload.page.index()).await.map_err(db_error)?;

    let list = rows
        .into_iter()
        .map(|s| SubscriberDto {
            id: s.id,
            email: s.email,
            is_active: s.is_active,
            created: s.created.map(to_rfc3339),
        })
        .collect();
    Ok(ok(Page {
        total: counts.number_of_items,
        total_page: counts.number_of_pages,
        list,
    }))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    _staff: StaffUser,
    query: web::Query<IdQuery>,
) -> Result<HttpResponse, AppError> {
    newsletter_subscriber::Entity::delete_by_id(query.id)
        .exec(db.get_ref())
        .await
        .map_err(db_error)?;
    Ok(ok_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;

    #[test]
    fn email_shape_is_checked() {
        assert_eq!(normalize_email(Some("  Reader@Example.COM ")).unwrap(), "reader@example.com");
        assert!(normalize_email(Some("news.desk+bd@mail.example.org")).is_ok());
        for bad in ["", "no-at-sign", "a@b", "a@@b.com", "পাঠক@example.com", "a b@c.com"] {
            assert_eq!(normalize_email(Some(bad)).err().unwrap().code(), 1, "{}", bad);
        }
        assert!(normalize_email(None).is_err());
    }

    #[actix_web::test]
    async fn resubscribe_reactivates() {
        let db = memory_db().await;
        subscribe_email(&db, "reader@example.com").await.unwrap();
        assert_eq!(subscribe_email(&db, "reader@example.com").await.err().unwrap().code(), 2);

        let row = newsletter_subscriber::Entity::find().one(&db).await.unwrap().unwrap();
        let mut active: newsletter_subscriber::ActiveModel = row.into();
        active.is_active = Set(false);
        active.update(&db).await.unwrap();

        subscribe_email(&db, "reader@example.com").await.unwrap();
        let rows = newsletter_subscriber::Entity::find().all(&db).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_active);
    }
}
