use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};

use crate::auth::Role;
use crate::db::init_sqlite_schema;
use crate::entity::{category, post, profile, STATUS_PUBLISHED};

pub async fn memory_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    init_sqlite_schema(&db).await.unwrap();
    db
}

pub async fn seed_profile(db: &DatabaseConnection, username: &str, role: Role) -> profile::Model {
    profile::ActiveModel {
        username: Set(username.to_string()),
        password_hash: Set("x".to_string()),
        display_name: Set(Some(format!("{} নাম", username))),
        role: Set(role.as_str().to_string()),
        created: Set(Some(Utc::now())),
        updated: Set(Some(Utc::now())),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_category(db: &DatabaseConnection, slug: &str) -> category::Model {
    category::ActiveModel {
        name: Set(format!("বিভাগ {}", slug)),
        slug: Set(slug.to_string()),
        sort_order: Set(0),
        created: Set(Some(Utc::now())),
        updated: Set(Some(Utc::now())),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn seed_post(
    db: &DatabaseConnection,
    author_id: i32,
    slug: &str,
    status: &str,
    category_id: Option<i32>,
) -> post::Model {
    let now = Utc::now();
    post::ActiveModel {
        title: Set(format!("শিরোনাম {}", slug)),
        slug: Set(slug.to_string()),
        content: Set("বিস্তারিত খবর".to_string()),
        category_id: Set(category_id),
        author_id: Set(author_id),
        status: Set(status.to_string()),
        is_featured: Set(false),
        is_breaking: Set(false),
        view_count: Set(0),
        published_at: Set(if status == STATUS_PUBLISHED { Some(now) } else { None }),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}
