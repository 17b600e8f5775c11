use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use rss::{CategoryBuilder, ChannelBuilder, GuidBuilder, ItemBuilder};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};

use crate::entity::{category, post, profile, STATUS_PUBLISHED};
use crate::error::{db_error, AppError};
use crate::sys_config as sys_config_store;

const FEED_SIZE: u64 = 20;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("").route(web::get().to(get_rss)));
}

async fn get_rss(db: web::Data<DatabaseConnection>) -> Result<HttpResponse, AppError> {
    let channel = build_channel(db.get_ref()).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/rss+xml; charset=utf-8")
        .body(channel.to_string()))
}

async fn build_channel(db: &DatabaseConnection) -> Result<rss::Channel, AppError> {
    let title = sys_config_store::get_string(db, sys_config_store::WEBSITE_TITLE)
        .await
        .map_err(db_error)?
        .unwrap_or_default();
    let description = sys_config_store::get_string(db, sys_config_store::WEBSITE_DESCRIPTION)
        .await
        .map_err(db_error)?
        .unwrap_or_default();
    let domain = sys_config_store::get_string(db, sys_config_store::DOMAIN)
        .await
        .map_err(db_error)?
        .unwrap_or_default();
    let domain = domain.trim_end_matches('/');

    let posts = post::Entity::find()
        .filter(post::Column::Status.eq(STATUS_PUBLISHED))
        .order_by_desc(post::Column::PublishedAt)
        .order_by_desc(post::Column::Id)
        .limit(FEED_SIZE)
        .all(db)
        .await
        .map_err(db_error)?;

    let author_ids: Vec<i32> = posts.iter().map(|p| p.author_id).collect();
    let authors: HashMap<i32, String> = profile::Entity::find()
        .filter(profile::Column::Id.is_in(author_ids))
        .all(db)
        .await
        .map_err(db_error)?
        .into_iter()
        .map(|p| (p.id, p.display_name.unwrap_or(p.username)))
        .collect();
    let category_ids: Vec<i32> = posts.iter().filter_map(|p| p.category_id).collect();
    let categories: HashMap<i32, String> = category::Entity::find()
        .filter(category::Column::Id.is_in(category_ids))
        .all(db)
        .await
        .map_err(db_error)?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();

    let items = posts
        .into_iter()
        .map(|p| {
            let link = format!("{}/article/{}", domain, p.slug);
            let guid = GuidBuilder::default().value(link.clone()).permalink(true).build();
            let categories = p
                .category_id
                .and_then(|cid| categories.get(&cid))
                .map(|name| vec![CategoryBuilder::default().name(name.clone()).build()])
                .unwrap_or_default();
            ItemBuilder::default()
                .title(Some(p.title))
                .link(Some(link))
                .guid(Some(guid))
                .description(p.excerpt)
                .author(authors.get(&p.author_id).cloned())
                .pub_date(p.published_at.or(p.created).map(|d| d.to_rfc2822()))
                .categories(categories)
                .build()
        })
        .collect::<Vec<_>>();

    Ok(ChannelBuilder::default()
        .title(title)
        .link(domain.to_string())
        .description(description)
        .items(items)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::entity::STATUS_DRAFT;
    use crate::test_support::{memory_db, seed_category, seed_post, seed_profile};

    #[actix_web::test]
    async fn feed_lists_published_posts_only() {
        let db = memory_db().await;
        let editor = seed_profile(&db, "editor", Role::Editor).await;
        let politics = seed_category(&db, "politics").await;
        seed_post(&db, editor.id, "live", STATUS_PUBLISHED, Some(politics.id)).await;
        seed_post(&db, editor.id, "hidden", STATUS_DRAFT, None).await;

        let channel = build_channel(&db).await.unwrap();
        assert_eq!(channel.items().len(), 1);
        let item = &channel.items()[0];
        assert_eq!(item.link(), Some("/article/live"));
        assert_eq!(item.author(), Some("editor নাম"));
        assert_eq!(item.categories()[0].name(), "বিভাগ politics");
        assert!(channel.to_string().contains("শিরোনাম live"));
    }
}
