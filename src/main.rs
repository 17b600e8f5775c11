mod auth;
mod cache;
mod comment_tree;
mod config;
mod db;
mod entity;
mod error;
mod response;
mod routes;
mod slug;
mod sql;
mod sys_config;
#[cfg(test)]
mod test_support;
mod webhook;

use std::io;

use actix_web::{middleware, web, App, HttpServer};
use cache::CommentCache;
use config::AppConfig;
use db::connect_db;
use log::{error, info};
use response::json_error_handler;
use routes::sys_config as sys_config_routes;
use routes::{ad, category, comment, dashboard, newsletter, opinion, post, resource, rss, tag, user, video};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let config = AppConfig::from_env();
    let db = connect_db(&config).await.map_err(|e| {
        error!("database connection failed: {}", e);
        io::Error::new(io::ErrorKind::Other, e.to_string())
    })?;
    if let Err(e) = webhook::init_token(&db).await {
        error!("webhook token init failed: {}", e);
    }
    if let Err(e) = user::ensure_admin(&db, &config).await {
        error!("admin bootstrap failed: {}", e);
    }
    let comment_cache = web::Data::new(CommentCache::new());
    let server_port = config.server_port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(db.clone()))
            .app_data(comment_cache.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .wrap(actix_web::middleware::from_fn(routes::cors::cors_handler))
            .service(
                web::scope("/api")
                    .service(web::scope("/user").configure(user::config))
                    .service(web::scope("/post").configure(post::config))
                    .service(web::scope("/category").configure(category::config))
                    .service(web::scope("/tag").configure(tag::config))
                    .service(web::scope("/comment").configure(comment::config))
                    .service(web::scope("/video").configure(video::config))
                    .service(web::scope("/opinion").configure(opinion::config))
                    .service(web::scope("/ad").configure(ad::config))
                    .service(web::scope("/newsletter").configure(newsletter::config))
                    .service(web::scope("/resource").configure(resource::config))
                    .service(web::scope("/sysConfig").configure(sys_config_routes::config))
                    .service(web::scope("/dashboard").configure(dashboard::config)),
            )
            .service(web::scope("/rss").configure(rss::config))
    })
    .bind(("0.0.0.0", server_port))?;
    info!("server started at http://0.0.0.0:{}", server_port);
    server.run().await
}
