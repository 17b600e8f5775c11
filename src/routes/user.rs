use actix_web::{web, HttpResponse};
use bcrypt::{hash, verify};
use chrono::Utc;
use log::{info, warn};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

use crate::auth::{issue_token, AdminUser, AuthUser, OptionalAuthUser, Role};
use crate::config::AppConfig;
use crate::entity::profile;
use crate::error::{db_error, AppError};
use crate::response::{ok, ok_empty, to_rfc3339, Page, PageRequest};
use crate::sql::is_duplicate;
use crate::sys_config as sys_config_store;

const BCRYPT_COST: u32 = 10;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/register").route(web::post().to(register_user)))
        .service(web::resource("/login").route(web::post().to(login)))
        .service(web::resource("/logout").route(web::post().to(logout)))
        .service(web::resource("/current").route(web::post().to(current_user)))
        .service(web::resource("/update").route(web::post().to(update_user)))
        .service(web::resource("/list").route(web::post().to(list_users)))
        .service(web::resource("/setRole").route(web::post().to(set_role)))
        .service(web::resource("/remove").route(web::post().to(remove_user)));
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterUserRequest {
    username: Option<String>,
    password: Option<String>,
    display_name: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUserRequest {
    display_name: Option<String>,
    email: Option<String>,
    bio: Option<String>,
    avatar_url: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    username: String,
    role: String,
    user_id: i32,
    can_enter_admin: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDto {
    id: i32,
    username: String,
    email: Option<String>,
    display_name: Option<String>,
    bio: Option<String>,
    avatar_url: Option<String>,
    role: String,
    created: Option<String>,
}

#[derive(Deserialize)]
struct SetRoleQuery {
    id: i32,
    role: String,
}

#[derive(Deserialize)]
struct RemoveQuery {
    id: i32,
}

/// Creates the bootstrap admin from `ADMIN_USERNAME`/`ADMIN_PASSWORD` when
/// no admin account exists yet.
pub async fn ensure_admin(db: &DatabaseConnection, config: &AppConfig) -> Result<(), AppError> {
    let (username, password) = match (&config.admin_username, &config.admin_password) {
        (Some(u), Some(p)) => (u.clone(), p.clone()),
        _ => return Ok(()),
    };
    let existing = profile::Entity::find()
        .filter(profile::Column::Role.eq(Role::Admin.as_str()))
        .count(db)
        .await
        .map_err(db_error)?;
    if existing > 0 {
        return Ok(());
    }

    let password_hash = hash(password, BCRYPT_COST).map_err(|_| AppError::system_exception())?;
    let now = Utc::now();
    profile::ActiveModel {
        username: Set(username.clone()),
        password_hash: Set(password_hash),
        display_name: Set(Some(username.clone())),
        role: Set(Role::Admin.as_str().to_string()),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(db_error)?;
    info!("bootstrap admin '{}' created", username);
    Ok(())
}

async fn register_user(
    db: web::Data<DatabaseConnection>,
    payload: web::Json<RegisterUserRequest>,
) -> Result<HttpResponse, AppError> {
    let username = payload.username.clone().unwrap_or_default().trim().to_string();
    let password = payload.password.clone().unwrap_or_default();
    if username.is_empty() {
        return Err(AppError::param_error("username cannot be empty"));
    }
    if password.trim().len() < 6 {
        return Err(AppError::param_error("password must be at least 6 characters"));
    }

    let open_register = sys_config_store::get_boolean(db.get_ref(), sys_config_store::OPEN_REGISTER)
        .await
        .map_err(db_error)?;
    if !open_register {
        return Err(AppError::fail("registration is closed"));
    }

    let display_name = payload
        .display_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| username.clone());

    let password_hash = hash(password, BCRYPT_COST).map_err(|_| AppError::system_exception())?;
    let now = Utc::now();

    let user_model = profile::ActiveModel {
        username: Set(username),
        password_hash: Set(password_hash),
        email: Set(payload.email.clone()),
        display_name: Set(Some(display_name)),
        role: Set(Role::User.as_str().to_string()),
        created: Set(Some(now)),
        updated: Set(Some(now)),
        ..Default::default()
    };

    if let Err(err) = user_model.insert(db.get_ref()).await {
        if is_duplicate(&err) {
            return Err(AppError::fail("username already exists"));
        }
        return Err(db_error(err));
    }

    Ok(ok_empty())
}

async fn login(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let username = payload.username.clone().unwrap_or_default();
    let password = payload.password.clone().unwrap_or_default();
    if username.trim().is_empty() || password.is_empty() {
        return Err(AppError::param_error("username and password are required"));
    }

    let user = profile::Entity::find()
        .filter(profile::Column::Username.eq(username.trim()))
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::fail("invalid username or password"))?;

    let matched = verify(password, &user.password_hash).unwrap_or(false);
    if !matched {
        warn!("failed login for '{}'", user.username);
        return Err(AppError::fail("invalid username or password"));
    }

    let token = issue_token(&config, user.id)?;
    let role = Role::parse(Some(&user.role));
    let response = LoginResponse {
        token,
        username: user.username,
        role: role.as_str().to_string(),
        user_id: user.id,
        can_enter_admin: role.is_privileged(),
    };

    Ok(ok(response))
}

async fn logout(_auth: AuthUser) -> Result<HttpResponse, AppError> {
    Ok(ok_empty())
}

async fn current_user(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
) -> Result<HttpResponse, AppError> {
    let user = match auth.user_id() {
        Some(id) => profile::Entity::find_by_id(id)
            .one(db.get_ref())
            .await
            .map_err(db_error)?,
        None => None,
    };
    Ok(HttpResponse::Ok().json(crate::response::ResponseDto::success(user.map(to_profile_dto))))
}

async fn update_user(
    db: web::Data<DatabaseConnection>,
    auth: AuthUser,
    payload: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse, AppError> {
    let mut active = profile::ActiveModel {
        id: Set(auth.user_id),
        updated: Set(Some(Utc::now())),
        ..Default::default()
    };

    if let Some(v) = payload.display_name.clone() {
        active.display_name = Set(Some(v));
    }
    if let Some(v) = payload.email.clone() {
        active.email = Set(Some(v));
    }
    if let Some(v) = payload.bio.clone() {
        active.bio = Set(Some(v));
    }
    if let Some(v) = payload.avatar_url.clone() {
        active.avatar_url = Set(Some(v));
    }
    if let Some(password) = payload.password.clone() {
        if !password.trim().is_empty() {
            let hashed = hash(password, BCRYPT_COST).map_err(|_| AppError::system_exception())?;
            active.password_hash = Set(hashed);
        }
    }

    profile::Entity::update(active)
        .exec(db.get_ref())
        .await
        .map_err(db_error)?;

    Ok(ok_empty())
}

async fn list_users(
    db: web::Data<DatabaseConnection>,
    _admin: AdminUser,
    payload: web::Json<PageRequest>,
) -> Result<HttpResponse, AppError> {
    let paginator = profile::Entity::find()
        .order_by_asc(profile::Column::Id)
        .paginate(db.get_ref(), payload.size());
    let counts = paginator.num_items_and_pages().await.map_err(db_error)?;
    let rows = paginator.fetch_page(payload.index()).await.map_err(db_error)?;

    Ok(ok(Page {
        total: counts.number_of_items,
        total_page: counts.number_of_pages,
        list: rows.into_iter().map(to_profile_dto).collect(),
    }))
}

async fn set_role(
    db: web::Data<DatabaseConnection>,
    admin: AdminUser,
    query: web::Query<SetRoleQuery>,
) -> Result<HttpResponse, AppError> {
    let role = match query.role.trim().to_ascii_uppercase().as_str() {
        "ADMIN" => Role::Admin,
        "EDITOR" => Role::Editor,
        "USER" => Role::User,
        _ => return Err(AppError::param_error("role must be ADMIN, EDITOR or USER")),
    };
    if query.id == admin.0.user_id && role != Role::Admin {
        return Err(AppError::fail("cannot demote yourself"));
    }

    let active = profile::ActiveModel {
        id: Set(query.id),
        role: Set(role.as_str().to_string()),
        updated: Set(Some(Utc::now())),
        ..Default::default()
    };
    profile::Entity::update(active)
        .exec(db.get_ref())
        .await
        .map_err(|e| match e {
            sea_orm::DbErr::RecordNotUpdated => AppError::fail("user not found"),
            other => db_error(other),
        })?;
    info!("user {} role set to {} by {}", query.id, role.as_str(), admin.0.user_id);

    Ok(ok_empty())
}

async fn remove_user(
    db: web::Data<DatabaseConnection>,
    admin: AdminUser,
    query: web::Query<RemoveQuery>,
) -> Result<HttpResponse, AppError> {
    if query.id == admin.0.user_id {
        return Err(AppError::fail("cannot remove yourself"));
    }
    profile::Entity::delete_by_id(query.id)
        .exec(db.get_ref())
        .await
        .map_err(db_error)?;
    Ok(ok_empty())
}

pub fn to_profile_dto(model: profile::Model) -> ProfileDto {
    ProfileDto {
        id: model.id,
        username: model.username,
        email: model.email,
        display_name: model.display_name,
        bio: model.bio,
        avatar_url: model.avatar_url,
        role: Role::parse(Some(&model.role)).as_str().to_string(),
        created: model.created.map(to_rfc3339),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use serde_json::Value;

    use crate::auth::issue_token;
    use crate::test_support::{memory_db, seed_profile};

    #[actix_web::test]
    async fn bootstrap_admin_is_created_once() {
        let db = memory_db().await;
        let mut config = AppConfig::for_test();
        config.admin_username = Some("root".to_string());
        config.admin_password = Some("secret-pass".to_string());

        ensure_admin(&db, &config).await.unwrap();
        ensure_admin(&db, &config).await.unwrap();

        let admins = profile::Entity::find()
            .filter(profile::Column::Role.eq("ADMIN"))
            .all(&db)
            .await
            .unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].username, "root");
    }

    #[actix_web::test]
    async fn editor_cannot_change_roles_but_admin_can() {
        let db = memory_db().await;
        let config = AppConfig::for_test();
        let admin = seed_profile(&db, "admin", Role::Admin).await;
        let editor = seed_profile(&db, "editor", Role::Editor).await;
        let reader = seed_profile(&db, "reader", Role::User).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db.clone()))
                .app_data(web::Data::new(config.clone()))
                .service(web::scope("/api/user").configure(super::config)),
        )
        .await;

        let uri = format!("/api/user/setRole?id={}&role=EDITOR", reader.id);
        let req = test::TestRequest::post()
            .uri(&uri)
            .insert_header(("token", issue_token(&config, editor.id).unwrap()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 5);

        let req = test::TestRequest::post()
            .uri(&uri)
            .insert_header(("token", issue_token(&config, admin.id).unwrap()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 0);

        let updated = profile::Entity::find_by_id(reader.id).one(&db).await.unwrap().unwrap();
        assert_eq!(updated.role, "EDITOR");
    }

    #[actix_web::test]
    async fn login_returns_gate_flag() {
        let db = memory_db().await;
        let config = AppConfig::for_test();
        profile::ActiveModel {
            username: Set("sampadak".to_string()),
            password_hash: Set(hash("correct-horse", 4).unwrap()),
            role: Set("EDITOR".to_string()),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db.clone()))
                .app_data(web::Data::new(config.clone()))
                .service(web::scope("/api/user").configure(super::config)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/user/login")
            .set_json(serde_json::json!({"username": "sampadak", "password": "wrong"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 2);

        let req = test::TestRequest::post()
            .uri("/api/user/login")
            .set_json(serde_json::json!({"username": "sampadak", "password": "correct-horse"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["canEnterAdmin"], true);
        assert_eq!(body["data"]["role"], "EDITOR");
    }
}
