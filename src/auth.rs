use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::entity::profile;
use crate::error::{db_error, AppError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    Editor,
    User,
}

impl Role {
    /// Unknown or missing roles fall back to the unprivileged default.
    pub fn parse(input: Option<&str>) -> Self {
        match input.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("ADMIN") => Role::Admin,
            Some("EDITOR") => Role::Editor,
            _ => Role::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Editor => "EDITOR",
            Role::User => "USER",
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::Editor)
    }
}

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: i32,
    pub role: Role,
}

#[derive(Clone, Debug)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

impl OptionalAuthUser {
    pub fn user_id(&self) -> Option<i32> {
        self.0.as_ref().map(|a| a.user_id)
    }
}

/// An authenticated admin or editor.
#[derive(Clone, Debug)]
pub struct StaffUser(pub AuthUser);

/// An authenticated admin.
#[derive(Clone, Debug)]
pub struct AdminUser(pub AuthUser);

/// Admission rule for the back office: only admins and editors get in,
/// anonymous actors never do.
pub fn can_enter_admin(actor: Option<&AuthUser>) -> bool {
    actor.map(|a| a.role.is_privileged()).unwrap_or(false)
}

#[derive(Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "loginId")]
    pub login_id: i32,
    pub exp: usize,
}

pub fn issue_token(config: &AppConfig, user_id: i32) -> Result<String, AppError> {
    let exp = (Utc::now() + Duration::days(config.jwt_expire_days)).timestamp() as usize;
    let claims = Claims { login_id: user_id, exp };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|_| AppError::system_exception())
}

fn decode_token(config: &AppConfig, token: &str) -> Result<Claims, AppError> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            debug!("token rejected: {}", e);
            AppError::need_login()
        })
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let (db, config) = match app_state(req) {
            Some(state) => state,
            None => {
                return Box::pin(async { Err(AppError::system_exception().into()) });
            }
        };
        let token = extract_token(req, &config);

        Box::pin(async move {
            let token = token.ok_or_else(AppError::need_login)?;
            let auth = authenticate_token(&db, &config, &token).await?;
            Ok(auth)
        })
    }
}

impl FromRequest for OptionalAuthUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let (db, config) = match app_state(req) {
            Some(state) => state,
            None => {
                return Box::pin(async { Ok(OptionalAuthUser(None)) });
            }
        };
        let token = extract_token(req, &config);

        Box::pin(async move {
            if let Some(token) = token {
                let auth = authenticate_token(&db, &config, &token).await.ok();
                return Ok(OptionalAuthUser(auth));
            }
            Ok(OptionalAuthUser(None))
        })
    }
}

impl FromRequest for StaffUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let auth = AuthUser::from_request(req, payload);
        Box::pin(async move {
            let auth = auth.await?;
            if !can_enter_admin(Some(&auth)) {
                return Err(AppError::no_permission().into());
            }
            Ok(StaffUser(auth))
        })
    }
}

impl FromRequest for AdminUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let auth = AuthUser::from_request(req, payload);
        Box::pin(async move {
            let auth = auth.await?;
            if auth.role != Role::Admin {
                return Err(AppError::no_permission().into());
            }
            Ok(AdminUser(auth))
        })
    }
}

fn app_state(req: &HttpRequest) -> Option<(web::Data<DatabaseConnection>, web::Data<AppConfig>)> {
    let db = req.app_data::<web::Data<DatabaseConnection>>()?.clone();
    let config = req.app_data::<web::Data<AppConfig>>()?.clone();
    Some((db, config))
}

fn extract_token(req: &HttpRequest, config: &AppConfig) -> Option<String> {
    let header = config.token_header.as_str();
    req.headers()
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_start_matches("Bearer ").trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn authenticate_token(
    db: &DatabaseConnection,
    config: &AppConfig,
    token: &str,
) -> Result<AuthUser, AppError> {
    let claims = decode_token(config, token)?;
    // role is read fresh so a demotion takes effect on the next request
    let user = profile::Entity::find_by_id(claims.login_id)
        .one(db)
        .await
        .map_err(db_error)?
        .ok_or_else(AppError::need_login)?;

    Ok(AuthUser {
        user_id: user.id,
        role: Role::parse(Some(&user.role)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role) -> AuthUser {
        AuthUser { user_id: 1, role }
    }

    #[test]
    fn role_parsing_is_closed() {
        assert_eq!(Role::parse(Some("ADMIN")), Role::Admin);
        assert_eq!(Role::parse(Some(" editor ")), Role::Editor);
        assert_eq!(Role::parse(Some("USER")), Role::User);
        assert_eq!(Role::parse(Some("superuser")), Role::User);
        assert_eq!(Role::parse(None), Role::User);
        assert_eq!(Role::parse(Some(Role::Editor.as_str())), Role::Editor);
    }

    #[test]
    fn gate_admits_only_privileged_roles() {
        assert!(can_enter_admin(Some(&actor(Role::Admin))));
        assert!(can_enter_admin(Some(&actor(Role::Editor))));
        assert!(!can_enter_admin(Some(&actor(Role::User))));
        assert!(!can_enter_admin(None));
    }

    #[test]
    fn issued_token_decodes_to_same_user() {
        let config = AppConfig::for_test();
        let token = issue_token(&config, 42).unwrap();
        let claims = decode_token(&config, &token).unwrap();
        assert_eq!(claims.login_id, 42);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let config = AppConfig::for_test();
        let mut other = AppConfig::for_test();
        other.jwt_secret = "another-secret".to_string();
        let token = issue_token(&other, 42).unwrap();
        let err = decode_token(&config, &token).err().unwrap();
        assert_eq!(err.code(), 3);
    }
}
