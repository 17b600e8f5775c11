use actix_web::{web, HttpResponse};
use log::info;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};

use crate::auth::{AdminUser, StaffUser};
use crate::entity::sys_config;
use crate::error::{db_error, AppError};
use crate::response::{ok, ok_empty};
use crate::sys_config as sys_config_store;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/save").route(web::post().to(save)))
        .service(web::resource("/get").route(web::get().to(get_all)))
        .service(web::resource("/").route(web::get().to(get_front_config)));
}

#[derive(Deserialize)]
struct SaveSysConfigRequest {
    items: Option<Vec<SysConfigDto>>,
}

#[derive(Serialize, Deserialize, Clone)]
struct SysConfigDto {
    key: String,
    value: Option<String>,
}

async fn save(
    db: web::Data<DatabaseConnection>,
    admin: AdminUser,
    payload: web::Json<SaveSysConfigRequest>,
) -> Result<HttpResponse, AppError> {
    let items = payload
        .items
        .clone()
        .ok_or_else(|| AppError::param_error("items must not be null"))?;

    for item in items {
        if item.key == sys_config_store::WEB_HOOK_TOKEN {
            continue;
        }
        let active = sys_config::ActiveModel {
            key: Set(item.key.clone()),
            value: Set(item.value),
            ..Default::default()
        };
        match sys_config::Entity::update(active).exec(db.get_ref()).await {
            Ok(_) => {}
            Err(sea_orm::DbErr::RecordNotUpdated) => {
                return Err(AppError::param_error(format!("unknown setting {}", item.key)));
            }
            Err(e) => return Err(db_error(e)),
        }
    }
    info!("site settings saved by {}", admin.0.user_id);

    Ok(ok_empty())
}

async fn get_all(db: web::Data<DatabaseConnection>, _staff: StaffUser) -> Result<HttpResponse, AppError> {
    let list = sys_config::Entity::find()
        .order_by_asc(sys_config::Column::Key)
        .all(db.get_ref())
        .await
        .map_err(db_error)?;
    Ok(ok(list.into_iter().map(to_dto).collect::<Vec<_>>()))
}

async fn get_front_config(db: web::Data<DatabaseConnection>) -> Result<HttpResponse, AppError> {
    let list = sys_config::Entity::find()
        .filter(sys_config::Column::Key.is_in(sys_config_store::FRONT_KEYS.iter().map(|s| s.to_string())))
        .order_by_asc(sys_config::Column::Key)
        .all(db.get_ref())
        .await
        .map_err(db_error)?;
    Ok(ok(list.into_iter().map(to_dto).collect::<Vec<_>>()))
}

fn to_dto(model: sys_config::Model) -> SysConfigDto {
    SysConfigDto {
        key: model.key.clone(),
        value: Some(sys_config_store::effective_value(model)),
    }
}
