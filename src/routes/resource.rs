use std::path::{Path, PathBuf};

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use chrono::Utc;
use futures_util::StreamExt;
use log::{info, warn};
use md5::{Digest, Md5};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::auth::StaffUser;
use crate::config::AppConfig;
use crate::entity::resource;
use crate::error::{db_error, AppError};
use crate::response::ok;
use crate::sys_config as sys_config_store;

const STORAGE_LOCAL: &str = "LOCAL";
const STORAGE_AWSS3: &str = "AWSS3";

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/upload").route(web::post().to(upload)))
        .service(web::resource("/{public_id}").route(web::get().to(get_resource)));
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResourceResponse {
    public_id: String,
    url: String,
    suffix: String,
    storage_type: String,
    file_type: String,
    file_name: String,
    size: u64,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct S3Param {
    #[serde(default)]
    access_key: String,
    #[serde(default)]
    secret_key: String,
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    prefix: String,
}

async fn upload(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    staff: StaffUser,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let storage_type = sys_config_store::get_string(db.get_ref(), sys_config_store::STORAGE_TYPE)
        .await
        .map_err(db_error)?
        .unwrap_or_else(|| STORAGE_LOCAL.to_string());

    let mut responses = Vec::new();
    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|_| AppError::fail("failed to read upload"))?;
        let filename = field
            .content_disposition()
            .get_filename()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "file".to_string());

        let public_id = generate_public_id();
        let suffix = file_suffix(&filename);
        let target_path = local_path(&config.upload_storage_path, &public_id, &suffix);
        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|_| AppError::fail("failed to store upload"))?;
        }

        let mut f = tokio::fs::File::create(&target_path)
            .await
            .map_err(|_| AppError::fail("failed to store upload"))?;
        let mut hasher = Md5::new();
        let mut size: u64 = 0;
        while let Some(chunk) = field.next().await {
            let data = match chunk {
                Ok(data) => data,
                Err(_) => {
                    discard(&target_path).await;
                    return Err(AppError::fail("failed to read upload"));
                }
            };
            size += data.len() as u64;
            if size > config.upload_max_bytes {
                discard(&target_path).await;
                return Err(AppError::file_size_limit(format!(
                    "file exceeds {} MB",
                    config.upload_max_bytes / 1024 / 1024
                )));
            }
            hasher.update(&data);
            if f.write_all(&data).await.is_err() {
                discard(&target_path).await;
                return Err(AppError::fail("failed to store upload"));
            }
        }
        if f.flush().await.is_err() {
            discard(&target_path).await;
            return Err(AppError::fail("failed to store upload"));
        }

        let file_type = match detect_image_type(&target_path, &filename) {
            Some(t) => t,
            None => {
                discard(&target_path).await;
                return Err(AppError::param_error("only image uploads are accepted"));
            }
        };
        let file_hash = format!("{:x}", hasher.finalize());

        let (url, storage) = if storage_type == STORAGE_AWSS3 {
            let param = sys_config_store::get_string(db.get_ref(), sys_config_store::AWSS3_PARAM)
                .await
                .map_err(db_error)?
                .unwrap_or_default();
            let uploaded = upload_awss3(&param, &target_path, &public_id, &suffix, &file_type).await;
            discard(&target_path).await;
            (uploaded?, STORAGE_AWSS3)
        } else {
            (format!("/api/resource/{}", public_id), STORAGE_LOCAL)
        };

        resource::ActiveModel {
            public_id: Set(public_id.clone()),
            user_id: Set(staff.0.user_id),
            file_type: Set(file_type.clone()),
            file_name: Set(filename.clone()),
            file_hash: Set(file_hash),
            size: Set(size as i64),
            internal_path: Set(if storage == STORAGE_LOCAL {
                Some(target_path.to_string_lossy().to_string())
            } else {
                None
            }),
            external_link: Set(Some(url.clone())),
            storage_type: Set(Some(storage.to_string())),
            suffix: Set(Some(suffix.clone())),
            created: Set(Some(Utc::now())),
        }
        .insert(db.get_ref())
        .await
        .map_err(db_error)?;
        info!("resource {} stored in {} by {}", public_id, storage, staff.0.user_id);

        responses.push(UploadResourceResponse {
            public_id,
            url,
            suffix,
            storage_type: storage.to_string(),
            file_type,
            file_name: filename,
            size,
        });
    }

    Ok(ok(responses))
}

async fn get_resource(
    db: web::Data<DatabaseConnection>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let item = resource::Entity::find_by_id(path.into_inner())
        .one(db.get_ref())
        .await
        .map_err(db_error)?
        .ok_or_else(|| AppError::fail("resource not found"))?;

    if item.storage_type.as_deref().unwrap_or(STORAGE_LOCAL) == STORAGE_LOCAL {
        let file_path = item.internal_path.unwrap_or_default();
        let data = tokio::fs::read(&file_path)
            .await
            .map_err(|_| AppError::fail("resource file is missing"))?;
        Ok(HttpResponse::Ok()
            .content_type(item.file_type)
            .insert_header(("Cache-Control", "public, max-age=31536000"))
            .body(data))
    } else {
        let url = item.external_link.unwrap_or_default();
        Ok(HttpResponse::Found().append_header(("Location", url)).finish())
    }
}

fn generate_public_id() -> String {
    let prefix = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let rand: String = (0..20)
        .map(|_| {
            let idx = rand::random::<u8>() % 26;
            (b'a' + idx) as char
        })
        .collect();
    format!("{}{}", prefix, rand)
}

fn file_suffix(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// `<root>/<yyyymmdd>/<public_id>[.suffix]`
fn local_path(root: &str, public_id: &str, suffix: &str) -> PathBuf {
    let file_name = if suffix.is_empty() {
        public_id.to_string()
    } else {
        format!("{}.{}", public_id, suffix)
    };
    PathBuf::from(root)
        .join(Utc::now().format("%Y%m%d").to_string())
        .join(file_name)
}

/// Sniffs the stored bytes first and falls back to the file name. Anything
/// that is not an image yields `None`.
fn detect_image_type(path: &Path, filename: &str) -> Option<String> {
    let sniffed = infer::get_from_path(path).ok().flatten().map(|k| k.mime_type().to_string());
    let mime = sniffed.or_else(|| mime_guess::from_path(filename).first().map(|m| m.essence_str().to_string()))?;
    if mime.starts_with("image/") {
        Some(mime)
    } else {
        None
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("failed to remove {}: {}", path.display(), e);
    }
}

fn object_key(prefix: &str, public_id: &str, suffix: &str) -> String {
    let name = if suffix.is_empty() {
        public_id.to_string()
    } else {
        format!("{}.{}", public_id, suffix)
    };
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name
    } else {
        format!("{}/{}", prefix, name)
    }
}

async fn upload_awss3(
    param: &str,
    file_path: &Path,
    public_id: &str,
    suffix: &str,
    content_type: &str,
) -> Result<String, AppError> {
    let param: S3Param = serde_json::from_str(param).unwrap_or_default();
    if param.access_key.is_empty() || param.secret_key.is_empty() || param.bucket.is_empty() || param.region.is_empty()
    {
        return Err(AppError::fail("AWSS3_PARAM is not configured"));
    }

    let key = object_key(&param.prefix, public_id, suffix);
    let creds = aws_sdk_s3::config::Credentials::new(&param.access_key, &param.secret_key, None, None, "static");
    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(param.region.clone()))
        .credentials_provider(creds)
        .load()
        .await;

    let data = tokio::fs::read(file_path)
        .await
        .map_err(|_| AppError::fail("failed to read upload"))?;
    S3Client::new(&sdk_config)
        .put_object()
        .bucket(&param.bucket)
        .key(&key)
        .acl(ObjectCannedAcl::PublicRead)
        .content_type(content_type)
        .body(ByteStream::from(data))
        .send()
        .await
        .map_err(|e| {
            warn!("s3 upload failed: {}", e);
            AppError::fail("failed to upload to object storage")
        })?;

    Ok(if param.domain.is_empty() {
        format!("https://s3.{}.amazonaws.com/{}/{}", param.region, param.bucket, key)
    } else {
        format!("{}/{}", param.domain.trim_end_matches('/'), key)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 16] = [
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    ];

    #[test]
    fn public_ids_are_timestamped_and_unique() {
        let a = generate_public_id();
        let b = generate_public_id();
        assert_eq!(a.len(), 34);
        assert!(a[14..].chars().all(|c| c.is_ascii_lowercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn object_keys_join_prefix() {
        assert_eq!(object_key("", "abc", "png"), "abc.png");
        assert_eq!(object_key("/news/", "abc", ""), "news/abc");
        assert_eq!(file_suffix("ছবি.JPG"), "jpg");
    }

    #[actix_web::test]
    async fn only_images_pass_detection() {
        let dir = std::env::temp_dir();
        let png = dir.join(format!("{}.bin", generate_public_id()));
        tokio::fs::write(&png, PNG_HEADER).await.unwrap();
        assert_eq!(detect_image_type(&png, "upload").as_deref(), Some("image/png"));

        let text = dir.join(format!("{}.bin", generate_public_id()));
        tokio::fs::write(&text, b"plain words").await.unwrap();
        assert_eq!(detect_image_type(&text, "notes.txt"), None);
        assert_eq!(detect_image_type(&text, "photo.webp").as_deref(), Some("image/webp"));

        discard(&png).await;
        discard(&text).await;
    }
}
