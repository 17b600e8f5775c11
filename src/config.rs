use std::env;

#[derive(Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub sqlite_path: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expire_days: i64,
    pub token_header: String,
    pub cors_allow_origin: String,
    pub upload_storage_path: String,
    pub upload_max_bytes: u64,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(38321);

        let sqlite_path = env::var("SQLITE_PATH").unwrap_or_else(|_| "/opt/sangbad/data.sqlite".to_string());
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| "change-me-sangbad-secret".to_string());
        let jwt_expire_days = env::var("JWT_EXPIRE_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(30);

        let token_header = env::var("TOKEN_HEADER").unwrap_or_else(|_| "token".to_string());
        let cors_allow_origin = env::var("CORS_ALLOW_ORIGIN").unwrap_or_else(|_| "*".to_string());

        let upload_storage_path = env::var("UPLOAD_STORAGE_PATH")
            .unwrap_or_else(|_| "/opt/sangbad/upload".to_string());
        let upload_max_bytes = env::var("UPLOAD_MAX_MB")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10)
            * 1024
            * 1024;

        let admin_username = env::var("ADMIN_USERNAME").ok().filter(|v| !v.trim().is_empty());
        let admin_password = env::var("ADMIN_PASSWORD").ok().filter(|v| !v.trim().is_empty());

        Self {
            server_port,
            sqlite_path,
            database_url,
            jwt_secret,
            jwt_expire_days,
            token_header,
            cors_allow_origin,
            upload_storage_path,
            upload_max_bytes,
            admin_username,
            admin_password,
        }
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let path = self.sqlite_path.trim();
        if path.starts_with("sqlite:") || path.starts_with("file:") {
            return path.to_string();
        }
        format!("sqlite://{}?mode=rwc", path)
    }

    pub fn is_sqlite(&self) -> bool {
        self.database_url().starts_with("sqlite:")
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_test() -> Self {
        Self {
            server_port: 0,
            sqlite_path: ":memory:".to_string(),
            database_url: Some("sqlite::memory:".to_string()),
            jwt_secret: "test-secret".to_string(),
            jwt_expire_days: 1,
            token_header: "token".to_string(),
            cors_allow_origin: "*".to_string(),
            upload_storage_path: std::env::temp_dir().to_string_lossy().to_string(),
            upload_max_bytes: 1024 * 1024,
            admin_username: None,
            admin_password: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_path_becomes_url() {
        let mut config = AppConfig::for_test();
        config.database_url = None;
        config.sqlite_path = "/tmp/news.sqlite".to_string();
        assert_eq!(config.database_url(), "sqlite:///tmp/news.sqlite?mode=rwc");
        assert!(config.is_sqlite());
    }

    #[test]
    fn explicit_url_wins() {
        let mut config = AppConfig::for_test();
        config.database_url = Some("mysql://root:pw@localhost/sangbad".to_string());
        assert_eq!(config.database_url(), "mysql://root:pw@localhost/sangbad");
        assert!(!config.is_sqlite());
    }

    #[test]
    fn prefixed_sqlite_path_is_kept() {
        let mut config = AppConfig::for_test();
        config.database_url = None;
        config.sqlite_path = "sqlite:./data.sqlite".to_string();
        assert_eq!(config.database_url(), "sqlite:./data.sqlite");
    }
}
