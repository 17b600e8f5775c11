use log::{error, info};
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Statement};
use std::fs;
use std::path::Path;

use crate::config::AppConfig;

pub async fn connect_db(config: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    if config.is_sqlite() {
        ensure_sqlite_dir(config);
    }
    let db = Database::connect(config.database_url()).await?;
    init_sqlite_schema(&db).await?;
    Ok(db)
}

fn ensure_sqlite_dir(config: &AppConfig) {
    let raw = config.database_url();
    let path = raw
        .strip_prefix("sqlite://")
        .or_else(|| raw.strip_prefix("sqlite:"))
        .unwrap_or(raw.as_str());
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.contains(":memory:") {
        return;
    }
    if let Some(parent) = Path::new(path).parent() {
        let _ = fs::create_dir_all(parent);
    }
}

/// Creates the tables on a fresh SQLite database. Other backends are expected
/// to be migrated out of band.
pub async fn init_sqlite_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    if backend != DatabaseBackend::Sqlite {
        return Ok(());
    }
    let exists_stmt = Statement::from_string(
        backend,
        "SELECT name FROM sqlite_master WHERE type='table' AND name='t_sys_config' LIMIT 1",
    );
    if db.query_one(exists_stmt).await?.is_some() {
        return Ok(());
    }

    info!("initializing sqlite schema");
    let sql = include_str!("../schema-sqlite.sql");
    for stmt in split_sql(sql) {
        if let Err(e) = db.execute(Statement::from_string(backend, stmt.clone())).await {
            error!("schema statement failed: {} ({})", e, stmt);
            return Err(e);
        }
    }
    Ok(())
}

fn split_sql(input: &str) -> Vec<String> {
    let mut buf = String::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") || trimmed.is_empty() {
            continue;
        }
        buf.push_str(line);
        buf.push('\n');
    }
    buf.split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sql_drops_comments_and_blank_statements() {
        let sql = "-- header\nCREATE TABLE a (id INTEGER);\n\n-- note\nINSERT INTO a VALUES (1);\n;";
        let stmts = split_sql(sql);
        assert_eq!(stmts, vec!["CREATE TABLE a (id INTEGER)", "INSERT INTO a VALUES (1)"]);
    }

    #[actix_web::test]
    async fn schema_bootstraps_once() {
        let db = crate::test_support::memory_db().await;
        // second run sees t_sys_config and leaves the data alone
        init_sqlite_schema(&db).await.unwrap();
        let row = db
            .query_one(Statement::from_string(
                DatabaseBackend::Sqlite,
                "SELECT COUNT(1) AS cnt FROM t_sys_config",
            ))
            .await
            .unwrap()
            .unwrap();
        let cnt: i64 = row.try_get("", "cnt").unwrap();
        assert!(cnt > 0);
    }
}
