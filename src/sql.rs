use sea_orm::{ConnectionTrait, QueryResult, Statement, TransactionError};

use crate::error::{db_error, AppError};

pub async fn exec_sql<C: ConnectionTrait>(
    db: &C,
    sql: &str,
    values: Vec<sea_orm::Value>,
) -> Result<u64, AppError> {
    let backend = db.get_database_backend();
    let stmt = Statement::from_sql_and_values(backend, sql, values);
    let result = db.execute(stmt).await.map_err(db_error)?;
    Ok(result.rows_affected())
}

pub async fn query_all<C: ConnectionTrait>(
    db: &C,
    sql: &str,
    values: Vec<sea_orm::Value>,
) -> Result<Vec<QueryResult>, AppError> {
    let backend = db.get_database_backend();
    let stmt = Statement::from_sql_and_values(backend, sql, values);
    db.query_all(stmt).await.map_err(db_error)
}

/// Runs a `select count(..) as cnt` statement.
pub async fn query_count<C: ConnectionTrait>(
    db: &C,
    sql: &str,
    values: Vec<sea_orm::Value>,
) -> Result<i64, AppError> {
    let rows = query_all(db, sql, values).await?;
    Ok(rows
        .first()
        .and_then(|r| r.try_get("", "cnt").ok())
        .unwrap_or(0))
}

pub fn map_tx_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Connection(e) => db_error(e),
        TransactionError::Transaction(app) => app,
    }
}

/// Bumps the view counter of a row in one of the content tables.
pub async fn increment_view_count<C: ConnectionTrait>(db: &C, table: &str, id: i32) -> Result<(), AppError> {
    let sql = format!("update {} set view_count = view_count + 1 where id = ?", table);
    exec_sql(db, &sql, vec![id.into()]).await?;
    Ok(())
}

/// Unique-key violations from either supported backend.
pub fn is_duplicate(err: &sea_orm::DbErr) -> bool {
    let msg = err.to_string();
    msg.contains("Duplicate") || msg.contains("UNIQUE")
}
