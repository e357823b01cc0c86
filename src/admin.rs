//! Database-level administration on the destination server.
//!
//! Every statement runs on a fresh connection to the maintenance database.
//! Names are bound as parameters where PostgreSQL allows it and quoted as
//! identifiers where it does not (CREATE/DROP DATABASE).

use crate::config::ConnectionProfile;
use crate::connection;
use crate::error::{MigrateError, MigrateResult};
use crate::logger::Logger;

use sqlx::postgres::PgConnection;
use sqlx::{Connection, Executor};

const EXISTS_SQL: &str = "SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)";

const TERMINATE_SQL: &str = "SELECT pg_terminate_backend(pid) \
     FROM pg_stat_activity \
     WHERE datname = $1 AND pid <> pg_backend_pid()";

/// Quote an identifier: wrap in double quotes and double any embedded quote.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn drop_database_sql(name: &str) -> String {
    format!("DROP DATABASE {}", quote_ident(name))
}

pub fn create_database_sql(name: &str) -> String {
    format!("CREATE DATABASE {}", quote_ident(name))
}

async fn exists_on(conn: &mut PgConnection, name: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(EXISTS_SQL)
        .bind(name)
        .fetch_one(conn)
        .await
}

/// Whether the profile's database exists (exact, case-sensitive match).
pub async fn database_exists(profile: &ConnectionProfile) -> MigrateResult<bool> {
    let mut conn = connection::open_maintenance(profile).await?;
    let result = exists_on(&mut conn, profile.database()).await;
    let _ = conn.close().await;
    result.map_err(|e| MigrateError::admin("exists", profile.database(), e))
}

/// Drop the profile's database if present. Returns whether a drop happened.
///
/// Other sessions on the database are terminated first; failing to
/// terminate them is only a warning since the drop may still succeed.
pub async fn drop_database_if_exists(
    profile: &ConnectionProfile,
    logger: &dyn Logger,
) -> MigrateResult<bool> {
    let name = profile.database();
    let mut conn = connection::open_maintenance(profile).await?;
    let result = drop_on(&mut conn, name, logger).await;
    let _ = conn.close().await;
    result
}

async fn drop_on(conn: &mut PgConnection, name: &str, logger: &dyn Logger) -> MigrateResult<bool> {
    let exists = exists_on(conn, name)
        .await
        .map_err(|e| MigrateError::admin("exists", name, e))?;

    if !exists {
        logger.info(&format!("Database '{}' doesn't exist, skipping drop", name));
        return Ok(false);
    }

    logger.info(&format!("Dropping existing database '{}'", name));

    tracing::debug!(sql = TERMINATE_SQL, database = name, "terminating sessions");
    let terminated = sqlx::query(TERMINATE_SQL)
        .bind(name)
        .fetch_all(&mut *conn)
        .await
        .map(|rows| rows.len());
    report_termination(terminated, logger);

    let sql = drop_database_sql(name);
    tracing::debug!(sql = %sql, "dropping database");
    conn.execute(sql.as_str())
        .await
        .map_err(|e| MigrateError::admin("drop", name, e))?;

    logger.info("Database dropped successfully");
    Ok(true)
}

/// Session termination never fails the drop; an error only warns.
fn report_termination(terminated: Result<usize, sqlx::Error>, logger: &dyn Logger) {
    match terminated {
        Ok(0) => {}
        Ok(count) => logger.info(&format!("Terminated {} active session(s)", count)),
        Err(e) => logger.warning(&format!("Could not terminate all connections: {}", e)),
    }
}

/// Create the profile's database.
pub async fn create_database(profile: &ConnectionProfile, logger: &dyn Logger) -> MigrateResult<()> {
    let name = profile.database();
    logger.info(&format!("Creating destination database '{}'...", name));

    let mut conn = connection::open_maintenance(profile).await?;
    let sql = create_database_sql(name);
    tracing::debug!(sql = %sql, "creating database");
    let result = conn.execute(sql.as_str()).await;
    let _ = conn.close().await;
    result.map_err(|e| MigrateError::admin("create", name, e))?;

    logger.info("Database created successfully");
    Ok(())
}

/// Drop (if present) and create the destination.
///
/// A create failure after a successful drop becomes
/// [`MigrateError::DestinationLost`]: the database is gone.
pub async fn recreate_database(
    profile: &ConnectionProfile,
    logger: &dyn Logger,
) -> MigrateResult<()> {
    let dropped = drop_database_if_exists(profile, logger).await?;

    create_database(profile, logger)
        .await
        .map_err(|e| classify_create_failure(dropped, profile.database(), e))
}

/// Once the old database is gone, any create failure means it is lost.
fn classify_create_failure(dropped: bool, database: &str, err: MigrateError) -> MigrateError {
    if dropped {
        MigrateError::DestinationLost {
            database: database.to_string(),
            reason: err.to_string(),
        }
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{Level, MemoryLogger};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_failure_after_drop_is_destination_lost() {
        let err = classify_create_failure(
            true,
            "shop_staging",
            MigrateError::admin("create", "shop_staging", "permission denied"),
        );
        match err {
            MigrateError::DestinationLost { database, reason } => {
                assert_eq!(database, "shop_staging");
                assert!(reason.contains("permission denied"));
            }
            other => panic!("expected DestinationLost, got {:?}", other),
        }
    }

    #[test]
    fn test_create_failure_without_drop_stays_admin() {
        let err = classify_create_failure(
            false,
            "shop_staging",
            MigrateError::admin("create", "shop_staging", "permission denied"),
        );
        assert!(matches!(err, MigrateError::Admin { operation: "create", .. }));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_termination_failure_only_warns() {
        let logger = MemoryLogger::new();
        report_termination(Err(sqlx::Error::PoolTimedOut), &logger);
        assert!(logger.contains(Level::Warning, "Could not terminate all connections"));
        assert!(!logger.entries().iter().any(|(level, _)| *level == Level::Error));
    }

    #[test]
    fn test_termination_count_is_reported() {
        let logger = MemoryLogger::new();
        report_termination(Ok(0), &logger);
        assert!(logger.entries().is_empty());

        report_termination(Ok(2), &logger);
        assert!(logger.contains(Level::Info, "Terminated 2 active session(s)"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("shop_staging"), "\"shop_staging\"");
        assert_eq!(quote_ident("Shop"), "\"Shop\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_ident("a b; DROP"), "\"a b; DROP\"");
    }

    #[test]
    fn test_statement_text() {
        assert_eq!(drop_database_sql("ShopStaging"), "DROP DATABASE \"ShopStaging\"");
        assert_eq!(create_database_sql("x\"y"), "CREATE DATABASE \"x\"\"y\"");
    }

    #[test]
    fn test_catalog_queries_are_parameterized() {
        assert!(EXISTS_SQL.contains("$1"));
        assert!(TERMINATE_SQL.contains("datname = $1"));
        assert!(TERMINATE_SQL.contains("pg_backend_pid()"));
    }
}
