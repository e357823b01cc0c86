//! Short-lived PostgreSQL connections for validation and admin statements.
//!
//! No pools: each check opens one connection, uses it once, and closes it
//! before returning, whether the check succeeded or not.

use crate::config::{ConnectionProfile, SslMode};
use crate::error::{MigrateError, MigrateResult};
use crate::logger::Logger;

use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{ConnectOptions, Connection};

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

/// Connect options for `database` on the profile's server.
pub fn connect_options(profile: &ConnectionProfile, database: &str) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(profile.host())
        .port(profile.port())
        .username(profile.username())
        .password(profile.password())
        .database(database)
        .ssl_mode(profile.ssl_mode().into())
        .application_name("pg-schema-migrate")
        .disable_statement_logging()
}

fn describe(profile: &ConnectionProfile, database: &str) -> String {
    format!(
        "{}@{}:{}/{}",
        profile.username(),
        profile.host(),
        profile.port(),
        database
    )
}

/// Open one connection to `database` on the profile's server.
pub async fn open(profile: &ConnectionProfile, database: &str) -> MigrateResult<PgConnection> {
    tracing::debug!(server = %describe(profile, database), "opening connection");
    PgConnection::connect_with(&connect_options(profile, database))
        .await
        .map_err(|e| MigrateError::connection(describe(profile, database), e))
}

/// Open the connection to the server's maintenance database.
pub async fn open_maintenance(profile: &ConnectionProfile) -> MigrateResult<PgConnection> {
    open(profile, profile.maintenance_database()).await
}

async fn ping(profile: &ConnectionProfile, database: &str) -> MigrateResult<()> {
    let mut conn = open(profile, database).await?;
    let result = conn.ping().await;
    let _ = conn.close().await;
    result.map_err(|e| MigrateError::connection(describe(profile, database), e))
}

/// Check that the source database itself accepts connections.
pub async fn validate_source(profile: &ConnectionProfile, logger: &dyn Logger) -> MigrateResult<()> {
    logger.info("Validating source database connection...");
    ping(profile, profile.database()).await?;
    logger.info("Source database connection successful");
    Ok(())
}

/// Check that the destination server is reachable.
///
/// Connects to the maintenance database because the target database may
/// not exist yet.
pub async fn validate_destination_server(
    profile: &ConnectionProfile,
    logger: &dyn Logger,
) -> MigrateResult<()> {
    logger.info("Validating destination server connection...");
    ping(profile, profile.maintenance_database()).await?;
    logger.info("Destination server connection successful");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(PgSslMode::from(SslMode::Disable), PgSslMode::Disable));
        assert!(matches!(PgSslMode::from(SslMode::Require), PgSslMode::Require));
        assert!(matches!(PgSslMode::from(SslMode::VerifyCa), PgSslMode::VerifyCa));
        assert!(matches!(
            PgSslMode::from(SslMode::VerifyFull),
            PgSslMode::VerifyFull
        ));
    }

    #[test]
    fn test_describe_uses_given_database() {
        let profile = ConnectionProfile::new("db2", 5433, "admin", "pw", "shop", SslMode::Require)
            .unwrap();
        assert_eq!(describe(&profile, "postgres"), "admin@db2:5433/postgres");
        assert!(!describe(&profile, "shop").contains("pw"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let profile =
            ConnectionProfile::new("127.0.0.1", 1, "postgres", "pw", "shop", SslMode::Disable)
                .unwrap();
        let logger = crate::logger::MemoryLogger::new();
        let err = validate_source(&profile, &logger).await.unwrap_err();
        assert!(matches!(err, MigrateError::Connection { .. }));
        assert!(err.is_fatal());
    }
}
