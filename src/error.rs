//! Error types for pg-schema-migrate.

use thiserror::Error;

/// The main error type for migration operations.
///
/// Every variant names the stage it came from and the database involved so
/// an operator can recover by hand (rollback script or direct administration).
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Invalid SSL mode, invalid mode, conflicting or missing options.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server unreachable, authentication failure or failed ping.
    #[error("Connection error ({target}): {reason}")]
    Connection { target: String, reason: String },

    /// pg_dump failed while exporting the source schema.
    #[error("Schema export from '{database}' failed: {reason}")]
    Export { database: String, reason: String },

    /// Backup of the destination failed. Never aborts a run.
    #[error("Backup of '{database}' failed: {reason}")]
    Backup { database: String, reason: String },

    /// An administrative statement (exists, drop, create) failed.
    #[error("Database admin operation '{operation}' on '{database}' failed: {reason}")]
    Admin {
        operation: &'static str,
        database: String,
        reason: String,
    },

    /// The destination was dropped and could not be created again.
    #[error(
        "DESTINATION LOST: database '{database}' was dropped but could not be recreated: {reason}"
    )]
    DestinationLost { database: String, reason: String },

    /// psql failed while loading the schema into the recreated destination.
    #[error(
        "Schema apply to '{database}' failed; the destination is now EMPTY and unmigrated: {reason}"
    )]
    Apply { database: String, reason: String },

    /// Filesystem failure.
    #[error("IO error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl MigrateError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error for the given `user@host:port/db` target.
    pub fn connection(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an admin error.
    pub fn admin(operation: &'static str, database: &str, reason: impl ToString) -> Self {
        Self::Admin {
            operation,
            database: database.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Wrap an IO error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error aborts the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Backup { .. })
    }

    /// Short label for the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Connection { .. } => "connection",
            Self::Export { .. } => "export",
            Self::Backup { .. } => "backup",
            Self::Admin { .. } => "admin",
            Self::DestinationLost { .. } => "recreate",
            Self::Apply { .. } => "apply",
            Self::Io { .. } => "io",
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Connection { .. } => 3,
            Self::Export { .. } | Self::Backup { .. } => 4,
            Self::Admin { .. } => 5,
            Self::DestinationLost { .. } => 6,
            Self::Apply { .. } => 7,
            Self::Io { .. } => 8,
        }
    }
}

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrateError::config("invalid SSL mode 'foo'");
        assert_eq!(err.to_string(), "Configuration error: invalid SSL mode 'foo'");

        let err = MigrateError::DestinationLost {
            database: "shop_staging".into(),
            reason: "permission denied".into(),
        };
        assert!(err.to_string().starts_with("DESTINATION LOST"));
        assert!(err.to_string().contains("shop_staging"));
    }

    #[test]
    fn test_apply_error_mentions_empty_destination() {
        let err = MigrateError::Apply {
            database: "shop_staging".into(),
            reason: "psql exited with status 3".into(),
        };
        assert!(err.to_string().contains("EMPTY"));
    }

    #[test]
    fn test_only_backup_is_non_fatal() {
        let backup = MigrateError::Backup {
            database: "x".into(),
            reason: "y".into(),
        };
        assert!(!backup.is_fatal());
        assert!(MigrateError::config("x").is_fatal());
        assert!(MigrateError::admin("drop", "x", "y").is_fatal());
    }

    #[test]
    fn test_exit_codes_are_non_zero_and_distinct_for_lost_destination() {
        let errors = [
            MigrateError::config("x"),
            MigrateError::connection("u@h:5432/d", "refused"),
            MigrateError::admin("create", "d", "x"),
            MigrateError::DestinationLost {
                database: "d".into(),
                reason: "x".into(),
            },
            MigrateError::io("write", std::io::Error::other("disk full")),
        ];
        for err in &errors {
            assert_ne!(err.exit_code(), 0, "{}", err.stage());
        }
        assert_eq!(errors[3].exit_code(), 6);
    }
}
