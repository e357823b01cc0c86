//! Full backup of the destination before it is replaced.
//!
//! A failed backup never stops a migration; the orchestrator reports it and
//! carries on without a rollback point.

use crate::admin;
use crate::config::ConnectionProfile;
use crate::error::{MigrateError, MigrateResult};
use crate::logger::Logger;
use crate::tools::PgTool;
use std::path::Path;

/// Outcome of a backup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupResult {
    /// False when the destination did not exist and nothing was dumped.
    pub created: bool,
}

/// `pg_dump` of schema and data into `output`.
pub fn full_dump(profile: &ConnectionProfile, output: &Path, bin_dir: Option<&Path>) -> PgTool {
    PgTool::pg_dump(profile, bin_dir)
        .file(output)
        .args(["--verbose", "--no-password"])
}

/// Back up the destination if it exists.
pub async fn backup_destination(
    profile: &ConnectionProfile,
    output: &Path,
    bin_dir: Option<&Path>,
    logger: &dyn Logger,
) -> MigrateResult<BackupResult> {
    let to_backup_error = |reason: String| MigrateError::Backup {
        database: profile.database().to_string(),
        reason,
    };

    let exists = admin::database_exists(profile)
        .await
        .map_err(|e| to_backup_error(e.to_string()))?;

    if !exists {
        logger.info("Destination database doesn't exist, skipping backup");
        return Ok(BackupResult { created: false });
    }

    logger.info(&format!(
        "Creating backup of destination database '{}'...",
        profile.database()
    ));

    let tool = full_dump(profile, output, bin_dir);
    logger.debug(&tool.display_command());
    tool.run().await.map_err(|e| to_backup_error(e.to_string()))?;

    logger.info(&format!("Backup created: {}", output.display()));
    Ok(BackupResult { created: true })
}
