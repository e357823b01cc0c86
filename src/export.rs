//! Schema-only export of the source database.

use crate::config::ConnectionProfile;
use crate::error::{MigrateError, MigrateResult};
use crate::logger::Logger;
use crate::tools::PgTool;
use std::path::Path;

/// `pg_dump --schema-only` into `output`.
///
/// Ownership is always stripped; privileges are kept only when
/// `include_roles` is set.
pub fn schema_dump(
    profile: &ConnectionProfile,
    output: &Path,
    include_roles: bool,
    bin_dir: Option<&Path>,
) -> PgTool {
    let tool = PgTool::pg_dump(profile, bin_dir)
        .file(output)
        .args(["--schema-only", "--no-owner"]);
    let tool = if include_roles {
        tool
    } else {
        tool.arg("--no-privileges")
    };
    tool.args(["--verbose", "--no-password"])
}

/// Export the source schema. Any failure is fatal for the run.
pub async fn export_schema(
    profile: &ConnectionProfile,
    output: &Path,
    include_roles: bool,
    bin_dir: Option<&Path>,
    logger: &dyn Logger,
) -> MigrateResult<()> {
    logger.info(&format!(
        "Exporting schema from database '{}'...",
        profile.database()
    ));

    let tool = schema_dump(profile, output, include_roles, bin_dir);
    logger.debug(&tool.display_command());
    tool.run().await.map_err(|e| MigrateError::Export {
        database: profile.database().to_string(),
        reason: e.to_string(),
    })?;

    logger.info(&format!("Schema export completed: {}", output.display()));
    Ok(())
}
