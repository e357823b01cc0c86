//! Load the exported schema into the recreated destination with psql.

use crate::config::ConnectionProfile;
use crate::error::{MigrateError, MigrateResult};
use crate::logger::Logger;
use crate::tools::PgTool;
use std::path::Path;

/// `psql -f schema_file` against the destination database.
pub fn schema_load(
    profile: &ConnectionProfile,
    schema_file: &Path,
    stop_on_error: bool,
    bin_dir: Option<&Path>,
) -> PgTool {
    let tool = PgTool::psql(profile, bin_dir)
        .file(schema_file)
        .arg("--no-password");
    if stop_on_error {
        tool.args(["-v", "ON_ERROR_STOP=1"])
    } else {
        tool
    }
}

/// Apply the schema. On failure the destination is empty, and the error
/// says so.
pub async fn apply_schema(
    profile: &ConnectionProfile,
    schema_file: &Path,
    stop_on_error: bool,
    bin_dir: Option<&Path>,
    logger: &dyn Logger,
) -> MigrateResult<()> {
    logger.info(&format!(
        "Applying schema to destination database '{}'...",
        profile.database()
    ));

    let tool = schema_load(profile, schema_file, stop_on_error, bin_dir);
    logger.debug(&tool.display_command());
    tool.run().await.map_err(|e| MigrateError::Apply {
        database: profile.database().to_string(),
        reason: e.to_string(),
    })?;

    logger.info("Schema applied successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SslMode;

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new("db2", 5432, "postgres", "pw", "shop_staging", SslMode::Require)
            .unwrap()
    }

    #[test]
    fn test_schema_load_args() {
        let tool = schema_load(&profile(), Path::new("out/schema.sql"), false, None);
        assert_eq!(tool.program(), Path::new("psql"));
        let args = tool.arguments();
        assert!(args.iter().any(|a| a == "out/schema.sql"));
        assert!(args.iter().any(|a| a == "--no-password"));
        assert!(!args.iter().any(|a| a == "ON_ERROR_STOP=1"));
    }

    #[test]
    fn test_stop_on_error() {
        let tool = schema_load(&profile(), Path::new("s.sql"), true, None);
        assert!(tool.arguments().iter().any(|a| a == "ON_ERROR_STOP=1"));
    }
}
