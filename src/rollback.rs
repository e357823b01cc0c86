//! Generation of `rollback.sh`, which restores the destination from the
//! pre-migration backup.
//!
//! The script never contains a password; it asks for one when run.

use crate::admin::quote_ident;
use crate::config::{ConnectionProfile, MigrationPlan};
use crate::error::{MigrateError, MigrateResult};
use crate::logger::Logger;
use crate::tools::dbname_conninfo;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const ROLLBACK_SCRIPT_NAME: &str = "rollback.sh";

/// Single-quote for POSIX shells.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Render the script body.
pub fn render(profile: &ConnectionProfile, backup_file: &Path, generated_at: DateTime<Local>) -> String {
    let host = shell_quote(profile.host());
    let port = profile.port();
    let user = shell_quote(profile.username());
    let database = shell_quote(&dbname_conninfo(profile.database()));
    let maintenance = shell_quote(&dbname_conninfo(profile.maintenance_database()));
    let ident = quote_ident(profile.database());
    let drop_sql = shell_quote(&format!("DROP DATABASE IF EXISTS {};", ident));
    let create_sql = shell_quote(&format!("CREATE DATABASE {};", ident));
    let backup = shell_quote(&backup_file.display().to_string());

    format!(
        r#"#!/bin/bash
# Rollback script generated by pg-schema-migrate
# Created: {created}
# Target: {user_raw}@{host_raw}:{port}/{db_raw}
# SSL mode: {ssl}
# Backup: {backup_raw}

set -e

echo "WARNING: This will restore the database to its previous state!"
echo "This will DROP the current database and restore from backup."
read -p "Are you sure you want to continue? (yes/no): " confirm

if [ "$confirm" != "yes" ]; then
    echo "Rollback cancelled."
    exit 0
fi

read -s -p "Password for {user_raw}@{host_raw}: " PGPASSWORD
echo
export PGPASSWORD
export PGSSLMODE={ssl_quoted}

echo "Starting rollback..."

echo "Dropping current database..."
psql -h {host} -p {port} -U {user} -d {maintenance} -c {drop_sql}

echo "Creating database..."
psql -h {host} -p {port} -U {user} -d {maintenance} -c {create_sql}

echo "Restoring from backup..."
psql -h {host} -p {port} -U {user} -d {database} -f {backup}

unset PGPASSWORD
echo "Rollback completed!"
"#,
        created = generated_at.format("%Y-%m-%d %H:%M:%S"),
        user_raw = profile.username(),
        host_raw = profile.host(),
        db_raw = profile.database(),
        ssl = profile.ssl_mode(),
        ssl_quoted = shell_quote(profile.ssl_mode().as_str()),
        backup_raw = backup_file.display(),
    )
}

/// Write `<output-dir>/rollback.sh` (mode 0755).
///
/// Does nothing and returns `None` when backups are disabled or no backup
/// file was produced.
pub fn write_rollback_script(
    profile: &ConnectionProfile,
    backup_file: Option<&Path>,
    plan: &MigrationPlan,
    generated_at: DateTime<Local>,
    logger: &dyn Logger,
) -> MigrateResult<Option<PathBuf>> {
    let backup_file = match backup_file {
        Some(path) if plan.backups_enabled() => path,
        _ => return Ok(None),
    };

    let path = plan.output_dir().join(ROLLBACK_SCRIPT_NAME);
    logger.info(&format!("Generating rollback script: {}", path.display()));

    let script = render(profile, backup_file, generated_at);
    std::fs::write(&path, script)
        .map_err(|e| MigrateError::io(format!("writing {}", path.display()), e))?;
    make_executable(&path)?;

    logger.success(&format!("Rollback script created: {}", path.display()));
    Ok(Some(path))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> MigrateResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| MigrateError::io(format!("chmod {}", path.display()), e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> MigrateResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, SslMode};
    use crate::logger::MemoryLogger;
    use chrono::TimeZone;

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new("db2.internal", 5433, "admin", "hunter2", "shop_staging", SslMode::VerifyFull)
            .unwrap()
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 19, 14, 30, 5).unwrap()
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_render_embeds_target_and_backup() {
        let script = render(&profile(), Path::new("out/backup/backup_shop_staging_x.sql"), at());

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("# Created: 2026-10-19 14:30:05"));
        assert!(script.contains("# Target: admin@db2.internal:5433/shop_staging"));
        assert!(script.contains("# SSL mode: verify-full"));
        assert!(script.contains("export PGSSLMODE='verify-full'"));
        assert!(script.contains("-f 'out/backup/backup_shop_staging_x.sql'"));
        assert!(script.contains(r#"-c 'DROP DATABASE IF EXISTS "shop_staging";'"#));
        assert!(script.contains(r#"-c 'CREATE DATABASE "shop_staging";'"#));
        assert!(script.contains(r#"if [ "$confirm" != "yes" ]"#));
    }

    #[test]
    fn test_render_passes_database_as_dbname_keyword() {
        let profile =
            ConnectionProfile::new("db2", 5432, "postgres", "pw", "shop=v2", SslMode::Require)
                .unwrap();
        let script = render(&profile, Path::new("b.sql"), at());

        assert!(script.contains(r"-d 'dbname='\''shop=v2'\''' -f 'b.sql'"));
        assert!(script.contains(r"-d 'dbname='\''postgres'\''' -c"));
        assert!(!script.contains("-d 'shop=v2'"));
    }

    #[test]
    fn test_render_never_contains_password() {
        let script = render(&profile(), Path::new("b.sql"), at());
        assert!(!script.contains("hunter2"));
        assert!(script.contains("read -s"));
    }

    #[test]
    fn test_no_script_without_backup() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MemoryLogger::new();

        let plan = MigrationPlan::new(Mode::Direct, dir.path());
        let written = write_rollback_script(&profile(), None, &plan, at(), &logger).unwrap();
        assert!(written.is_none());

        let plan = MigrationPlan::new(Mode::Direct, dir.path()).with_backup(false);
        let written =
            write_rollback_script(&profile(), Some(Path::new("b.sql")), &plan, at(), &logger)
                .unwrap();
        assert!(written.is_none());
        assert!(!dir.path().join(ROLLBACK_SCRIPT_NAME).exists());
    }

    #[test]
    fn test_writes_executable_script() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MemoryLogger::new();
        let plan = MigrationPlan::new(Mode::Direct, dir.path());

        let path = write_rollback_script(&profile(), Some(Path::new("b.sql")), &plan, at(), &logger)
            .unwrap()
            .unwrap();

        assert_eq!(path, dir.path().join("rollback.sh"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("shop_staging"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_missing_output_dir_is_io_error() {
        let logger = MemoryLogger::new();
        let plan = MigrationPlan::new(Mode::Direct, "/nonexistent/pgsm-out");
        let err = write_rollback_script(&profile(), Some(Path::new("b.sql")), &plan, at(), &logger)
            .unwrap_err();
        assert!(matches!(err, MigrateError::Io { .. }));
    }
}
