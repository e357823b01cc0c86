//! Optional README written next to an exported schema, describing how to
//! apply it by hand.

use crate::config::ConnectionProfile;
use crate::error::{MigrateError, MigrateResult};
use crate::logger::Logger;
use crate::rollback::shell_quote;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const INSTRUCTIONS_FILE_NAME: &str = "README.md";

pub fn render(source: &ConnectionProfile, schema_file: &Path, generated_at: DateTime<Local>) -> String {
    let file_name = schema_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| schema_file.display().to_string());
    let path = shell_quote(&schema_file.display().to_string());

    format!(
        r#"# Schema export: {database}

Generated {created} from `{target}` (schema only, no data).

## Files

- `{file_name}`: schema export
- `README.md`: this file

## Applying the schema

1. Review the export:

   ```bash
   less {path}
   ```

2. Back up the destination first if it holds anything you need:

   ```bash
   pg_dump -h DEST_HOST -p 5432 -U postgres -d DEST_DB -f backup_$(date +%Y%m%d_%H%M%S).sql
   ```

3. Apply it to an empty destination database:

   ```bash
   export PGPASSWORD=...        # or rely on ~/.pgpass
   export PGSSLMODE=require
   psql -h DEST_HOST -p 5432 -U postgres -d DEST_DB -v ON_ERROR_STOP=1 -f {path}
   ```

4. Check the result:

   ```bash
   psql -h DEST_HOST -U postgres -d DEST_DB -c '\dt'
   psql -h DEST_HOST -U postgres -d DEST_DB -c '\df'
   psql -h DEST_HOST -U postgres -d DEST_DB -c '\dv'
   ```

Ownership statements were stripped; objects will belong to the user that
applies the file.
"#,
        database = source.database(),
        created = generated_at.format("%Y-%m-%d %H:%M:%S"),
        target = source.target(),
    )
}

/// Write `<output-dir>/README.md`.
pub fn write_instructions(
    output_dir: &Path,
    source: &ConnectionProfile,
    schema_file: &Path,
    generated_at: DateTime<Local>,
    logger: &dyn Logger,
) -> MigrateResult<PathBuf> {
    let path = output_dir.join(INSTRUCTIONS_FILE_NAME);
    std::fs::write(&path, render(source, schema_file, generated_at))
        .map_err(|e| MigrateError::io(format!("writing {}", path.display()), e))?;

    logger.success(&format!("Migration instructions created: {}", path.display()));
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SslMode;
    use chrono::TimeZone;

    #[test]
    fn test_render_mentions_schema_file() {
        let source =
            ConnectionProfile::new("db1", 5432, "postgres", "pw", "reports", SslMode::Require)
                .unwrap();
        let at = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let text = render(&source, Path::new("out/schema_reports_20260102_030405.sql"), at);

        assert!(text.starts_with("# Schema export: reports"));
        assert!(text.contains("`schema_reports_20260102_030405.sql`"));
        assert!(text.contains("-f 'out/schema_reports_20260102_030405.sql'"));
        assert!(text.contains("less 'out/schema_reports_20260102_030405.sql'"));
        assert!(text.contains("2026-01-02 03:04:05"));
        assert!(!text.contains("pw@"));
    }

    #[test]
    fn test_render_quotes_paths_with_spaces() {
        let source =
            ConnectionProfile::new("db1", 5432, "postgres", "pw", "reports", SslMode::Require)
                .unwrap();
        let at = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let text = render(&source, Path::new("my exports/it's.sql"), at);

        assert!(text.contains(r"less 'my exports/it'\''s.sql'"));
        assert!(text.contains(r"-f 'my exports/it'\''s.sql'"));
    }
}
