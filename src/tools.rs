//! pg_dump / psql subprocess invocations.
//!
//! Credentials go to the child only, via `PGPASSWORD`/`PGSSLMODE` on its own
//! environment; this process's environment is never modified. Output is
//! inherited so the operator sees the tool's progress live.

use crate::config::ConnectionProfile;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

pub const PG_DUMP: &str = "pg_dump";
pub const PSQL: &str = "psql";

const PASSWORD_ENV: &str = "PGPASSWORD";
const SSL_MODE_ENV: &str = "PGSSLMODE";

/// `-d` value that libpq always reads as a database name.
///
/// A bare `-d` containing `=` or starting with a URI prefix is parsed as a
/// whole connection string, so the name goes in a quoted `dbname=` keyword
/// with `\` and `'` backslash-escaped.
pub fn dbname_conninfo(name: &str) -> String {
    format!("dbname='{}'", name.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Why a tool run failed.
#[derive(Debug)]
pub enum ToolFailure {
    /// The binary could not be started.
    Spawn { program: PathBuf, source: std::io::Error },
    /// The binary ran and exited unsuccessfully.
    Exit { program: PathBuf, code: Option<i32> },
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolFailure::Spawn { program, source }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                write!(
                    f,
                    "{} not found (install the PostgreSQL client tools or set --pg-bin-dir)",
                    program.display()
                )
            }
            ToolFailure::Spawn { program, source } => {
                write!(f, "failed to start {}: {}", program.display(), source)
            }
            ToolFailure::Exit {
                program,
                code: Some(code),
            } => {
                write!(f, "{} exited with status {}", program.display(), code)
            }
            ToolFailure::Exit { program, code: None } => {
                write!(f, "{} was terminated by a signal", program.display())
            }
        }
    }
}

/// One pg_dump or psql run against a profile.
#[derive(Clone)]
pub struct PgTool {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(&'static str, String)>,
}

impl PgTool {
    /// `pg_dump -h -p -U -d` for the profile's database.
    pub fn pg_dump(profile: &ConnectionProfile, bin_dir: Option<&Path>) -> Self {
        Self::for_profile(PG_DUMP, profile, bin_dir)
    }

    /// `psql -h -p -U -d` for the profile's database.
    pub fn psql(profile: &ConnectionProfile, bin_dir: Option<&Path>) -> Self {
        Self::for_profile(PSQL, profile, bin_dir)
    }

    fn for_profile(name: &str, profile: &ConnectionProfile, bin_dir: Option<&Path>) -> Self {
        let program = match bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        };

        Self {
            program,
            args: vec![
                "-h".into(),
                profile.host().into(),
                "-p".into(),
                profile.port().to_string(),
                "-U".into(),
                profile.username().into(),
                "-d".into(),
                dbname_conninfo(profile.database()),
            ],
            env: vec![
                (PASSWORD_ENV, profile.password().to_string()),
                (SSL_MODE_ENV, profile.ssl_mode().to_string()),
            ],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Write output to (pg_dump) or read input from (psql) `path`.
    pub fn file(self, path: &Path) -> Self {
        self.arg("-f").arg(path.display().to_string())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Environment handed to the child. Contains the password.
    pub fn child_env(&self) -> &[(&'static str, String)] {
        &self.env
    }

    /// Shell-like rendering for logs. Never includes the password.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Run to completion with inherited stdout/stderr and null stdin.
    pub async fn run(&self) -> Result<(), ToolFailure> {
        tracing::debug!(command = %self.display_command(), "spawning");

        let status = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| ToolFailure::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ToolFailure::Exit {
                program: self.program.clone(),
                code: status.code(),
            })
        }
    }
}

impl fmt::Debug for PgTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgTool")
            .field("command", &self.display_command())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SslMode;
    use pretty_assertions::assert_eq;

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new("db1", 6432, "migrator", "s3cret", "shop_prod", SslMode::VerifyCa)
            .unwrap()
    }

    #[test]
    fn test_connection_args_and_env() {
        let tool = PgTool::pg_dump(&profile(), None);
        assert_eq!(tool.program(), Path::new("pg_dump"));
        assert_eq!(
            tool.arguments(),
            ["-h", "db1", "-p", "6432", "-U", "migrator", "-d", "dbname='shop_prod'"]
        );
        assert_eq!(
            tool.child_env(),
            [
                ("PGPASSWORD", "s3cret".to_string()),
                ("PGSSLMODE", "verify-ca".to_string())
            ]
        );
    }

    #[test]
    fn test_dbname_conninfo_escapes() {
        assert_eq!(dbname_conninfo("shop"), "dbname='shop'");
        assert_eq!(dbname_conninfo("it's"), r"dbname='it\'s'");
        assert_eq!(dbname_conninfo(r"a\b"), r"dbname='a\\b'");
    }

    #[test]
    fn test_special_database_name_is_not_a_connection_string() {
        let profile = ConnectionProfile::new(
            "db1",
            5432,
            "postgres",
            "pw",
            "x host=other o'k",
            SslMode::Require,
        )
        .unwrap();
        let tool = PgTool::psql(&profile, None);
        let args = tool.arguments();
        let d = args.iter().position(|a| a == "-d").unwrap();

        assert_eq!(args[d + 1], r"dbname='x host=other o\'k'");
        assert_eq!(args[d + 1].matches('=').count(), 2);
        assert_eq!(args.iter().filter(|a| a.contains("host=")).count(), 1);
    }

    #[test]
    fn test_password_never_in_arguments_or_display() {
        let tool = PgTool::psql(&profile(), None).file(Path::new("/tmp/schema.sql"));
        assert!(tool.arguments().iter().all(|a| !a.contains("s3cret")));
        assert!(!tool.display_command().contains("s3cret"));
        assert!(!format!("{:?}", tool).contains("s3cret"));
        assert!(tool.display_command().ends_with("-f /tmp/schema.sql"));
    }

    #[test]
    fn test_bin_dir() {
        let tool = PgTool::psql(&profile(), Some(Path::new("/usr/lib/postgresql/16/bin")));
        assert_eq!(
            tool.program(),
            Path::new("/usr/lib/postgresql/16/bin/psql")
        );
    }

    #[test]
    fn test_spawn_failure_message() {
        let failure = ToolFailure::Spawn {
            program: PathBuf::from("pg_dump"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(failure.to_string().contains("--pg-bin-dir"));

        let failure = ToolFailure::Exit {
            program: PathBuf::from("psql"),
            code: Some(3),
        };
        assert_eq!(failure.to_string(), "psql exited with status 3");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let tool = PgTool::pg_dump(&profile(), Some(Path::new("/nonexistent/bin")));
        let err = tool.run().await.unwrap_err();
        assert!(matches!(err, ToolFailure::Spawn { .. }));
    }
}
