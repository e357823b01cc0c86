//! Migration configuration.
//!
//! Values come from three layers: CLI flags, an optional TOML file, then the
//! built-in defaults. Everything is validated here, before any connection is
//! attempted, and the resulting [`MigrationSettings`] is read-only.

use crate::error::{MigrateError, MigrateResult};
use crate::input::OperatorInput;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_USER: &str = "postgres";
pub const DEFAULT_OUTPUT_DIR: &str = "./schema_migration";
pub const DEFAULT_MAINTENANCE_DATABASE: &str = "postgres";
pub const CONFIG_FILE_NAME: &str = "pg-schema-migrate.toml";

/// PostgreSQL limits identifiers to NAMEDATALEN - 1 bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// SSL mode accepted by both libpq (`PGSSLMODE`) and the admin connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    #[default]
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub const ALL: [SslMode; 4] = [
        SslMode::Disable,
        SslMode::Require,
        SslMode::VerifyCa,
        SslMode::VerifyFull,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl FromStr for SslMode {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SslMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = SslMode::ALL.iter().map(|m| m.as_str()).collect();
                MigrateError::config(format!(
                    "invalid SSL mode '{}': must be one of: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the exported schema reaches the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Drop, recreate and load the destination.
    #[default]
    Direct,
    /// Only write the schema file for manual review.
    Export,
}

impl FromStr for Mode {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Mode::Direct),
            "export" => Ok(Mode::Export),
            other => Err(MigrateError::config(format!(
                "invalid mode '{}': must be 'direct' or 'export'",
                other
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Direct => write!(f, "direct"),
            Mode::Export => write!(f, "export"),
        }
    }
}

fn validate_database_name(role: &str, name: &str) -> MigrateResult<()> {
    if name.is_empty() {
        return Err(MigrateError::config(format!(
            "{} database name must not be empty",
            role
        )));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(MigrateError::config(format!(
            "{} database name '{}' exceeds {} bytes",
            role, name, MAX_IDENTIFIER_LEN
        )));
    }
    if name.contains('\0') {
        return Err(MigrateError::config(format!(
            "{} database name contains a NUL character",
            role
        )));
    }
    Ok(())
}

/// Where and as whom to connect.
#[derive(Clone)]
pub struct ConnectionProfile {
    host: String,
    port: u16,
    username: String,
    password: String,
    database: String,
    ssl_mode: SslMode,
    maintenance_database: String,
}

impl ConnectionProfile {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
        ssl_mode: SslMode,
    ) -> MigrateResult<Self> {
        let host = host.into();
        let username = username.into();
        let database = database.into();

        if host.trim().is_empty() {
            return Err(MigrateError::config("host must not be empty"));
        }
        if username.trim().is_empty() {
            return Err(MigrateError::config("username must not be empty"));
        }
        validate_database_name("target", &database)?;

        Ok(Self {
            host,
            port,
            username,
            password: password.into(),
            database,
            ssl_mode,
            maintenance_database: DEFAULT_MAINTENANCE_DATABASE.to_string(),
        })
    }

    /// Database used for server checks and CREATE/DROP DATABASE.
    pub fn with_maintenance_database(mut self, name: impl Into<String>) -> MigrateResult<Self> {
        let name = name.into();
        validate_database_name("maintenance", &name)?;
        self.maintenance_database = name;
        Ok(self)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn ssl_mode(&self) -> SslMode {
        self.ssl_mode
    }

    pub fn maintenance_database(&self) -> &str {
        &self.maintenance_database
    }

    /// `user@host:port/database`, for messages.
    pub fn target(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    /// Same server and same database name.
    pub fn same_database_as(&self, other: &ConnectionProfile) -> bool {
        self.host.eq_ignore_ascii_case(&other.host)
            && self.port == other.port
            && self.database == other.database
    }
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("maintenance_database", &self.maintenance_database)
            .finish()
    }
}

/// What a run should do.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    mode: Mode,
    output_dir: PathBuf,
    create_backup: bool,
    include_roles: bool,
    dry_run: bool,
    write_instructions: bool,
    stop_on_error: bool,
    pg_bin_dir: Option<PathBuf>,
}

impl MigrationPlan {
    pub fn new(mode: Mode, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            output_dir: output_dir.into(),
            create_backup: true,
            include_roles: false,
            dry_run: false,
            write_instructions: false,
            stop_on_error: false,
            pg_bin_dir: None,
        }
    }

    pub fn with_backup(mut self, enabled: bool) -> Self {
        self.create_backup = enabled;
        self
    }

    pub fn with_roles(mut self, include: bool) -> Self {
        self.include_roles = include;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_instructions(mut self, enabled: bool) -> Self {
        self.write_instructions = enabled;
        self
    }

    pub fn with_stop_on_error(mut self, enabled: bool) -> Self {
        self.stop_on_error = enabled;
        self
    }

    pub fn with_pg_bin_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.pg_bin_dir = dir;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Always `<output-dir>/backup`.
    pub fn backup_dir(&self) -> PathBuf {
        self.output_dir.join("backup")
    }

    pub fn create_backup(&self) -> bool {
        self.create_backup
    }

    /// A destination backup is only ever taken in direct mode.
    pub fn backups_enabled(&self) -> bool {
        self.create_backup && self.mode == Mode::Direct
    }

    pub fn include_roles(&self) -> bool {
        self.include_roles
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn write_instructions(&self) -> bool {
        self.write_instructions
    }

    pub fn stop_on_error(&self) -> bool {
        self.stop_on_error
    }

    pub fn pg_bin_dir(&self) -> Option<&Path> {
        self.pg_bin_dir.as_deref()
    }
}

/// Connection fields from one configuration layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileLayer {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub database: Option<String>,
    pub ssl_mode: Option<String>,
    pub maintenance_database: Option<String>,
}

impl ProfileLayer {
    /// Fields set in `self` win over `base`.
    pub fn over(self, base: ProfileLayer) -> ProfileLayer {
        ProfileLayer {
            host: self.host.or(base.host),
            port: self.port.or(base.port),
            user: self.user.or(base.user),
            database: self.database.or(base.database),
            ssl_mode: self.ssl_mode.or(base.ssl_mode),
            maintenance_database: self.maintenance_database.or(base.maintenance_database),
        }
    }
}

/// Plan fields from one configuration layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanLayer {
    pub mode: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub backup: Option<bool>,
    pub include_roles: Option<bool>,
    pub dry_run: Option<bool>,
    pub instructions: Option<bool>,
    pub stop_on_error: Option<bool>,
    pub pg_bin_dir: Option<PathBuf>,
}

impl PlanLayer {
    pub fn over(self, base: PlanLayer) -> PlanLayer {
        PlanLayer {
            mode: self.mode.or(base.mode),
            output_dir: self.output_dir.or(base.output_dir),
            backup: self.backup.or(base.backup),
            include_roles: self.include_roles.or(base.include_roles),
            dry_run: self.dry_run.or(base.dry_run),
            instructions: self.instructions.or(base.instructions),
            stop_on_error: self.stop_on_error.or(base.stop_on_error),
            pg_bin_dir: self.pg_bin_dir.or(base.pg_bin_dir),
        }
    }
}

/// One full configuration layer: the TOML file or the command line.
///
/// ```toml
/// [source]
/// host = "db1.internal"
/// database = "shop_prod"
/// ssl_mode = "require"
///
/// [destination]
/// host = "db2.internal"
/// database = "shop_staging"
///
/// [migration]
/// mode = "direct"
/// output_dir = "./out"
/// ```
///
/// Passwords are deliberately not accepted here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub source: ProfileLayer,
    pub destination: ProfileLayer,
    pub migration: PlanLayer,
}

impl ConfigLayer {
    pub fn over(self, base: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            source: self.source.over(base.source),
            destination: self.destination.over(base.destination),
            migration: self.migration.over(base.migration),
        }
    }

    pub fn from_toml(content: &str) -> MigrateResult<Self> {
        toml::from_str(content)
            .map_err(|e| MigrateError::config(format!("invalid config file: {}", e)))
    }

    pub fn load(path: &Path) -> MigrateResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Explicit path first, then `./pg-schema-migrate.toml`, then the user
    /// config directory. An explicit path that cannot be read is an error.
    pub fn discover(explicit: Option<&Path>) -> MigrateResult<Option<(PathBuf, ConfigLayer)>> {
        if let Some(path) = explicit {
            return Ok(Some((path.to_path_buf(), Self::load(path)?)));
        }

        let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("pg-schema-migrate").join("config.toml"));
        }

        for path in candidates {
            if path.is_file() {
                let layer = Self::load(&path)?;
                return Ok(Some((path, layer)));
            }
        }
        Ok(None)
    }
}

/// Passwords supplied out of band (environment), skipping the prompt.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub source: Option<String>,
    pub destination: Option<String>,
}

/// Validated, read-only input to one migration run.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    source: ConnectionProfile,
    destination: Option<ConnectionProfile>,
    plan: MigrationPlan,
}

impl MigrationSettings {
    /// Direct mode requires a destination that is not the source itself.
    /// Export mode never keeps a destination.
    pub fn new(
        source: ConnectionProfile,
        destination: Option<ConnectionProfile>,
        plan: MigrationPlan,
    ) -> MigrateResult<Self> {
        let destination = match plan.mode() {
            Mode::Export => None,
            Mode::Direct => {
                let dest = destination.ok_or_else(|| {
                    MigrateError::config("direct mode requires a destination database")
                })?;
                if dest.same_database_as(&source) {
                    return Err(MigrateError::config(format!(
                        "destination {} is the source database; refusing to drop it",
                        dest.target()
                    )));
                }
                Some(dest)
            }
        };

        Ok(Self {
            source,
            destination,
            plan,
        })
    }

    /// Build settings from a merged layer, prompting only for what is missing.
    ///
    /// Modes, SSL modes and names are checked before any prompt so a bad
    /// flag fails immediately.
    pub fn resolve(
        layer: ConfigLayer,
        credentials: Credentials,
        input: &mut dyn OperatorInput,
    ) -> MigrateResult<Self> {
        let ConfigLayer {
            source,
            destination,
            migration,
        } = layer;

        let mode: Mode = migration.mode.as_deref().unwrap_or("direct").parse()?;
        let source_ssl = parse_ssl("source", source.ssl_mode.as_deref())?;
        let dest_ssl = match mode {
            Mode::Direct => Some(parse_ssl("destination", destination.ssl_mode.as_deref())?),
            Mode::Export => None,
        };

        let source_db = source
            .database
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                MigrateError::config("source database name is required (--source-db)")
            })?;
        validate_database_name("source", &source_db)?;
        if let Some(name) = destination.database.as_deref() {
            validate_database_name("destination", name)?;
        }

        let plan = MigrationPlan::new(
            mode,
            migration
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        )
        .with_backup(migration.backup.unwrap_or(true))
        .with_roles(migration.include_roles.unwrap_or(false))
        .with_dry_run(migration.dry_run.unwrap_or(false))
        .with_instructions(migration.instructions.unwrap_or(false))
        .with_stop_on_error(migration.stop_on_error.unwrap_or(false))
        .with_pg_bin_dir(migration.pg_bin_dir);

        let source_host = source.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        let source_user = source.user.unwrap_or_else(|| DEFAULT_USER.to_string());
        let source_password = match credentials.source {
            Some(password) => password,
            None => input.password("source", &source_user, &source_host)?,
        };
        let source_profile = ConnectionProfile::new(
            source_host,
            source.port.unwrap_or(DEFAULT_PORT),
            source_user,
            source_password,
            source_db.clone(),
            source_ssl,
        )?;

        let destination_profile = match dest_ssl {
            None => None,
            Some(ssl_mode) => {
                let host = destination.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
                let user = destination.user.unwrap_or_else(|| DEFAULT_USER.to_string());
                let password = match credentials.destination {
                    Some(password) => password,
                    None => input.password("destination", &user, &host)?,
                };
                let database = match destination.database {
                    Some(name) => name,
                    None => input.destination_name(&source_db)?,
                };
                let profile = ConnectionProfile::new(
                    host,
                    destination.port.unwrap_or(DEFAULT_PORT),
                    user,
                    password,
                    database,
                    ssl_mode,
                )?;
                let profile = match destination.maintenance_database {
                    Some(name) => profile.with_maintenance_database(name)?,
                    None => profile,
                };
                Some(profile)
            }
        };

        Self::new(source_profile, destination_profile, plan)
    }

    pub fn source(&self) -> &ConnectionProfile {
        &self.source
    }

    pub fn destination(&self) -> Option<&ConnectionProfile> {
        self.destination.as_ref()
    }

    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }
}

fn parse_ssl(role: &str, value: Option<&str>) -> MigrateResult<SslMode> {
    match value {
        None => Ok(SslMode::default()),
        Some(s) => s.parse::<SslMode>().map_err(|e| match e {
            MigrateError::Config(msg) => MigrateError::config(format!("{} {}", role, msg)),
            other => other,
        }),
    }
}
