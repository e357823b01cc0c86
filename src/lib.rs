//! # pg-schema-migrate
//!
//! Copies the **structure** of a PostgreSQL database (no data) from a source
//! server to a destination server, or exports it for manual review.
//!
//! A direct migration exports the source schema with `pg_dump`, backs up the
//! destination, drops and recreates it, loads the schema with `psql`, and
//! leaves a `rollback.sh` that restores the backup.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use pg_schema_migrate::prelude::*;
//! use std::sync::Arc;
//!
//! let source = ConnectionProfile::new("db1", 5432, "postgres", pw, "shop_prod", SslMode::Require)?;
//! let dest = ConnectionProfile::new("db2", 5432, "postgres", pw2, "shop_staging", SslMode::Require)?;
//! let settings = MigrationSettings::new(source, Some(dest), MigrationPlan::new(Mode::Direct, "./out"))?;
//!
//! let logger: Arc<dyn Logger> = Arc::new(ConsoleLogger::new(false));
//! let backend = PgBackend::new(settings.plan(), logger.clone());
//! let outcome = Orchestrator::new(backend, logger).execute(&settings).await?;
//! ```
//!
//! ## Files produced
//!
//! | Path                                   | When                      |
//! |----------------------------------------|---------------------------|
//! | `<out>/schema_<db>_<ts>.sql`           | always                    |
//! | `<out>/backup/backup_<db>_<ts>.sql`    | direct mode, dest exists  |
//! | `<out>/rollback.sh`                    | a backup was written      |
//! | `<out>/README.md`                      | export mode, on request   |

pub mod admin;
pub mod apply;
pub mod backup;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod export;
pub mod input;
pub mod instructions;
pub mod logger;
pub mod rollback;
pub mod tools;

pub mod prelude {
    pub use crate::backup::BackupResult;
    pub use crate::config::{
        ConfigLayer, ConnectionProfile, Credentials, MigrationPlan, MigrationSettings, Mode,
        SslMode,
    };
    pub use crate::engine::{
        MigrationBackend, MigrationOutcome, MigrationRun, MigrationState, Orchestrator, PgBackend,
    };
    pub use crate::error::*;
    pub use crate::input::{OperatorInput, ScriptedInput, TerminalInput};
    pub use crate::logger::{ConsoleLogger, Level, Logger, MemoryLogger};
}
