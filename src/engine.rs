//! Migration orchestrator.
//!
//! Sequences validation, export, backup, recreate and apply against a
//! [`MigrationBackend`], branching on mode and dry-run:
//!
//! ```text
//! Init → SourceValidated → [DestValidated] → SchemaExported
//!      → BackupAttempted → DryRunReported
//!                        | DestroyedAndRecreated → SchemaApplied → RollbackScriptWritten
//! ```
//!
//! Export mode stops at `SchemaExported`. Fatal errors return immediately;
//! nothing is retried.

use crate::admin;
use crate::apply;
use crate::backup::{self, BackupResult};
use crate::config::{ConnectionProfile, MigrationPlan, MigrationSettings, Mode};
use crate::connection;
use crate::error::{MigrateError, MigrateResult};
use crate::export;
use crate::instructions;
use crate::logger::Logger;
use crate::rollback;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Timestamp used to namespace generated files.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Init,
    SourceValidated,
    DestValidated,
    SchemaExported,
    BackupAttempted,
    DryRunReported,
    DestroyedAndRecreated,
    SchemaApplied,
    RollbackScriptWritten,
}

impl MigrationState {
    /// Legal transitions. `SchemaApplied` is only reachable through
    /// `DestroyedAndRecreated`.
    pub fn can_advance_to(self, next: MigrationState) -> bool {
        use MigrationState::*;
        matches!(
            (self, next),
            (Init, SourceValidated)
                | (SourceValidated, DestValidated)
                | (SourceValidated, SchemaExported)
                | (DestValidated, SchemaExported)
                | (SchemaExported, BackupAttempted)
                | (BackupAttempted, DryRunReported)
                | (BackupAttempted, DestroyedAndRecreated)
                | (DestroyedAndRecreated, SchemaApplied)
                | (SchemaApplied, RollbackScriptWritten)
        )
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The side-effecting steps the orchestrator drives.
#[async_trait]
pub trait MigrationBackend: Send + Sync {
    async fn validate_source(&self, profile: &ConnectionProfile) -> MigrateResult<()>;

    /// Server reachability only; the target database may not exist.
    async fn validate_destination(&self, profile: &ConnectionProfile) -> MigrateResult<()>;

    async fn export_schema(
        &self,
        profile: &ConnectionProfile,
        output: &Path,
        include_roles: bool,
    ) -> MigrateResult<()>;

    async fn backup(
        &self,
        profile: &ConnectionProfile,
        output: &Path,
    ) -> MigrateResult<BackupResult>;

    async fn recreate(&self, profile: &ConnectionProfile) -> MigrateResult<()>;

    async fn apply_schema(
        &self,
        profile: &ConnectionProfile,
        schema_file: &Path,
    ) -> MigrateResult<()>;
}

/// Real backend: sqlx for admin statements, pg_dump/psql for dump and load.
pub struct PgBackend {
    logger: Arc<dyn Logger>,
    bin_dir: Option<PathBuf>,
    stop_on_error: bool,
}

impl PgBackend {
    pub fn new(plan: &MigrationPlan, logger: Arc<dyn Logger>) -> Self {
        Self {
            logger,
            bin_dir: plan.pg_bin_dir().map(Path::to_path_buf),
            stop_on_error: plan.stop_on_error(),
        }
    }
}

#[async_trait]
impl MigrationBackend for PgBackend {
    async fn validate_source(&self, profile: &ConnectionProfile) -> MigrateResult<()> {
        connection::validate_source(profile, &*self.logger).await
    }

    async fn validate_destination(&self, profile: &ConnectionProfile) -> MigrateResult<()> {
        connection::validate_destination_server(profile, &*self.logger).await
    }

    async fn export_schema(
        &self,
        profile: &ConnectionProfile,
        output: &Path,
        include_roles: bool,
    ) -> MigrateResult<()> {
        export::export_schema(
            profile,
            output,
            include_roles,
            self.bin_dir.as_deref(),
            &*self.logger,
        )
        .await
    }

    async fn backup(
        &self,
        profile: &ConnectionProfile,
        output: &Path,
    ) -> MigrateResult<BackupResult> {
        backup::backup_destination(profile, output, self.bin_dir.as_deref(), &*self.logger).await
    }

    async fn recreate(&self, profile: &ConnectionProfile) -> MigrateResult<()> {
        admin::recreate_database(profile, &*self.logger).await
    }

    async fn apply_schema(
        &self,
        profile: &ConnectionProfile,
        schema_file: &Path,
    ) -> MigrateResult<()> {
        apply::apply_schema(
            profile,
            schema_file,
            self.stop_on_error,
            self.bin_dir.as_deref(),
            &*self.logger,
        )
        .await
    }
}

/// Replace anything that is not safe in a file name.
fn file_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Paths for one invocation.
#[derive(Debug, Clone)]
pub struct MigrationRun {
    timestamp: String,
    started_at: DateTime<Local>,
    schema_file: PathBuf,
    backup_file: Option<PathBuf>,
}

impl MigrationRun {
    /// Compute file paths for a run starting at `started_at`.
    ///
    /// When files with the same timestamp already exist, `_1`, `_2`, ... is
    /// appended so earlier runs are never overwritten.
    pub fn prepare(settings: &MigrationSettings, started_at: DateTime<Local>) -> Self {
        let plan = settings.plan();
        let base = started_at.format(TIMESTAMP_FORMAT).to_string();
        let source_name = file_component(settings.source().database());
        let backup_name = settings
            .destination()
            .filter(|_| plan.backups_enabled())
            .map(|dest| file_component(dest.database()));

        let mut attempt = 0u32;
        loop {
            let timestamp = if attempt == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, attempt)
            };
            let schema_file = plan
                .output_dir()
                .join(format!("schema_{}_{}.sql", source_name, timestamp));
            let backup_file = backup_name.as_ref().map(|name| {
                plan.backup_dir()
                    .join(format!("backup_{}_{}.sql", name, timestamp))
            });

            let taken = schema_file.exists() || backup_file.as_ref().is_some_and(|p| p.exists());
            if !taken {
                return Self {
                    timestamp,
                    started_at,
                    schema_file,
                    backup_file,
                };
            }
            attempt += 1;
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn schema_file(&self) -> &Path {
        &self.schema_file
    }

    /// Set only in direct mode with backups enabled.
    pub fn backup_file(&self) -> Option<&Path> {
        self.backup_file.as_deref()
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub final_state: MigrationState,
    pub history: Vec<MigrationState>,
    pub schema_file: PathBuf,
    pub backup_file: Option<PathBuf>,
    pub rollback_script: Option<PathBuf>,
    pub instructions: Option<PathBuf>,
}

impl MigrationOutcome {
    pub fn is_dry_run(&self) -> bool {
        self.final_state == MigrationState::DryRunReported
    }
}

struct Progress {
    history: Vec<MigrationState>,
}

impl Progress {
    fn new() -> Self {
        Self {
            history: vec![MigrationState::Init],
        }
    }

    fn current(&self) -> MigrationState {
        self.history
            .last()
            .copied()
            .unwrap_or(MigrationState::Init)
    }

    fn advance(&mut self, next: MigrationState) {
        let current = self.current();
        debug_assert!(
            current.can_advance_to(next),
            "illegal transition {} -> {}",
            current,
            next
        );
        tracing::debug!(from = %current, to = %next, "state transition");
        self.history.push(next);
    }
}

/// Runs one migration.
pub struct Orchestrator<B> {
    backend: B,
    logger: Arc<dyn Logger>,
}

impl<B: MigrationBackend> Orchestrator<B> {
    pub fn new(backend: B, logger: Arc<dyn Logger>) -> Self {
        Self { backend, logger }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn execute(&self, settings: &MigrationSettings) -> MigrateResult<MigrationOutcome> {
        self.execute_at(settings, Local::now()).await
    }

    /// Run with an explicit start time (used for file names and the
    /// rollback script header).
    pub async fn execute_at(
        &self,
        settings: &MigrationSettings,
        started_at: DateTime<Local>,
    ) -> MigrateResult<MigrationOutcome> {
        let plan = settings.plan();
        let source = settings.source();
        let destination = match plan.mode() {
            Mode::Direct => Some(settings.destination().ok_or_else(|| {
                MigrateError::config("direct mode requires a destination database")
            })?),
            Mode::Export => None,
        };
        let mut progress = Progress::new();

        match destination {
            Some(dest) => self.logger.info(&format!(
                "Migrating schema {} -> {}{}",
                source.target(),
                dest.target(),
                if plan.dry_run() { " (dry run)" } else { "" }
            )),
            None => self
                .logger
                .info(&format!("Exporting schema of {}", source.target())),
        }

        self.backend.validate_source(source).await?;
        progress.advance(MigrationState::SourceValidated);

        if let Some(dest) = destination {
            self.backend.validate_destination(dest).await?;
            progress.advance(MigrationState::DestValidated);
        }

        create_directories(plan)?;
        let run = MigrationRun::prepare(settings, started_at);
        self.logger
            .debug(&format!("Run timestamp: {}", run.timestamp()));

        self.backend
            .export_schema(source, run.schema_file(), plan.include_roles())
            .await?;
        progress.advance(MigrationState::SchemaExported);

        let mut outcome = MigrationOutcome {
            final_state: MigrationState::SchemaExported,
            history: Vec::new(),
            schema_file: run.schema_file().to_path_buf(),
            backup_file: None,
            rollback_script: None,
            instructions: None,
        };

        let Some(dest) = destination else {
            if plan.write_instructions() {
                match instructions::write_instructions(
                    plan.output_dir(),
                    source,
                    run.schema_file(),
                    started_at,
                    &*self.logger,
                ) {
                    Ok(path) => outcome.instructions = Some(path),
                    Err(e) => self
                        .logger
                        .warning(&format!("Failed to write migration instructions: {}", e)),
                }
            }
            self.logger.success(&format!(
                "Schema exported to: {}",
                run.schema_file().display()
            ));
            return Ok(finish(outcome, progress));
        };

        outcome.backup_file = self.attempt_backup(dest, plan, &run).await;
        progress.advance(MigrationState::BackupAttempted);

        if plan.dry_run() {
            self.report_dry_run(dest, plan, &run, outcome.backup_file.as_deref());
            outcome.rollback_script =
                self.write_rollback(dest, outcome.backup_file.as_deref(), plan, started_at);
            progress.advance(MigrationState::DryRunReported);
            return Ok(finish(outcome, progress));
        }

        if let Err(e) = self.backend.recreate(dest).await {
            if matches!(e, MigrateError::DestinationLost { .. }) {
                self.leave_recovery_script(dest, outcome.backup_file.as_deref(), plan, started_at);
            }
            return Err(e);
        }
        progress.advance(MigrationState::DestroyedAndRecreated);

        if let Err(e) = self.backend.apply_schema(dest, run.schema_file()).await {
            self.leave_recovery_script(dest, outcome.backup_file.as_deref(), plan, started_at);
            return Err(e);
        }
        progress.advance(MigrationState::SchemaApplied);

        outcome.rollback_script =
            self.write_rollback(dest, outcome.backup_file.as_deref(), plan, started_at);
        progress.advance(MigrationState::RollbackScriptWritten);

        Ok(finish(outcome, progress))
    }

    /// Returns the backup path only if a backup file was actually written.
    async fn attempt_backup(
        &self,
        dest: &ConnectionProfile,
        plan: &MigrationPlan,
        run: &MigrationRun,
    ) -> Option<PathBuf> {
        let Some(path) = run.backup_file() else {
            if !plan.create_backup() {
                self.logger.warning(
                    "Backups disabled: there will be NO rollback point for the destination",
                );
            }
            return None;
        };

        match self.backend.backup(dest, path).await {
            Ok(BackupResult { created: true }) => Some(path.to_path_buf()),
            Ok(BackupResult { created: false }) => None,
            Err(e) => {
                self.logger.warning(&format!(
                    "Backup creation failed (continuing WITHOUT a rollback point): {}",
                    e
                ));
                None
            }
        }
    }

    fn report_dry_run(
        &self,
        dest: &ConnectionProfile,
        plan: &MigrationPlan,
        run: &MigrationRun,
        backup_file: Option<&Path>,
    ) {
        let load = apply::schema_load(
            dest,
            run.schema_file(),
            plan.stop_on_error(),
            plan.pg_bin_dir(),
        );

        self.logger.info("DRY RUN MODE - showing what would be done:");
        self.logger.info(&format!(
            "1. Drop and recreate database: {}",
            dest.target()
        ));
        self.logger.info(&format!(
            "2. Apply schema from: {}",
            run.schema_file().display()
        ));
        self.logger.info(&format!("   {}", load.display_command()));
        match backup_file {
            Some(path) => self
                .logger
                .info(&format!("3. Backup created at: {}", path.display())),
            None => self
                .logger
                .info("3. No backup was created; no rollback point would exist"),
        }
        self.logger.info("No changes were made to the destination.");
    }

    /// After a destructive step failed: still write the rollback script so
    /// the operator has a way back.
    fn leave_recovery_script(
        &self,
        dest: &ConnectionProfile,
        backup_file: Option<&Path>,
        plan: &MigrationPlan,
        started_at: DateTime<Local>,
    ) {
        match self.write_rollback(dest, backup_file, plan, started_at) {
            Some(script) => self.logger.error(&format!(
                "Destination '{}' can be restored from the backup with: {}",
                dest.database(),
                script.display()
            )),
            None => self.logger.error(&format!(
                "No backup exists for destination '{}'; it must be restored manually",
                dest.database()
            )),
        }
    }

    /// Rollback script failures are reported, never returned.
    fn write_rollback(
        &self,
        dest: &ConnectionProfile,
        backup_file: Option<&Path>,
        plan: &MigrationPlan,
        started_at: DateTime<Local>,
    ) -> Option<PathBuf> {
        match rollback::write_rollback_script(dest, backup_file, plan, started_at, &*self.logger) {
            Ok(path) => path,
            Err(e) => {
                self.logger
                    .warning(&format!("Failed to generate rollback script: {}", e));
                None
            }
        }
    }
}

fn create_directories(plan: &MigrationPlan) -> MigrateResult<()> {
    let mut dirs = vec![plan.output_dir().to_path_buf()];
    if plan.backups_enabled() {
        dirs.push(plan.backup_dir());
    }

    for dir in dirs {
        std::fs::create_dir_all(&dir)
            .map_err(|e| MigrateError::io(format!("creating {}", dir.display()), e))?;
    }
    Ok(())
}

fn finish(mut outcome: MigrationOutcome, progress: Progress) -> MigrationOutcome {
    outcome.final_state = progress.current();
    outcome.history = progress.history;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SslMode;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn settings(dir: &Path, mode: Mode) -> MigrationSettings {
        let source =
            ConnectionProfile::new("db1", 5432, "postgres", "a", "shop/prod", SslMode::Require)
                .unwrap();
        let dest =
            ConnectionProfile::new("db2", 5432, "postgres", "b", "shop_staging", SslMode::Require)
                .unwrap();
        MigrationSettings::new(source, Some(dest), MigrationPlan::new(mode, dir)).unwrap()
    }

    #[test]
    fn test_transitions() {
        use MigrationState::*;
        assert!(Init.can_advance_to(SourceValidated));
        assert!(SourceValidated.can_advance_to(SchemaExported));
        assert!(BackupAttempted.can_advance_to(DryRunReported));
        assert!(DestroyedAndRecreated.can_advance_to(SchemaApplied));

        assert!(!BackupAttempted.can_advance_to(SchemaApplied));
        assert!(!SchemaExported.can_advance_to(DestroyedAndRecreated));
        assert!(!DryRunReported.can_advance_to(DestroyedAndRecreated));
        assert!(!Init.can_advance_to(SchemaExported));
    }

    #[test]
    fn test_run_paths() {
        let dir = tempfile::tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2026, 10, 19, 9, 5, 0).unwrap();
        let run = MigrationRun::prepare(&settings(dir.path(), Mode::Direct), at);

        assert_eq!(run.timestamp(), "20261019_090500");
        assert_eq!(
            run.schema_file(),
            dir.path().join("schema_shop_prod_20261019_090500.sql")
        );
        assert_eq!(
            run.backup_file().unwrap(),
            dir.path()
                .join("backup")
                .join("backup_shop_staging_20261019_090500.sql")
        );
    }

    #[test]
    fn test_run_paths_skip_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2026, 10, 19, 9, 5, 0).unwrap();
        let settings = settings(dir.path(), Mode::Export);

        let first = MigrationRun::prepare(&settings, at);
        std::fs::write(first.schema_file(), "-- schema").unwrap();
        let second = MigrationRun::prepare(&settings, at);

        assert_eq!(second.timestamp(), "20261019_090500_1");
        assert_ne!(first.schema_file(), second.schema_file());
        assert!(second.backup_file().is_none());
    }

    #[test]
    fn test_file_component() {
        assert_eq!(file_component("shop_prod"), "shop_prod");
        assert_eq!(file_component("../etc/passwd"), ".._etc_passwd");
        assert_eq!(file_component("My DB"), "My_DB");
    }
}
