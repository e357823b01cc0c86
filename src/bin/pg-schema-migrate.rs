//! pg-schema-migrate: the CLI
//!
//! Migrates PostgreSQL schemas (structure only) between hosts.
//!
//! # Usage
//!
//! ```bash
//! # Replace shop_staging on db2 with the structure of shop_prod on db1
//! pg-schema-migrate -s db1 -d shop_prod --dest-host db2 --dest-db shop_staging
//!
//! # Only write the schema file
//! pg-schema-migrate -d reports --mode export -o ./out
//! ```

use clap::Parser;
use colored::*;
use pg_schema_migrate::config::{PlanLayer, ProfileLayer};
use pg_schema_migrate::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pg-schema-migrate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "PostgreSQL schema migration tool")]
#[command(
    long_about = "Migrate PostgreSQL database schemas (structure only) between different hosts.\n\n\
    Passwords are prompted for, or read from PGSM_SOURCE_PASSWORD / PGSM_DEST_PASSWORD."
)]
#[command(after_help = "EXAMPLES:
    pg-schema-migrate -s db1 -d shop_prod --dest-host db2 --dest-db shop_staging
    pg-schema-migrate -s db1 -d shop_prod --dest-host db2 --dry-run
    pg-schema-migrate -d reports --mode export -o ./out --instructions")]
struct Cli {
    /// Source database host [default: localhost]
    #[arg(short = 's', long, help_heading = "Source")]
    source_host: Option<String>,

    /// Source database port [default: 5432]
    #[arg(long, help_heading = "Source")]
    source_port: Option<u16>,

    /// Source database username [default: postgres]
    #[arg(short = 'u', long, help_heading = "Source")]
    source_user: Option<String>,

    /// Source database name (required here or in the config file)
    #[arg(short = 'd', long, help_heading = "Source")]
    source_db: Option<String>,

    /// Source SSL mode: disable, require, verify-ca, verify-full [default: require]
    #[arg(long, help_heading = "Source")]
    source_ssl: Option<String>,

    /// Source password (prompted for when unset)
    #[arg(long, env = "PGSM_SOURCE_PASSWORD", hide_env_values = true, hide = true)]
    source_password: Option<String>,

    /// Destination database host [default: localhost]
    #[arg(long, help_heading = "Destination")]
    dest_host: Option<String>,

    /// Destination database port [default: 5432]
    #[arg(long, help_heading = "Destination")]
    dest_port: Option<u16>,

    /// Destination database username [default: postgres]
    #[arg(long, help_heading = "Destination")]
    dest_user: Option<String>,

    /// Destination database name (prompted for when omitted)
    #[arg(long, help_heading = "Destination")]
    dest_db: Option<String>,

    /// Destination SSL mode: disable, require, verify-ca, verify-full [default: require]
    #[arg(long, help_heading = "Destination")]
    dest_ssl: Option<String>,

    /// Database used for server checks and CREATE/DROP DATABASE [default: postgres]
    #[arg(long, help_heading = "Destination")]
    dest_maintenance_db: Option<String>,

    /// Destination password (prompted for when unset)
    #[arg(long, env = "PGSM_DEST_PASSWORD", hide_env_values = true, hide = true)]
    dest_password: Option<String>,

    /// Migration mode: 'direct' or 'export' [default: direct]
    #[arg(short, long)]
    mode: Option<String>,

    /// Output directory for schema, backup and rollback files [default: ./schema_migration]
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Show what would be done without touching the destination
    #[arg(long)]
    dry_run: bool,

    /// Keep privilege statements (GRANT/REVOKE) in the export
    #[arg(long)]
    include_roles: bool,

    /// Skip the destination backup (no rollback point)
    #[arg(long)]
    no_backup: bool,

    /// Export mode: also write README.md with manual apply steps
    #[arg(long)]
    instructions: bool,

    /// Stop psql at the first failing statement
    #[arg(long)]
    stop_on_error: bool,

    /// Directory containing pg_dump and psql
    #[arg(long)]
    pg_bin_dir: Option<PathBuf>,

    /// Config file (default: ./pg-schema-migrate.toml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            source: ProfileLayer {
                host: self.source_host.clone(),
                port: self.source_port,
                user: self.source_user.clone(),
                database: self.source_db.clone(),
                ssl_mode: self.source_ssl.clone(),
                maintenance_database: None,
            },
            destination: ProfileLayer {
                host: self.dest_host.clone(),
                port: self.dest_port,
                user: self.dest_user.clone(),
                database: self.dest_db.clone(),
                ssl_mode: self.dest_ssl.clone(),
                maintenance_database: self.dest_maintenance_db.clone(),
            },
            migration: PlanLayer {
                mode: self.mode.clone(),
                output_dir: self.output_dir.clone(),
                backup: self.no_backup.then_some(false),
                include_roles: self.include_roles.then_some(true),
                dry_run: self.dry_run.then_some(true),
                instructions: self.instructions.then_some(true),
                stop_on_error: self.stop_on_error.then_some(true),
                pg_bin_dir: self.pg_bin_dir.clone(),
            },
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let logger: Arc<dyn Logger> = Arc::new(ConsoleLogger::new(cli.verbose));
    logger.info("Starting PostgreSQL schema migration...");

    match run(&cli, logger.clone()).await {
        Ok(outcome) => {
            print_summary(&outcome);
            if outcome.is_dry_run() {
                logger.success("Dry run completed; the destination was not modified");
            } else {
                logger.success("Schema migration completed successfully!");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            logger.error(&format!("[{}] {}", e.stage(), e));
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: &Cli, logger: Arc<dyn Logger>) -> MigrateResult<MigrationOutcome> {
    let file_layer = match ConfigLayer::discover(cli.config.as_deref())? {
        Some((path, layer)) => {
            logger.info(&format!("Using config file {}", path.display()));
            layer
        }
        None => ConfigLayer::default(),
    };

    let credentials = Credentials {
        source: cli.source_password.clone(),
        destination: cli.dest_password.clone(),
    };

    let settings =
        MigrationSettings::resolve(cli.layer().over(file_layer), credentials, &mut TerminalInput)?;

    let backend = PgBackend::new(settings.plan(), logger.clone());
    Orchestrator::new(backend, logger).execute(&settings).await
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "pg_schema_migrate=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_summary(outcome: &MigrationOutcome) {
    println!();
    println!("{}", "Files".white().bold());
    println!(
        "  {} {}",
        "schema:  ".dimmed(),
        outcome.schema_file.display().to_string().cyan()
    );
    if let Some(path) = &outcome.backup_file {
        println!(
            "  {} {}",
            "backup:  ".dimmed(),
            path.display().to_string().cyan()
        );
    }
    if let Some(path) = &outcome.rollback_script {
        println!(
            "  {} {}",
            "rollback:".dimmed(),
            path.display().to_string().cyan()
        );
    }
    if let Some(path) = &outcome.instructions {
        println!(
            "  {} {}",
            "readme:  ".dimmed(),
            path.display().to_string().cyan()
        );
    }
    println!();
}
