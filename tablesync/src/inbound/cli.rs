//! Command-line surface for the setup, empty and load operations.

use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::domain::ports::DatabaseConnector;
use crate::domain::{ReconcileReport, SchemaConfig, SetupError, connect, empty, load, setup};
use crate::inbound::files::{load_records, load_schema_config};
use crate::inbound::settings::ConnectionOverrides;
use crate::outbound::{InMemoryDatabase, RethinkDbConnector};

/// `tablesync` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tablesync",
    about = "Bring a RethinkDB database in line with a declarative table configuration",
    version
)]
pub struct CliArgs {
    /// Path to the JSON schema configuration.
    #[arg(long, value_name = "path", default_value = "tablesync.json")]
    pub config: PathBuf,
    /// Run against a throwaway in-memory database instead of a server.
    #[arg(long)]
    pub dry_run: bool,
    /// Operation to perform.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported operations.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create the database, tables and indexes that are missing.
    Setup,
    /// Delete every row of every configured table.
    Empty,
    /// Insert documents from a JSON file keyed by table name.
    Load {
        /// Path to the records document.
        #[arg(long, value_name = "path")]
        records: PathBuf,
    },
}

/// Result of a completed command, printed as `key=value` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `setup` finished.
    Reconciled(ReconcileReport),
    /// `empty` cleared this many tables.
    Emptied(usize),
    /// `load` inserted this many documents.
    Loaded(usize),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconciled(report) => {
                let indexes: Vec<String> = report
                    .created_indexes
                    .iter()
                    .map(|created| format!("{}.{}", created.table, created.index))
                    .collect();
                writeln!(f, "database_created={}", report.database_created)?;
                writeln!(f, "created_tables={}", report.created_tables.join(","))?;
                write!(f, "created_indexes={}", indexes.join(","))
            }
            Self::Emptied(count) => write!(f, "emptied_tables={count}"),
            Self::Loaded(count) => write!(f, "loaded_records={count}"),
        }
    }
}

/// Execute `args`, applying `overrides` to the file's connection settings.
pub async fn run(args: &CliArgs, overrides: &ConnectionOverrides) -> Result<Outcome, SetupError> {
    let mut config = load_schema_config(&args.config)?;
    config.connection = overrides.applied_to(&config.connection);

    if args.dry_run || overrides.dry_run {
        info!(command = ?args.command, "dry run against an in-memory database");
        let database = InMemoryDatabase::default();
        if !matches!(args.command, Command::Setup) {
            provision(&database, &config).await?;
        }
        execute(&database, &config, &args.command).await
    } else {
        execute(&RethinkDbConnector, &config, &args.command).await
    }
}

/// Apply the configured schema so `empty` and `load` rehearse against it.
async fn provision(database: &InMemoryDatabase, config: &SchemaConfig) -> Result<(), SetupError> {
    let connection = connect(database, &config.connection).await?;
    setup(&connection, config).await.map(drop)
}

async fn execute<C: DatabaseConnector>(
    connector: &C,
    config: &SchemaConfig,
    command: &Command,
) -> Result<Outcome, SetupError> {
    match command {
        Command::Setup => {
            config.table_specs()?;
            let connection = connect(connector, &config.connection).await?;
            setup(&connection, config).await.map(Outcome::Reconciled)
        }
        Command::Empty => {
            config.tables()?;
            let connection = connect(connector, &config.connection).await?;
            empty(&connection, config).await.map(Outcome::Emptied)
        }
        Command::Load { records } => {
            let records = load_records(records)?;
            let connection = connect(connector, &config.connection).await?;
            load(&connection, &records).await.map(Outcome::Loaded)
        }
    }
}

#[cfg(test)]
mod tests {
    //! Command execution against the in-memory database.

    use std::io::Write;

    use rstest::{fixture, rstest};
    use tempfile::NamedTempFile;

    use super::*;
    use crate::domain::{ConfigError, CreatedIndex};

    const CONFIG: &str = r#"{
        "tables": {
            "logs": ["id", "ts", {"name": "geo", "options": {"geo": true}}],
            "users": "email"
        }
    }"#;

    fn file_with(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file should be created");
        file.write_all(contents.as_bytes())
            .expect("temp file should be writable");
        file
    }

    #[fixture]
    fn config_file() -> NamedTempFile {
        file_with(CONFIG)
    }

    fn dry_run(config: &NamedTempFile, command: Command) -> CliArgs {
        CliArgs {
            config: config.path().to_path_buf(),
            dry_run: true,
            command,
        }
    }

    #[rstest]
    fn subcommands_parse() {
        let args = CliArgs::try_parse_from([
            "tablesync",
            "--config",
            "schema.json",
            "load",
            "--records",
            "rows.json",
        ])
        .expect("arguments should parse");

        assert_eq!(args.config, PathBuf::from("schema.json"));
        assert!(!args.dry_run);
        assert!(matches!(
            args.command,
            Command::Load { records } if records == PathBuf::from("rows.json")
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn dry_run_setup_reports_every_creation(config_file: NamedTempFile) {
        let outcome = run(&dry_run(&config_file, Command::Setup), &ConnectionOverrides::default())
            .await
            .expect("dry run should succeed");

        let Outcome::Reconciled(report) = outcome else {
            panic!("setup should reconcile");
        };
        assert!(report.database_created);
        assert_eq!(report.created_tables, ["logs", "users"]);
        assert_eq!(
            report.created_indexes,
            [
                CreatedIndex {
                    table: "logs".to_owned(),
                    index: "geo".to_owned(),
                },
                CreatedIndex {
                    table: "logs".to_owned(),
                    index: "ts".to_owned(),
                },
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn dry_run_load_counts_documents(config_file: NamedTempFile) {
        let records = file_with(r#"{"logs": [{"id": 1}, {"id": 2}], "users": {"email": "a@b.c"}}"#);
        let command = Command::Load {
            records: records.path().to_path_buf(),
        };

        let outcome = run(&dry_run(&config_file, command), &ConnectionOverrides::default())
            .await
            .expect("dry run should succeed");

        assert_eq!(outcome, Outcome::Loaded(3));
    }

    #[rstest]
    #[tokio::test]
    async fn dry_run_empty_counts_tables(config_file: NamedTempFile) {
        let outcome = run(&dry_run(&config_file, Command::Empty), &ConnectionOverrides::default())
            .await
            .expect("dry run should succeed");

        assert_eq!(outcome.to_string(), "emptied_tables=2");
    }

    #[rstest]
    #[tokio::test]
    async fn invalid_declarations_fail_before_connecting() {
        let config = file_with(r#"{"tables": {"users": [42]}}"#);

        let result = run(&dry_run(&config, Command::Setup), &ConnectionOverrides::default()).await;

        assert!(matches!(
            result,
            Err(SetupError::Config(ConfigError::InvalidPrimaryKey { .. }))
        ));
    }

    #[rstest]
    fn reconcile_outcome_prints_key_value_lines() {
        let outcome = Outcome::Reconciled(ReconcileReport {
            database_created: false,
            created_tables: vec!["users".to_owned()],
            created_indexes: vec![CreatedIndex {
                table: "users".to_owned(),
                index: "email".to_owned(),
            }],
        });

        assert_eq!(
            outcome.to_string(),
            "database_created=false\ncreated_tables=users\ncreated_indexes=users.email"
        );
    }
}
