use agentedu_migrate::config::Settings;
use agentedu_migrate::revision::{HistoryEntry, Migrator};
use agentedu_migrate::schema::{ColumnOutcome, ColumnSpec, EvolutionResult, Strategy, TargetSchema};
use agentedu_migrate::{db, evolve, targets};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::Connection;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "migrate", version, about = "Schema migrations for the agent education platform database")]
struct Cli {
    /// Database URL; defaults to DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add missing columns to an existing table
    Evolve(EvolveArgs),
    /// Apply revisions up to a target (default: head)
    Upgrade {
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Revert revisions back to a target (default: before the base)
    Downgrade {
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show the applied revision
    Current,
    /// List all revisions, marking the applied ones
    History {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct EvolveArgs {
    /// Table to evolve (required with --column)
    #[arg(long)]
    table: Option<String>,

    /// Column as name:type[:null|:not-null][=default], repeatable
    #[arg(long = "column", value_name = "SPEC")]
    columns: Vec<ColumnSpec>,

    /// JSON file with { "table": ..., "columns": [...] }
    #[arg(long, value_name = "FILE")]
    target_file: Option<PathBuf>,

    /// Built-in target
    #[arg(long, value_enum)]
    preset: Option<Preset>,

    /// Use ADD COLUMN IF NOT EXISTS instead of reading the catalog
    #[arg(long)]
    native: bool,

    /// Print the statements without running them
    #[arg(long)]
    dry_run: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    UsersAuth,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ Migration failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    // Logs go to stderr so that --json output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "agentedu_migrate=info,migrate=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = match cli.database_url.as_deref() {
        Some(url) => Settings::load_with_url(url)?,
        None => Settings::load().context("Failed to load settings")?,
    };

    info!("🔗 Connecting to database: {}", settings.database.redacted_url());
    let mut conn = db::connect(&settings)
        .await
        .context("Failed to connect to database")?;

    let outcome = dispatch(cli.command, &settings, &mut conn).await;

    if let Err(e) = conn.close().await {
        tracing::warn!("Failed to close database connection: {}", e);
    }
    outcome
}

async fn dispatch(
    command: Command,
    settings: &Settings,
    conn: &mut sqlx::AnyConnection,
) -> anyhow::Result<()> {
    match command {
        Command::Evolve(args) => {
            let target = resolve_target(&args)?;
            let mut options = settings.migrate.evolve_options();
            if args.native {
                options.strategy = Strategy::Native;
            }
            options.dry_run = args.dry_run;

            let result = evolve(conn, &target, options)
                .await
                .with_context(|| format!("Failed to evolve table {}", target.table))?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_evolution(&result);
            }
        }
        Command::Upgrade { to, json } => {
            let chain = targets::revision_chain()?;
            let applied = migrator(&chain, settings)
                .upgrade(conn, to.as_deref())
                .await
                .context("Upgrade failed")?;
            print_revisions("Upgraded", &applied, json)?;
        }
        Command::Downgrade { to, json } => {
            let chain = targets::revision_chain()?;
            let reverted = migrator(&chain, settings)
                .downgrade(conn, to.as_deref())
                .await
                .context("Downgrade failed")?;
            print_revisions("Reverted", &reverted, json)?;
        }
        Command::Current => {
            let chain = targets::revision_chain()?;
            match migrator(&chain, settings).current(conn).await? {
                Some(id) => println!("{}", id),
                None => println!("(base)"),
            }
        }
        Command::History { json } => {
            let chain = targets::revision_chain()?;
            let history = migrator(&chain, settings).history(conn).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else {
                print_history(&history);
            }
        }
    }
    Ok(())
}

fn migrator<'a>(chain: &'a agentedu_migrate::RevisionChain, settings: &Settings) -> Migrator<'a> {
    Migrator::new(chain)
        .with_version_table(&settings.migrate.version_table)
        .with_strategy(settings.migrate.strategy)
}

/// Target file wins over preset; extra --column flags are appended to either.
fn resolve_target(args: &EvolveArgs) -> anyhow::Result<TargetSchema> {
    let mut target = if let Some(path) = &args.target_file {
        TargetSchema::from_json_file(path)?
    } else if let Some(Preset::UsersAuth) = args.preset {
        targets::users_auth()
    } else {
        match &args.table {
            Some(table) => TargetSchema::new(table.clone()),
            None => bail!("--table is required unless --target-file or --preset is given"),
        }
    };

    if let Some(table) = &args.table {
        if !table.eq_ignore_ascii_case(&target.table) {
            bail!(
                "--table {} does not match target table {}",
                table,
                target.table
            );
        }
    }

    target.columns.extend(args.columns.iter().cloned());
    if target.columns.is_empty() {
        bail!("No columns to add; pass --column, --preset or --target-file");
    }
    Ok(target)
}

fn print_evolution(result: &EvolutionResult) {
    let prefix = if result.dry_run { "[dry run] " } else { "" };
    for report in &result.columns {
        let status = match report.outcome {
            ColumnOutcome::Added => "added",
            ColumnOutcome::AlreadyPresent => "skipped (already present)",
            ColumnOutcome::Ensured => "ensured",
            ColumnOutcome::Planned => "would add",
        };
        println!("{}{}.{}: {}", prefix, result.table, report.column, status);
    }
    for statement in &result.statements {
        println!("{}  {};", prefix, statement);
    }
    if result.is_noop() {
        println!("✅ {} is already up to date", result.table);
    } else if !result.dry_run {
        println!("✅ Migration of {} completed successfully", result.table);
    }
}

fn print_revisions(verb: &str, ids: &[String], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(ids)?);
    } else if ids.is_empty() {
        println!("✅ Nothing to do");
    } else {
        for id in ids {
            println!("{} {}", verb, id);
        }
        println!("✅ Migration completed successfully");
    }
    Ok(())
}

fn print_history(history: &[HistoryEntry]) {
    for entry in history {
        let marker = if entry.current {
            "(current)"
        } else if entry.applied {
            "(applied)"
        } else {
            ""
        };
        println!(
            "{} -> {} {} {}",
            entry.down_revision.as_deref().unwrap_or("<base>"),
            entry.id,
            entry.description,
            marker
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evolve_args(args: &[&str]) -> EvolveArgs {
        let cli = Cli::try_parse_from(["migrate", "evolve"].iter().chain(args)).unwrap();
        match cli.command {
            Command::Evolve(args) => args,
            other => panic!("expected evolve, got {:?}", other),
        }
    }

    #[test]
    fn test_preset_with_extra_columns() {
        let target = resolve_target(&evolve_args(&[
            "--preset",
            "users-auth",
            "--column",
            "display_name:text",
        ]))
        .unwrap();
        assert_eq!(target.table, "users");
        assert_eq!(target.columns.len(), 4);
        assert_eq!(target.columns[3].name, "display_name");
    }

    #[test]
    fn test_target_file_wins_over_preset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(
            &path,
            r#"{ "table": "user_progress", "columns": [{ "name": "completed_at", "type": "timestamp" }] }"#,
        )
        .unwrap();

        let target = resolve_target(&evolve_args(&[
            "--preset",
            "users-auth",
            "--target-file",
            path.to_str().unwrap(),
        ]))
        .unwrap();
        assert_eq!(target.table, "user_progress");
        assert_eq!(target.columns.len(), 1);
    }

    #[test]
    fn test_table_must_match_target() {
        let err = resolve_target(&evolve_args(&["--preset", "users-auth", "--table", "courses"]))
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));

        // Case-insensitive, like unquoted identifiers
        let args = evolve_args(&["--preset", "users-auth", "--table", "USERS"]);
        assert!(resolve_target(&args).is_ok());
    }

    #[test]
    fn test_columns_required() {
        let err = resolve_target(&evolve_args(&["--table", "users"])).unwrap_err();
        assert!(err.to_string().contains("No columns"));

        let err = resolve_target(&evolve_args(&["--column", "note:text"])).unwrap_err();
        assert!(err.to_string().contains("--table is required"));
    }

    #[test]
    fn test_column_flag_parsing() {
        let args = evolve_args(&[
            "--table",
            "users",
            "--column",
            "is_active:boolean:not-null=true",
        ]);
        assert_eq!(args.columns.len(), 1);
        assert!(!args.columns[0].nullable);
        assert!(Cli::try_parse_from(["migrate", "evolve", "--column", "nope"]).is_err());
    }
}
