use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use pgtestdb::config::{self, ConfigInput, DatabaseArgs, GooseArgs, Settings};
use pgtestdb::goose::{MigrationResult, MigrationState, Provider};
use pgtestdb::migrator::Migrator;
use pgtestdb::migrators::GooseMigrator;
use pgtestdb::testdb::{cleanup, template};
use std::path::Path;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value = pgtestdb::constants::CONFIG_FILENAME, global = true)]
    config_file: String,

    /// Enable verbose output (info level)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress all non-essential output (error level only)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Enable debug output (debug level)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Connection and migration options shared by the goose commands
#[derive(Args, Debug, Clone)]
struct GooseCommandArgs {
    #[command(flatten)]
    database_args: DatabaseArgs,

    #[command(flatten)]
    goose_args: GooseArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending migrations
    Up {
        /// Stop after applying this version
        #[arg(long)]
        to: Option<i64>,

        #[command(flatten)]
        args: GooseCommandArgs,
    },

    /// Apply the next pending migration
    UpByOne {
        #[command(flatten)]
        args: GooseCommandArgs,
    },

    /// Roll back the most recent migration
    Down {
        /// Roll back every migration newer than this version
        #[arg(long)]
        to: Option<i64>,

        #[command(flatten)]
        args: GooseCommandArgs,
    },

    /// Roll back the most recent migration and apply it again
    Redo {
        #[command(flatten)]
        args: GooseCommandArgs,
    },

    /// Show which migrations are applied
    Status {
        #[arg(long, value_enum, default_value = "human")]
        format: StatusFormat,

        #[command(flatten)]
        args: GooseCommandArgs,
    },

    /// Print the current migration version
    Version {
        #[command(flatten)]
        args: GooseCommandArgs,
    },

    /// Print the template database name for the migration directory
    Hash {
        #[command(flatten)]
        goose_args: GooseArgs,
    },

    /// Drop leftover template and test databases
    Clean {
        /// List the databases without dropping them
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        database_args: DatabaseArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    initialize_logging(&cli);

    tokio::select! {
        result = run_main(cli) => result,
        _ = wait_for_shutdown_signal() => {
            info!("Received shutdown signal, exiting...");
            Ok(())
        }
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn initialize_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_settings(
    file_config: &ConfigInput,
    database_args: Option<&DatabaseArgs>,
    goose_args: Option<&GooseArgs>,
) -> Result<Settings> {
    let cli_config = ConfigInput {
        database: database_args.map(|args| args.clone().into()),
        goose: goose_args.map(|args| args.clone().into()),
    };

    config::ConfigBuilder::new()
        .with_file(file_config.clone())
        .with_env()
        .with_cli_args(cli_config)
        .resolve()
}

/// Migrations directories in the config file are relative to the file itself
fn goose_migrator(settings: &Settings, root_dir: &Path) -> GooseMigrator {
    GooseMigrator::new(root_dir.join(&settings.goose.migrations_dir))
        .with_table_name(settings.goose.table_name.clone())
        .with_allow_missing(settings.goose.allow_missing)
}

async fn open_provider(
    file_config: &ConfigInput,
    root_dir: &Path,
    args: &GooseCommandArgs,
) -> Result<Provider> {
    let settings = resolve_settings(
        file_config,
        Some(&args.database_args),
        Some(&args.goose_args),
    )?;
    let migrator = goose_migrator(&settings, root_dir);

    info!("Connecting to {}", settings.database.masked_url());
    let pool = settings.database.connect().await?;
    Provider::new(pool, &migrator.source(), migrator.provider_options())
}

fn print_results(results: &[MigrationResult]) {
    for result in results {
        println!(
            "{:<5} {} {} ({:.2?})",
            result.direction.to_string().to_uppercase(),
            result.version,
            result.name,
            result.duration
        );
    }
}

async fn run_main(cli: Cli) -> Result<()> {
    let (file_config, root_dir) = config::load_config(&cli.config_file)?;

    match cli.command {
        Commands::Up { to, args } => {
            let provider = open_provider(&file_config, &root_dir, &args).await?;
            let results = match to {
                Some(version) => provider.up_to(version).await?,
                None => provider.up().await?,
            };
            print_results(&results);
            if results.is_empty() {
                println!("No migrations to apply");
            }
            Ok(())
        }
        Commands::UpByOne { args } => {
            let provider = open_provider(&file_config, &root_dir, &args).await?;
            print_results(&[provider.up_by_one().await?]);
            Ok(())
        }
        Commands::Down { to, args } => {
            let provider = open_provider(&file_config, &root_dir, &args).await?;
            let results = match to {
                Some(version) => provider.down_to(version).await?,
                None => vec![provider.down().await?],
            };
            print_results(&results);
            Ok(())
        }
        Commands::Redo { args } => {
            let provider = open_provider(&file_config, &root_dir, &args).await?;
            print_results(&provider.redo().await?);
            Ok(())
        }
        Commands::Status { format, args } => {
            let provider = open_provider(&file_config, &root_dir, &args).await?;
            let statuses = provider.status().await?;

            match format {
                StatusFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
                StatusFormat::Human => {
                    println!("{:<24} Migration", "Applied At");
                    println!("{}", "=".repeat(48));
                    for status in &statuses {
                        let applied_at = match &status.state {
                            MigrationState::Applied(Some(tstamp)) => {
                                tstamp.format("%Y-%m-%d %H:%M:%S").to_string()
                            }
                            MigrationState::Applied(None) => "applied".to_string(),
                            MigrationState::Pending => "Pending".to_string(),
                        };
                        println!("{:<24} {}", applied_at, status.name);
                    }
                }
            }
            Ok(())
        }
        Commands::Version { args } => {
            let provider = open_provider(&file_config, &root_dir, &args).await?;
            println!("{}", provider.current_version().await?);
            Ok(())
        }
        Commands::Hash { goose_args } => {
            let settings = resolve_settings(&file_config, None, Some(&goose_args))?;
            let migrator = goose_migrator(&settings, &root_dir);
            println!("{}", template::template_name(&migrator.hash()?));
            Ok(())
        }
        Commands::Clean {
            dry_run,
            database_args,
        } => {
            let settings = resolve_settings(&file_config, Some(&database_args), None)?;
            let databases = cleanup::drop_all(&settings.database, dry_run).await?;

            if databases.is_empty() {
                println!("No test databases found");
            }
            for db in &databases {
                if dry_run {
                    println!("Would drop {}", db.name);
                } else {
                    println!("Dropped {}", db.name);
                }
            }
            Ok(())
        }
    }
}
