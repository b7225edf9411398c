use anyhow::Result;
use clap::{Parser, Subcommand};
use rtmh_processor::storage::{self, SqliteStore};
use rtmh_processor::{Config, Input};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rtmh-processor",
    about = "Streaming window aggregation and incident detection for logs, metrics and events",
    version,
    long_about = None
)]
struct Cli {
    /// TOML configuration file (defaults to $RTMH_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config and DATABASE_PATH)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume NDJSON observations until EOF or Ctrl-C
    Run {
        /// Read from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// List recent incidents
    Incidents {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List recent aggregation snapshots
    Snapshots {
        /// Only this window (e.g. logs_error_rate)
        #[arg(long)]
        window_key: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    // Logs go to stderr so stdout stays clean for command output.
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    match cli.command {
        Commands::Run { input } => {
            let input = input.map_or(Input::Stdin, Input::File);
            let stats = rtmh_processor::run(config, input).await?;
            tracing::info!(
                handled = stats.handled,
                skipped = stats.skipped,
                incidents = stats.incidents_created,
                snapshots = stats.snapshots_written,
                "Done"
            );
        }
        Commands::Incidents { limit } => {
            let store = SqliteStore::new(storage::open_pool(&config.database_path)?);
            let incidents = store.list_recent_incidents(limit)?;
            if incidents.is_empty() {
                println!("No incidents found.");
            } else {
                println!("{:<25} | {:<8} | {:<10} | {:<22} | Title", "Created", "Severity", "Status", "Source");
                println!("{:-<25}-|-{:-<8}-|-{:-<10}-|-{:-<22}-|-{:-<30}", "", "", "", "", "");
                for i in incidents {
                    println!(
                        "{:<25} | {:<8} | {:<10} | {:<22} | {}",
                        i.created_at.to_rfc3339(),
                        i.severity,
                        i.status,
                        i.source,
                        i.title
                    );
                    println!("{:<25} | {:<8} | {:<10} | {:<22} |   {}", "", "", "", "", i.description);
                }
            }
        }
        Commands::Snapshots { window_key, limit } => {
            let store = SqliteStore::new(storage::open_pool(&config.database_path)?);
            let snapshots = store.list_snapshots(window_key.as_deref(), limit)?;
            if snapshots.is_empty() {
                println!("No snapshots found.");
            } else {
                println!("{:<24} | {:<12} | {:>12} | {:>6} | Window end", "Window", "Metric", "Value", "Count");
                println!("{:-<24}-|-{:-<12}-|-{:-<12}-|-{:-<6}-|-{:-<25}", "", "", "", "", "");
                for s in snapshots {
                    let end = chrono::DateTime::from_timestamp_millis(s.window_end)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| s.window_end.to_string());
                    println!(
                        "{:<24} | {:<12} | {:>12.4} | {:>6} | {}",
                        s.window_key, s.metric_type, s.value, s.count, end
                    );
                }
            }
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
