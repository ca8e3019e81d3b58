use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use legacy_consolidation::{
    run_consolidation, write_customer_order_report, CanonicalizationPolicy, ConfigOverrides,
    ConsolidationConfig, ConsolidationSummary, LegacyOrderRow, LegacyWineRow, SqliteStore,
};

#[derive(Debug, Parser)]
#[command(name = "legacy-consolidation", version)]
#[command(about = "Consolidate legacy order and wine rows into canonical customers and producers")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database (overrides config and LEGACY_CONSOLIDATION_DB)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Recorded as creator of canonical rows (overrides LEGACY_CONSOLIDATION_USER)
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create legacy, canonical and link tables
    Init,
    /// Bulk load a '|' delimited email orders export
    LoadOrders { file: PathBuf },
    /// Bulk load a '|' delimited wine master export
    LoadWines { file: PathBuf },
    /// Run one consolidation pass
    Consolidate {
        #[arg(value_enum)]
        target: Target,
    },
    #[command(subcommand)]
    Report(ReportCommand),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Target {
    Customers,
    Producers,
}

#[derive(Debug, Subcommand)]
enum ReportCommand {
    /// Items ordered per consolidated customer, as Markdown
    CustomerOrders {
        /// Only customers with this canonical email (repeatable)
        #[arg(long = "email")]
        emails: Vec<String>,

        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Logs on stderr so reports can be piped
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = ConsolidationConfig::resolve(&ConfigOverrides {
        config_file: cli.config.clone(),
        database: cli.database.clone(),
        update_user: cli.user.clone(),
    })
    .context("failed to resolve configuration")?;

    info!(
        "legacy-consolidation v{} using {}",
        legacy_consolidation::VERSION,
        config.database.display()
    );

    let store = SqliteStore::open(&config)
        .with_context(|| format!("failed to open {}", config.database.display()))?;

    match cli.command {
        Commands::Init => {
            println!("🔧 Schema ready in {}", config.database.display());
        }
        Commands::LoadOrders { file } => {
            let path = config.data_file(&file);
            let report = store
                .load_legacy_orders(&path)
                .with_context(|| format!("failed to load orders from {}", path.display()))?;
            println!(
                "📂 {} → {}: {} rows, {} warnings",
                path.display(),
                config.orders_table(),
                report.rows_affected,
                report.warnings
            );
        }
        Commands::LoadWines { file } => {
            let path = config.data_file(&file);
            let report = store
                .load_legacy_wines(&path)
                .with_context(|| format!("failed to load wines from {}", path.display()))?;
            println!(
                "📂 {} → {}: {} rows, {} warnings",
                path.display(),
                config.wines_table(),
                report.rows_affected,
                report.warnings
            );
        }
        Commands::Consolidate { target } => {
            let summary = consolidate(&store, target)?;
            println!(
                "✅ {:?}: {} consolidated, {} need review, {} links",
                target, summary.processed_count, summary.review_count, summary.link_count
            );
        }
        Commands::Report(ReportCommand::CustomerOrders { emails, output }) => {
            let items = store.customer_order_items(&emails)?;
            match output {
                Some(path) => {
                    let mut file = std::fs::File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    write_customer_order_report(&items, &mut file)?;
                    file.flush()?;
                    println!("📋 {} items written to {}", items.len(), path.display());
                }
                None => {
                    let stdout = std::io::stdout();
                    let mut out = stdout.lock();
                    write_customer_order_report(&items, &mut out)?;
                }
            }
        }
    }

    Ok(())
}

fn consolidate(store: &SqliteStore, target: Target) -> Result<ConsolidationSummary> {
    let mut sink = store.begin_pass()?;
    let summary = match target {
        Target::Customers => run_consolidation::<LegacyOrderRow, _, _>(
            store,
            &mut sink,
            &CanonicalizationPolicy::CUSTOMER,
        ),
        Target::Producers => run_consolidation::<LegacyWineRow, _, _>(
            store,
            &mut sink,
            &CanonicalizationPolicy::PRODUCER,
        ),
    }
    .with_context(|| format!("{:?} pass failed, nothing committed", target))?;
    Ok(summary)
}
