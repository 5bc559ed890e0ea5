//! Larkflow - Feishu bitable task runner.
//!
//! Claims pending rows of a task table, runs a stock analysis for each,
//! publishes the report as a document and writes the link back.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use larkflow::analysis::{Analyzer, CommandAnalyzer, SimulatedAnalyzer};
use larkflow::core::{Config, CredentialStore, Settings};
use larkflow::integrations::{self, BitableClient, DocxClient, FeishuError, TokenProvider};
use larkflow::report::{cleanup_results, format_size, DocumentPublisher, ResultsArchive};
use larkflow::workflow::{
    BitableTaskStore, Orchestrator, RunOptions, StatusLabels, TaskRow, TaskScanner, TaskStore,
};

/// Feishu bitable task runner
#[derive(Parser)]
#[command(name = "larkflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run (default: one processing pass)
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Credential file
    #[arg(long, global = true, default_value = ".env", env = "LARKFLOW_ENV_FILE")]
    env_file: PathBuf,

    /// Config file (default: .larkflow.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every pending row once with the external analyzer
    Run {
        /// Reset a row when nothing is pending
        #[arg(long)]
        demo: bool,
    },

    /// Process pending rows with the built-in simulated analyzer
    TestRun {
        /// Reset a row when nothing is pending
        #[arg(long)]
        demo: bool,
    },

    /// Credential management
    Auth {
        #[command(subcommand)]
        operation: AuthOperation,
    },

    /// List tables of the configured bitable app
    Tables,

    /// List the task table's fields
    Fields,

    /// Print rows of the task table
    Records {
        /// Only rows waiting to be processed
        #[arg(long)]
        pending: bool,
    },

    /// Clear a row's status so it is processed again
    Reset {
        /// Row to reset (default: first row with a stock code)
        row_id: Option<String>,
    },

    /// Delete archived results older than the retention window
    Cleanup {
        /// Days to keep (default from config)
        #[arg(short, long)]
        days: Option<u32>,

        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,

        /// Results directory (default from config)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AuthOperation {
    /// Print the URL to authorize the application
    Url,

    /// Exchange an authorization code for a user token
    Exchange {
        /// Code from the redirect after authorizing
        code: String,
    },

    /// Rotate the stored refresh token
    Refresh,

    /// Check that an application token can be issued
    App,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("larkflow=info,warn"))
    };

    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    let config = load_config(cli.config.as_deref())?;

    // Cleanup is local and needs no credentials
    if let Some(Commands::Cleanup { days, dry_run, dir }) = &cli.command {
        return cmd_cleanup(&config, *days, *dry_run, dir.as_deref());
    }

    let credentials = CredentialStore::load(&cli.env_file)
        .with_context(|| format!("Failed to read credential file {}", cli.env_file.display()))?;
    let settings = Settings::resolve(config, credentials)
        .context("Set FEISHU_APP_ID and FEISHU_APP_SECRET in the credential file or environment")?;

    match cli.command {
        None => cmd_run(&settings, false, false)?,
        Some(Commands::Run { demo }) => cmd_run(&settings, demo, false)?,
        Some(Commands::TestRun { demo }) => cmd_run(&settings, demo, true)?,
        Some(Commands::Auth { operation }) => cmd_auth(&settings, operation)?,
        Some(Commands::Tables) => cmd_tables(&settings)?,
        Some(Commands::Fields) => cmd_fields(&settings)?,
        Some(Commands::Records { pending }) => cmd_records(&settings, pending)?,
        Some(Commands::Reset { row_id }) => cmd_reset(&settings, row_id.as_deref())?,
        Some(Commands::Cleanup { .. }) => {}
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

/// Print the authorization URL before failing, so the operator can act on it.
fn report_auth(err: FeishuError) -> anyhow::Error {
    if let FeishuError::NeedsAuthorization { auth_url, reason } = &err {
        println!("Authorization required: {reason}");
        println!("\nOpen this URL, authorize, then run `larkflow auth exchange <code>`:\n");
        println!("  {auth_url}\n");
    }
    err.into()
}

fn table_store(settings: &Settings, tokens: Arc<TokenProvider>) -> Result<BitableTaskStore> {
    let config = &settings.config;
    let target = settings.table_target()?;
    let client = BitableClient::new(tokens, target, &config.table.list_field);
    Ok(BitableTaskStore::new(
        client,
        config.fields.clone(),
        StatusLabels::from_config(&config.status),
        &config.status.link_text,
        config.table.page_size,
    ))
}

fn cmd_run(settings: &Settings, demo: bool, simulated: bool) -> Result<()> {
    let config = &settings.config;

    let analyzer: Box<dyn Analyzer> = if simulated {
        Box::new(SimulatedAnalyzer)
    } else {
        let analyzer = CommandAnalyzer::from_config(&config.analyzer).ok_or_else(|| {
            anyhow::anyhow!(
                "No analysis command configured.\n\n\
                 Set [analyzer] command in .larkflow.toml, or use `larkflow test-run`."
            )
        })?;
        Box::new(analyzer)
    };

    let tokens = integrations::connect(settings)?;
    let store = table_store(settings, Arc::clone(&tokens))?;
    let archive = ResultsArchive::new(&config.run.results_dir);
    let docs = DocxClient::new(tokens, config.run.document_identity, &config.feishu.doc_base_url);
    let publisher =
        DocumentPublisher::standard(docs, archive.clone(), &config.run.placeholder_link_base);

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        println!("\nStop requested, finishing the current row...");
        handler_flag.store(true, Ordering::SeqCst);
    })?;

    let options = RunOptions { throttle: config.run.throttle(), demo };
    let orchestrator =
        Orchestrator::new(&store, analyzer.as_ref(), &publisher, &archive, options).with_stop_flag(stop);

    // Row failures are already written to their rows; the process still succeeds.
    let summary = orchestrator.run().map_err(report_auth)?;
    println!("{}", summary.to_summary_string());
    if !summary.is_successful() {
        tracing::warn!(failed = summary.failed, "some rows failed");
    }
    Ok(())
}

fn cmd_auth(settings: &Settings, operation: AuthOperation) -> Result<()> {
    let tokens = integrations::connect(settings)?;

    match operation {
        AuthOperation::Url => {
            let state = uuid::Uuid::new_v4().simple().to_string();
            println!("Open this URL and authorize the application:\n");
            println!("  {}\n", tokens.authorization_url(&state));
            println!("Then run: larkflow auth exchange <code>");
        }
        AuthOperation::Exchange { code } => {
            let credential = tokens.exchange_code(code.trim()).context("Code exchange failed")?;
            println!("✓ User token issued: {}", credential.masked());
            if let Some(expires_at) = credential.expires_at {
                println!("  Expires at: {expires_at}");
            }
        }
        AuthOperation::Refresh => {
            let credential = tokens.refresh_user_token().map_err(report_auth)?;
            println!("✓ User token refreshed: {}", credential.masked());
        }
        AuthOperation::App => {
            let credential = tokens.get_app_token().context("Could not issue app token")?;
            println!("✓ App token issued: {}", credential.masked());
        }
    }
    Ok(())
}

fn cmd_tables(settings: &Settings) -> Result<()> {
    let tokens = integrations::connect(settings)?;
    let client = BitableClient::new(tokens, settings.table_target()?, &settings.config.table.list_field);

    let tables = client.list_tables()?;
    if tables.is_empty() {
        println!("No tables found.");
        return Ok(());
    }
    for table in &tables {
        println!("  {}  {}", table.table_id, table.name);
    }
    println!("\n{} table(s)", tables.len());
    Ok(())
}

fn cmd_fields(settings: &Settings) -> Result<()> {
    let tokens = integrations::connect(settings)?;
    let client = BitableClient::new(tokens, settings.table_target()?, &settings.config.table.list_field);

    let fields = client.list_fields()?;
    for field in &fields {
        println!("  {:<12} type {:<3} {}", field.field_id, field.field_type, field.field_name);
    }
    println!("\n{} field(s)", fields.len());
    Ok(())
}

fn print_row(row: &TaskRow) {
    let name = if row.display_name.is_empty() { "-" } else { row.display_name.as_str() };
    println!("  {}  {:<8} {:<10} {}", row.row_id, row.stock_code, name, row.status);
    if let Some(link) = &row.reply_link {
        println!("      {link}");
    }
}

fn cmd_records(settings: &Settings, pending: bool) -> Result<()> {
    let tokens = integrations::connect(settings)?;
    let store = table_store(settings, tokens)?;

    let scan = if pending { store.fetch_pending()? } else { store.fetch_all()? };
    if scan.rows.is_empty() {
        println!("No rows found.");
        return Ok(());
    }
    for row in &scan.rows {
        print_row(row);
    }
    println!("\nShowing {} row(s)", scan.rows.len());
    if !scan.complete {
        println!("More rows exist beyond the first page.");
    }
    Ok(())
}

fn cmd_reset(settings: &Settings, row_id: Option<&str>) -> Result<()> {
    let tokens = integrations::connect(settings)?;
    let store = table_store(settings, tokens)?;

    match TaskScanner::new(&store).reset(row_id)? {
        Some(row) => println!("✓ Reset {} ({})", row.row_id, row.stock_code),
        None => anyhow::bail!("No matching row to reset"),
    }
    Ok(())
}

fn cmd_cleanup(config: &Config, days: Option<u32>, dry_run: bool, dir: Option<&Path>) -> Result<()> {
    let root = dir.unwrap_or(config.run.results_dir.as_path());
    let days = days.unwrap_or(config.run.retention_days);
    let now = chrono::Local::now().naive_local();

    let stats = cleanup_results(root, days, now, dry_run);
    let verb = if dry_run { "Would remove" } else { "Removed" };
    println!("{verb} {} director(ies), {} file(s)", stats.cleaned_directories, stats.cleaned_files);
    println!("  Space: {}", format_size(stats.bytes_freed));
    println!("  Empty ticker directories: {}", stats.removed_empty_tickers);
    if stats.skipped > 0 {
        println!("  Skipped: {}", stats.skipped);
    }
    if stats.errors > 0 {
        anyhow::bail!("{} error(s) during cleanup", stats.errors);
    }
    Ok(())
}
