use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8Path;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use erddap_ingest::config::{ConfigLoader, ResolvedConfig};
use erddap_ingest::domain::{Dataset, DatasetId, ErddapServer, Protocol};
use erddap_ingest::erddap::ErddapHttpClient;
use erddap_ingest::error::IngestError;
use erddap_ingest::nrt::{RefreshScheduler, TrackedDataset};
use erddap_ingest::output::JsonOutput;
use erddap_ingest::pipeline::App;
use erddap_ingest::store::Store;

#[derive(Parser)]
#[command(name = "erddap-ingest")]
#[command(about = "Stage ERDDAP datasets as local files, chunked by time and retried on failure")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./erddap-ingest.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Ingest datasets from a server, or those listed in the config file")]
    Ingest(IngestArgs),
    #[command(about = "List or search datasets on a server")]
    Catalog(CatalogArgs),
    #[command(about = "Near-real-time discovery and refresh")]
    Nrt(NrtArgs),
    #[command(about = "Manage the DAS cache and scratch directory")]
    Cache(CacheArgs),
}

#[derive(Args)]
struct IngestArgs {
    #[arg(long)]
    server: Option<String>,

    dataset_ids: Vec<String>,

    #[arg(long, value_enum, default_value_t = Protocol::Tabledap)]
    protocol: Protocol,

    #[arg(long)]
    chunk_size: Option<u64>,

    #[arg(long)]
    include_all: bool,

    #[arg(long)]
    trajectory: bool,

    #[arg(long)]
    max_attempts: Option<u32>,
}

#[derive(Args)]
struct CatalogArgs {
    #[arg(long)]
    server: String,

    #[arg(long)]
    search: Option<String>,

    #[arg(long, value_enum, default_value_t = Protocol::Tabledap)]
    protocol: Protocol,
}

#[derive(Args)]
struct NrtArgs {
    #[command(subcommand)]
    command: NrtCommand,
}

#[derive(Subcommand)]
enum NrtCommand {
    #[command(about = "Find datasets with data in the moving window that are not tracked yet")]
    Find(NrtFindArgs),
    #[command(about = "Refresh tracked datasets over the moving window")]
    Refresh(NrtRefreshArgs),
}

#[derive(Args)]
struct NrtFindArgs {
    #[arg(long)]
    server: String,

    /// JSON list of tracked datasets
    #[arg(long)]
    tracked: Option<String>,

    #[arg(long, value_enum, default_value_t = Protocol::Tabledap)]
    protocol: Protocol,

    #[arg(long)]
    window_days: Option<i64>,
}

#[derive(Args)]
struct NrtRefreshArgs {
    /// JSON list of `{dataset_id, server, url?}`
    #[arg(long)]
    tracked: String,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    window_days: Option<i64>,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Remove cached DAS documents and/or downloaded data files")]
    Clear(CacheClearArgs),
}

#[derive(Args)]
struct CacheClearArgs {
    #[arg(long)]
    das: bool,

    #[arg(long)]
    scratch: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<IngestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        IngestError::MissingConfig
        | IngestError::ConfigRead(_)
        | IngestError::ConfigParse(_)
        | IngestError::InvalidConfig(_)
        | IngestError::InvalidDatasetId(_)
        | IngestError::InvalidServerUrl(_)
        | IngestError::InvalidDatasetUrl(_) => 2,
        err if err.is_network() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = Store::new()?;

    match cli.command {
        Commands::Ingest(args) => run_ingest(args, resolved, store),
        Commands::Catalog(args) => {
            let app = App::new(store, ErddapHttpClient::new()?, resolved.settings);
            let server = ErddapServer::parse(&args.server)?;
            let result = app.list_datasets(&server, args.search.as_deref(), args.protocol)?;
            JsonOutput::print_catalog(&result).into_diagnostic()
        }
        Commands::Nrt(args) => run_nrt(args, resolved, store),
        Commands::Cache(args) => match args.command {
            CacheCommand::Clear(clear) => {
                let app = App::new(store, ErddapHttpClient::new()?, resolved.settings);
                // no flag means both
                let (das, scratch) = if clear.das || clear.scratch {
                    (clear.das, clear.scratch)
                } else {
                    (true, true)
                };
                let result = app.clear_cache(das, scratch, &JsonOutput)?;
                JsonOutput::print_clear(&result).into_diagnostic()
            }
        },
    }
}

fn run_ingest(args: IngestArgs, resolved: ResolvedConfig, store: Store) -> miette::Result<()> {
    let mut settings = resolved.settings;
    if let Some(chunk_size) = args.chunk_size {
        settings.chunk_size = chunk_size;
    }
    if let Some(max_attempts) = args.max_attempts {
        settings.max_attempts = max_attempts;
    }
    settings.include_all |= args.include_all;
    settings.validate()?;

    let datasets = if args.dataset_ids.is_empty() {
        resolved.datasets
    } else {
        let server = args
            .server
            .as_deref()
            .ok_or_else(|| IngestError::InvalidServerUrl("--server is required".to_string()))?;
        let server = ErddapServer::parse(server)?;
        args.dataset_ids
            .iter()
            .map(|id| {
                let id: DatasetId = id.parse()?;
                Ok(Dataset::new(id, server.clone(), args.protocol).trajectory(args.trajectory))
            })
            .collect::<Result<Vec<_>, IngestError>>()?
    };
    if datasets.is_empty() {
        return Err(IngestError::MissingConfig.into());
    }

    let app = App::new(store, ErddapHttpClient::new()?, settings);
    let result = app.ingest_batch(datasets, &JsonOutput);
    JsonOutput::print_batch(&result).into_diagnostic()?;
    if result.failed() > 0 {
        return Err(miette::Report::msg(format!(
            "{} of {} datasets failed",
            result.failed(),
            result.items.len()
        )));
    }
    Ok(())
}

fn run_nrt(args: NrtArgs, resolved: ResolvedConfig, store: Store) -> miette::Result<()> {
    let mut settings = resolved.settings;
    match args.command {
        NrtCommand::Find(find) => {
            if let Some(days) = find.window_days {
                settings.moving_window_days = days;
            }
            settings.validate()?;
            let tracked = match find.tracked.as_deref() {
                Some(path) => read_tracked(path)?,
                None => Vec::new(),
            };
            let tracked_ids: Vec<&str> = tracked
                .iter()
                .map(|item| item.dataset_id.as_str())
                .collect();
            let server = ErddapServer::parse(&find.server)?;
            let app = App::new(store, ErddapHttpClient::new()?, settings);
            let result = app.find_nrt_candidates(&server, find.protocol, &tracked_ids)?;
            JsonOutput::print_candidates(&result).into_diagnostic()
        }
        NrtCommand::Refresh(refresh) => {
            if let Some(workers) = refresh.workers {
                settings.nrt_workers = workers;
            }
            if let Some(days) = refresh.window_days {
                settings.moving_window_days = days;
            }
            settings.validate()?;
            let tracked = read_tracked(&refresh.tracked)?;
            let mut scheduler = RefreshScheduler::from_config(tracked, &settings);
            let app = Arc::new(App::new(store, ErddapHttpClient::new()?, settings));
            let run = scheduler.run_once(app)?;
            // persist the requeued order so timed-out datasets go last next time
            let order: Vec<&TrackedDataset> = scheduler.queue().collect();
            let content = serde_json::to_vec_pretty(&order)
                .map_err(|err| IngestError::Filesystem(err.to_string()))?;
            Store::write_bytes_atomic(Utf8Path::new(&refresh.tracked), &content)?;
            JsonOutput::print_refresh(&run).into_diagnostic()
        }
    }
}

fn read_tracked(path: &str) -> Result<Vec<TrackedDataset>, IngestError> {
    let content =
        fs::read_to_string(path).map_err(|_| IngestError::ConfigRead(path.into()))?;
    serde_json::from_str(&content).map_err(|err| IngestError::ConfigParse(err.to_string()))
}
