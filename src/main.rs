/// Version injected at compile time via INFRAGRAPH_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("INFRAGRAPH_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use infragraph::cloud::{format_cloud_error, AwsCli, CallCache, CloudClient, HttpClient};
use infragraph::config::Config;
use infragraph::resource::stream::DEFAULT_MAX_RECORDS;
use infragraph::resource::{sample_stream, CodeStore, NameFilter, SourceScanner};
use infragraph::Discovery;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Discover cloud resources and print their topology as JSON
#[derive(Parser, Debug)]
#[command(name = "infragraph", version, about, long_about = None)]
struct Args {
    /// Region to query
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Endpoint for every service (e.g. a local emulator)
    #[arg(long, global = true)]
    endpoint_url: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the resource graph
    Graph {
        /// Regex a resource name must match (unanchored)
        #[arg(short, long, default_value = ".*")]
        filter: String,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,

        /// Leave out edges with an unresolved end
        #[arg(long)]
        drop_dangling: bool,
    },
    /// Read the latest records of a stream shard
    Sample {
        /// Stream name
        #[arg(short, long)]
        stream: String,

        /// Shard id, e.g. shardId-000000000000
        #[arg(long)]
        shard: String,

        #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_RECORDS)]
        max_records: u32,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Logging disabled: cannot open {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("infragraph {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("infragraph").join("infragraph.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".infragraph").join("infragraph.log");
    }
    PathBuf::from("infragraph.log")
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {}", format_cloud_error(&err));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load();
    let region = config.effective_region(args.region.as_deref());
    let endpoints = config.effective_endpoints(args.endpoint_url.as_deref());

    tracing::info!(
        "Using region: {}, endpoint: {}",
        region.as_deref().unwrap_or("<cli default>"),
        endpoints.default.as_deref().unwrap_or("<cloud>")
    );

    let plane = Arc::new(AwsCli::new(&config.effective_cli_program(), region, endpoints));
    let client = CloudClient::new(plane, Arc::new(CallCache::new()), config.call_settings());

    match args.command {
        Command::Graph {
            filter,
            pretty,
            drop_dangling,
        } => {
            let filter = NameFilter::new(&filter)?;
            let code = CodeStore::new(config.effective_scratch_dir(), HttpClient::new()?)
                .with_max_age(config.scratch_max_age())
                .with_code_ttl(config.code_cache_ttl());
            let discovery = Discovery::new(client, code, SourceScanner::with_default_rules()?)
                .with_concurrency(config.effective_concurrency());

            let mut graph = discovery.build_graph(&filter).await?;
            if drop_dangling {
                graph = graph.without_dangling_edges();
            }
            print_json(&graph, pretty)
        }
        Command::Sample {
            stream,
            shard,
            max_records,
            pretty,
        } => {
            let sample = sample_stream(&client, &stream, &shard, max_records).await?;
            print_json(&sample, pretty)
        }
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let serialized = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    let output = serialized.context("Failed to serialize output")?;
    println!("{}", output);
    Ok(())
}
