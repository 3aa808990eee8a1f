use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use search_result_aggregator::{
    aggregation::{ExtractionPlan, FieldIndex, Sizes},
    config::Config,
    models::{
        ComponentResult, DataSourceRef, FieldSpec, OpenGroups, ResultRequest, ResultStyle, SearchRequest,
        SearchResponse, SortDirection,
    },
    search::{ReplayProvider, ResultStoreManager, SearchProviderRegistry},
    AppError,
};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REPLAY_SOURCE: &str = "Replay";
const COMPONENT_ID: &str = "table";

#[derive(Parser)]
#[command(name = "search-result-aggregator")]
#[command(version, about = "Aggregate search matches into grouped, sorted result tables", long_about = None)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "SRA_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a CSV file through concurrent producers and print the result
    Run {
        /// Field definitions: a JSON array, or a path to a file holding one
        #[arg(short, long)]
        fields: String,

        /// CSV input with a header row naming the columns
        #[arg(short, long)]
        input: PathBuf,

        /// Concurrent producer tasks
        #[arg(short, long, default_value = "4")]
        producers: usize,

        /// Rows per delivered payload
        #[arg(short, long, default_value = "100")]
        batch_size: usize,

        /// Per-depth row limits, e.g. `1000,10`
        #[arg(short = 'm', long)]
        max_results: Option<Sizes>,

        /// Keep ungrouped detail rows under the grouped summaries
        #[arg(long)]
        show_detail: bool,

        /// Sort override as `field_id` or `field_id:desc`
        #[arg(short, long)]
        sort: Vec<String>,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long, default_value = "100")]
        length: usize,

        /// Expand every group
        #[arg(long)]
        open_all: bool,

        /// Render a flat result instead of a table
        #[arg(long)]
        flat: bool,

        #[arg(long, default_value = "50")]
        poll_interval_ms: u64,

        /// Give up waiting for completion after this many seconds
        #[arg(long, default_value = "60")]
        timeout_secs: u64,

        /// Print Prometheus metrics after the result
        #[arg(long)]
        metrics: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error.downcast_ref::<AppError>().map_or(1, AppError::exit_code)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    init_tracing(&config);
    tracing::info!(
        service = %config.observability.service_name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting"
    );

    if config.observability.prometheus_enabled {
        if let Err(e) = search_result_aggregator::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    match cli.command {
        Commands::Run {
            fields,
            input,
            producers,
            batch_size,
            max_results,
            show_detail,
            sort,
            offset,
            length,
            open_all,
            flat,
            poll_interval_ms,
            timeout_secs,
            metrics,
        } => {
            let fields = read_fields(&fields)?;
            ExtractionPlan::compile(&fields, show_detail, &mut FieldIndex::new())
                .map_err(AppError::from)?;
            let file = File::open(&input)
                .map_err(AppError::from)
                .with_context(|| format!("Cannot open input {}", input.display()))?;
            let provider = ReplayProvider::from_csv(BufReader::new(file))
                .map_err(AppError::from)?
                .with_producers(producers)
                .with_batch_size(batch_size);
            tracing::info!(
                input = %input.display(),
                rows = provider.len(),
                columns = provider.columns().len(),
                producers,
                "Loaded replay input"
            );

            let mut result_request = ResultRequest::new(COMPONENT_ID, fields)
                .with_show_detail(show_detail)
                .with_range(offset, length);
            if let Some(sizes) = max_results {
                result_request = result_request.with_max_results(sizes.as_slice().to_vec());
            }
            for spec in &sort {
                let (field_id, direction) = parse_sort(spec)?;
                result_request = result_request.with_sort(field_id, direction);
            }
            if open_all {
                result_request = result_request.with_open_groups(OpenGroups::All);
            }
            if flat {
                result_request = result_request.with_style(ResultStyle::Flat);
            }

            let request = SearchRequest::new(DataSourceRef::new(
                REPLAY_SOURCE,
                input.display().to_string(),
            ))
            .with_query_key(uuid::Uuid::new_v4().to_string())
            .with_result_request(result_request);

            let providers = Arc::new(SearchProviderRegistry::new());
            providers.register(REPLAY_SOURCE, Arc::new(provider));
            let manager = ResultStoreManager::with_providers(config.result_store.clone(), providers);

            let response = poll_until_complete(
                &manager,
                &request,
                Duration::from_millis(poll_interval_ms.max(1)),
                Duration::from_secs(timeout_secs),
            )
            .await?;
            manager.remove(&response.key);

            println!("{}", serde_json::to_string_pretty(&response)?);
            if metrics {
                println!("{}", search_result_aggregator::metrics::gather_metrics());
            }
            if response.has_errors() {
                let messages: Vec<&str> = response
                    .errors
                    .iter()
                    .map(|message| message.message.as_str())
                    .collect();
                bail!(AppError::Processing(messages.join("; ")));
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("search_result_aggregator={}", config.observability.log_level).into()
    });

    // Logs go to stderr so stdout carries only the result.
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn poll_until_complete(
    manager: &ResultStoreManager,
    request: &SearchRequest,
    interval: Duration,
    timeout: Duration,
) -> anyhow::Result<SearchResponse> {
    let started = Instant::now();
    loop {
        let response = manager.poll(request);
        if response.complete {
            tracing::info!(
                search_key = %response.key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Search complete"
            );
            return Ok(response);
        }
        let rows: usize = response
            .results
            .iter()
            .map(|result| match result {
                ComponentResult::Table(table) => table.total_results,
                ComponentResult::Flat(flat) => flat.total_results,
            })
            .sum();
        tracing::info!(search_key = %response.key, rows, "Search in progress");

        if started.elapsed() >= timeout {
            manager.terminate(&response.key);
            bail!(AppError::Timeout(format!(
                "search {} did not complete within {:?}",
                response.key, timeout
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

fn read_fields(value: &str) -> anyhow::Result<Vec<FieldSpec>> {
    let text = if value.trim_start().starts_with('[') {
        value.to_string()
    } else {
        std::fs::read_to_string(value)
            .map_err(AppError::from)
            .with_context(|| format!("Cannot read fields from {}", value))?
    };
    let fields: Vec<FieldSpec> = serde_json::from_str(&text)
        .map_err(|e| AppError::Validation(format!("Field definitions must be a JSON array: {}", e)))?;
    Ok(fields)
}

fn parse_sort(spec: &str) -> anyhow::Result<(String, SortDirection)> {
    let (field_id, direction) = match spec.rsplit_once(':') {
        Some((field_id, "asc")) => (field_id, SortDirection::Ascending),
        Some((field_id, "desc")) => (field_id, SortDirection::Descending),
        Some((field_id, direction)) => (
            field_id,
            direction
                .parse::<SortDirection>()
                .map_err(|_| AppError::Validation(format!("Unknown sort direction in '{}'", spec)))?,
        ),
        None => (spec, SortDirection::Ascending),
    };
    if field_id.is_empty() {
        bail!(AppError::Validation(format!("Sort override '{}' names no field", spec)));
    }
    Ok((field_id.to_string(), direction))
}
