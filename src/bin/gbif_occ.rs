use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use gbif_occ::app::{
    AcquireOptions, AcquireResult, App, FilterOptions, FilterResult, InfoResult, ListResult,
};
use gbif_occ::config::{ConfigLoader, QueryOverrides, ResolvedConfig};
use gbif_occ::coordinates::MissingValues;
use gbif_occ::error::OccError;
use gbif_occ::fingerprint::{Fingerprint, canonical_text, fingerprint};
use gbif_occ::gbif::GbifHttpClient;
use gbif_occ::output::{JsonOutput, OutputMode, StderrProgress};
use gbif_occ::pipeline::DEFAULT_WORKERS;
use gbif_occ::store::Store;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

#[derive(Parser)]
#[command(name = "gbif-occ")]
#[command(about = "Fetch GBIF occurrence records once per query and filter their coordinates")]
#[command(version, author)]
struct Cli {
    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Download occurrence records for a query (or reuse the cached table)")]
    Acquire(AcquireArgs),
    #[command(about = "Drop rows with missing coordinates from the cached table of a query")]
    Filter(FilterArgs),
    #[command(about = "Print the fingerprint of a query")]
    Fingerprint(QueryArgs),
    #[command(about = "List cached occurrence tables")]
    List,
    #[command(about = "Show metadata of a cached occurrence table")]
    Info(InfoArgs),
    #[command(about = "Clear project-local reports")]
    Clear,
}

#[derive(Args, Clone, Default)]
struct QueryArgs {
    /// Query file (defaults to gbif-occ.json when present).
    #[arg(long)]
    config: Option<String>,

    /// Species name; repeat for several. Replaces the species of the query file.
    #[arg(long = "species")]
    species: Vec<String>,

    #[arg(long)]
    media_type: Option<String>,

    #[arg(long)]
    country: Option<String>,

    #[arg(long)]
    has_coordinate: Option<String>,

    #[arg(long)]
    kingdom: Option<String>,

    #[arg(long)]
    basis_of_record: Option<String>,

    #[arg(long)]
    institution_code: Option<String>,
}

impl QueryArgs {
    fn resolve(self) -> Result<ResolvedConfig, OccError> {
        let overrides = QueryOverrides {
            species: self.species,
            media_type: self.media_type,
            country: self.country,
            has_coordinate: self.has_coordinate,
            kingdom: self.kingdom,
            basis_of_record: self.basis_of_record,
            institution_code: self.institution_code,
        };
        ConfigLoader::resolve(self.config.as_deref(), overrides)
    }
}

#[derive(Args)]
struct AcquireArgs {
    #[command(flatten)]
    query: QueryArgs,

    /// Concurrent record fetches.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    #[arg(long)]
    force: bool,

    #[arg(long)]
    no_cache: bool,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct FilterArgs {
    #[command(flatten)]
    query: QueryArgs,

    /// Also drop rows whose coordinate uncertainty exceeds this many meters.
    #[arg(long)]
    max_uncertainty: Option<f64>,
}

#[derive(Args)]
struct InfoArgs {
    fingerprint: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<OccError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &OccError) -> u8 {
    match error {
        OccError::DatasetNotFound(_) | OccError::MissingConfig => 2,
        OccError::GbifHttp(_) | OccError::GbifStatus { .. } | OccError::GbifDecode(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let store = Store::new()?;

    match cli.command {
        Command::Acquire(args) => {
            let app = App::new(store, GbifHttpClient::new()?);
            run_acquire(args, &app, output_mode)
        }
        Command::Filter(args) => {
            let app = App::new(store, GbifHttpClient::new()?);
            run_filter(args, &app, output_mode)
        }
        Command::Fingerprint(args) => run_fingerprint(args, output_mode),
        Command::List => {
            let app = App::new(store, GbifHttpClient::new()?);
            let result = match output_mode {
                OutputMode::Json => app.list(&JsonOutput)?,
                OutputMode::Text => app.list(&StderrProgress)?,
            };
            match output_mode {
                OutputMode::Json => JsonOutput::print_list(&result).into_diagnostic()?,
                OutputMode::Text => print_list(&result),
            }
            Ok(())
        }
        Command::Info(args) => {
            let fingerprint: Fingerprint = args.fingerprint.parse()?;
            let app = App::new(store, GbifHttpClient::new()?);
            let result = match output_mode {
                OutputMode::Json => app.info(&fingerprint, &JsonOutput)?,
                OutputMode::Text => app.info(&fingerprint, &StderrProgress)?,
            };
            match output_mode {
                OutputMode::Json => JsonOutput::print_info(&result).into_diagnostic()?,
                OutputMode::Text => print_info(&result),
            }
            Ok(())
        }
        Command::Clear => {
            let app = App::new(store, GbifHttpClient::new()?);
            match output_mode {
                OutputMode::Json => {
                    let result = app.clear(&JsonOutput)?;
                    JsonOutput::print_clear(&result).into_diagnostic()?;
                }
                OutputMode::Text => {
                    app.clear(&StderrProgress)?;
                    println!("{GREEN}project reports cleared{RESET}");
                }
            }
            Ok(())
        }
    }
}

fn run_acquire(
    args: AcquireArgs,
    app: &App<GbifHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let AcquireArgs {
        query,
        workers,
        force,
        no_cache,
        dry_run,
    } = args;
    let resolved = query.resolve()?;
    let options = AcquireOptions {
        force,
        no_cache,
        dry_run,
        workers,
    };

    match output_mode {
        OutputMode::Json => {
            let result = app.acquire(
                &resolved.query,
                resolved.search_name.as_deref(),
                options,
                &JsonOutput,
            )?;
            JsonOutput::print_acquire(&result).into_diagnostic()?;
        }
        OutputMode::Text => {
            let result = app.acquire(
                &resolved.query,
                resolved.search_name.as_deref(),
                options,
                &StderrProgress,
            )?;
            print_acquire_summary(&result, resolved.search_name.as_deref());
        }
    }
    Ok(())
}

fn run_filter(
    args: FilterArgs,
    app: &App<GbifHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let resolved = args.query.resolve()?;
    let options = FilterOptions {
        max_uncertainty: args.max_uncertainty,
    };

    match output_mode {
        OutputMode::Json => {
            let result = app.filter(&resolved.query, options, &JsonOutput)?;
            JsonOutput::print_filter(&result).into_diagnostic()?;
        }
        OutputMode::Text => {
            let result = app.filter(&resolved.query, options, &StderrProgress)?;
            print_filter_summary(&result);
        }
    }
    Ok(())
}

fn run_fingerprint(args: QueryArgs, output_mode: OutputMode) -> miette::Result<()> {
    let resolved = args.resolve()?;
    let fingerprint = fingerprint(&resolved.query);
    match output_mode {
        OutputMode::Json => JsonOutput::print_json(&serde_json::json!({
            "fingerprint": fingerprint,
            "canonical": canonical_text(&resolved.query),
            "file_name": fingerprint.geodata_file_name(),
        }))
        .into_diagnostic()?,
        OutputMode::Text => println!("{fingerprint}"),
    }
    Ok(())
}

fn print_acquire_summary(result: &AcquireResult, search_name: Option<&str>) {
    println!("{CYAN}gbif-occ summary{RESET}");
    if let Some(name) = search_name {
        println!("{CYAN}  search: {name}{RESET}");
    }
    println!("{CYAN}  fingerprint: {}{RESET}", result.fingerprint);

    let color = match result.action.as_str() {
        "download" => CYAN,
        "cache" | "project" => GREEN,
        _ => YELLOW,
    };
    println!("{color}  action: {}{RESET}", result.action);
    if let Some(resolved) = result.species_resolved {
        let color = if resolved < result.species_requested {
            YELLOW
        } else {
            GREEN
        };
        println!(
            "{color}  species resolved: {resolved}/{}{RESET}",
            result.species_requested
        );
    }
    if let Some(records) = result.records {
        println!("{GREEN}  records: {records}{RESET}");
    }
    if let Some(path) = &result.project_path {
        println!("{color}  project: {path}{RESET}");
    }
    if let Some(path) = &result.cache_path {
        println!("{color}  cache: {path}{RESET}");
    }
}

fn print_filter_summary(result: &FilterResult) {
    println!("{CYAN}gbif-occ filter {}{RESET}", result.fingerprint);
    println!("  source: {}", result.source_path);
    for pass in &result.passes {
        let (color, outcome) = match &pass.missing {
            MissingValues::NoneMissing => (GREEN, "no missing values".to_string()),
            MissingValues::PartiallyMissing(positions) => {
                (YELLOW, format!("{} missing", positions.len()))
            }
            MissingValues::AllMissing => (YELLOW, "all values missing".to_string()),
        };
        println!(
            "{color}  {:<12} {outcome}: {} -> {} rows{RESET}",
            pass.column.name(),
            pass.rows_before,
            pass.rows_after
        );
    }
    if let Some(dropped) = result.low_precision_dropped {
        println!("{YELLOW}  low precision dropped: {dropped}{RESET}");
    }
    println!(
        "{GREEN}  kept {} of {} rows -> {}{RESET}",
        result.rows_out, result.rows_in, result.output_path
    );
}

fn print_list(result: &ListResult) {
    if result.datasets.is_empty() {
        println!("{YELLOW}no cached occurrence tables{RESET}");
        return;
    }
    for entry in &result.datasets {
        let name = entry.search_name.as_deref().unwrap_or("-");
        println!(
            "{CYAN}{}{RESET}  {name}  species={} records={}",
            entry.fingerprint, entry.species, entry.records
        );
        if let Some(path) = &entry.project_path {
            println!("    project: {path}");
        }
        if let Some(path) = &entry.cache_path {
            println!("    cache: {path}");
        }
    }
}

fn print_info(result: &InfoResult) {
    let meta = &result.metadata;
    println!("{CYAN}{}{RESET}", meta.fingerprint);
    if let Some(name) = &meta.search_name {
        println!("  search: {name}");
    }
    let species = meta
        .species
        .iter()
        .map(|name| name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    println!("  species: {species}");
    for (key, value) in meta.filters.entries() {
        if !value.is_empty() {
            println!("  {key}: {value}");
        }
    }
    println!("  records: {}", meta.records);
    println!("  downloaded: {} ({})", meta.downloaded_at, meta.tool);
    if let Some(path) = &result.project_path {
        println!("  project: {path}");
    }
    if let Some(path) = &result.cache_path {
        println!("  cache: {path}");
    }
}
