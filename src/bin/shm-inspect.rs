//! Binary entry point for inspecting shared segment pairs.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use sombra_shm::admin::{stats, StatsReport};
use sombra_shm::storage::EngineOptions;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "shm-inspect",
    version,
    about = "Report usage of a sombra-shm segment pair"
)]
struct Cli {
    #[arg(long, help = "TOML file with engine options")]
    config: Option<PathBuf>,

    #[arg(long, env = "SOMBRA_SHM_DIR", help = "Directory holding the segments")]
    dir: Option<PathBuf>,

    #[arg(long, help = "Name of the offset-table segment")]
    offsets: Option<String>,

    #[arg(long, help = "Name of the data-heap segment")]
    data: Option<String>,

    #[arg(
        long,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format"
    )]
    format: OutputFormat,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut opts = match &cli.config {
        Some(path) => EngineOptions::load(path)?,
        None => EngineOptions::default(),
    };
    if let Some(dir) = cli.dir {
        opts.dir = dir;
    }
    if let Some(offsets) = cli.offsets {
        opts.offsets_segment = offsets;
    }
    if let Some(data) = cli.data {
        opts.data_segment = data;
    }

    let report = stats(&opts)?;
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_stats_text(&report),
    }
    Ok(())
}

fn print_stats_text(report: &StatsReport) {
    println!(
        "Segments: offsets={} ({} bytes) data={} ({} bytes)",
        report.files.offsets_path,
        report.files.offsets_size_bytes,
        report.files.data_path,
        report.files.data_size_bytes
    );
    println!();
    println!(
        "Geometry: max_rows={} hash_buckets={} overflow_entries={} heap_words={}",
        report.geometry.max_rows,
        report.geometry.hash_buckets,
        report.geometry.overflow_entries,
        report.geometry.heap_words
    );
    println!();
    println!(
        "Usage: rows_allocated={} live_rows={} overflow_entries_used={}",
        report.usage.rows_allocated, report.usage.live_rows, report.usage.overflow_entries_used
    );
    println!(
        "       heap_words_used={} heap_fill={:.1}%",
        report.usage.heap_words_used,
        report.usage.heap_fill_ratio * 100.0
    );
    println!();
    println!("Lock: timeout_ms={}", report.lock.timeout_ms);
}
