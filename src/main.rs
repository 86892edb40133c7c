//! tileworks - pipeline and storage smoke test
//!
//! Runs a synthetic generator → transform → sink pipeline that appends its
//! output into an append store, then prints the pipeline summary. Useful for
//! checking that a machine's thread count and slab settings behave as
//! expected before running a real job.
//!
//! # Examples
//!
//! ```bash
//! # One million items with the default configuration
//! tileworks
//!
//! # Ten million items on 16 transform threads, JSON output
//! tileworks --items 10000000 --workers 16 --json
//!
//! # Use a configuration file
//! tileworks --config tileworks.toml
//! ```

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tileworks::config::{ElementWidth, TileworksConfig, CONFIG_FILE};
use tileworks::logging::init_logging;
use tileworks::pipeline::PipelineBuilder;
use tileworks::stats::{format, LoggingStats, PipelineSummary};
use tileworks::storage::{AppendStore, Element, StoreOptions};

/// Staged pipeline and append store smoke test
#[derive(Parser, Debug)]
#[command(name = "tileworks")]
#[command(version)]
#[command(about = "Run a synthetic pipeline into an append store", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./tileworks.toml when present)
    #[arg(short, long, env = "TILEWORKS_CONFIG")]
    config: Option<PathBuf>,

    /// Number of items the generator emits
    #[arg(short = 'n', long, default_value_t = 1_000_000)]
    items: u64,

    /// Transform threads (overrides pipeline.worker_threads)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

/// What the run produced, for `--json`.
#[derive(Debug, Serialize)]
struct Report {
    pipeline: PipelineSummary,
    store: StoreReport,
}

#[derive(Debug, Serialize)]
struct StoreReport {
    element_width: usize,
    allocation_kind: String,
    slab_size_bytes: usize,
    size: u64,
    slabs: usize,
    memory_bytes: u64,
    checksum: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TileworksConfig::load(path)?,
        None => TileworksConfig::load_or_default(CONFIG_FILE),
    };
    if let Some(workers) = cli.workers {
        config.pipeline.worker_threads = workers;
    }
    config.validate().context("Invalid settings")?;

    let _guard = init_logging(&config.logging)?;
    tracing::info!(
        "Starting tileworks: {} items, {} workers, {} {} slabs of {}",
        format::numeric(cli.items as f64),
        config.pipeline.worker_threads,
        config.storage.element_width.name(),
        config.storage.allocation_kind.name(),
        format::storage(config.storage.slab_size_bytes as f64),
    );

    let report = match config.storage.element_width {
        ElementWidth::Int => run::<u32>(&cli, &config, |v| v as u32)?,
        ElementWidth::Long => run::<u64>(&cli, &config, |v| v)?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.pipeline);
        println!(
            "store: {} values in {} slabs, ~{}B",
            format::decimal(report.store.size as f64),
            report.store.slabs,
            format::storage(report.store.memory_bytes as f64),
        );
    }
    Ok(())
}

/// Mixes the bits of an id so the transform stage does real work.
fn scramble(id: u64) -> u64 {
    let mut x = id.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

fn run<E>(cli: &Cli, config: &TileworksConfig, convert: fn(u64) -> E) -> anyhow::Result<Report>
where
    E: Element + Into<u64>,
{
    let options: StoreOptions = config.storage.options();
    let store = Arc::new(Mutex::new(AppendStore::<E>::new(options)?));
    let sink = Arc::clone(&store);
    let settings = &config.pipeline;

    let summary = PipelineBuilder::new("tileworks", LoggingStats::new())
        .read_from("generate", 0..cli.items)
        .add_buffer("ids", settings.buffer_capacity, settings.batch_size)?
        .add_worker("scramble", settings.worker_threads, move |input, output| {
            while let Some(id) = input.get()? {
                output.accept(convert(scramble(id)))?;
            }
            Ok(())
        })?
        .add_buffer("scrambled", settings.buffer_capacity, settings.batch_size)?
        .sink_to_consumer("store", 1, move |value: E| {
            sink.lock().append(value)?;
            Ok(())
        })?
        .await_completion()?;

    let store = store.lock();
    let checksum = store
        .iter()
        .fold(0u64, |acc, v| acc.wrapping_add(v.into()));
    let report = StoreReport {
        element_width: store.element_width(),
        allocation_kind: store.allocation_kind().name().to_string(),
        slab_size_bytes: store.slab_size_bytes(),
        size: store.size(),
        slabs: store.slab_count(),
        memory_bytes: store.estimate_memory_usage_bytes(),
        checksum,
    };

    Ok(Report {
        pipeline: summary,
        store: report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["tileworks"]).unwrap();
        assert_eq!(cli.items, 1_000_000);
        assert!(cli.workers.is_none());
        assert!(!cli.json);
    }

    #[test]
    fn test_run_fills_store() {
        let cli = Cli::try_parse_from(["tileworks", "--items", "5000", "--workers", "3"]).unwrap();
        let mut config = TileworksConfig::default();
        config.pipeline.worker_threads = 3;
        config.pipeline.buffer_capacity = 512;
        config.pipeline.batch_size = 64;
        config.storage.slab_size_bytes = 1024;

        let report = run::<u64>(&cli, &config, |v| v).unwrap();
        assert_eq!(report.store.size, 5000);
        assert_eq!(report.store.slabs, 5000 * 8 / 1024 + 1);
        let expected = (0..5000u64).fold(0u64, |acc, id| acc.wrapping_add(scramble(id)));
        assert_eq!(report.store.checksum, expected);
        assert_eq!(report.pipeline.stage("scramble").unwrap().items_out, 5000);
    }

    #[test]
    fn test_scramble_is_deterministic() {
        assert_eq!(scramble(42), scramble(42));
        assert_ne!(scramble(1), scramble(2));
    }
}
