//! CLI entry point for building and querying forest indices.
//!
//! Commands: `build` turns a JSON-lines vector file into an index file,
//! `query` runs nearest-neighbor lookups against it, `info` prints the
//! header and `init` writes a settings template.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use annforest::vector::read_header;
use annforest::{AnnIndex, ExitCode, LoadMode, MetricKind, Neighbors, Settings};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use comfy_table::{Attribute, Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Approximate nearest-neighbor index
#[derive(Parser)]
#[command(
    name = "annforest",
    version = env!("CARGO_PKG_VERSION"),
    about = "Approximate nearest-neighbor search over random projection trees",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log build, load and save progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Set up .annforest directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    #[command(about = "Build an index file from JSON-lines vectors")]
    Build {
        /// Input file, one {"id": N, "vector": [..]} object per line
        #[arg(short, long)]
        input: PathBuf,

        /// Index file to write
        #[arg(short, long)]
        output: PathBuf,

        /// Vector dimension (inferred from the first line when omitted)
        #[arg(short, long)]
        dimension: Option<usize>,

        /// Distance metric: angular or euclidean
        #[arg(short, long)]
        metric: Option<MetricKind>,

        /// Number of trees (0 picks a count from the item count)
        #[arg(short, long)]
        trees: Option<usize>,

        /// Seed for split selection
        #[arg(long)]
        seed: Option<u64>,

        /// Build threads (1 builds inline, 0 lets rayon decide)
        #[arg(long)]
        threads: Option<usize>,
    },

    #[command(about = "Find nearest neighbors of a stored item or a vector")]
    Query {
        /// Index file to query
        #[arg(short, long)]
        index: PathBuf,

        /// Query by stored item id
        #[arg(long, conflicts_with = "vector", required_unless_present = "vector")]
        item: Option<u32>,

        /// Query by comma-separated vector, e.g. "0.5,1,-2"
        #[arg(long, allow_hyphen_values = true)]
        vector: Option<String>,

        /// Number of neighbors
        #[arg(short, default_value_t = 10)]
        k: usize,

        /// Candidates examined (defaults to k * trees)
        #[arg(long)]
        search_k: Option<usize>,

        /// Show distances
        #[arg(long)]
        distances: bool,

        /// Memory-map the index instead of reading it into memory
        #[arg(long)]
        mmap: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    #[command(about = "Show index file statistics")]
    Info {
        /// Index file to inspect
        #[arg(short, long)]
        index: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// One line of `build` input.
#[derive(Debug, Deserialize)]
struct VectorRecord {
    id: u32,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct QueryHit {
    item: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<f32>,
}

#[derive(Debug, Serialize)]
struct IndexInfo {
    path: PathBuf,
    dimension: usize,
    metric: MetricKind,
    items: u64,
    trees: usize,
    nodes: u64,
    file_bytes: u64,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}: {e}", ExitCode::ConfigError.description());
            return ExitCode::ConfigError.into();
        }
    };
    init_tracing(cli.verbose || settings.verbose);

    match run(&cli, settings) {
        Ok(()) => ExitCode::Success.into(),
        Err(error) => {
            let code = ExitCode::from_anyhow(&error);
            eprintln!("{}: {error:#}", code.description());
            code.into()
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, Box<figment::Error>> {
    match path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
}

/// Logs go to stderr; `RUST_LOG` takes precedence over `--verbose`.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, mut settings: Settings) -> Result<()> {
    settings.verbose |= cli.verbose;

    match &cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(*force)
                .map_err(|e| anyhow::anyhow!("{e}"))
                .context("Failed to write configuration")?;
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
            Ok(())
        }
        Commands::Build {
            input,
            output,
            dimension,
            metric,
            trees,
            seed,
            threads,
        } => {
            if let Some(metric) = metric {
                settings.index.metric = *metric;
            }
            if let Some(seed) = seed {
                settings.index.seed = *seed;
            }
            if let Some(threads) = threads {
                settings.index.build_threads = *threads;
            }
            let n_trees = trees.unwrap_or(settings.index.n_trees);
            build_command(&settings, input, output, *dimension, n_trees)
        }
        Commands::Query {
            index,
            item,
            vector,
            k,
            search_k,
            distances,
            mmap,
            json,
        } => {
            let mode = if *mmap { LoadMode::Mapped } else { LoadMode::Heap };
            let mut ann = AnnIndex::open(index, mode)
                .with_context(|| format!("Failed to open index {}", index.display()))?;
            ann.set_verbose(settings.verbose);

            let search_k = search_k.or(settings.search.search_k);
            let include_distances = *distances || settings.search.include_distances;
            let neighbors = match (item, vector) {
                (Some(item), _) => ann.get_nns_by_item(*item, *k, search_k, include_distances)?,
                (None, Some(raw)) => {
                    let query = parse_vector(raw)?;
                    ann.get_nns_by_vector(&query, *k, search_k, include_distances)?
                }
                (None, None) => bail!("Either --item or --vector is required"),
            };
            print_neighbors(&neighbors, *json)
        }
        Commands::Info { index, json } => info_command(index, *json),
    }
}

fn build_command(
    settings: &Settings,
    input: &Path,
    output: &Path,
    dimension: Option<usize>,
    n_trees: usize,
) -> Result<()> {
    let file =
        File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let reader = BufReader::new(file);

    let start = Instant::now();
    let mut index: Option<AnnIndex> = None;
    let mut added = 0usize;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", input.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: VectorRecord = serde_json::from_str(&line)
            .with_context(|| format!("Invalid record on line {}", line_no + 1))?;

        let ann = match index.take() {
            Some(ann) => ann,
            None => {
                let dimension = dimension.unwrap_or(record.vector.len());
                AnnIndex::with_options(dimension, settings.index_options())?
            }
        };
        index
            .insert(ann)
            .add_item(record.id, &record.vector)
            .with_context(|| format!("Invalid record on line {}", line_no + 1))?;
        added += 1;
    }

    let Some(mut index) = index else {
        bail!("No vectors found in {}", input.display());
    };
    tracing::debug!("Read {added} vectors in {:?}", start.elapsed());

    let build_start = Instant::now();
    index.build(n_trees).context("Failed to build index")?;
    index
        .save(output)
        .with_context(|| format!("Failed to save index to {}", output.display()))?;

    println!(
        "Indexed {} items into {} trees ({} nodes) in {:.2?}",
        index.get_n_items(),
        index.n_trees(),
        index.n_nodes(),
        build_start.elapsed()
    );
    println!("Saved to: {}", output.display());
    Ok(())
}

fn parse_vector(raw: &str) -> Result<Vec<f32>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("Invalid vector component '{part}'"))
        })
        .collect()
}

fn print_neighbors(neighbors: &Neighbors, json: bool) -> Result<()> {
    let hits: Vec<QueryHit> = neighbors
        .items
        .iter()
        .enumerate()
        .map(|(rank, item)| QueryHit {
            item: item.get(),
            distance: neighbors.distances.as_ref().map(|d| d[rank]),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No neighbors found");
        return Ok(());
    }

    let mut table = new_table();
    let mut headers = vec!["Rank", "Item"];
    if neighbors.distances.is_some() {
        headers.push("Distance");
    }
    table.set_header(
        headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
    );
    for (rank, hit) in hits.iter().enumerate() {
        let mut row = vec![(rank + 1).to_string(), hit.item.to_string()];
        if let Some(distance) = hit.distance {
            row.push(format!("{distance:.6}"));
        }
        table.add_row(row);
    }
    println!("{table}");
    Ok(())
}

fn info_command(path: &Path, json: bool) -> Result<()> {
    let header =
        read_header(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_bytes = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();

    let info = IndexInfo {
        path: path.to_path_buf(),
        dimension: header.dimension.get(),
        metric: header.metric,
        items: header.item_count,
        trees: header.roots.len(),
        nodes: header.node_count,
        file_bytes,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Property").add_attribute(Attribute::Bold),
        Cell::new("Value").add_attribute(Attribute::Bold),
    ]);
    table.add_row(vec!["Path".to_string(), info.path.display().to_string()]);
    table.add_row(vec!["Dimension".to_string(), info.dimension.to_string()]);
    table.add_row(vec!["Metric".to_string(), info.metric.to_string()]);
    table.add_row(vec!["Items".to_string(), info.items.to_string()]);
    table.add_row(vec!["Trees".to_string(), info.trees.to_string()]);
    table.add_row(vec!["Nodes".to_string(), info.nodes.to_string()]);
    table.add_row(vec!["File size".to_string(), format!("{} bytes", info.file_bytes)]);
    println!("{table}");
    Ok(())
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table
}
