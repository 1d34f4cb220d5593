//! Chrono Bench CLI
//!
//! Runs, resumes and scores image-dating benchmarks against a vision-language model.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;
use vlm_chrono_bench::{
    config::Config,
    image_codec::grayscale_directory,
    llm::LlmClient,
    runner::ResumableRunner,
    score::{ScoreAggregator, load_ground_truth},
    store::{ResultStore, StoreFormat},
    task::{IdRange, PathRewrite, TaskSource, category_from_path},
    variant::Variant,
};

/// Chrono Bench - resumable benchmarks for dating historical images with a VLM
#[derive(Parser)]
#[command(name = "chrono-bench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceFormat {
    /// One JSON record per line
    Jsonl,
    /// A single JSON array of records
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark variant, skipping tasks already in the output store
    Run {
        /// Evaluation variant: dynasty-classify, dynasty-sort, news-year,
        /// news-same-year, earlier-of-pair or earlier-of-pair-cot
        variant: Variant,

        /// Benchmark record file
        #[arg(long)]
        benchmark: Option<PathBuf>,

        /// Layout of the benchmark record file
        #[arg(long, value_enum, default_value_t = SourceFormat::Jsonl)]
        format: SourceFormat,

        /// Info file of a four-image same-year benchmark
        #[arg(long, conflicts_with_all = ["benchmark", "answers", "dir"])]
        info: Option<PathBuf>,

        /// Answer file of a two-image comparison benchmark
        #[arg(long, requires = "name_map", conflicts_with_all = ["benchmark", "dir"])]
        answers: Option<PathBuf>,

        /// Map from original image names to local file names
        #[arg(long)]
        name_map: Option<PathBuf>,

        /// Root directory of the benchmark images
        #[arg(long)]
        images: Option<PathBuf>,

        /// Directory with one image per task
        #[arg(long, conflicts_with = "benchmark")]
        dir: Option<PathBuf>,

        /// Result store (JSON Lines; a .json path selects the array layout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Category recorded for tasks that carry none
        #[arg(long)]
        category: Option<String>,

        /// Seed for option shuffling
        #[arg(long)]
        seed: Option<u64>,

        /// Only process numeric IDs in START-END
        #[arg(long)]
        id_range: Option<IdRange>,

        /// Foreign path prefix used in the benchmark records
        #[arg(long, requires = "rewrite_to")]
        rewrite_from: Option<String>,

        /// Local replacement for --rewrite-from
        #[arg(long, requires = "rewrite_from")]
        rewrite_to: Option<String>,

        /// Store results as a JSON array rewritten every N records
        #[arg(long)]
        checkpoint_every: Option<usize>,

        /// Pixel budget per image
        #[arg(long)]
        max_pixels: Option<u64>,
    },

    /// Score one or more result stores
    Score {
        /// Result store files, each optionally as STORE=GROUND_TRUTH
        #[arg(required = true)]
        stores: Vec<StoreArg>,

        /// JSON map from task ID to the correct answer (single store only)
        #[arg(long)]
        ground_truth: Option<PathBuf>,

        /// Output as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Convert every image in a folder to three-channel grayscale
    Grayscale {
        /// Source image folder
        input: PathBuf,

        /// Destination folder
        output: PathBuf,
    },

    /// Test endpoint connection
    Test,
}

/// Where the tasks of a run come from, as given on the command line.
struct SourceArgs {
    benchmark: Option<PathBuf>,
    format: SourceFormat,
    info: Option<PathBuf>,
    answers: Option<PathBuf>,
    name_map: Option<PathBuf>,
    images: Option<PathBuf>,
    dir: Option<PathBuf>,
    category: Option<String>,
    id_range: Option<IdRange>,
    rewrite: Option<PathRewrite>,
}

/// A store to score, with the ground truth that belongs to it.
#[derive(Debug, Clone, PartialEq)]
struct StoreArg {
    store: PathBuf,
    ground_truth: Option<PathBuf>,
}

impl FromStr for StoreArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (store, ground_truth) = match s.split_once('=') {
            Some((_, truth)) if truth.is_empty() => {
                return Err(format!("missing ground truth after '=' in '{}'", s));
            }
            Some((store, truth)) => (store, Some(PathBuf::from(truth))),
            None => (s, None),
        };
        if store.is_empty() {
            return Err(format!("missing store path in '{}'", s));
        }
        Ok(Self {
            store: PathBuf::from(store),
            ground_truth,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vlm_chrono_bench=info,chrono_bench=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command {
        Commands::Run {
            variant,
            benchmark,
            format,
            info,
            answers,
            name_map,
            images,
            dir,
            output,
            category,
            seed,
            id_range,
            rewrite_from,
            rewrite_to,
            checkpoint_every,
            max_pixels,
        } => {
            let rewrite = match (rewrite_from, rewrite_to) {
                (Some(from), Some(to)) => Some(PathRewrite::new(from, to)),
                _ => None,
            };
            let source = SourceArgs {
                benchmark,
                format,
                info,
                answers,
                name_map,
                images,
                dir,
                category,
                id_range,
                rewrite,
            };
            cmd_run(
                config_path.as_deref(),
                variant,
                source,
                output,
                seed,
                checkpoint_every,
                max_pixels,
            )
            .await
        }
        Commands::Score {
            stores,
            ground_truth,
            json,
        } => cmd_score(stores, ground_truth, json),
        Commands::Grayscale { input, output } => cmd_grayscale(input, output),
        Commands::Test => cmd_test(config_path.as_deref()).await,
    }
}

async fn cmd_run(
    config_path: Option<&Path>,
    variant: Variant,
    source: SourceArgs,
    output: Option<PathBuf>,
    seed: Option<u64>,
    checkpoint_every: Option<usize>,
    max_pixels: Option<u64>,
) -> Result<()> {
    let mut config = Config::load(config_path).context("Failed to load configuration")?;
    if seed.is_some() {
        config.harness.seed = seed;
    }
    if let Some(pixels) = max_pixels {
        config.harness.max_pixels = pixels;
    }
    config.validate().context("Invalid configuration")?;

    let (task_source, category) = resolve_source(source, &variant, &config)?;

    let output = output
        .or_else(|| config.harness.output.clone())
        .unwrap_or_else(|| {
            PathBuf::from("results").join(format!("{}_{}.jsonl", variant.name(), category))
        });
    let format = match checkpoint_every {
        Some(n) => StoreFormat::JsonArray {
            checkpoint_every: n,
        },
        None => StoreFormat::from_path(&output),
    };

    println!("Variant:  {}", variant);
    println!("Category: {}", category);
    println!("Model:    {}", config.llm.model);
    println!("Output:   {}", output.display());

    let mut store = ResultStore::open(&output, format)
        .with_context(|| format!("Failed to open result store '{}'", output.display()))?;
    if store.processed_count() > 0 {
        println!("Resuming: {} tasks already done", store.processed_count());
    }

    let tasks = task_source
        .tasks()
        .context("Failed to open benchmark source")?;

    let client = LlmClient::new(config.llm.clone());
    let mut runner = ResumableRunner::new(client, variant.clone(), &config.harness);
    let summary = runner
        .run(tasks, &mut store)
        .await
        .context("Failed to finish run")?;

    summary.print_summary(&variant);
    Ok(())
}

/// Pick the task source from the arguments given, with its category.
fn resolve_source(
    args: SourceArgs,
    variant: &Variant,
    config: &Config,
) -> Result<(TaskSource, String)> {
    if let Some(info) = args.info {
        let image_root = args
            .images
            .context("--images is required with --info")?;
        let category = args.category.unwrap_or_else(|| dir_name(&image_root));
        let source = TaskSource::SameYear {
            info,
            image_root,
            category: category.clone(),
        };
        return Ok((source, category));
    }

    if let Some(answers) = args.answers {
        let image_root = args
            .images
            .context("--images is required with --answers")?;
        let name_map = args
            .name_map
            .context("--name-map is required with --answers")?;
        let category = args.category.unwrap_or_else(|| dir_name(&image_root));
        let source = TaskSource::EarlierPair {
            answers,
            name_map,
            image_root,
            category: category.clone(),
        };
        return Ok((source, category));
    }

    if let Some(dir) = args.dir {
        let category = args.category.unwrap_or_else(|| dir_name(&dir));
        let source = TaskSource::YearDirectory {
            dir,
            name_map: args.name_map,
            category: category.clone(),
        };
        return Ok((source, category));
    }

    let Some(path) = args.benchmark else {
        anyhow::bail!("No benchmark given. Use --benchmark, --info, --answers or --dir.");
    };
    let category = args.category.unwrap_or_else(|| category_from_path(&path));
    let rewrite = args.rewrite.or_else(|| config.harness.path_rewrite.clone());
    let id_range = args.id_range.or_else(|| variant.default_id_range());
    let source = match args.format {
        SourceFormat::Jsonl => TaskSource::Jsonl {
            path,
            category: category.clone(),
            rewrite,
            id_range,
        },
        SourceFormat::Json => TaskSource::JsonArray {
            path,
            category: category.clone(),
            rewrite,
            id_range,
        },
    };
    Ok((source, category))
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .unwrap_or_else(|| "default".to_string())
}

fn cmd_score(stores: Vec<StoreArg>, ground_truth: Option<PathBuf>, json: bool) -> Result<()> {
    let stores = attach_ground_truth(stores, ground_truth)?;

    let mut aggregator = ScoreAggregator::new();
    for arg in &stores {
        let truth = match &arg.ground_truth {
            Some(path) => Some(
                load_ground_truth(path)
                    .with_context(|| format!("Failed to load ground truth '{}'", path.display()))?,
            ),
            None => None,
        };
        aggregator
            .score_store(&arg.store, truth.as_ref())
            .with_context(|| format!("Failed to score '{}'", arg.store.display()))?;
    }

    let report = aggregator.report();
    if json {
        let json_str =
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", json_str);
    } else {
        report.print_summary();
    }

    Ok(())
}

/// Apply a global `--ground-truth` to the only store given.
///
/// Task IDs repeat across stores, so one side file cannot serve several.
fn attach_ground_truth(mut stores: Vec<StoreArg>, ground_truth: Option<PathBuf>) -> Result<Vec<StoreArg>> {
    let Some(path) = ground_truth else {
        return Ok(stores);
    };
    if stores.len() != 1 {
        anyhow::bail!(
            "--ground-truth only applies to a single store; pass each store as STORE=GROUND_TRUTH"
        );
    }
    if stores[0].ground_truth.is_some() {
        anyhow::bail!("--ground-truth conflicts with STORE=GROUND_TRUTH");
    }
    stores[0].ground_truth = Some(path);
    Ok(stores)
}

fn cmd_grayscale(input: PathBuf, output: PathBuf) -> Result<()> {
    println!("Converting images in {} ...", input.display());
    let converted = grayscale_directory(&input, &output)
        .with_context(|| format!("Failed to convert '{}'", input.display()))?;
    println!("Converted {} images into {}", converted, output.display());
    Ok(())
}

async fn cmd_test(config_path: Option<&Path>) -> Result<()> {
    println!("Testing endpoint connection...\n");

    let config = Config::load(config_path).context("Failed to load configuration")?;

    println!("Configuration:");
    println!("  API Base:  {}", config.llm.api_base);
    println!("  Model:     {}", config.llm.model);
    if !config.llm.api_key.is_empty() {
        let prefix: String = config.llm.api_key.chars().take(8).collect();
        println!("  API Key:   {}...", prefix);
    }
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = LlmClient::new(config.llm);

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => {
            println!("Connection successful!");
        }
        Err(e) => {
            println!("Connection failed: {}", e);
        }
    }

    Ok(())
}
