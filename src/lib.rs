//! VLM Chrono Bench - a resumable multimodal benchmark harness.
//!
//! Drives a vision-language model behind an OpenAI-compatible endpoint over
//! benchmarks about dating and ordering historical images (artifacts by
//! dynasty, news photos by year), stores every answer exactly once, and
//! scores the stored answers against ground truth.
//!
//! # Overview
//!
//! A run is a single sequential pass over a benchmark:
//! 1. Enumerate tasks from a benchmark source
//! 2. Build the prompt, shuffling options or ordering images to avoid position bias
//! 3. Downscale and encode the images
//! 4. Call the endpoint and interpret the raw answer
//! 5. Append the result to the store and flush it
//!
//! Interrupting a run at any point loses at most the task in flight; the
//! next run skips every task already in the store.
//!
//! # Quick Start
//!
//! ```no_run
//! use vlm_chrono_bench::{
//!     config::Config,
//!     llm::LlmClient,
//!     runner::ResumableRunner,
//!     store::{ResultStore, StoreFormat},
//!     task::{PathRewrite, TaskSource},
//!     variant::Variant,
//! };
//! use std::path::{Path, PathBuf};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let config = Config::load(None)?;
//!     config.validate()?;
//!
//!     // Describe the benchmark
//!     let source = TaskSource::Jsonl {
//!         path: PathBuf::from("benchmarks/tang_benchmark.jsonl"),
//!         category: "tang".to_string(),
//!         rewrite: Some(PathRewrite::new(r"E:\Images_dynasty", "/data/Images_dynasty")),
//!         id_range: None,
//!     };
//!
//!     // Resume into an existing store
//!     let output = Path::new("results/tang.jsonl");
//!     let mut store = ResultStore::open(output, StoreFormat::Jsonl)?;
//!
//!     let client = LlmClient::new(config.llm.clone());
//!     let variant = Variant::dynasty_classification();
//!     let mut runner = ResumableRunner::new(client, variant.clone(), &config.harness);
//!     let summary = runner.run(source.tasks()?, &mut store).await?;
//!     summary.print_summary(&variant);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **TaskSource**: Restartable enumeration of benchmark tasks
//! - **PromptBuilder**: Prompt text, answer keys and image presentation order
//! - **image_codec**: Orientation, downscaling to the tile grid, JPEG encoding
//! - **LlmClient**: OpenAI-compatible multimodal chat client
//! - **AnswerParser**: Tolerant extraction of years, choices and JSON fields
//! - **Variant**: Request profile and judging rule of each benchmark
//! - **ResumableRunner**: The sequential, crash-safe task loop
//! - **ResultStore**: Append-only JSONL or checkpointed JSON array
//! - **ScoreAggregator**: Per-category and overall accuracy and year error

pub mod config;
pub mod error;
pub mod image_codec;
pub mod llm;
pub mod parser;
pub mod prompt;
pub mod runner;
pub mod score;
pub mod store;
pub mod task;
pub mod variant;

// Re-export commonly used types
pub use config::Config;
pub use error::{BenchError, InferenceError, Result};
pub use llm::LlmClient;
pub use parser::{AnswerParser, Prediction};
pub use prompt::{PromptBuilder, PromptSpec};
pub use runner::{ResumableRunner, RunSummary};
pub use score::{GroundTruthMap, ScoreAggregator, ScoreReport};
pub use store::{ResultRecord, ResultStore, StoreFormat};
pub use task::{Task, TaskId, TaskSource};
pub use variant::Variant;
