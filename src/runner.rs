//! Resumable benchmark runner.
//!
//! Tasks are processed strictly one after another: build the prompt, encode
//! the images, call the backend, interpret the answer, append the record.
//! Only a fully processed task is written. Anything that goes wrong before
//! that leaves no trace in the store, so the next run retries the task.
//!
//! A task's life: `Pending → InFlight → {Persisted, Skipped, Failed}`. Only the
//! last three are ever reported; the first two live inside [`ResumableRunner::step`].

use crate::config::HarnessConfig;
use crate::error::{BenchError, Result};
use crate::image_codec::encode_image;
use crate::llm::{ContentPart, InferenceBackend, InferenceRequest, Message};
use crate::parser::AnswerParser;
use crate::prompt::{PromptBuilder, PromptSpec, Segment};
use crate::store::{ResultRecord, ResultStore};
use crate::task::{Task, TaskId};
use crate::variant::Variant;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Where a task is in its lifecycle.
///
/// `Pending` and `InFlight` are transient: they only exist while
/// [`ResumableRunner::step`] runs and never appear in a [`TaskOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Enumerated, not looked at yet.
    Pending,
    /// Prompt, images and call under way.
    InFlight,
    /// A record was written.
    Persisted,
    /// Already present in the store; nothing was done.
    Skipped,
    /// Something failed; nothing was written.
    Failed,
}

/// Final state of one task in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub id: TaskId,
    pub state: TaskState,
    pub parsed: bool,
    pub is_correct: Option<bool>,
}

impl TaskOutcome {
    fn new(id: TaskId, state: TaskState) -> Self {
        Self {
            id,
            state,
            parsed: false,
            is_correct: None,
        }
    }
}

/// Counters of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub persisted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Persisted records whose answer could not be parsed.
    pub unparsed: usize,
    /// Persisted records with a ground truth.
    pub judged: usize,
    pub correct: usize,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &TaskOutcome) {
        match outcome.state {
            TaskState::Persisted => {
                self.persisted += 1;
                if !outcome.parsed {
                    self.unparsed += 1;
                }
                if let Some(correct) = outcome.is_correct {
                    self.judged += 1;
                    if correct {
                        self.correct += 1;
                    }
                }
            }
            TaskState::Skipped => self.skipped += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Pending | TaskState::InFlight => {}
        }
    }

    /// Accuracy over the judged records of this run, as a percentage.
    pub fn accuracy(&self) -> f64 {
        if self.judged == 0 {
            0.0
        } else {
            self.correct as f64 / self.judged as f64 * 100.0
        }
    }

    pub fn print_summary(&self, variant: &Variant) {
        println!("\n========== Run Summary ==========");
        println!("Variant: {}", variant);
        println!("Persisted: {}", self.persisted);
        println!("Skipped (already done): {}", self.skipped);
        println!("Failed (will retry): {}", self.failed);
        println!("Unparsed answers: {}", self.unparsed);
        if self.judged > 0 {
            println!("---------------------------------");
            println!(
                "Accuracy this run: {}/{} ({:.2}%)",
                self.correct,
                self.judged,
                self.accuracy()
            );
        }
        println!("---------------------------------");
        println!("Total time: {:.1}s", self.elapsed_secs);
        println!("=================================\n");
    }
}

/// Drives tasks through the backend and into a store.
pub struct ResumableRunner<B: InferenceBackend> {
    backend: B,
    variant: Variant,
    builder: PromptBuilder,
    parser: AnswerParser,
    max_pixels: u64,
    timeout_override: Option<Duration>,
}

impl<B: InferenceBackend> ResumableRunner<B> {
    pub fn new(backend: B, variant: Variant, config: &HarnessConfig) -> Self {
        Self {
            backend,
            variant,
            builder: PromptBuilder::from_seed(config.seed),
            parser: AnswerParser::new(config.years),
            max_pixels: config.max_pixels,
            timeout_override: config.timeout_override(),
        }
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Process every task not yet in `store`.
    ///
    /// Only failing to flush the store at the end is an error; individual task
    /// failures are logged and counted.
    pub async fn run<I>(&mut self, tasks: I, store: &mut ResultStore) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Task>,
    {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        info!(
            variant = %self.variant,
            store = %store.path().display(),
            already_done = store.processed_count(),
            "starting run"
        );

        for task in tasks {
            let outcome = self.step(&task, store).await;
            summary.record(&outcome);
        }

        store.finish()?;
        summary.elapsed_secs = start.elapsed().as_secs_f64();

        info!(
            persisted = summary.persisted,
            skipped = summary.skipped,
            failed = summary.failed,
            "run finished"
        );
        Ok(summary)
    }

    /// Advance one task to a final state.
    pub async fn step(&mut self, task: &Task, store: &mut ResultStore) -> TaskOutcome {
        if store.contains(&task.id) {
            debug!(task_id = %task.id, "already processed");
            return TaskOutcome::new(task.id.clone(), TaskState::Skipped);
        }

        debug!(task_id = %task.id, state = ?TaskState::InFlight, images = task.images.len(), "processing");
        let record = match self.process(task).await {
            Ok(record) => record,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "task failed");
                return TaskOutcome::new(task.id.clone(), TaskState::Failed);
            }
        };

        if let Err(e) = store.append(&record) {
            error!(task_id = %task.id, error = %e, "could not persist result");
            return TaskOutcome::new(task.id.clone(), TaskState::Failed);
        }

        if !record.prediction.is_parsed() {
            warn!(task_id = %task.id, "answer could not be parsed");
        }

        TaskOutcome {
            id: task.id.clone(),
            state: TaskState::Persisted,
            parsed: record.prediction.is_parsed(),
            is_correct: record.is_correct,
        }
    }

    async fn process(&mut self, task: &Task) -> Result<ResultRecord> {
        let spec = self.builder.build(&self.variant, task)?;
        let request = self.request_for(task, &spec)?;

        let raw = self.backend.infer(&request).await?;
        let interpretation = self.variant.interpret(&raw, &spec, &self.parser);
        let is_correct = self.variant.judge(
            &interpretation.prediction,
            &raw,
            task.ground_truth.as_ref(),
        );

        Ok(ResultRecord {
            id: task.id.clone(),
            variant: self.variant.name().to_string(),
            category: task.category.clone(),
            raw_response: raw,
            prediction: interpretation.prediction,
            ground_truth: task.ground_truth.clone(),
            is_correct,
            answer_key: spec.answer_key,
            presentation: spec
                .presentation
                .iter()
                .filter_map(|&i| task.images.get(i).cloned())
                .collect(),
            reasoning: interpretation.reasoning,
        })
    }

    /// Encode the images and assemble the request for one prompt.
    fn request_for(&self, task: &Task, spec: &PromptSpec) -> Result<InferenceRequest> {
        let mut parts = Vec::with_capacity(spec.segments.len());
        for segment in &spec.segments {
            match segment {
                Segment::Text(text) => parts.push(ContentPart::text(text.clone())),
                Segment::Image(index) => {
                    let image = task.images.get(*index).ok_or_else(|| BenchError::InvalidTask {
                        id: task.id.to_string(),
                        reason: format!("no image at position {}", index),
                    })?;
                    let encoded = encode_image(&image.path, self.max_pixels)
                        .ok_or_else(|| BenchError::image(&image.path, "could not be encoded"))?;
                    parts.push(ContentPart::image(&encoded));
                }
            }
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &spec.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user_parts(parts));

        let profile = self.variant.profile();
        let mut request =
            InferenceRequest::new(messages, self.timeout_override.unwrap_or(profile.timeout));
        request.temperature = profile.temperature;
        request.json_response = profile.json_response;
        request.max_tokens = profile.max_tokens;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::parser::Prediction;
    use crate::store::{StoreFormat, load_records, scan_processed_ids};
    use crate::task::{GroundTruth, TaskImage};
    use image::RgbImage;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Answers every request with a fixed text and records what it saw.
    #[derive(Clone)]
    struct ScriptedBackend {
        reply: std::result::Result<String, u16>,
        calls: Arc<Mutex<Vec<(usize, Duration)>>>,
    }

    impl ScriptedBackend {
        fn answering(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                reply: Err(status),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl InferenceBackend for ScriptedBackend {
        async fn infer(&self, request: &InferenceRequest) -> std::result::Result<String, InferenceError> {
            self.calls
                .lock()
                .unwrap()
                .push((request.image_count(), request.timeout));
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(status) => Err(InferenceError::Status {
                    status: *status,
                    body: "unavailable".to_string(),
                }),
            }
        }
    }

    fn write_image(path: &Path) {
        RgbImage::new(64, 48).save(path).unwrap();
    }

    fn year_task(dir: &Path, id: &str, year: i64) -> Task {
        let path = dir.join(format!("{}.png", id));
        Task::new(id, "sports", vec![TaskImage::new(path)]).with_ground_truth(GroundTruth::Number(year))
    }

    fn seeded_config() -> HarnessConfig {
        HarnessConfig {
            seed: Some(11),
            ..HarnessConfig::default()
        }
    }

    fn fixture() -> (TempDir, Vec<Task>, PathBuf) {
        let dir = TempDir::new().unwrap();
        let tasks: Vec<Task> = ["t1", "t2", "t3"]
            .iter()
            .map(|id| year_task(dir.path(), id, 1950))
            .collect();
        for task in &tasks {
            write_image(&task.images[0].path);
        }
        let store = dir.path().join("out").join("results.jsonl");
        (dir, tasks, store)
    }

    #[tokio::test]
    async fn test_second_run_makes_no_calls() {
        let (_dir, tasks, path) = fixture();
        let backend = ScriptedBackend::answering("1952");

        let mut runner = ResumableRunner::new(backend.clone(), Variant::NewsYear, &seeded_config());
        let mut store = ResultStore::open(&path, StoreFormat::Jsonl).unwrap();
        let first = runner.run(tasks.clone(), &mut store).await.unwrap();
        drop(store);
        assert_eq!(first.persisted, 3);
        assert_eq!(backend.call_count(), 3);
        let ids_after_first = scan_processed_ids(&path).unwrap();

        let mut store = ResultStore::open(&path, StoreFormat::Jsonl).unwrap();
        let second = runner.run(tasks, &mut store).await.unwrap();
        drop(store);
        assert_eq!(second.skipped, 3);
        assert_eq!(second.persisted, 0);
        assert_eq!(backend.call_count(), 3);
        assert_eq!(scan_processed_ids(&path).unwrap(), ids_after_first);
        assert_eq!(load_records(&path).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_resume_only_calls_missing_ids() {
        let (_dir, tasks, path) = fixture();
        let backend = ScriptedBackend::answering("1950");
        let mut runner = ResumableRunner::new(backend.clone(), Variant::NewsYear, &seeded_config());

        let mut store = ResultStore::open(&path, StoreFormat::Jsonl).unwrap();
        runner.run(tasks[1..2].to_vec(), &mut store).await.unwrap();
        drop(store);
        assert_eq!(backend.call_count(), 1);

        let mut store = ResultStore::open(&path, StoreFormat::Jsonl).unwrap();
        let summary = runner.run(tasks, &mut store).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.persisted, 2);
        assert_eq!(summary.correct, 2);
        assert_eq!(backend.call_count(), 3);

        let ids: Vec<String> = load_records(&path)
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["t2", "t1", "t3"]);
    }

    #[tokio::test]
    async fn test_missing_image_fails_only_that_task() {
        let (_dir, tasks, path) = fixture();
        fs_remove(&tasks[1].images[0].path);
        let backend = ScriptedBackend::answering("1952");
        let mut runner = ResumableRunner::new(backend.clone(), Variant::NewsYear, &seeded_config());

        let mut store = ResultStore::open(&path, StoreFormat::Jsonl).unwrap();
        let summary = runner.run(tasks.clone(), &mut store).await.unwrap();
        drop(store);
        assert_eq!(summary.persisted, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(backend.call_count(), 2);
        let ids = scan_processed_ids(&path).unwrap();
        assert!(!ids.contains(&TaskId::new("t2")));

        // The image shows up; the next run picks the task up again.
        write_image(&tasks[1].images[0].path);
        let mut store = ResultStore::open(&path, StoreFormat::Jsonl).unwrap();
        let summary = runner.run(tasks, &mut store).await.unwrap();
        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(scan_processed_ids(&path).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_transport_failure_writes_nothing() {
        let (_dir, tasks, path) = fixture();
        let backend = ScriptedBackend::failing(503);
        let mut runner = ResumableRunner::new(backend.clone(), Variant::NewsYear, &seeded_config());

        let mut store = ResultStore::open(&path, StoreFormat::Jsonl).unwrap();
        let summary = runner.run(tasks, &mut store).await.unwrap();
        assert_eq!(summary.failed, 3);
        assert_eq!(backend.call_count(), 3);
        assert!(scan_processed_ids(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unparsed_answer_is_still_persisted() {
        let (_dir, tasks, path) = fixture();
        let backend = ScriptedBackend::answering("I cannot tell, serial 9999");
        let mut runner = ResumableRunner::new(backend, Variant::NewsYear, &seeded_config());

        let mut store = ResultStore::open(&path, StoreFormat::Jsonl).unwrap();
        let summary = runner.run(tasks, &mut store).await.unwrap();
        assert_eq!(summary.persisted, 3);
        assert_eq!(summary.unparsed, 3);

        let records = load_records(&path).unwrap();
        assert_eq!(records[0].prediction, Prediction::Unparsed);
        assert_eq!(records[0].is_correct, Some(false));
        assert_eq!(records[0].raw_response, "I cannot tell, serial 9999");
    }

    #[tokio::test]
    async fn test_pair_request_profile_and_presentation() {
        let dir = TempDir::new().unwrap();
        let early = dir.path().join("a.png");
        let late = dir.path().join("b.png");
        write_image(&early);
        write_image(&late);
        let mut images = vec![TaskImage::new(&early), TaskImage::new(&late)];
        images[0].year = Some(1950);
        images[1].year = Some(1990);
        let task = Task::new("test_1", "sports", images).with_ground_truth(GroundTruth::Text("2".into()));

        let backend = ScriptedBackend::answering(r#"{"thinking": "cars", "answer": "2"}"#);
        let config = HarnessConfig {
            timeout_secs: Some(5),
            ..seeded_config()
        };
        let variant = Variant::EarlierOfPair {
            capture_reasoning: false,
        };
        let mut runner = ResumableRunner::new(backend.clone(), variant, &config);

        let path = dir.path().join("pairs.json");
        let mut store = ResultStore::open(&path, StoreFormat::from_path(&path)).unwrap();
        let summary = runner.run(vec![task], &mut store).await.unwrap();
        assert_eq!(summary.correct, 1);

        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(2, Duration::from_secs(5))]);

        let record = &load_records(&path).unwrap()[0];
        assert_eq!(record.presentation[0].path, late);
        assert_eq!(record.presentation[1].year, Some(1950));
    }

    #[tokio::test]
    async fn test_outcomes_are_always_final() {
        let (_dir, tasks, path) = fixture();
        fs_remove(&tasks[2].images[0].path);
        let mut runner =
            ResumableRunner::new(ScriptedBackend::answering("1950"), Variant::NewsYear, &seeded_config());

        let mut store = ResultStore::open(&path, StoreFormat::Jsonl).unwrap();
        runner.step(&tasks[0], &mut store).await;
        let mut states = Vec::new();
        for task in &tasks {
            states.push(runner.step(task, &mut store).await.state);
        }
        assert_eq!(
            states,
            vec![TaskState::Skipped, TaskState::Persisted, TaskState::Failed]
        );

        let mut summary = RunSummary::default();
        summary.record(&TaskOutcome::new(TaskId::new("x"), TaskState::InFlight));
        summary.record(&TaskOutcome::new(TaskId::new("y"), TaskState::Pending));
        assert_eq!(summary, RunSummary::default());
    }

    fn fs_remove(path: &Path) {
        std::fs::remove_file(path).unwrap();
    }
}
