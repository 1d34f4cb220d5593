//! Benchmark task records and the sources they are enumerated from.
//!
//! A [`TaskSource`] is a description of where tasks live, not an open handle:
//! calling [`TaskSource::tasks`] opens it afresh, so a run can always be
//! restarted from the top. Records that cannot be turned into a runnable task
//! (bad JSON, no ID, missing image) are skipped, never fatal.

use crate::error::{BenchError, Result};
use crate::image_codec::has_extension;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

static FOUR_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").unwrap());
static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Image extensions probed for numbered comparison slots (`1.jpg`, `2.png`...).
const SLOT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Image extensions listed from a year directory.
const YEAR_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Stable task identity used for resume tracking.
///
/// Benchmarks use both integer and string IDs; both normalize to text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the ID, if it is an integer.
    pub fn as_number(&self) -> Option<u64> {
        self.0.trim().parse().ok()
    }

    /// Read an ID out of an arbitrary JSON value.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(Self::new(s.trim())),
            serde_json::Value::Number(n) => Some(Self::new(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self::new(id.to_string())
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        TaskId::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid task id: {}", value)))
    }
}

/// Ground-truth value attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroundTruth {
    /// A year or a numeric choice.
    Number(i64),
    /// A label or a textual choice (`"1"`).
    Text(String),
    /// An ordering.
    Sequence(Vec<serde_json::Value>),
    /// Anything else; kept for the record but never scored.
    Other(serde_json::Value),
}

impl GroundTruth {
    /// Interpret as a year.
    pub fn as_year(&self) -> Option<i32> {
        match self {
            GroundTruth::Number(n) => i32::try_from(*n).ok(),
            GroundTruth::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Interpret as a short textual answer.
    pub fn as_text(&self) -> Option<String> {
        match self {
            GroundTruth::Number(n) => Some(n.to_string()),
            GroundTruth::Text(s) => Some(s.trim().to_string()),
            _ => None,
        }
    }

    /// Interpret as an ordering of 1-based image numbers.
    pub fn as_ordering(&self) -> Option<Vec<u32>> {
        match self {
            GroundTruth::Sequence(items) => items
                .iter()
                .map(|v| match v {
                    serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
                    serde_json::Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                })
                .collect(),
            GroundTruth::Text(s) => {
                let order: Vec<u32> = FIRST_NUMBER
                    .find_iter(s)
                    .filter_map(|m| m.as_str().parse().ok())
                    .collect();
                (!order.is_empty()).then_some(order)
            }
            _ => None,
        }
    }
}

/// One image reference of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskImage {
    /// Local path of the image.
    pub path: PathBuf,
    /// Original key the image was known by, if it was renamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Known year of the image, when the layout encodes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl TaskImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: None,
            year: None,
        }
    }
}

/// A single benchmark test case. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub category: String,
    /// Images in canonical order (chronological when years are known).
    pub images: Vec<TaskImage>,
    /// Pre-built prompt shipped with the benchmark record.
    pub prompt: Option<String>,
    /// Free-text context, e.g. a news event description.
    pub context: Option<String>,
    pub ground_truth: Option<GroundTruth>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, category: impl Into<String>, images: Vec<TaskImage>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            images,
            prompt: None,
            context: None,
            ground_truth: None,
        }
    }

    pub fn with_ground_truth(mut self, ground_truth: GroundTruth) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Maps a foreign path prefix onto local storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRewrite {
    pub from: String,
    pub to: String,
}

impl PathRewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Replace the prefix and normalize `\` separators to `/`.
    pub fn apply(&self, raw: &str) -> PathBuf {
        PathBuf::from(raw.replace(&self.from, &self.to).replace('\\', "/"))
    }
}

/// Inclusive range of numeric task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub start: u64,
    pub end: u64,
}

impl IdRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Non-numeric IDs are never inside a range.
    pub fn contains(&self, id: &TaskId) -> bool {
        id.as_number()
            .map(|n| self.start <= n && n <= self.end)
            .unwrap_or(false)
    }
}

impl FromStr for IdRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("expected START-END, got '{}'", s))?;
        let start = start.trim().parse().map_err(|_| format!("bad range start in '{}'", s))?;
        let end = end.trim().parse().map_err(|_| format!("bad range end in '{}'", s))?;
        if start > end {
            return Err(format!("empty range '{}'", s));
        }
        Ok(Self { start, end })
    }
}

/// Where the tasks of one benchmark come from.
#[derive(Debug, Clone)]
pub enum TaskSource {
    /// One JSON record per line.
    Jsonl {
        path: PathBuf,
        category: String,
        rewrite: Option<PathRewrite>,
        id_range: Option<IdRange>,
    },
    /// The same records inside one JSON array.
    JsonArray {
        path: PathBuf,
        category: String,
        rewrite: Option<PathRewrite>,
        id_range: Option<IdRange>,
    },
    /// Four numbered images per test plus an event description.
    SameYear {
        info: PathBuf,
        image_root: PathBuf,
        category: String,
    },
    /// Two dated images per test behind randomized file names.
    EarlierPair {
        answers: PathBuf,
        name_map: PathBuf,
        image_root: PathBuf,
        category: String,
    },
    /// One task per image file; years come from the original file names.
    YearDirectory {
        dir: PathBuf,
        name_map: Option<PathBuf>,
        category: String,
    },
}

impl TaskSource {
    /// Open the source and enumerate its tasks.
    ///
    /// Fails only when the source itself cannot be read.
    pub fn tasks(&self) -> Result<Box<dyn Iterator<Item = Task>>> {
        match self {
            TaskSource::Jsonl {
                path,
                category,
                rewrite,
                id_range,
            } => {
                let file = File::open(path).map_err(|e| BenchError::io(path, e))?;
                Ok(Box::new(JsonlTasks {
                    origin: path.clone(),
                    lines: BufReader::new(file).lines(),
                    line_no: 0,
                    filter: RecordFilter {
                        category: category.clone(),
                        rewrite: rewrite.clone(),
                        id_range: *id_range,
                    },
                }))
            }
            TaskSource::JsonArray {
                path,
                category,
                rewrite,
                id_range,
            } => {
                let values: Vec<serde_json::Value> = read_json(path)?;
                let filter = RecordFilter {
                    category: category.clone(),
                    rewrite: rewrite.clone(),
                    id_range: *id_range,
                };
                let tasks: Vec<Task> = values
                    .into_iter()
                    .enumerate()
                    .filter_map(|(idx, value)| match serde_json::from_value::<RawRecord>(value) {
                        Ok(raw) => filter.to_task(raw),
                        Err(e) => {
                            debug!(path = %path.display(), index = idx, error = %e, "skipping malformed record");
                            None
                        }
                    })
                    .collect();
                Ok(Box::new(tasks.into_iter()))
            }
            TaskSource::SameYear {
                info,
                image_root,
                category,
            } => Ok(Box::new(same_year_tasks(info, image_root, category)?.into_iter())),
            TaskSource::EarlierPair {
                answers,
                name_map,
                image_root,
                category,
            } => Ok(Box::new(
                earlier_pair_tasks(answers, name_map, image_root, category)?.into_iter(),
            )),
            TaskSource::YearDirectory {
                dir,
                name_map,
                category,
            } => Ok(Box::new(
                year_directory_tasks(dir, name_map.as_deref(), category)?.into_iter(),
            )),
        }
    }
}

/// Default category for a benchmark file: its stem without `_benchmark`.
pub fn category_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.trim_end_matches("_benchmark").to_string())
        .unwrap_or_else(|| "default".to_string())
}

/// Benchmark record as found on disk.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    id: Option<TaskId>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    ground_truth: Option<GroundTruth>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
struct RecordFilter {
    category: String,
    rewrite: Option<PathRewrite>,
    id_range: Option<IdRange>,
}

impl RecordFilter {
    fn to_task(&self, raw: RawRecord) -> Option<Task> {
        let Some(id) = raw.id else {
            debug!("skipping record without id");
            return None;
        };

        if let Some(range) = &self.id_range {
            if !range.contains(&id) {
                return None;
            }
        }

        let refs: Vec<String> = raw.image.into_iter().chain(raw.images).collect();
        if refs.is_empty() {
            debug!(task_id = %id, "skipping record without image references");
            return None;
        }

        let mut images = Vec::with_capacity(refs.len());
        for reference in &refs {
            let path = match &self.rewrite {
                Some(rewrite) => rewrite.apply(reference),
                None => PathBuf::from(reference),
            };
            if !path.exists() {
                debug!(task_id = %id, path = %path.display(), "skipping record with missing image");
                return None;
            }
            images.push(TaskImage::new(path));
        }

        Some(Task {
            id,
            category: raw
                .category
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| self.category.clone()),
            images,
            prompt: raw.prompt,
            context: raw.description,
            ground_truth: raw.ground_truth,
        })
    }
}

/// Lazy line-by-line reader over a JSONL benchmark.
struct JsonlTasks {
    origin: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    filter: RecordFilter,
}

impl Iterator for JsonlTasks {
    type Item = Task;

    fn next(&mut self) -> Option<Task> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!(path = %self.origin.display(), error = %e, "stopped reading benchmark");
                    return None;
                }
            };
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<RawRecord>(line) {
                Ok(raw) => {
                    if let Some(task) = self.filter.to_task(raw) {
                        return Some(task);
                    }
                }
                Err(e) => {
                    debug!(path = %self.origin.display(), line = self.line_no, error = %e, "skipping malformed line");
                }
            }
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(BenchError::SourceNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| BenchError::InvalidSource {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct SameYearRecord {
    test_id: TaskId,
    #[serde(default)]
    news: Option<NewsInfo>,
    #[serde(default)]
    correct_answer: Option<GroundTruth>,
}

#[derive(Debug, Deserialize)]
struct NewsInfo {
    #[serde(default)]
    description: Option<String>,
}

fn same_year_tasks(info: &Path, image_root: &Path, category: &str) -> Result<Vec<Task>> {
    let value: serde_json::Value = read_json(info)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        obj @ serde_json::Value::Object(_) => vec![obj],
        _ => {
            return Err(BenchError::InvalidSource {
                path: info.to_path_buf(),
                reason: "expected an object or an array of objects".to_string(),
            });
        }
    };

    let mut tasks = Vec::new();
    for item in items {
        let record: SameYearRecord = match serde_json::from_value(item) {
            Ok(record) => record,
            Err(e) => {
                debug!(path = %info.display(), error = %e, "skipping malformed test");
                continue;
            }
        };

        let folder = image_root.join(record.test_id.as_str());
        let images: Option<Vec<TaskImage>> = (1..=4)
            .map(|slot| find_slot_image(&folder, slot).map(TaskImage::new))
            .collect();
        let Some(images) = images else {
            warn!(task_id = %record.test_id, "can't find images");
            continue;
        };

        let description = record
            .news
            .and_then(|n| n.description)
            .unwrap_or_else(|| "N/A".to_string());

        let mut task = Task::new(record.test_id, category, images).with_context(description);
        task.ground_truth = record.correct_answer;
        tasks.push(task);
    }

    Ok(tasks)
}

fn find_slot_image(folder: &Path, slot: usize) -> Option<PathBuf> {
    SLOT_EXTENSIONS
        .iter()
        .flat_map(|ext| [ext.to_string(), ext.to_uppercase()])
        .map(|ext| folder.join(format!("{}.{}", slot, ext)))
        .find(|p| p.exists())
}

/// Year encoded in an original pair key: the 4 characters after the first `_`
/// of the file name.
pub fn year_from_key(key: &str) -> Option<i32> {
    let name = key.rsplit(['/', '\\']).next().unwrap_or(key);
    let idx = name.find('_')?;
    let year = name.get(idx + 1..idx + 5)?;
    if year.chars().all(|c| c.is_ascii_digit()) {
        year.parse().ok()
    } else {
        None
    }
}

/// Year encoded in an original file name: its first run of 4 digits.
pub fn year_from_filename(name: &str) -> Option<i32> {
    FOUR_DIGITS.find(name).and_then(|m| m.as_str().parse().ok())
}

fn numeric_key(id: &str) -> u64 {
    FIRST_NUMBER
        .find(id)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn earlier_pair_tasks(
    answers: &Path,
    name_map: &Path,
    image_root: &Path,
    category: &str,
) -> Result<Vec<Task>> {
    let answers: HashMap<String, GroundTruth> = read_json(answers)?;
    let names: BTreeMap<String, String> = read_json(name_map)?;

    let mut test_ids: Vec<&String> = answers.keys().collect();
    test_ids.sort_by(|a, b| numeric_key(a).cmp(&numeric_key(b)).then_with(|| a.cmp(b)));

    let mut tasks = Vec::new();
    for test_id in test_ids {
        let prefix = format!("{}/", test_id);
        let mut images: Vec<TaskImage> = names
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, local_name)| {
                let year = year_from_key(key)?;
                let path = image_root.join(test_id).join(local_name);
                path.exists().then(|| TaskImage {
                    path,
                    key: Some(key.clone()),
                    year: Some(year),
                })
            })
            .collect();

        if images.len() != 2 {
            debug!(task_id = %test_id, found = images.len(), "skipping pair without two dated images");
            continue;
        }
        images.sort_by_key(|img| img.year);

        let mut task = Task::new(test_id.as_str(), category, images);
        task.ground_truth = answers.get(test_id).cloned();
        tasks.push(task);
    }

    Ok(tasks)
}

fn year_directory_tasks(dir: &Path, name_map: Option<&Path>, category: &str) -> Result<Vec<Task>> {
    if !dir.is_dir() {
        return Err(BenchError::SourceNotFound(dir.to_path_buf()));
    }
    let names: HashMap<String, String> = match name_map {
        Some(path) => read_json(path)?,
        None => HashMap::new(),
    };

    let entries = fs::read_dir(dir).map_err(|e| BenchError::io(dir, e))?;
    let mut files: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file() && has_extension(&e.path(), YEAR_EXTENSIONS))
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .collect();

    files.sort_by(|a, b| {
        let stem = |s: &str| Path::new(s).file_stem().and_then(|x| x.to_str()).map(String::from);
        match (
            stem(a).and_then(|s| s.parse::<u64>().ok()),
            stem(b).and_then(|s| s.parse::<u64>().ok()),
        ) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    });

    Ok(files
        .into_iter()
        .map(|file| {
            let mut image = TaskImage::new(dir.join(&file));
            image.key = names.get(&file).cloned();
            let year = image.key.as_deref().and_then(year_from_filename);
            image.year = year;

            let mut task = Task::new(file.as_str(), category, vec![image]);
            task.ground_truth = year.map(|y| GroundTruth::Number(y as i64));
            task
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_task_id_accepts_numbers_and_strings() {
        let a: TaskId = serde_json::from_str("17").unwrap();
        let b: TaskId = serde_json::from_str("\"17\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_number(), Some(17));
        assert!(serde_json::from_str::<TaskId>("null").is_err());
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"17\"");
    }

    #[test]
    fn test_path_rewrite() {
        let rewrite = PathRewrite::new(r"E:\Images_dynasty", "/hd/Images_dynasty");
        assert_eq!(
            rewrite.apply(r"E:\Images_dynasty\tang\001.jpg"),
            PathBuf::from("/hd/Images_dynasty/tang/001.jpg")
        );
    }

    #[test]
    fn test_id_range() {
        let range: IdRange = "1-1000".parse().unwrap();
        assert!(range.contains(&TaskId::from(1)));
        assert!(range.contains(&TaskId::from(1000)));
        assert!(!range.contains(&TaskId::from(1001)));
        assert!(!range.contains(&TaskId::new("abc")));
        assert!("10-1".parse::<IdRange>().is_err());
        assert!("10".parse::<IdRange>().is_err());
    }

    #[test]
    fn test_jsonl_skips_bad_lines_and_missing_images() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("img").join("a.jpg");
        touch(&img);
        let foreign = r"E:\data\img\a.jpg".to_string();

        let bench = dir.path().join("tang_benchmark.jsonl");
        let mut f = File::create(&bench).unwrap();
        writeln!(f, r#"{{"id": 1, "image": {}}}"#, serde_json::to_string(&foreign).unwrap()).unwrap();
        writeln!(f, "not json").unwrap();
        writeln!(f).unwrap();
        writeln!(f, r#"{{"id": 2, "image": "E:\\data\\img\\missing.jpg"}}"#).unwrap();
        writeln!(f, r#"{{"image": "E:\\data\\img\\a.jpg"}}"#).unwrap();
        writeln!(f, r#"{{"id": "x3", "images": ["E:\\data\\img\\a.jpg"], "category": "song", "ground_truth": "宋(Song Dynasty)"}}"#).unwrap();
        drop(f);

        let source = TaskSource::Jsonl {
            path: bench.clone(),
            category: category_from_path(&bench),
            rewrite: Some(PathRewrite::new(r"E:\data", dir.path().to_str().unwrap())),
            id_range: None,
        };

        let tasks: Vec<Task> = source.tasks().unwrap().collect();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id.as_str(), "1");
        assert_eq!(tasks[0].category, "tang");
        assert_eq!(tasks[0].images[0].path, img);
        assert_eq!(tasks[1].id.as_str(), "x3");
        assert_eq!(tasks[1].category, "song");
        assert_eq!(
            tasks[1].ground_truth.as_ref().and_then(|g| g.as_text()).as_deref(),
            Some("宋(Song Dynasty)")
        );

        // restartable
        assert_eq!(source.tasks().unwrap().count(), 2);
    }

    #[test]
    fn test_jsonl_id_range_filter() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("a.jpg");
        touch(&img);
        let bench = dir.path().join("sort.jsonl");
        let mut f = File::create(&bench).unwrap();
        for id in [0, 1, 500, 1000, 1001] {
            writeln!(
                f,
                r#"{{"id": {}, "images": [{}], "prompt": "sort"}}"#,
                id,
                serde_json::to_string(img.to_str().unwrap()).unwrap()
            )
            .unwrap();
        }
        drop(f);

        let source = TaskSource::Jsonl {
            path: bench,
            category: "sort".to_string(),
            rewrite: None,
            id_range: Some(IdRange::new(1, 1000)),
        };
        let ids: Vec<String> = source.tasks().unwrap().map(|t| t.id.to_string()).collect();
        assert_eq!(ids, vec!["1", "500", "1000"]);
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let source = TaskSource::Jsonl {
            path: PathBuf::from("/nonexistent/bench.jsonl"),
            category: "x".to_string(),
            rewrite: None,
            id_range: None,
        };
        assert!(source.tasks().is_err());
    }

    #[test]
    fn test_json_array_source() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("a.jpg");
        touch(&img);
        let path = dir.path().join("bench.json");
        let records = serde_json::json!([
            {"id": 1, "image": img},
            {"id": 2, "image": dir.path().join("nope.jpg")},
            "garbage",
        ]);
        fs::write(&path, records.to_string()).unwrap();

        let source = TaskSource::JsonArray {
            path,
            category: "c".to_string(),
            rewrite: None,
            id_range: None,
        };
        let tasks: Vec<Task> = source.tasks().unwrap().collect();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id.as_str(), "1");
    }

    #[test]
    fn test_same_year_source() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("MMT-test");
        for slot in 1..=4 {
            let ext = if slot == 2 { "PNG" } else { "jpg" };
            touch(&root.join("t1").join(format!("{}.{}", slot, ext)));
        }
        touch(&root.join("t2").join("1.jpg"));

        let info = dir.path().join("info.json");
        fs::write(
            &info,
            serde_json::json!([
                {"test_id": "t1", "news": {"description": "Moon landing"}, "correct_answer": 3},
                {"test_id": "t2", "news": {"description": "Partial"}, "correct_answer": 1},
            ])
            .to_string(),
        )
        .unwrap();

        let source = TaskSource::SameYear {
            info,
            image_root: root.clone(),
            category: "news".to_string(),
        };
        let tasks: Vec<Task> = source.tasks().unwrap().collect();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].images.len(), 4);
        assert_eq!(tasks[0].images[1].path, root.join("t1").join("2.PNG"));
        assert_eq!(tasks[0].context.as_deref(), Some("Moon landing"));
        assert_eq!(tasks[0].ground_truth, Some(GroundTruth::Number(3)));
    }

    #[test]
    fn test_year_from_key() {
        assert_eq!(year_from_key("test_3/photo_1987_abc.jpg"), Some(1987));
        assert_eq!(year_from_key("test_3/photo_19x7.jpg"), None);
        assert_eq!(year_from_key("test_3/nounderscore.jpg"), None);
        assert_eq!(year_from_key("p_12"), None);
        assert_eq!(year_from_filename("scan-1962-final.png"), Some(1962));
        assert_eq!(year_from_filename("untitled.png"), None);
    }

    #[test]
    fn test_earlier_pair_source() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("subtask1");
        touch(&root.join("test_2").join("r1.jpg"));
        touch(&root.join("test_2").join("r2.jpg"));
        touch(&root.join("test_10").join("r3.jpg"));
        touch(&root.join("test_10").join("r4.jpg"));
        touch(&root.join("test_11").join("r5.jpg"));

        let answers = dir.path().join("ans.json");
        fs::write(
            &answers,
            r#"{"test_10": "2", "test_2": "1", "test_11": "1"}"#,
        )
        .unwrap();
        let names = dir.path().join("test.json");
        fs::write(
            &names,
            serde_json::json!({
                "test_2/a_1990.jpg": "r1.jpg",
                "test_2/b_1950.jpg": "r2.jpg",
                "test_10/a_2001.jpg": "r3.jpg",
                "test_10/b_1999.jpg": "r4.jpg",
                "test_11/a_2001.jpg": "r5.jpg",
            })
            .to_string(),
        )
        .unwrap();

        let source = TaskSource::EarlierPair {
            answers,
            name_map: names,
            image_root: root.clone(),
            category: "sports".to_string(),
        };
        let tasks: Vec<Task> = source.tasks().unwrap().collect();
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["test_2", "test_10"]);

        let years: Vec<Option<i32>> = tasks[0].images.iter().map(|i| i.year).collect();
        assert_eq!(years, vec![Some(1950), Some(1990)]);
        assert_eq!(tasks[0].images[0].path, root.join("test_2").join("r2.jpg"));
        assert_eq!(tasks[1].ground_truth, Some(GroundTruth::Text("2".to_string())));
    }

    #[test]
    fn test_year_directory_source() {
        let dir = TempDir::new().unwrap();
        let years = dir.path().join("years");
        touch(&years.join("10.jpg"));
        touch(&years.join("2.png"));
        touch(&years.join("cover.webp"));
        touch(&years.join("readme.txt"));
        let map = dir.path().join("year_name.json");
        fs::write(
            &map,
            r#"{"2.png": "flood_1931_river.png", "10.jpg": "unknown.jpg"}"#,
        )
        .unwrap();

        let source = TaskSource::YearDirectory {
            dir: years,
            name_map: Some(map),
            category: "disaster".to_string(),
        };
        let tasks: Vec<Task> = source.tasks().unwrap().collect();
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["2.png", "10.jpg", "cover.webp"]);
        assert_eq!(tasks[0].ground_truth, Some(GroundTruth::Number(1931)));
        assert_eq!(tasks[1].ground_truth, None);
        assert_eq!(tasks[2].ground_truth, None);
    }

    #[test]
    fn test_ground_truth_views() {
        assert_eq!(GroundTruth::Number(1950).as_year(), Some(1950));
        assert_eq!(GroundTruth::Text(" 1950 ".into()).as_year(), Some(1950));
        assert_eq!(GroundTruth::Number(2).as_text().as_deref(), Some("2"));
        let seq: GroundTruth = serde_json::from_str(r#"[2, "3", 1]"#).unwrap();
        assert_eq!(seq.as_ordering(), Some(vec![2, 3, 1]));
        assert_eq!(
            GroundTruth::Text("2, 3, 1".into()).as_ordering(),
            Some(vec![2, 3, 1])
        );
        let other: GroundTruth = serde_json::from_str(r#"{"a": 1}"#).unwrap();
        assert_eq!(other.as_text(), None);
    }
}
