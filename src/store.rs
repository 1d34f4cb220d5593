//! Append-only result store.
//!
//! The store is the only resume state there is: on open it is scanned once for
//! the IDs already answered, and every new record is written and flushed
//! before the next task starts. Two layouts are supported:
//!
//! - JSON Lines, one record per line, appended in place (the default).
//! - A single JSON array, rewritten atomically every few records.

use crate::error::{BenchError, Result};
use crate::parser::Prediction;
use crate::prompt::AnswerKeyMap;
use crate::task::{GroundTruth, TaskId, TaskImage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Records buffered between two rewrites of a JSON array store.
pub const DEFAULT_CHECKPOINT_EVERY: usize = 5;

/// One answered task. Never modified once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    #[serde(alias = "test_id")]
    pub id: TaskId,
    #[serde(default)]
    pub variant: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub raw_response: String,
    #[serde(default)]
    pub prediction: Prediction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<GroundTruth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    /// Letter→candidate map the prompt was built with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_key: Option<AnswerKeyMap>,
    /// Images in the order they were shown.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presentation: Vec<TaskImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Value>,
}

/// On-disk layout of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    /// JSON Lines, flushed per record.
    Jsonl,
    /// JSON array, rewritten every `checkpoint_every` records and on finish.
    JsonArray { checkpoint_every: usize },
}

impl StoreFormat {
    /// Determine format from file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => StoreFormat::JsonArray {
                checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            },
            _ => StoreFormat::Jsonl,
        }
    }
}

enum Sink {
    Lines(File),
    Array { records: Vec<Value>, pending: usize },
}

/// An open result store.
pub struct ResultStore {
    path: PathBuf,
    format: StoreFormat,
    processed: HashSet<TaskId>,
    sink: Sink,
}

impl ResultStore {
    /// Open (or create) the store and scan it for processed IDs.
    pub fn open(path: &Path, format: StoreFormat) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| BenchError::io(parent, e))?;
            }
        }

        let values = read_values(path)?;
        let processed: HashSet<TaskId> = values.iter().filter_map(record_id).collect();

        let sink = match format {
            StoreFormat::Jsonl => {
                let torn = ends_without_newline(path)?;
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| BenchError::io(path, e))?;
                if torn {
                    warn!(path = %path.display(), "store ends with a partial line, starting a new one");
                    file.write_all(b"\n").map_err(|e| BenchError::io(path, e))?;
                    file.flush().map_err(|e| BenchError::io(path, e))?;
                }
                Sink::Lines(file)
            }
            StoreFormat::JsonArray { .. } => Sink::Array {
                records: values,
                pending: 0,
            },
        };

        debug!(path = %path.display(), processed = processed.len(), "opened result store");

        Ok(Self {
            path: path.to_path_buf(),
            format,
            processed,
            sink,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> StoreFormat {
        self.format
    }

    /// Whether a record for `id` is already stored.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.processed.contains(id)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Persist one record. The ID joins the processed set only once the
    /// record is durable (JSONL) or buffered for the next checkpoint (array).
    pub fn append(&mut self, record: &ResultRecord) -> Result<()> {
        match &mut self.sink {
            Sink::Lines(file) => {
                let mut line = serde_json::to_string(record)?;
                line.push('\n');
                file.write_all(line.as_bytes())
                    .map_err(|e| BenchError::io(&self.path, e))?;
                file.flush().map_err(|e| BenchError::io(&self.path, e))?;
            }
            Sink::Array { records, pending } => {
                records.push(serde_json::to_value(record)?);
                *pending += 1;
                let every = match self.format {
                    StoreFormat::JsonArray { checkpoint_every } => checkpoint_every.max(1),
                    StoreFormat::Jsonl => 1,
                };
                if *pending >= every {
                    write_array(&self.path, records)?;
                    *pending = 0;
                }
            }
        }
        self.processed.insert(record.id.clone());
        Ok(())
    }

    /// Write out anything still buffered.
    pub fn finish(&mut self) -> Result<()> {
        match &mut self.sink {
            Sink::Lines(file) => file.flush().map_err(|e| BenchError::io(&self.path, e)),
            Sink::Array { records, pending } => {
                if *pending > 0 || !self.path.exists() {
                    write_array(&self.path, records)?;
                    *pending = 0;
                }
                Ok(())
            }
        }
    }
}

/// IDs recorded in the store at `path`. A missing file is an empty store.
pub fn scan_processed_ids(path: &Path) -> Result<HashSet<TaskId>> {
    Ok(read_values(path)?.iter().filter_map(record_id).collect())
}

/// Every record of the store at `path` that deserializes.
pub fn load_records(path: &Path) -> Result<Vec<ResultRecord>> {
    if !path.exists() {
        return Err(BenchError::SourceNotFound(path.to_path_buf()));
    }
    Ok(read_values(path)?
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable record");
                None
            }
        })
        .collect())
}

fn record_id(value: &Value) -> Option<TaskId> {
    value
        .get("id")
        .or_else(|| value.get("test_id"))
        .and_then(TaskId::from_value)
}

/// Raw records of a store in any of the accepted shapes: a JSON array, an
/// object with a `results` array, or JSON Lines. Unparsable lines are skipped.
fn read_values(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
    let trimmed = content.trim_start();

    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Array(items)) => return Ok(items),
            Ok(Value::Object(mut map)) => {
                if let Some(Value::Array(items)) = map.remove("results") {
                    return Ok(items);
                }
                // A single-line JSONL store.
                return Ok(vec![Value::Object(map)]);
            }
            _ => {}
        }
    }

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(Value::is_object)
        .collect())
}

fn ends_without_newline(path: &Path) -> Result<bool> {
    let Ok(mut file) = File::open(path) else {
        return Ok(false);
    };
    let len = file.metadata().map_err(|e| BenchError::io(path, e))?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))
        .map_err(|e| BenchError::io(path, e))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)
        .map_err(|e| BenchError::io(path, e))?;
    Ok(last[0] != b'\n')
}

/// Replace the array file atomically: write a sibling temp file, then rename.
fn write_array(path: &Path, records: &[Value]) -> Result<()> {
    let data = serde_json::to_string_pretty(records)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp).map_err(|e| BenchError::io(&tmp, e))?;
    file.write_all(data.as_bytes())
        .map_err(|e| BenchError::io(&tmp, e))?;
    file.sync_all().map_err(|e| BenchError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| BenchError::io(path, e))?;
    Ok(())
}
