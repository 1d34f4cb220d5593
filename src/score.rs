//! Score aggregation over result stores.
//!
//! Correctness is re-derived from each record with its variant's judging rule,
//! so a ground-truth side file can be applied to stores written without one.
//! Categories are summed count by count; the overall figure is not an average
//! of per-category rates.

use crate::error::{BenchError, Result};
use crate::store::{ResultRecord, load_records};
use crate::task::{GroundTruth, TaskId, category_from_path};
use crate::variant::Variant;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Counts for one category.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryScore {
    pub category: String,
    /// Every scored record. Unparsed and ungraded ones count as incorrect.
    pub total: usize,
    pub correct: usize,
    pub unparsed: usize,
    /// Records without any ground truth to judge against. Part of `total`.
    pub ungraded: usize,
    pub abs_error_sum: u64,
    /// Records contributing to `abs_error_sum`.
    pub error_count: usize,
}

impl CategoryScore {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Self::default()
        }
    }

    /// Percentage of correct answers.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64 * 100.0
        }
    }

    /// Mean absolute error in years, when any error term exists.
    pub fn mean_absolute_error(&self) -> Option<f64> {
        (self.error_count > 0).then(|| self.abs_error_sum as f64 / self.error_count as f64)
    }

    fn merge(&mut self, other: &CategoryScore) {
        self.total += other.total;
        self.correct += other.correct;
        self.unparsed += other.unparsed;
        self.ungraded += other.ungraded;
        self.abs_error_sum += other.abs_error_sum;
        self.error_count += other.error_count;
    }
}

/// Per-category scores plus their sum.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoreReport {
    pub categories: BTreeMap<String, CategoryScore>,
    pub overall: CategoryScore,
}

impl ScoreReport {
    pub fn print_summary(&self) {
        println!("\n================ Score Report ================");
        println!(
            "{:<20} {:>7} {:>7} {:>9} {:>9} {:>8}",
            "Category", "Total", "Correct", "Accuracy", "Unparsed", "MAE"
        );
        println!("----------------------------------------------");
        for score in self.categories.values() {
            print_row(score);
        }
        println!("----------------------------------------------");
        print_row(&self.overall);
        println!("==============================================\n");
    }
}

fn print_row(score: &CategoryScore) {
    let mae = score
        .mean_absolute_error()
        .map(|m| format!("{:.2}", m))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<20} {:>7} {:>7} {:>8.2}% {:>9} {:>8}",
        score.category,
        score.total,
        score.correct,
        score.accuracy(),
        score.unparsed,
        mae
    );
}

/// `task id → answer` map read from a side file.
pub type GroundTruthMap = HashMap<TaskId, GroundTruth>;

/// Accumulates records into a [`ScoreReport`].
///
/// Task IDs are only unique within one store, so a side-file ground truth is
/// handed in per store rather than held for the whole aggregation.
#[derive(Debug, Default)]
pub struct ScoreAggregator {
    categories: BTreeMap<String, CategoryScore>,
}

impl ScoreAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score every record of one store.
    ///
    /// Records without a category fall under the store's file stem.
    /// `ground_truth` takes precedence over the truth stored in records.
    pub fn score_store(&mut self, path: &Path, ground_truth: Option<&GroundTruthMap>) -> Result<usize> {
        let records = load_records(path)?;
        let fallback = category_from_path(path);
        for record in &records {
            self.add_record(record, &fallback, ground_truth);
        }
        info!(path = %path.display(), records = records.len(), "scored store");
        Ok(records.len())
    }

    pub fn add_record(
        &mut self,
        record: &ResultRecord,
        fallback_category: &str,
        ground_truth: Option<&GroundTruthMap>,
    ) {
        let truth = ground_truth
            .and_then(|map| map.get(&record.id))
            .or(record.ground_truth.as_ref());
        let variant = record.variant.parse::<Variant>().ok();

        let verdict = variant
            .as_ref()
            .and_then(|v| v.judge(&record.prediction, &record.raw_response, truth))
            .or(record.is_correct);
        let error = match &variant {
            Some(v) => v.absolute_error(&record.prediction, truth),
            None => match (record.prediction.as_year(), truth.and_then(GroundTruth::as_year)) {
                (Some(predicted), Some(expected)) => Some(predicted.abs_diff(expected)),
                _ => None,
            },
        };

        let category = if record.category.is_empty() {
            fallback_category
        } else {
            record.category.as_str()
        };
        let score = self
            .categories
            .entry(category.to_string())
            .or_insert_with(|| CategoryScore::new(category));

        score.total += 1;
        if !record.prediction.is_parsed() {
            score.unparsed += 1;
        }
        match verdict {
            Some(true) => score.correct += 1,
            Some(false) => {}
            None => {
                debug!(task_id = %record.id, "no ground truth, counted as incorrect");
                score.ungraded += 1;
            }
        }
        if let Some(error) = error {
            score.abs_error_sum += u64::from(error);
            score.error_count += 1;
        }
    }

    pub fn report(&self) -> ScoreReport {
        let mut overall = CategoryScore::new("overall");
        for score in self.categories.values() {
            overall.merge(score);
        }
        ScoreReport {
            categories: self.categories.clone(),
            overall,
        }
    }
}

/// Load a `task id → answer` side file.
pub fn load_ground_truth(path: &Path) -> Result<GroundTruthMap> {
    if !path.exists() {
        return Err(BenchError::SourceNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
    let map: HashMap<String, GroundTruth> =
        serde_json::from_str(&content).map_err(|e| BenchError::InvalidSource {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(map
        .into_iter()
        .map(|(id, truth)| (TaskId::new(id.trim()), truth))
        .collect())
}
