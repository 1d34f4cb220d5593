//! Prompt construction.
//!
//! This is the only place that decides in which order options and images are
//! shown to the model. Multiple-choice candidates are shuffled per task so a
//! model cannot score by remembering letter positions; the resulting
//! letter→candidate map travels with the result so correctness can be
//! checked afterwards. Image order for pair comparisons is chosen from the
//! ground truth so both orders are exercised.
//!
//! The builder never touches the network or the file system.

use crate::error::{BenchError, Result};
use crate::llm::Prompts;
use crate::task::Task;
use crate::variant::Variant;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Presented letter → candidate label.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerKeyMap(BTreeMap<String, String>);

impl AnswerKeyMap {
    /// Assign letters `A`, `B`, ... to `candidates` in the given order.
    pub fn from_order<S: AsRef<str>>(candidates: &[S]) -> Self {
        Self(
            candidates
                .iter()
                .enumerate()
                .map(|(i, c)| (option_letter(i), c.as_ref().to_string()))
                .collect(),
        )
    }

    /// Candidate behind a presented letter.
    pub fn resolve(&self, letter: &str) -> Option<&str> {
        self.0.get(letter).map(String::as_str)
    }

    /// Letter under which `label` was presented.
    pub fn letter_for(&self, label: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, candidate)| candidate.as_str() == label)
            .map(|(letter, _)| letter.as_str())
    }

    pub fn letters(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(l, c)| (l.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `A. label` lines in letter order.
    pub fn render(&self) -> String {
        self.iter()
            .map(|(letter, candidate)| format!("{}. {}", letter, candidate))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn option_letter(index: usize) -> String {
    char::from(b'A' + (index % 26) as u8).to_string()
}

/// One ordered piece of the user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// Index into the task's image list.
    Image(usize),
}

/// Everything needed to issue one request for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSpec {
    pub system: Option<String>,
    pub segments: Vec<Segment>,
    pub answer_key: Option<AnswerKeyMap>,
    /// Task image indices in the order they are shown.
    pub presentation: Vec<usize>,
}

impl PromptSpec {
    /// All text segments joined, for logging and tests.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text(t) => Some(t.as_str()),
                Segment::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Builds prompts; owns the randomness used for option shuffling.
pub struct PromptBuilder {
    rng: StdRng,
}

impl PromptBuilder {
    /// Unseeded: a different shuffle every run.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic shuffles, for reproducible test runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(s) => Self::seeded(s),
            None => Self::new(),
        }
    }

    /// Shuffle `candidates` uniformly and assign letters in presented order.
    pub fn shuffled_options<S: AsRef<str>>(&mut self, candidates: &[S]) -> AnswerKeyMap {
        let mut order: Vec<&str> = candidates.iter().map(|c| c.as_ref()).collect();
        order.shuffle(&mut self.rng);
        AnswerKeyMap::from_order(&order)
    }

    /// Build the prompt of `task` for `variant`.
    pub fn build(&mut self, variant: &Variant, task: &Task) -> Result<PromptSpec> {
        let count = task.images.len();
        if count == 0 {
            return Err(invalid(task, "task has no images"));
        }

        match variant {
            Variant::DynastyClassification { candidates } => {
                let key = self.shuffled_options(candidates);
                let text = Prompts::dynasty_classification().replace("{options}", &key.render());
                Ok(PromptSpec {
                    system: None,
                    segments: vec![Segment::Text(text), Segment::Image(0)],
                    answer_key: Some(key),
                    presentation: vec![0],
                })
            }
            Variant::DynastySort => {
                let base = match &task.prompt {
                    Some(prompt) if !prompt.trim().is_empty() => prompt.clone(),
                    _ => Prompts::sort_default().replace("{count}", &count.to_string()),
                };
                let text = format!("{}\n\n{}", base, Prompts::sort_requirement());
                let presentation: Vec<usize> = (0..count).collect();
                let mut segments = vec![Segment::Text(text)];
                segments.extend(presentation.iter().map(|&i| Segment::Image(i)));
                Ok(PromptSpec {
                    system: Some(Prompts::system_historian_sort().to_string()),
                    segments,
                    answer_key: None,
                    presentation,
                })
            }
            Variant::NewsYear => Ok(PromptSpec {
                system: None,
                segments: vec![
                    Segment::Text(Prompts::news_year().to_string()),
                    Segment::Image(0),
                ],
                answer_key: None,
                presentation: vec![0],
            }),
            Variant::NewsSameYear => {
                let presentation: Vec<usize> = (0..count).collect();
                let mut segments = Vec::with_capacity(count * 2 + 1);
                for (slot, &image) in presentation.iter().enumerate() {
                    segments.push(Segment::Text(format!("Image {}:", slot + 1)));
                    segments.push(Segment::Image(image));
                }
                let description = task.context.as_deref().unwrap_or("N/A");
                segments.push(Segment::Text(
                    Prompts::news_same_year().replace("{description}", description),
                ));
                Ok(PromptSpec {
                    system: None,
                    segments,
                    answer_key: None,
                    presentation,
                })
            }
            Variant::EarlierOfPair { capture_reasoning } => {
                if count != 2 {
                    return Err(invalid(task, format!("expected 2 images, found {}", count)));
                }
                let presentation = pair_presentation(task);
                let (system, user) = if *capture_reasoning {
                    (Prompts::system_pair_analyst_cot(), Prompts::pair_comparison_cot())
                } else {
                    (Prompts::system_pair_analyst(), Prompts::pair_comparison())
                };
                let mut segments = vec![Segment::Text(user.to_string())];
                segments.extend(presentation.iter().map(|&i| Segment::Image(i)));
                Ok(PromptSpec {
                    system: Some(system.to_string()),
                    segments,
                    answer_key: None,
                    presentation,
                })
            }
        }
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Presentation order for a chronologically stored pair.
///
/// Ground truth `"1"` means the earlier image is shown first; anything else
/// shows the later image first.
pub fn pair_presentation(task: &Task) -> Vec<usize> {
    let earlier_first = task
        .ground_truth
        .as_ref()
        .and_then(|g| g.as_text())
        .map(|answer| answer == "1")
        .unwrap_or(true);
    if earlier_first { vec![0, 1] } else { vec![1, 0] }
}

fn invalid(task: &Task, reason: impl Into<String>) -> BenchError {
    BenchError::InvalidTask {
        id: task.id.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{GroundTruth, TaskImage};
    use crate::variant::DYNASTIES;

    fn task_with_images(n: usize) -> Task {
        let images = (0..n).map(|i| TaskImage::new(format!("/img/{}.jpg", i))).collect();
        Task::new("t1", "cat", images)
    }

    #[test]
    fn test_classification_prompt_lists_every_candidate() {
        let mut builder = PromptBuilder::seeded(7);
        let variant = Variant::dynasty_classification();
        let spec = builder.build(&variant, &task_with_images(1)).unwrap();

        let key = spec.answer_key.clone().unwrap();
        assert_eq!(key.letters(), vec!["A", "B", "C", "D", "E"]);
        let text = spec.text();
        for (letter, label) in key.iter() {
            assert!(text.contains(&format!("{}. {}", letter, label)));
        }
        let mut labels: Vec<&str> = key.iter().map(|(_, l)| l).collect();
        labels.sort();
        let mut expected: Vec<&str> = DYNASTIES.to_vec();
        expected.sort();
        assert_eq!(labels, expected);
        assert_eq!(spec.segments.last(), Some(&Segment::Image(0)));
    }

    #[test]
    fn test_seeded_builders_repeat_shuffles() {
        let mut a = PromptBuilder::seeded(42);
        let mut b = PromptBuilder::seeded(42);
        for _ in 0..10 {
            assert_eq!(a.shuffled_options(DYNASTIES), b.shuffled_options(DYNASTIES));
        }
    }

    #[test]
    fn test_answer_key_fairness() {
        let mut builder = PromptBuilder::seeded(2024);
        let n = 5000;
        let mut counts = [[0usize; 5]; 5];
        for _ in 0..n {
            let key = builder.shuffled_options(DYNASTIES);
            for (slot, (_, label)) in key.iter().enumerate() {
                let candidate = DYNASTIES.iter().position(|d| *d == label).unwrap();
                counts[candidate][slot] += 1;
            }
        }
        let expected = n / 5;
        for row in counts {
            for count in row {
                assert!(
                    (count as i64 - expected as i64).abs() < 200,
                    "slot frequency {} too far from {}",
                    count,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_pair_presentation_follows_ground_truth() {
        let task = task_with_images(2).with_ground_truth(GroundTruth::Text("1".into()));
        assert_eq!(pair_presentation(&task), vec![0, 1]);

        let task = task_with_images(2).with_ground_truth(GroundTruth::Number(2));
        assert_eq!(pair_presentation(&task), vec![1, 0]);

        let mut builder = PromptBuilder::seeded(1);
        let spec = builder
            .build(&Variant::EarlierOfPair { capture_reasoning: false }, &task)
            .unwrap();
        assert_eq!(
            spec.segments[1..].to_vec(),
            vec![Segment::Image(1), Segment::Image(0)]
        );
        assert!(spec.system.unwrap().contains("'answer'"));
    }

    #[test]
    fn test_pair_requires_two_images() {
        let mut builder = PromptBuilder::seeded(1);
        let err = builder
            .build(&Variant::EarlierOfPair { capture_reasoning: true }, &task_with_images(3))
            .unwrap_err();
        assert!(err.to_string().contains("expected 2 images"));
    }

    #[test]
    fn test_same_year_numbers_images_in_presentation_order() {
        let task = task_with_images(4).with_context("Olympics opening ceremony");
        let mut builder = PromptBuilder::seeded(1);
        let spec = builder.build(&Variant::NewsSameYear, &task).unwrap();
        assert_eq!(spec.segments.len(), 9);
        assert_eq!(spec.segments[0], Segment::Text("Image 1:".into()));
        assert_eq!(spec.segments[7], Segment::Image(3));
        assert!(spec.text().contains("Event Description: Olympics opening ceremony"));
    }

    #[test]
    fn test_sort_prompt_uses_record_prompt() {
        let task = task_with_images(3).with_prompt("Sort these vases.");
        let mut builder = PromptBuilder::seeded(1);
        let spec = builder.build(&Variant::DynastySort, &task).unwrap();
        assert!(spec.text().starts_with("Sort these vases.\n\nRequirement:"));
        assert_eq!(spec.presentation, vec![0, 1, 2]);
        assert!(spec.system.is_some());

        let spec = builder.build(&Variant::DynastySort, &task_with_images(3)).unwrap();
        assert!(spec.text().contains("numbered 1 to 3"));
    }

    #[test]
    fn test_task_without_images_is_rejected() {
        let mut builder = PromptBuilder::seeded(1);
        assert!(builder.build(&Variant::NewsYear, &task_with_images(0)).is_err());
    }
}
