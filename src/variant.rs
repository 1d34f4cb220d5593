//! Evaluation variants.
//!
//! Every benchmark script of the suite differs only in how it asks and how it
//! judges. A [`Variant`] captures exactly that: the request profile sent to the
//! endpoint, how a raw answer becomes a [`Prediction`], and the rule deciding
//! correctness. The rest of the pipeline is shared.

use crate::parser::{AnswerParser, Prediction};
use crate::prompt::PromptSpec;
use crate::task::{GroundTruth, IdRange};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Candidate labels of the dynasty classification benchmark.
pub const DYNASTIES: &[&str] = &[
    "唐(Tang Dynasty)",
    "宋(Song Dynasty)",
    "元(Yuan Dynasty)",
    "明(Ming Dynasty)",
    "清(Qing Dynasty)",
];

const PAIR_OPTIONS: &[&str] = &["1", "2"];

/// Strategy describing one evaluation variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    /// One artifact image, shuffled multiple-choice over candidate labels.
    DynastyClassification { candidates: Vec<String> },
    /// Several artifact images, sorted oldest to newest as a JSON answer.
    DynastySort,
    /// One news image, answer is the year it first appeared.
    NewsYear,
    /// Four news images, pick the one from the year of an event.
    NewsSameYear,
    /// Two images, pick the earlier one; optionally keep the reasoning trace.
    EarlierOfPair { capture_reasoning: bool },
}

/// Generation parameters of one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestProfile {
    pub temperature: f32,
    pub json_response: bool,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

/// What a raw answer was understood to mean.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub prediction: Prediction,
    /// Auxiliary reasoning extracted from a structured answer.
    pub reasoning: Option<Value>,
}

impl Variant {
    pub const NAMES: &'static [&'static str] = &[
        "dynasty-classify",
        "dynasty-sort",
        "news-year",
        "news-same-year",
        "earlier-of-pair",
        "earlier-of-pair-cot",
    ];

    /// Classification over the five standard dynasties.
    pub fn dynasty_classification() -> Self {
        Variant::DynastyClassification {
            candidates: DYNASTIES.iter().map(|d| d.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Variant::DynastyClassification { .. } => "dynasty-classify",
            Variant::DynastySort => "dynasty-sort",
            Variant::NewsYear => "news-year",
            Variant::NewsSameYear => "news-same-year",
            Variant::EarlierOfPair {
                capture_reasoning: false,
            } => "earlier-of-pair",
            Variant::EarlierOfPair {
                capture_reasoning: true,
            } => "earlier-of-pair-cot",
        }
    }

    pub fn profile(&self) -> RequestProfile {
        let (temperature, json_response, max_tokens, secs) = match self {
            Variant::DynastyClassification { .. } => (0.1, false, None, 60),
            Variant::DynastySort => (0.1, true, None, 180),
            Variant::NewsYear => (0.2, false, None, 60),
            Variant::NewsSameYear => (0.0, false, None, 120),
            Variant::EarlierOfPair { capture_reasoning } => {
                let max = if *capture_reasoning { 30_000 } else { 2_048 };
                (0.0, true, Some(max), 120)
            }
        };
        RequestProfile {
            temperature,
            json_response,
            max_tokens,
            timeout: Duration::from_secs(secs),
        }
    }

    /// ID range processed when none is given explicitly.
    ///
    /// The sorting benchmark shares its file with other item types.
    pub fn default_id_range(&self) -> Option<IdRange> {
        match self {
            Variant::DynastySort => Some(IdRange::new(1, 1000)),
            _ => None,
        }
    }

    /// Whether predictions are years, so an absolute error is meaningful.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Variant::NewsYear)
    }

    /// Turn a raw response into a prediction. Never fails.
    pub fn interpret(&self, raw: &str, spec: &PromptSpec, parser: &AnswerParser) -> Interpretation {
        let mut reasoning = None;
        let prediction: Prediction = match self {
            Variant::DynastyClassification { candidates } => {
                let by_letter = spec.answer_key.as_ref().and_then(|key| {
                    let letters = key.letters();
                    let letter = parser.extract_choice(raw, &letters)?;
                    key.resolve(&letter).map(String::from)
                });
                by_letter
                    .or_else(|| mentioned_candidate(raw, candidates))
                    .map(Prediction::Label)
                    .into()
            }
            Variant::DynastySort => parser
                .extract_json_text(raw, "ans")
                .and_then(|ans| parser.extract_ordering(&ans))
                .into(),
            Variant::NewsYear => parser.extract_year(raw).into(),
            Variant::NewsSameYear => {
                let options: Vec<String> =
                    (1..=spec.presentation.len()).map(|i| i.to_string()).collect();
                let options: Vec<&str> = options.iter().map(String::as_str).collect();
                parser
                    .extract_choice(raw, &options)
                    .map(Prediction::Choice)
                    .into()
            }
            Variant::EarlierOfPair { capture_reasoning } => {
                if *capture_reasoning {
                    reasoning = parser.json_object(raw).and_then(|mut map| {
                        map.remove("answer");
                        (!map.is_empty()).then_some(Value::Object(map))
                    });
                }
                parser
                    .extract_json_text(raw, "answer")
                    .and_then(|answer| parser.extract_choice(&answer, PAIR_OPTIONS))
                    .map(Prediction::Choice)
                    .into()
            }
        };
        Interpretation {
            prediction,
            reasoning,
        }
    }

    /// Correctness of a prediction, or `None` without a usable ground truth.
    ///
    /// An unparsed prediction is judged incorrect.
    pub fn judge(&self, prediction: &Prediction, raw: &str, truth: Option<&GroundTruth>) -> Option<bool> {
        let truth = truth?;
        match self {
            Variant::DynastyClassification { .. } => {
                let expected = truth.as_text()?;
                Some(matches!(prediction, Prediction::Label(label) if *label == expected))
            }
            Variant::DynastySort => {
                let expected = truth.as_ordering()?;
                Some(matches!(prediction, Prediction::Ordering(order) if *order == expected))
            }
            Variant::NewsYear => {
                let expected = truth.as_year()?;
                Some(prediction.as_year() == Some(expected))
            }
            // Lenient: the ground-truth digit anywhere in the raw text counts.
            Variant::NewsSameYear => {
                let expected = truth.as_text()?;
                Some(!expected.is_empty() && raw.contains(&expected))
            }
            Variant::EarlierOfPair { .. } => {
                let expected = truth.as_text()?;
                Some(matches!(prediction, Prediction::Choice(choice) if *choice == expected))
            }
        }
    }

    /// Absolute year error, for numeric variants with a parsed prediction.
    pub fn absolute_error(&self, prediction: &Prediction, truth: Option<&GroundTruth>) -> Option<u32> {
        if !self.is_numeric() {
            return None;
        }
        let predicted = prediction.as_year()?;
        let expected = truth?.as_year()?;
        Some(predicted.abs_diff(expected))
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dynasty-classify" => Ok(Variant::dynasty_classification()),
            "dynasty-sort" => Ok(Variant::DynastySort),
            "news-year" => Ok(Variant::NewsYear),
            "news-same-year" => Ok(Variant::NewsSameYear),
            "earlier-of-pair" => Ok(Variant::EarlierOfPair {
                capture_reasoning: false,
            }),
            "earlier-of-pair-cot" => Ok(Variant::EarlierOfPair {
                capture_reasoning: true,
            }),
            other => Err(format!(
                "unknown variant '{}', expected one of: {}",
                other,
                Self::NAMES.join(", ")
            )),
        }
    }
}

/// Candidate named earliest in the text, by full label or English dynasty name.
///
/// All positions are taken in the lowercased text: lowercasing may change
/// byte lengths, so offsets into `raw` are not comparable with them.
fn mentioned_candidate(raw: &str, candidates: &[String]) -> Option<String> {
    let lowered = raw.to_lowercase();
    candidates
        .iter()
        .filter_map(|candidate| {
            let by_label = lowered.find(&candidate.to_lowercase());
            let by_name = english_name(candidate)
                .and_then(|name| lowered.find(&name.to_lowercase()));
            let position = match (by_label, by_name) {
                (Some(a), Some(b)) => a.min(b),
                (a, b) => a.or(b)?,
            };
            Some((position, candidate))
        })
        .min_by_key(|(position, _)| *position)
        .map(|(_, candidate)| candidate.clone())
}

/// `"Tang Dynasty"` out of `"唐(Tang Dynasty)"`.
fn english_name(label: &str) -> Option<&str> {
    let start = label.find('(')? + 1;
    let end = label.rfind(')')?;
    label.get(start..end).filter(|name| !name.is_empty())
}
