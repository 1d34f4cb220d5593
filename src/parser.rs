//! Tolerant extraction of predictions from raw model output.
//!
//! Models wrap JSON in prose or code fences, answer "B. 宋(Song Dynasty)"
//! instead of "B", or mention unrelated numbers next to a year. Every
//! extractor here accepts that mess and never fails: anything it cannot read
//! becomes [`Prediction::Unparsed`], which scoring counts separately from a
//! wrong answer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static FOUR_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").unwrap());
static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static TOKENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+|[A-Za-z]+").unwrap());

/// Inclusive range of years accepted by [`AnswerParser::extract_year`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearBounds {
    pub min_year: i32,
    pub max_year: i32,
}

impl YearBounds {
    pub fn new(min_year: i32, max_year: i32) -> Self {
        Self { min_year, max_year }
    }

    pub fn contains(&self, year: i32) -> bool {
        self.min_year <= year && year <= self.max_year
    }
}

impl Default for YearBounds {
    fn default() -> Self {
        Self::new(1900, 2025)
    }
}

/// Normalized prediction derived from a raw response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Prediction {
    /// A year inside the configured bounds.
    Year(i32),
    /// An option identifier such as `"2"`.
    Choice(String),
    /// A candidate label resolved through an answer key.
    Label(String),
    /// A permutation of 1-based image numbers.
    Ordering(Vec<u32>),
    /// Nothing usable was found.
    #[default]
    Unparsed,
}

impl Prediction {
    pub fn is_parsed(&self) -> bool {
        !matches!(self, Prediction::Unparsed)
    }

    pub fn as_year(&self) -> Option<i32> {
        match self {
            Prediction::Year(y) => Some(*y),
            _ => None,
        }
    }
}

impl<T: Into<Prediction>> From<Option<T>> for Prediction {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Prediction::Unparsed)
    }
}

impl From<i32> for Prediction {
    fn from(year: i32) -> Self {
        Prediction::Year(year)
    }
}

impl From<Vec<u32>> for Prediction {
    fn from(order: Vec<u32>) -> Self {
        Prediction::Ordering(order)
    }
}

/// Extracts structured answers from raw text.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnswerParser {
    bounds: YearBounds,
}

impl AnswerParser {
    pub fn new(bounds: YearBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> YearBounds {
        self.bounds
    }

    /// First 4-digit run inside the year bounds. Out-of-range runs are skipped.
    pub fn extract_year(&self, raw: &str) -> Option<i32> {
        FOUR_DIGITS
            .find_iter(raw)
            .filter_map(|m| m.as_str().parse::<i32>().ok())
            .find(|year| self.bounds.contains(*year))
    }

    /// First token of the text that equals one of `options`.
    ///
    /// Tokens are runs of digits or of ASCII letters, so `"2019"` never
    /// matches option `"1"` and `"B."` matches option `"B"`.
    pub fn extract_choice(&self, raw: &str, options: &[&str]) -> Option<String> {
        TOKENS
            .find_iter(raw)
            .map(|m| m.as_str())
            .find(|token| options.contains(token))
            .map(String::from)
    }

    /// Ordering of image numbers, e.g. `"2, 3, 1"` -> `[2, 3, 1]`.
    pub fn extract_ordering(&self, raw: &str) -> Option<Vec<u32>> {
        let order: Vec<u32> = DIGITS
            .find_iter(raw)
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        (!order.is_empty()).then_some(order)
    }

    /// Parse the response as a JSON object, tolerating fences and prose.
    pub fn json_object(&self, raw: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
        let parse = |s: &str| match serde_json::from_str::<serde_json::Value>(s) {
            Ok(serde_json::Value::Object(map)) => Some(map),
            _ => None,
        };
        parse(raw.trim()).or_else(|| parse(&extract_json_block(raw)))
    }

    /// Value of `key` in a JSON answer.
    ///
    /// Strict parse first; otherwise a regex scan for `"key": <string or number>`
    /// anywhere in the text.
    pub fn extract_json_field(&self, raw: &str, key: &str) -> Option<serde_json::Value> {
        if let Some(mut map) = self.json_object(raw) {
            if let Some(value) = map.remove(key) {
                return Some(value);
            }
        }

        let pattern = format!(
            r#""{}"\s*:\s*("(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?)"#,
            regex::escape(key)
        );
        let re = Regex::new(&pattern).ok()?;
        let captured = re.captures(raw)?.get(1)?.as_str();
        serde_json::from_str(captured).ok()
    }

    /// [`extract_json_field`](Self::extract_json_field) rendered as text.
    pub fn extract_json_text(&self, raw: &str, key: &str) -> Option<String> {
        match self.extract_json_field(raw, key)? {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Extract a JSON block from a possibly fenced or prose-wrapped response.
pub fn extract_json_block(response: &str) -> String {
    let response = response.trim();

    // Check for ```json code block
    if response.starts_with("```json") {
        if let Some(end) = response.rfind("```") {
            let start = "```json".len();
            if end > start {
                return response[start..end].trim().to_string();
            }
        }
    }

    // Check for ``` code block
    if response.starts_with("```") {
        if let Some(end) = response.rfind("```") {
            let start = response.find('\n').map(|n| n + 1).unwrap_or(3);
            if end > start {
                return response[start..end].trim().to_string();
            }
        }
    }

    if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            if end > start {
                return response[start..=end].to_string();
            }
        }
    }

    response.to_string()
}
