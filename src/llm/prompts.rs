//! Prompt texts for every evaluation variant.
//!
//! Placeholders in `{braces}` are substituted by the prompt builder.

/// Collection of prompts used by the evaluation variants.
pub struct Prompts;

impl Prompts {
    /// Single-image dynasty classification. `{options}` holds one `L. label` per line.
    pub fn dynasty_classification() -> &'static str {
        r#"Which historical period does the style of the item in this image belong to, among the following options?
Options:
{options}

Please output the letter and the dynasty name only (e.g., 'A. 唐(Tang Dynasty)')."#
    }

    /// System prompt for chronological sorting of artifacts.
    pub fn system_historian_sort() -> &'static str {
        "You are a professional historian and artifact expert. \
Analyze the provided images and sort them in chronological order from oldest to newest. \
CRITICAL: You must output ONLY a valid JSON object. Do not include any conversational text or thinking process outside the JSON. \
If you need to think, put your reasoning inside a 'thought' key within the JSON."
    }

    /// Requirement appended to the benchmark's own sort prompt.
    pub fn sort_requirement() -> &'static str {
        "Requirement: Sort the images by dynasty. \
Output strictly in this JSON format: {\"ans\": \"the_sorted_indices_here\"}. \
Example: {\"ans\": \"2, 3, 1, 4, 5\"}"
    }

    /// Fallback sort prompt when a record ships none.
    pub fn sort_default() -> &'static str {
        "The images are numbered 1 to {count} in the order they are provided. \
Sort them from the oldest to the newest."
    }

    /// Single-image year of first appearance.
    pub fn news_year() -> &'static str {
        "In which year did this image first appear? Respond only with the 4-digit year (e.g., 2000) and nothing else."
    }

    /// Four-image same-year question. `{description}` is the event text.
    pub fn news_same_year() -> &'static str {
        "\n The images are numbered '1' '2' '3' '4' in the order they were input(e.g. '1' represents the first input image, '4' represents the last input image)\
\nEvent Description: {description}\n\
Based on the visual evidence, which image was taken in the same year as the event?\
Respond ONLY with the digit.(e.g. 1)"
    }

    /// System prompt for the two-image comparison.
    pub fn system_pair_analyst() -> &'static str {
        "You are an expert in historical visual analysis. \
Analyze the provided images for chronological clues such as technology, fashion, architecture, and photo quality. \
You must output a single JSON object containing: \
1. 'thinking': A detailed step-by-step analysis of which image is older. \
2. 'answer': Strictly the number '1' (if Image 1 is earlier) or '2' (if Image 2 is earlier)."
    }

    /// System prompt for the two-image comparison with a structured reasoning trace.
    pub fn system_pair_analyst_cot() -> &'static str {
        "You are an expert in historical visual analysis and chronological reasoning. \
Your goal is to determine the temporal order of images by identifying intrinsic time anchors.\n\n\
You must output a single JSON object with the following keys:\n\
1. 'time_anchors': Identified entities for each image.\n\
2. 'historical_context': Earliest appearance dates for these entities.\n\
3. 'reasoning_path': Step-by-step logical deduction.\n\
4. 'bias_mitigation': Self-correction to exclude color bias.\n\
5. 'answer': Strictly the string '1' or '2'."
    }

    /// User prompt for the two-image comparison with explicit reasoning steps.
    pub fn pair_comparison_cot() -> &'static str {
        "Analyze these two images and determine which one appeared EARLIER in history.\n\
Follow these steps strictly:\n\
Step 1: Identify visual entities.\n\
Step 2: List historical appearance times.\n\
Step 3: Detail thinking process.\n\
Step 4: Perform Bias-Check.\n\n\
Output everything in a structured JSON format."
    }

    /// User prompt for the two-image comparison.
    pub fn pair_comparison() -> &'static str {
        "Compare these two images and determine which one appeared EARLIER in history.\n\
Image 1 is the first image provided.\n\
Image 2 is the second image provided.\n\
Output your analysis and final choice in JSON format."
    }
}
