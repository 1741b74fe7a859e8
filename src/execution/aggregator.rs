//! Fan-in aggregation of parent outputs

use crate::core::{InputsMode, StepOutput};
use crate::handlers::{HandlerError, Summarizer};
use serde_json::{Map, Value};
use tracing::debug;

/// Combine parent outputs into a single input string
///
/// `parents` must be in edge declaration order; `None` marks a parent that
/// produced nothing and is treated as empty text.
pub async fn aggregate(
    mode: InputsMode,
    parents: &[Option<&StepOutput>],
    summarizer: &dyn Summarizer,
    summary_max_chars: usize,
) -> Result<String, HandlerError> {
    let texts: Vec<&str> = parents
        .iter()
        .filter_map(|p| p.map(|o| o.text.as_str()))
        .filter(|t| !t.is_empty())
        .collect();

    match mode {
        InputsMode::First => Ok(texts.first().map(|t| t.to_string()).unwrap_or_default()),
        InputsMode::Last => Ok(texts.last().map(|t| t.to_string()).unwrap_or_default()),
        InputsMode::Concat => Ok(texts.join("\n")),
        InputsMode::Merge => Ok(merge_json(&texts).unwrap_or_else(|| texts.join("\n"))),
        InputsMode::Summary => {
            if texts.is_empty() {
                return Ok(String::new());
            }
            let joined = truncate_chars(&texts.join("\n"), summary_max_chars);
            debug!("Summarizing {} parent outputs ({} chars)", texts.len(), joined.chars().count());
            summarizer.summarize(&[joined]).await
        }
    }
}

/// Shallow-merge JSON objects, later keys winning; `None` if any text is not an object
fn merge_json(texts: &[&str]) -> Option<String> {
    if texts.is_empty() {
        return Some(String::new());
    }
    let mut merged = Map::new();
    for text in texts {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => merged.extend(object),
            _ => return None,
        }
    }
    serde_json::to_string(&Value::Object(merged)).ok()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
