//! Cleaning and schema validation of model answers.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::MalformedAnswer;

const FENCE: &str = "```";
const SCHEMA_KEYS: [&str; 4] = ["project-id", "location", "contact-id", "otherDetails"];

/// One project the model pointed at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectMatch {
    #[serde(rename = "project-id")]
    pub project_id: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "contact-id")]
    pub contact_id: Option<String>,
    #[serde(rename = "otherDetails")]
    pub other_details: Option<String>,
}

/// Strip markdown fences and a leading `json` language tag from raw model output.
///
/// Fences are removed wherever they appear; the text between and around them
/// is kept. A language tag is dropped only when it sits alone on the line
/// opening a fence.
pub fn clean_answer(raw: &str) -> String {
    let parts: Vec<&str> = raw
        .split(FENCE)
        .enumerate()
        .map(|(index, part)| if index > 0 { strip_language_tag(part) } else { part })
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

    let text = parts.join("\n");
    let text = match text.strip_prefix("json") {
        Some(rest) if !rest.starts_with(|c: char| c.is_ascii_alphanumeric()) => rest,
        _ => text.as_str(),
    };
    text.trim().to_string()
}

fn strip_language_tag(after_fence: &str) -> &str {
    match after_fence.split_once('\n') {
        Some((tag, rest))
            if !tag.trim().is_empty()
                && tag
                    .trim_end()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.')) =>
        {
            rest
        }
        _ => after_fence,
    }
}

/// Keep the cleaned answers longer than `min_chars`, in order.
pub fn filter_answers<I, S>(answers: I, min_chars: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    answers
        .into_iter()
        .map(|answer| clean_answer(answer.as_ref()))
        .filter(|cleaned| has_signal(cleaned, min_chars))
        .collect()
}

/// Cleaned answers at or below `min_chars` characters carry no signal.
pub fn has_signal(cleaned: &str, min_chars: usize) -> bool {
    cleaned.chars().count() > min_chars
}

/// Validate a cleaned answer against the answer schema.
///
/// Accepts one object, an array of objects, or several objects separated by
/// commas or whitespace. Empty objects carry no signal and produce no matches.
pub fn parse_answer(cleaned: &str) -> Result<Vec<ProjectMatch>, MalformedAnswer> {
    let mut matches = Vec::new();
    for value in parse_values(cleaned)? {
        let objects = match value {
            Value::Object(map) => vec![Value::Object(map)],
            Value::Array(items) => items,
            other => {
                return Err(MalformedAnswer::new(format!(
                    "expected an object, found {}",
                    kind(&other)
                )))
            }
        };

        for item in objects {
            let object = match item {
                Value::Object(map) => map,
                other => {
                    return Err(MalformedAnswer::new(format!(
                        "expected an object, found {}",
                        kind(&other)
                    )))
                }
            };
            if let Some(found) = match_from_object(&object)? {
                matches.push(found);
            }
        }
    }
    Ok(matches)
}

fn parse_values(cleaned: &str) -> Result<Vec<Value>, MalformedAnswer> {
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(vec![value]);
    }
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&format!("[{}]", cleaned)) {
        return Ok(items);
    }
    serde_json::Deserializer::from_str(cleaned)
        .into_iter::<Value>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MalformedAnswer::new(format!("not valid JSON: {}", e)))
}

fn match_from_object(object: &Map<String, Value>) -> Result<Option<ProjectMatch>, MalformedAnswer> {
    if object.is_empty() {
        return Ok(None);
    }
    if !SCHEMA_KEYS.iter().any(|key| object.contains_key(*key)) {
        return Err(MalformedAnswer::new(format!(
            "no schema fields among keys: {}",
            object.keys().cloned().collect::<Vec<_>>().join(", ")
        )));
    }

    let found = ProjectMatch {
        project_id: field(object, "project-id")?,
        location: field(object, "location")?,
        contact_id: field(object, "contact-id")?,
        other_details: field(object, "otherDetails")?,
    };

    // All schema fields blank is the model's way of saying "nothing found".
    if found == ProjectMatch::default() {
        return Ok(None);
    }
    Ok(Some(found))
}

fn field(object: &Map<String, Value>, key: &str) -> Result<Option<String>, MalformedAnswer> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(MalformedAnswer::new(format!(
            "field {} is {}",
            key,
            kind(other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
