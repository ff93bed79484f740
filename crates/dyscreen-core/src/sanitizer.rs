//! Extraction of a subtests document from free-form model output.
//!
//! Generative models are not contractually bound to emit pure JSON, so the
//! document is searched for between the first `{` and the last `}` of the
//! text. Within that span one JSON value is parsed at each `{` in turn; the
//! first top-level object carrying a `subtests` key is decoded into an
//! [`AnswerKeyDocument`]. Objects without the key are skipped whole, which
//! keeps nested `subtests` keys from being promoted.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::error::GenerationError;
use crate::model::{AnswerKeyDocument, QuestionItem, SubtestKind, SubtestSection};

/// Extract and validate a battery from raw model text.
pub fn extract(raw: &str) -> Result<AnswerKeyDocument, GenerationError> {
    let span = candidate_span(raw)
        .ok_or_else(|| malformed("could not find a JSON object in the response"))?;

    let mut cursor = 0;
    let mut parsed_any = false;
    let mut last_error = None;

    while let Some(offset) = span[cursor..].find('{') {
        let start = cursor + offset;
        let mut stream = serde_json::Deserializer::from_str(&span[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(root))) => {
                parsed_any = true;
                if let Some(subtests) = root.get("subtests") {
                    return decode_subtests(subtests);
                }
                cursor = start + stream.byte_offset();
            }
            Some(Ok(_)) => cursor = start + 1,
            Some(Err(e)) => {
                last_error = Some(e);
                cursor = start + 1;
            }
            None => break,
        }
    }

    if parsed_any {
        Err(malformed("key 'subtests' not found in the response"))
    } else {
        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no object parsed".to_string());
        Err(malformed(format!("failed to parse response JSON: {detail}")))
    }
}

/// The text between the first `{` and the last `}`, inclusive.
fn candidate_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Decode the value of the `subtests` key into a complete document.
pub fn decode_subtests(value: &Value) -> Result<AnswerKeyDocument, GenerationError> {
    let object = value
        .as_object()
        .ok_or_else(|| malformed("'subtests' is not an object"))?;

    for key in object.keys() {
        if key.parse::<SubtestKind>().is_err() {
            tracing::debug!("ignoring unknown subtest '{key}' in response");
        }
    }

    if let Some(srt) = object.get(SubtestKind::SimpleReactionTime.as_str()) {
        let has_content = srt
            .get("questions")
            .and_then(Value::as_array)
            .is_some_and(|q| !q.is_empty());
        if has_content {
            tracing::debug!("discarding questions generated for simple_reaction_time");
        }
    }

    let mut sections = BTreeMap::new();
    for kind in SubtestKind::CONTENT_BEARING {
        let section = object
            .get(kind.as_str())
            .ok_or_else(|| malformed(format!("subtest '{kind}' is missing")))?;
        sections.insert(kind, decode_section(kind, section)?);
    }

    Ok(AnswerKeyDocument::from_sections(sections))
}

fn decode_section(kind: SubtestKind, value: &Value) -> Result<SubtestSection, GenerationError> {
    let object = value
        .as_object()
        .ok_or_else(|| malformed(format!("subtest '{kind}' is not an object")))?;

    let (questions, dropped) = match object.get("questions") {
        None => (Vec::new(), 0),
        Some(Value::Array(items)) => {
            let questions: Vec<_> = items
                .iter()
                .enumerate()
                .filter_map(|(idx, item)| decode_question(kind, idx, item))
                .collect();
            let dropped = items.len() - questions.len();
            (questions, dropped)
        }
        Some(_) => {
            return Err(malformed(format!(
                "subtest '{kind}': 'questions' is not an array"
            )))
        }
    };

    let mut answer_key = match object.get("answer_key") {
        None => BTreeMap::new(),
        Some(Value::Object(entries)) => decode_answer_key(kind, entries)?,
        Some(_) => {
            return Err(malformed(format!(
                "subtest '{kind}': 'answer_key' is not an object"
            )))
        }
    };

    // Keys left behind by dropped questions would be graded as unanswerable.
    if dropped > 0 {
        answer_key.retain(|id, _| questions.iter().any(|q| &q.question_id == id));
    }

    let section = SubtestSection {
        questions,
        answer_key,
    };
    let unkeyed = section.unkeyed_questions();
    if !unkeyed.is_empty() {
        return Err(malformed(format!(
            "subtest '{kind}': no answer for question(s) {}",
            unkeyed.join(", ")
        )));
    }

    Ok(section)
}

/// A question without a string `question_id` cannot be graded; it is
/// dropped and the rest of the section is kept.
fn decode_question(kind: SubtestKind, idx: usize, item: &Value) -> Option<QuestionItem> {
    match item.get("question_id").and_then(Value::as_str) {
        Some(id) => Some(QuestionItem::from_payload(id, item)),
        None => {
            tracing::warn!(
                "subtest '{kind}': dropping question #{idx} without a string question_id"
            );
            None
        }
    }
}

fn decode_answer_key(
    kind: SubtestKind,
    entries: &Map<String, Value>,
) -> Result<BTreeMap<String, String>, GenerationError> {
    entries
        .iter()
        .map(|(id, answer)| {
            canonical_answer(answer)
                .map(|a| (id.clone(), a))
                .ok_or_else(|| {
                    malformed(format!(
                        "subtest '{kind}': answer for '{id}' is not a string, number or boolean"
                    ))
                })
        })
        .collect()
}

/// Canonical string form of an expected answer.
///
/// Integral numbers lose any `.0` so `21` and `21.0` both grade as `"21"`.
pub fn canonical_answer(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(canonical_number(n)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn canonical_number(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}

fn malformed(message: impl Into<String>) -> GenerationError {
    GenerationError::MalformedResponse(message.into())
}
