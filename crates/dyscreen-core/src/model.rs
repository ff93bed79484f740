//! Core data model types for dyscreen.
//!
//! These are the types every other crate uses to represent a battery of
//! subtests, the stored answer key, a test session and its grading.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a stored test session.
pub type SessionId = i64;

/// Internal identifier of a registered user.
pub type UserId = i64;

/// The six fixed subtests that make up a screening battery.
///
/// Declaration order is the canonical battery order; `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtestKind {
    SimpleReactionTime,
    Dot,
    Stroop,
    Addition,
    Multiplication,
    Substitution,
}

impl SubtestKind {
    /// All subtests in battery order.
    pub const ALL: [SubtestKind; 6] = [
        SubtestKind::SimpleReactionTime,
        SubtestKind::Dot,
        SubtestKind::Stroop,
        SubtestKind::Addition,
        SubtestKind::Multiplication,
        SubtestKind::Substitution,
    ];

    /// Subtests that carry questions and an answer key.
    pub const CONTENT_BEARING: [SubtestKind; 5] = [
        SubtestKind::Dot,
        SubtestKind::Stroop,
        SubtestKind::Addition,
        SubtestKind::Multiplication,
        SubtestKind::Substitution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubtestKind::SimpleReactionTime => "simple_reaction_time",
            SubtestKind::Dot => "dot",
            SubtestKind::Stroop => "stroop",
            SubtestKind::Addition => "addition",
            SubtestKind::Multiplication => "multiplication",
            SubtestKind::Substitution => "substitution",
        }
    }

    /// `simple_reaction_time` only measures speed and never has questions.
    pub fn is_content_bearing(&self) -> bool {
        !matches!(self, SubtestKind::SimpleReactionTime)
    }
}

impl fmt::Display for SubtestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubtestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubtestKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown subtest: {s}"))
    }
}

/// A question as it appears inside a battery document.
///
/// Only `question_id` is interpreted; every other field is presentation
/// content produced by the generator and is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionItem {
    pub question_id: String,
    #[serde(flatten)]
    pub content: Map<String, Value>,
}

impl QuestionItem {
    /// The full question object, `question_id` included, as stored in the bank.
    pub fn to_payload(&self) -> Value {
        let mut object = self.content.clone();
        object.insert(
            "question_id".to_string(),
            Value::String(self.question_id.clone()),
        );
        Value::Object(object)
    }

    /// Rebuild an item from a bank payload. The bank's id wins over any
    /// `question_id` field inside the payload.
    pub fn from_payload(question_id: &str, payload: &Value) -> Self {
        let mut content = match payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("content".to_string(), other.clone());
                map
            }
        };
        content.remove("question_id");
        Self {
            question_id: question_id.to_string(),
            content,
        }
    }
}

/// Questions and answer key of one subtest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtestSection {
    #[serde(default)]
    pub questions: Vec<QuestionItem>,
    /// Question id → expected answer in canonical string form.
    #[serde(default)]
    pub answer_key: BTreeMap<String, String>,
}

impl SubtestSection {
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty() && self.answer_key.is_empty()
    }

    /// Ids of questions that have no answer key entry.
    pub fn unkeyed_questions(&self) -> Vec<&str> {
        self.questions
            .iter()
            .filter(|q| !self.answer_key.contains_key(&q.question_id))
            .map(|q| q.question_id.as_str())
            .collect()
    }
}

/// The grading oracle for one session: a section per subtest.
///
/// Documents built by the sanitizer or the fallback composer always hold all
/// six subtests. Documents read back from storage are taken as stored, so
/// grading tolerates missing sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerKeyDocument {
    sections: BTreeMap<SubtestKind, SubtestSection>,
}

impl AnswerKeyDocument {
    /// A document with all six subtests empty.
    pub fn empty() -> Self {
        Self::from_sections(BTreeMap::new())
    }

    /// Build a complete document. Missing subtests become empty sections and
    /// `simple_reaction_time` is always forced empty.
    pub fn from_sections(mut sections: BTreeMap<SubtestKind, SubtestSection>) -> Self {
        for kind in SubtestKind::ALL {
            sections.entry(kind).or_default();
        }
        sections.insert(SubtestKind::SimpleReactionTime, SubtestSection::default());
        Self { sections }
    }

    pub fn section(&self, kind: SubtestKind) -> Option<&SubtestSection> {
        self.sections.get(&kind)
    }

    pub fn sections(&self) -> impl Iterator<Item = (SubtestKind, &SubtestSection)> {
        self.sections.iter().map(|(k, s)| (*k, s))
    }

    pub fn kinds(&self) -> Vec<SubtestKind> {
        self.sections.keys().copied().collect()
    }

    pub fn question_count(&self) -> usize {
        self.sections.values().map(|s| s.questions.len()).sum()
    }

    /// The battery as shown to a test taker. Answer keys are left out unless
    /// `include_answer_key` is set.
    pub fn to_view(&self, include_answer_key: bool) -> BTreeMap<SubtestKind, SectionView> {
        self.sections
            .iter()
            .map(|(kind, section)| {
                (
                    *kind,
                    SectionView {
                        questions: section.questions.clone(),
                        answer_key: include_answer_key.then(|| section.answer_key.clone()),
                    },
                )
            })
            .collect()
    }
}

/// Client-facing rendering of a subtest section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionView {
    pub questions: Vec<QuestionItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_key: Option<BTreeMap<String, String>>,
}

/// A question bank entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Globally unique across the bank.
    pub question_id: String,
    pub subtest_kind: SubtestKind,
    /// The full question object as generated.
    pub payload: Value,
    pub expected_answer: String,
}

/// Where a session's battery came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatterySource {
    Ai,
    Fallback,
}

impl fmt::Display for BatterySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatterySource::Ai => write!(f, "ai"),
            BatterySource::Fallback => write!(f, "fallback"),
        }
    }
}

/// Grading tally for one subtest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub correct: u32,
    pub wrong: u32,
    /// Size of the stored answer key, independent of what was submitted.
    pub total: u32,
}

impl CorrectionResult {
    /// Fraction of the answer key answered correctly; 0 when the key is empty.
    pub fn accuracy(&self) -> f64 {
        if self.total > 0 {
            self.correct as f64 / self.total as f64
        } else {
            0.0
        }
    }
}

/// Per-subtest grading of one submission.
pub type CorrectionResults = BTreeMap<SubtestKind, CorrectionResult>;

/// A stored test session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub session_id: SessionId,
    pub owner_user_id: UserId,
    /// Written once at creation and never changed.
    pub answer_key_document: AnswerKeyDocument,
    #[serde(default)]
    pub correction_results: Option<CorrectionResults>,
    pub created_at: DateTime<Utc>,
}

/// What a test taker sent for one subtest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtestSubmission {
    #[serde(default)]
    pub answers: HashMap<String, String>,
    /// Raw performance metrics, e.g. `median_reaction_time`, `age`.
    #[serde(default)]
    pub performance_data: HashMap<String, Value>,
}

impl SubtestSubmission {
    /// A numeric metric, or 0 when absent or not a number.
    pub fn metric(&self, key: &str) -> f64 {
        self.performance_data
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }
}

/// A full submission, keyed by subtest. Absent subtests count as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Submission {
    subtests: BTreeMap<SubtestKind, SubtestSubmission>,
}

impl Submission {
    pub fn new(subtests: BTreeMap<SubtestKind, SubtestSubmission>) -> Self {
        Self { subtests }
    }

    pub fn subtest(&self, kind: SubtestKind) -> Option<&SubtestSubmission> {
        self.subtests.get(&kind)
    }

    /// The submitted answer for a question, if any.
    pub fn answer(&self, kind: SubtestKind, question_id: &str) -> Option<&str> {
        self.subtests
            .get(&kind)
            .and_then(|s| s.answers.get(question_id))
            .map(String::as_str)
    }

    pub fn metric(&self, kind: SubtestKind, key: &str) -> f64 {
        self.subtests.get(&kind).map(|s| s.metric(key)).unwrap_or(0.0)
    }
}

/// Outcome categories reported by the diagnostic scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisClass {
    Normal,
    Dyscalculia,
    PoorArithmetic,
}

impl DiagnosisClass {
    /// Integer code used on the scorer wire format.
    pub fn code(&self) -> i64 {
        match self {
            DiagnosisClass::Normal => 0,
            DiagnosisClass::Dyscalculia => 1,
            DiagnosisClass::PoorArithmetic => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DiagnosisClass::Normal),
            1 => Some(DiagnosisClass::Dyscalculia),
            2 => Some(DiagnosisClass::PoorArithmetic),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DiagnosisClass::Normal => "Normal",
            DiagnosisClass::Dyscalculia => "Dyscalculia",
            DiagnosisClass::PoorArithmetic => "Poor arithmetic skills",
        }
    }
}

/// Whether the scorer produced a diagnosis for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisStatus {
    Scored,
    /// The scorer failed; grading is stored but no diagnosis exists yet.
    Pending,
}

impl fmt::Display for DiagnosisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosisStatus::Scored => write!(f, "scored"),
            DiagnosisStatus::Pending => write!(f, "pending"),
        }
    }
}

impl FromStr for DiagnosisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scored" => Ok(DiagnosisStatus::Scored),
            "pending" => Ok(DiagnosisStatus::Pending),
            other => Err(format!("unknown diagnosis status: {other}")),
        }
    }
}

/// Diagnosis stored one-to-one with a test session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub session_id: SessionId,
    pub status: DiagnosisStatus,
    pub diagnosis_class: Option<DiagnosisClass>,
    /// Probability the scorer assigned to `diagnosis_class`.
    pub final_score: Option<f64>,
    /// Class code (as string) → probability.
    #[serde(default)]
    pub probability_vector: BTreeMap<String, f64>,
    #[serde(default)]
    pub raw_payload: Value,
    pub created_at: DateTime<Utc>,
}

/// A registered test taker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    /// Stable identifier issued by the identity provider.
    pub subject: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A past session with its diagnosis, as listed in a user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session: TestSession,
    pub diagnosis: Option<DiagnosisRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subtest_kind_display_and_parse() {
        assert_eq!(SubtestKind::SimpleReactionTime.to_string(), "simple_reaction_time");
        assert_eq!("stroop".parse::<SubtestKind>().unwrap(), SubtestKind::Stroop);
        assert!("reading".parse::<SubtestKind>().is_err());
        assert!(!SubtestKind::SimpleReactionTime.is_content_bearing());
        assert!(SubtestKind::CONTENT_BEARING.iter().all(|k| k.is_content_bearing()));
    }

    #[test]
    fn document_always_has_six_sections() {
        let mut sections = BTreeMap::new();
        sections.insert(
            SubtestKind::SimpleReactionTime,
            SubtestSection {
                questions: vec![QuestionItem::from_payload("srt_1", &json!({}))],
                answer_key: BTreeMap::from([("srt_1".to_string(), "1".to_string())]),
            },
        );
        let doc = AnswerKeyDocument::from_sections(sections);
        assert_eq!(doc.kinds(), SubtestKind::ALL.to_vec());
        assert!(doc.section(SubtestKind::SimpleReactionTime).unwrap().is_empty());
    }

    #[test]
    fn document_serializes_as_snake_case_map() {
        let doc = AnswerKeyDocument::empty();
        let value = serde_json::to_value(&doc).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 6);
        assert_eq!(
            object["addition"],
            json!({"questions": [], "answer_key": {}})
        );
    }

    #[test]
    fn view_strips_answer_keys_by_default() {
        let mut sections = BTreeMap::new();
        sections.insert(
            SubtestKind::Addition,
            SubtestSection {
                questions: vec![QuestionItem::from_payload(
                    "add_1",
                    &json!({"question_id": "add_1", "text": "12 + 9?"}),
                )],
                answer_key: BTreeMap::from([("add_1".to_string(), "21".to_string())]),
            },
        );
        let doc = AnswerKeyDocument::from_sections(sections);

        let hidden = serde_json::to_value(doc.to_view(false)).unwrap();
        assert!(hidden["addition"].get("answer_key").is_none());
        assert_eq!(hidden["addition"]["questions"][0]["text"], "12 + 9?");

        let shown = serde_json::to_value(doc.to_view(true)).unwrap();
        assert_eq!(shown["addition"]["answer_key"]["add_1"], "21");
    }

    #[test]
    fn question_item_payload_keeps_id() {
        let item = QuestionItem::from_payload(
            "dot_1",
            &json!({"question_id": "ignored", "type": "count", "dots": 7}),
        );
        assert_eq!(item.question_id, "dot_1");
        let payload = item.to_payload();
        assert_eq!(payload["question_id"], "dot_1");
        assert_eq!(payload["dots"], 7);
    }

    #[test]
    fn unkeyed_questions_are_reported() {
        let section = SubtestSection {
            questions: vec![
                QuestionItem::from_payload("a", &Value::Null),
                QuestionItem::from_payload("b", &Value::Null),
            ],
            answer_key: BTreeMap::from([("a".to_string(), "1".to_string())]),
        };
        assert_eq!(section.unkeyed_questions(), vec!["b"]);
    }

    #[test]
    fn accuracy_handles_empty_key() {
        assert_eq!(CorrectionResult::default().accuracy(), 0.0);
        let r = CorrectionResult {
            correct: 1,
            wrong: 3,
            total: 4,
        };
        assert_eq!(r.accuracy(), 0.25);
    }

    #[test]
    fn submission_metrics_default_to_zero() {
        let submission: Submission = serde_json::from_value(json!({
            "dot": {"answers": {"dot_1": "7"}, "performance_data": {"median_reaction_time": 812.5, "note": "x"}}
        }))
        .unwrap();
        assert_eq!(submission.metric(SubtestKind::Dot, "median_reaction_time"), 812.5);
        assert_eq!(submission.metric(SubtestKind::Dot, "note"), 0.0);
        assert_eq!(submission.metric(SubtestKind::Stroop, "median_reaction_time"), 0.0);
        assert_eq!(submission.answer(SubtestKind::Dot, "dot_1"), Some("7"));
    }

    #[test]
    fn diagnosis_class_codes() {
        for class in [
            DiagnosisClass::Normal,
            DiagnosisClass::Dyscalculia,
            DiagnosisClass::PoorArithmetic,
        ] {
            assert_eq!(DiagnosisClass::from_code(class.code()), Some(class));
        }
        assert_eq!(DiagnosisClass::from_code(7), None);
    }
}
