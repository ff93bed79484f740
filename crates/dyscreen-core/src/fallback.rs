//! Substitute battery composition from the question bank.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{AnswerKeyDocument, QuestionItem, SubtestKind, SubtestSection};
use crate::traits::QuestionBank;

/// How many bank questions to draw per subtest when the AI path fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackPolicy {
    pub dot: usize,
    pub stroop: usize,
    pub addition: usize,
    pub multiplication: usize,
    pub substitution: usize,
}

impl FallbackPolicy {
    /// The same count for every content-bearing subtest.
    pub fn uniform(count: usize) -> Self {
        Self {
            dot: count,
            stroop: count,
            addition: count,
            multiplication: count,
            substitution: count,
        }
    }

    pub fn count(&self, kind: SubtestKind) -> usize {
        match kind {
            SubtestKind::SimpleReactionTime => 0,
            SubtestKind::Dot => self.dot,
            SubtestKind::Stroop => self.stroop,
            SubtestKind::Addition => self.addition,
            SubtestKind::Multiplication => self.multiplication,
            SubtestKind::Substitution => self.substitution,
        }
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::uniform(2)
    }
}

/// Builds a battery by sampling the bank. Never fails: a subtest whose bank
/// is empty or unreadable gets an empty section.
pub struct FallbackComposer {
    bank: Arc<dyn QuestionBank>,
    policy: FallbackPolicy,
}

impl FallbackComposer {
    pub fn new(bank: Arc<dyn QuestionBank>, policy: FallbackPolicy) -> Self {
        Self { bank, policy }
    }

    pub async fn compose(&self) -> AnswerKeyDocument {
        let mut sections = BTreeMap::new();

        for kind in SubtestKind::CONTENT_BEARING {
            let wanted = self.policy.count(kind);
            let sampled = match self.bank.sample(kind, wanted).await {
                Ok(questions) => questions,
                Err(e) => {
                    tracing::warn!("could not sample {kind} questions from bank: {e}");
                    Vec::new()
                }
            };
            if sampled.len() < wanted {
                tracing::debug!(
                    "bank holds only {} of {wanted} requested {kind} questions",
                    sampled.len()
                );
            }

            let mut section = SubtestSection::default();
            for question in sampled.into_iter().take(wanted) {
                section.questions.push(QuestionItem::from_payload(
                    &question.question_id,
                    &question.payload,
                ));
                section
                    .answer_key
                    .insert(question.question_id, question.expected_answer);
            }
            sections.insert(kind, section);
        }

        AnswerKeyDocument::from_sections(sections)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::StoreError;
    use crate::model::Question;
    use crate::traits::InsertOutcome;

    /// Deterministic bank: `sample` returns the first `limit` questions.
    #[derive(Default)]
    struct StaticBank {
        by_kind: HashMap<SubtestKind, Vec<Question>>,
        broken: Option<SubtestKind>,
    }

    impl StaticBank {
        fn with(mut self, kind: SubtestKind, ids: &[(&str, &str)]) -> Self {
            self.by_kind.insert(
                kind,
                ids.iter()
                    .map(|(id, answer)| Question {
                        question_id: id.to_string(),
                        subtest_kind: kind,
                        payload: json!({"question_id": id, "text": "?"}),
                        expected_answer: answer.to_string(),
                    })
                    .collect(),
            );
            self
        }
    }

    #[async_trait]
    impl QuestionBank for StaticBank {
        async fn find(&self, _: &str) -> Result<Option<Question>, StoreError> {
            Ok(None)
        }

        async fn insert_if_absent(&self, _: &Question) -> Result<InsertOutcome, StoreError> {
            Ok(InsertOutcome::Inserted)
        }

        async fn sample(&self, kind: SubtestKind, limit: usize) -> Result<Vec<Question>, StoreError> {
            if self.broken == Some(kind) {
                return Err(StoreError::Backend(anyhow::anyhow!("connection reset")));
            }
            Ok(self
                .by_kind
                .get(&kind)
                .map(|q| q.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        }

        async fn count(&self, kind: SubtestKind) -> Result<usize, StoreError> {
            Ok(self.by_kind.get(&kind).map(Vec::len).unwrap_or(0))
        }
    }

    #[tokio::test]
    async fn empty_bank_gives_empty_sections() {
        let composer = FallbackComposer::new(Arc::new(StaticBank::default()), FallbackPolicy::default());
        let doc = composer.compose().await;

        assert_eq!(doc.kinds(), SubtestKind::ALL.to_vec());
        for (_, section) in doc.sections() {
            assert!(section.is_empty());
        }
    }

    #[tokio::test]
    async fn samples_policy_count_per_subtest() {
        let bank = StaticBank::default().with(
            SubtestKind::Addition,
            &[("add_1", "21"), ("add_2", "13"), ("add_3", "8")],
        );
        let composer = FallbackComposer::new(Arc::new(bank), FallbackPolicy::default());
        let doc = composer.compose().await;

        let addition = doc.section(SubtestKind::Addition).unwrap();
        assert_eq!(addition.questions.len(), 2);
        assert_eq!(addition.answer_key.len(), 2);
        assert!(addition.unkeyed_questions().is_empty());
        assert_eq!(addition.questions[0].content["text"], "?");
    }

    #[tokio::test]
    async fn short_bank_returns_everything_available() {
        let bank = StaticBank::default().with(SubtestKind::Dot, &[("dot_1", "7")]);
        let composer = FallbackComposer::new(Arc::new(bank), FallbackPolicy::uniform(5));
        let doc = composer.compose().await;

        let dot = doc.section(SubtestKind::Dot).unwrap();
        assert_eq!(dot.questions.len(), 1);
        assert_eq!(dot.answer_key["dot_1"], "7");
    }

    #[tokio::test]
    async fn unreadable_subtest_is_left_empty() {
        let bank = StaticBank {
            broken: Some(SubtestKind::Stroop),
            ..StaticBank::default().with(SubtestKind::Dot, &[("dot_1", "7")])
        };
        let composer = FallbackComposer::new(Arc::new(bank), FallbackPolicy::default());
        let doc = composer.compose().await;

        assert!(doc.section(SubtestKind::Stroop).unwrap().is_empty());
        assert_eq!(doc.section(SubtestKind::Dot).unwrap().questions.len(), 1);
    }

    #[test]
    fn policy_parses_partial_overrides() {
        let policy: FallbackPolicy = serde_json::from_str(r#"{"addition": 4}"#).unwrap();
        assert_eq!(policy.count(SubtestKind::Addition), 4);
        assert_eq!(policy.count(SubtestKind::Dot), 2);
        assert_eq!(policy.count(SubtestKind::SimpleReactionTime), 0);
    }
}
