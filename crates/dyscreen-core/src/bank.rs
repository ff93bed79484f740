//! Idempotent recording of generated questions into the question bank.

use std::sync::Arc;

use crate::error::StoreError;
use crate::model::{AnswerKeyDocument, Question};
use crate::traits::{InsertOutcome, QuestionBank};

/// Tally of one bank write pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BankWriteReport {
    /// Questions newly added to the bank.
    pub inserted: usize,
    /// Questions whose id was already present.
    pub skipped: usize,
    /// Questions that could not be checked or written.
    pub failed: usize,
}

/// Outcome for a single question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Inserted,
    Skipped,
    Failed,
}

/// Persists newly seen questions. The first write of an id wins; later
/// generations never overwrite it. Per-question failures are logged and
/// never abort the pass.
pub struct BankWriter {
    bank: Arc<dyn QuestionBank>,
}

impl BankWriter {
    pub fn new(bank: Arc<dyn QuestionBank>) -> Self {
        Self { bank }
    }

    /// Record every question of a sanitized document.
    pub async fn record(&self, document: &AnswerKeyDocument) -> BankWriteReport {
        let mut questions = Vec::new();
        for (kind, section) in document.sections() {
            for item in &section.questions {
                let Some(answer) = section.answer_key.get(&item.question_id) else {
                    tracing::warn!(
                        "question {} in {kind} has no answer, not banking it",
                        item.question_id
                    );
                    continue;
                };
                questions.push(Question {
                    question_id: item.question_id.clone(),
                    subtest_kind: kind,
                    payload: item.to_payload(),
                    expected_answer: answer.clone(),
                });
            }
        }
        self.write_all(&questions).await
    }

    /// Record a list of bank entries (used when importing a seed file).
    pub async fn write_all(&self, questions: &[Question]) -> BankWriteReport {
        let mut report = BankWriteReport::default();
        for question in questions {
            match self.write(question).await {
                WriteOutcome::Inserted => report.inserted += 1,
                WriteOutcome::Skipped => report.skipped += 1,
                WriteOutcome::Failed => report.failed += 1,
            }
        }
        tracing::info!(
            inserted = report.inserted,
            skipped = report.skipped,
            failed = report.failed,
            "question bank updated"
        );
        report
    }

    async fn write(&self, question: &Question) -> WriteOutcome {
        let id = &question.question_id;
        match self.bank.find(id).await {
            Ok(Some(_)) => {
                tracing::debug!("question {id} already in bank, skipping");
                return WriteOutcome::Skipped;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("bank lookup failed for question {id}: {e}");
                return WriteOutcome::Failed;
            }
        }

        match self.bank.insert_if_absent(question).await {
            Ok(InsertOutcome::Inserted) => {
                tracing::debug!("saved new question {id} ({})", question.subtest_kind);
                WriteOutcome::Inserted
            }
            Ok(InsertOutcome::AlreadyPresent) | Err(StoreError::Duplicate(_)) => {
                tracing::debug!("question {id} was banked concurrently, skipping");
                WriteOutcome::Skipped
            }
            Err(e) => {
                tracing::error!("failed to save question {id}: {e}");
                WriteOutcome::Failed
            }
        }
    }
}
