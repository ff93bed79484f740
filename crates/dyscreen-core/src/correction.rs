//! Grading of a submission against a session's stored answer key.

use crate::model::{AnswerKeyDocument, CorrectionResult, CorrectionResults, Submission};

/// Grade `submission` against `document`.
///
/// Every answer key entry counts exactly once: an exact string match is
/// correct, anything else (including no answer) is wrong. Submitted answers
/// for ids outside the key are ignored, so `total` is always the key size.
/// Subtests missing from the stored document produce no entry.
pub fn correct(document: &AnswerKeyDocument, submission: &Submission) -> CorrectionResults {
    document
        .sections()
        .map(|(kind, section)| {
            let mut result = CorrectionResult {
                total: section.answer_key.len() as u32,
                ..Default::default()
            };
            for (question_id, expected) in &section.answer_key {
                if submission.answer(kind, question_id) == Some(expected.as_str()) {
                    result.correct += 1;
                } else {
                    result.wrong += 1;
                }
            }
            (kind, result)
        })
        .collect()
}
