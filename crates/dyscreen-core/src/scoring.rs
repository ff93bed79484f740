//! Feature extraction and diagnosis recording.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ScorerError;
use crate::model::{
    CorrectionResults, DiagnosisClass, DiagnosisRecord, DiagnosisStatus, SessionId, SubtestKind,
    Submission,
};
use crate::traits::{DiagnosticScorer, ScorerOutput};

/// Performance-data key holding a subtest's median reaction time.
pub const REACTION_TIME_KEY: &str = "median_reaction_time";

/// Performance-data key (on `simple_reaction_time`) holding the taker's age.
pub const AGE_KEY: &str = "age";

/// Input of the diagnostic scorer. Field order is the scorer's feature order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub age: u32,
    pub srt: f64,
    pub dot_rt: f64,
    pub dot_acc: f64,
    pub stroop_rt: f64,
    pub stroop_acc: f64,
    pub add_rt: f64,
    pub add_acc: f64,
    pub mult_rt: f64,
    pub mult_acc: f64,
    pub subs_rt: f64,
    pub subs_acc: f64,
}

impl FeatureVector {
    pub const NAMES: [&'static str; 12] = [
        "age", "srt", "dot_rt", "dot_acc", "stroop_rt", "stroop_acc", "add_rt", "add_acc",
        "mult_rt", "mult_acc", "subs_rt", "subs_acc",
    ];

    /// Derive features from grading output and the submitted metrics.
    /// Missing metrics and empty answer keys contribute 0.
    pub fn from_results(results: &CorrectionResults, submission: &Submission) -> Self {
        let rt = |kind: SubtestKind| submission.metric(kind, REACTION_TIME_KEY);
        let acc = |kind: SubtestKind| results.get(&kind).map(|r| r.accuracy()).unwrap_or(0.0);
        let age = submission.metric(SubtestKind::SimpleReactionTime, AGE_KEY);

        Self {
            age: if age.is_finite() && age > 0.0 { age as u32 } else { 0 },
            srt: rt(SubtestKind::SimpleReactionTime),
            dot_rt: rt(SubtestKind::Dot),
            dot_acc: acc(SubtestKind::Dot),
            stroop_rt: rt(SubtestKind::Stroop),
            stroop_acc: acc(SubtestKind::Stroop),
            add_rt: rt(SubtestKind::Addition),
            add_acc: acc(SubtestKind::Addition),
            mult_rt: rt(SubtestKind::Multiplication),
            mult_acc: acc(SubtestKind::Multiplication),
            subs_rt: rt(SubtestKind::Substitution),
            subs_acc: acc(SubtestKind::Substitution),
        }
    }

    /// Values in [`FeatureVector::NAMES`] order.
    pub fn as_vec(&self) -> Vec<f64> {
        vec![
            f64::from(self.age),
            self.srt,
            self.dot_rt,
            self.dot_acc,
            self.stroop_rt,
            self.stroop_acc,
            self.add_rt,
            self.add_acc,
            self.mult_rt,
            self.mult_acc,
            self.subs_rt,
            self.subs_acc,
        ]
    }
}

/// Calls the diagnostic scorer under a timeout and turns its answer into a
/// [`DiagnosisRecord`]. Any scorer failure yields a `pending` record instead
/// of an error.
pub struct ScoringAdapter {
    scorer: Arc<dyn DiagnosticScorer>,
    timeout: Duration,
}

impl ScoringAdapter {
    pub fn new(scorer: Arc<dyn DiagnosticScorer>, timeout: Duration) -> Self {
        Self { scorer, timeout }
    }

    pub async fn score(&self, session_id: SessionId, features: &FeatureVector) -> DiagnosisRecord {
        let outcome = match tokio::time::timeout(self.timeout, self.scorer.score(features)).await {
            Ok(result) => result.and_then(|output| scored_record(session_id, output)),
            Err(_) => Err(ScorerError::Timeout(self.timeout.as_secs())),
        };

        match outcome {
            Ok(record) => {
                tracing::info!(
                    session_id,
                    scorer = self.scorer.name(),
                    "diagnosis recorded: {}",
                    record
                        .diagnosis_class
                        .map(|c| c.label())
                        .unwrap_or("unknown")
                );
                record
            }
            Err(e) => {
                tracing::warn!(session_id, "scorer failed, diagnosis left pending: {e}");
                pending_record(session_id, &e)
            }
        }
    }
}

fn scored_record(session_id: SessionId, output: ScorerOutput) -> Result<DiagnosisRecord, ScorerError> {
    let class = DiagnosisClass::from_code(output.diagnosis_code).ok_or_else(|| {
        ScorerError::InvalidResponse(format!("unknown diagnosis code {}", output.diagnosis_code))
    })?;
    let final_score = output
        .probabilities
        .get(&output.diagnosis_code.to_string())
        .copied()
        .ok_or_else(|| {
            ScorerError::InvalidResponse(format!(
                "no probability for diagnosis code {}",
                output.diagnosis_code
            ))
        })?;

    Ok(DiagnosisRecord {
        session_id,
        status: DiagnosisStatus::Scored,
        diagnosis_class: Some(class),
        final_score: Some(final_score),
        probability_vector: output.probabilities,
        raw_payload: output.raw_payload,
        created_at: Utc::now(),
    })
}

fn pending_record(session_id: SessionId, error: &ScorerError) -> DiagnosisRecord {
    DiagnosisRecord {
        session_id,
        status: DiagnosisStatus::Pending,
        diagnosis_class: None,
        final_score: None,
        probability_vector: Default::default(),
        raw_payload: json!({ "error": error.to_string() }),
        created_at: Utc::now(),
    }
}
