//! Diagnostic scorer backends.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use dyscreen_core::error::ScorerError;
use dyscreen_core::scoring::FeatureVector;
use dyscreen_core::traits::{DiagnosticScorer, ScorerOutput};

/// Wire shape of a scorer answer. Extra fields (labels, raw scores) are
/// kept only in the raw payload.
#[derive(Deserialize)]
struct ScorerPayload {
    diagnosis: i64,
    #[serde(alias = "probabilitas")]
    probabilities: BTreeMap<String, f64>,
}

/// Decode a scorer answer, keeping the full document as the raw payload.
pub fn parse_scorer_payload(raw: Value) -> Result<ScorerOutput, ScorerError> {
    let payload: ScorerPayload = serde_json::from_value(raw.clone())
        .map_err(|e| ScorerError::InvalidResponse(e.to_string()))?;
    Ok(ScorerOutput {
        diagnosis_code: payload.diagnosis,
        probabilities: payload.probabilities,
        raw_payload: raw,
    })
}

/// Posts the feature vector as JSON to a scoring endpoint.
pub struct HttpScorer {
    url: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpScorer {
    pub fn new(url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            url: url.to_string(),
            timeout_secs,
            client,
        })
    }
}

#[async_trait]
impl DiagnosticScorer for HttpScorer {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, features), fields(url = %self.url))]
    async fn score(&self, features: &FeatureVector) -> Result<ScorerOutput, ScorerError> {
        let response = self
            .client
            .post(&self.url)
            .json(features)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScorerError::Timeout(self.timeout_secs)
                } else {
                    ScorerError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScorerError::Unreachable(format!("HTTP {}: {body}", status.as_u16())));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ScorerError::InvalidResponse(format!("body is not JSON: {e}")))?;
        parse_scorer_payload(raw)
    }
}

/// Returns one configured answer for every feature vector. Used when no
/// scoring endpoint is configured.
pub struct FixedScorer {
    payload: Value,
}

impl FixedScorer {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }
}

impl Default for FixedScorer {
    fn default() -> Self {
        Self::new(json!({
            "diagnosis": 2,
            "label": {"diagnosis": {"0": "Normal", "1": "Dyscalculia", "2": "Poor arithmetic skills"}},
            "probabilitas": {"0": 0.04, "1": 0.43, "2": 0.43},
            "skor": [3.41, 3.3, 5.23, 1.58, 1.87]
        }))
    }
}

#[async_trait]
impl DiagnosticScorer for FixedScorer {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn score(&self, features: &FeatureVector) -> Result<ScorerOutput, ScorerError> {
        tracing::debug!(?features, "answering with fixed scorer response");
        parse_scorer_payload(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn features() -> FeatureVector {
        FeatureVector {
            age: 9,
            dot_acc: 0.5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn posts_features_and_parses_answer() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/predict"))
            .and(body_partial_json(json!({"age": 9, "dot_acc": 0.5, "subs_rt": 0.0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "diagnosis": 1,
                "probabilitas": {"0": 0.1, "1": 0.8, "2": 0.1}
            })))
            .mount(&server)
            .await;

        let scorer = HttpScorer::new(&format!("{}/predict", server.uri()), 5).unwrap();
        let output = scorer.score(&features()).await.unwrap();
        assert_eq!(output.diagnosis_code, 1);
        assert_eq!(output.probabilities["1"], 0.8);
        assert_eq!(output.raw_payload["diagnosis"], 1);
    }

    #[tokio::test]
    async fn error_status_is_unreachable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let scorer = HttpScorer::new(&server.uri(), 5).unwrap();
        let err = scorer.score(&features()).await.unwrap_err();
        assert!(matches!(err, ScorerError::Unreachable(ref m) if m.contains("502")));
    }

    #[tokio::test]
    async fn unexpected_shape_is_invalid() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "ok"})))
            .mount(&server)
            .await;

        let scorer = HttpScorer::new(&server.uri(), 5).unwrap();
        let err = scorer.score(&features()).await.unwrap_err();
        assert!(matches!(err, ScorerError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn fixed_scorer_answers_poor_arithmetic() {
        let output = FixedScorer::default().score(&features()).await.unwrap();
        assert_eq!(output.diagnosis_code, 2);
        assert_eq!(output.probabilities["2"], 0.43);
        assert!(output.raw_payload.get("skor").is_some());
    }

    #[test]
    fn english_probability_key_is_accepted() {
        let output = parse_scorer_payload(json!({
            "diagnosis": 0,
            "probabilities": {"0": 0.9}
        }))
        .unwrap();
        assert_eq!(output.probabilities["0"], 0.9);
    }
}
