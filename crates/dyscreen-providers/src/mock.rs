//! Mock gateway and scorer for testing and offline runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use dyscreen_core::error::{ProviderError, ScorerError};
use dyscreen_core::scoring::FeatureVector;
use dyscreen_core::traits::{
    AiGateway, DiagnosticScorer, GenerateRequest, GenerateResponse, ModelInfo, ScorerOutput,
    TokenUsage,
};

/// A small but complete battery in the shape the prompt asks for.
pub const SAMPLE_BATTERY: &str = r##"{
  "subtests": {
    "simple_reaction_time": {"questions": [], "answer_key": {}},
    "dot": {
      "questions": [
        {"question_id": "mock_dot_1", "type": "dot_count", "dots": 7},
        {"question_id": "mock_dot_2", "type": "dot_count", "dots": 4}
      ],
      "answer_key": {"mock_dot_1": "7", "mock_dot_2": "4"}
    },
    "stroop": {
      "questions": [
        {"question_id": "mock_stroop_1", "type": "choice", "left": 3, "right": 8, "text": "Which number is larger in value?"},
        {"question_id": "mock_stroop_2", "type": "choice", "left": 9, "right": 2, "text": "Which number is larger in value?"}
      ],
      "answer_key": {"mock_stroop_1": "8", "mock_stroop_2": "9"}
    },
    "addition": {
      "questions": [
        {"question_id": "mock_add_1", "type": "text_input", "text": "What is 12 + 9?"},
        {"question_id": "mock_add_2", "type": "text_input", "text": "What is 7 + 6?"}
      ],
      "answer_key": {"mock_add_1": "21", "mock_add_2": "13"}
    },
    "multiplication": {
      "questions": [
        {"question_id": "mock_mul_1", "type": "text_input", "text": "What is 3 x 4?"},
        {"question_id": "mock_mul_2", "type": "text_input", "text": "What is 6 x 7?"}
      ],
      "answer_key": {"mock_mul_1": "12", "mock_mul_2": "42"}
    },
    "substitution": {
      "questions": [
        {"question_id": "mock_sub_1", "type": "symbol_digit", "symbol": "#", "key": {"#": 5, "@": 2}},
        {"question_id": "mock_sub_2", "type": "symbol_digit", "symbol": "@", "key": {"#": 5, "@": 2}}
      ],
      "answer_key": {"mock_sub_1": "5", "mock_sub_2": "2"}
    }
  }
}"##;

/// A mock gateway that answers every prompt with a fixed text, or fails.
pub struct MockGateway {
    response: Option<String>,
    call_count: AtomicU32,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl MockGateway {
    /// Always answer with `response`.
    pub fn with_fixed_response(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Always answer with [`SAMPLE_BATTERY`].
    pub fn with_sample_battery() -> Self {
        Self::with_fixed_response(SAMPLE_BATTERY)
    }

    /// Fail every call with a retryable network error.
    pub fn unreachable() -> Self {
        Self {
            response: None,
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Get the number of calls made to this gateway.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Get the last request made to this gateway.
    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last_request
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AiGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }

        let Some(content) = self.response.clone() else {
            return Err(ProviderError::NetworkError("mock gateway is unreachable".into()).into());
        };
        let token_count = (content.len() / 4) as u32; // Rough estimate
        let prompt_tokens = (request.prompt.len() / 4) as u32;

        Ok(GenerateResponse {
            content,
            model: request.model.clone(),
            token_usage: TokenUsage {
                prompt_tokens,
                completion_tokens: token_count,
                total_tokens: prompt_tokens + token_count,
            },
            latency_ms: 1,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "mock-model".into(),
            name: "Mock Model".into(),
            provider: "mock".into(),
            max_context: 100_000,
        }]
    }
}

/// A scorer that records what it was asked and answers with a fixed class,
/// or fails.
pub struct MockScorer {
    diagnosis: Option<i64>,
    call_count: AtomicU32,
    last_features: Mutex<Option<FeatureVector>>,
}

impl MockScorer {
    /// Answer with `diagnosis` at probability 1.
    pub fn answering(diagnosis: i64) -> Self {
        Self {
            diagnosis: Some(diagnosis),
            call_count: AtomicU32::new(0),
            last_features: Mutex::new(None),
        }
    }

    /// Fail every call as unreachable.
    pub fn failing() -> Self {
        Self {
            diagnosis: None,
            call_count: AtomicU32::new(0),
            last_features: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn last_features(&self) -> Option<FeatureVector> {
        self.last_features.lock().map(|f| *f).unwrap_or_default()
    }
}

#[async_trait]
impl DiagnosticScorer for MockScorer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn score(&self, features: &FeatureVector) -> Result<ScorerOutput, ScorerError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_features.lock() {
            *last = Some(*features);
        }

        let diagnosis = self
            .diagnosis
            .ok_or_else(|| ScorerError::Unreachable("mock scorer is down".into()))?;
        Ok(ScorerOutput {
            diagnosis_code: diagnosis,
            probabilities: BTreeMap::from([(diagnosis.to_string(), 1.0)]),
            raw_payload: serde_json::json!({ "diagnosis": diagnosis }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyscreen_core::model::SubtestKind;
    use dyscreen_core::sanitizer;

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: "mock".into(),
            prompt: "anything".into(),
            system_prompt: None,
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn fixed_response() {
        let gateway = MockGateway::with_fixed_response("{}");
        let response = gateway.generate(&request()).await.unwrap();
        assert_eq!(response.content, "{}");
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(gateway.last_request().unwrap().prompt, "anything");
    }

    #[tokio::test]
    async fn sample_battery_is_extractable() {
        let gateway = MockGateway::with_sample_battery();
        let response = gateway.generate(&request()).await.unwrap();
        let document = sanitizer::extract(&response.content).unwrap();
        assert_eq!(document.question_count(), 10);

        let substitution = document.section(SubtestKind::Substitution).unwrap();
        assert_eq!(substitution.questions[0].content["symbol"], "#");
        assert_eq!(substitution.answer_key["mock_sub_1"], "5");
    }

    #[tokio::test]
    async fn unreachable_gateway_fails_retryably() {
        let gateway = MockGateway::unreachable();
        let err = gateway.generate(&request()).await.unwrap_err();
        assert!(!err.downcast_ref::<ProviderError>().unwrap().is_permanent());
    }

    #[tokio::test]
    async fn mock_scorer_records_features() {
        let scorer = MockScorer::answering(1);
        let features = FeatureVector {
            age: 11,
            ..Default::default()
        };
        let output = scorer.score(&features).await.unwrap();
        assert_eq!(output.diagnosis_code, 1);
        assert_eq!(output.probabilities["1"], 1.0);
        assert_eq!(scorer.last_features().unwrap().age, 11);

        assert!(MockScorer::failing().score(&features).await.is_err());
    }
}
