//! Screening service orchestrator.
//!
//! Runs the battery pipeline (AI generation with retries, extraction, bank
//! recording, bank fallback) on session start and the grading pipeline
//! (correction, feature extraction, scoring) on submission.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::bank::BankWriter;
use crate::correction;
use crate::error::{GenerationError, ProviderError, ScreeningError};
use crate::fallback::{FallbackComposer, FallbackPolicy};
use crate::model::{
    AnswerKeyDocument, BatterySource, CorrectionResults, DiagnosisRecord, HistoryEntry,
    SectionView, SessionId, SubtestKind, Submission, UserId,
};
use crate::prompt::{DEFAULT_BATTERY_PROMPT, DEFAULT_SYSTEM_PROMPT};
use crate::sanitizer;
use crate::scoring::{FeatureVector, ScoringAdapter};
use crate::traits::{
    AiGateway, DiagnosticScorer, GenerateRequest, GenerateResponse, QuestionBank, SessionStore,
};

/// Upper bound for the exponential retry backoff.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Configuration for the screening service.
#[derive(Debug, Clone)]
pub struct ScreeningConfig {
    /// Model identifier passed to the gateway.
    pub model: String,
    /// Battery generation prompt.
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Retries after the first failed gateway call.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_delay: Duration,
    /// Bound on a single gateway call.
    pub ai_timeout: Duration,
    /// Bound on a single scorer call.
    pub scorer_timeout: Duration,
    pub fallback: FallbackPolicy,
    /// Return answer keys to the client on session start.
    pub echo_answer_key: bool,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            prompt: DEFAULT_BATTERY_PROMPT.to_string(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: 4096,
            temperature: 0.7,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            ai_timeout: Duration::from_secs(60),
            scorer_timeout: Duration::from_secs(30),
            fallback: FallbackPolicy::default(),
            echo_answer_key: false,
        }
    }
}

/// Response of [`ScreeningService::start_session`].
#[derive(Debug, Clone, Serialize)]
pub struct StartedSession {
    pub session_id: SessionId,
    pub source: BatterySource,
    pub subtests: std::collections::BTreeMap<SubtestKind, SectionView>,
}

/// Response of [`ScreeningService::submit_test`].
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub session_id: SessionId,
    pub correction_results: CorrectionResults,
    pub features: FeatureVector,
    pub diagnosis: DiagnosisRecord,
}

/// The screening service.
pub struct ScreeningService {
    gateway: Arc<dyn AiGateway>,
    bank: Arc<dyn QuestionBank>,
    sessions: Arc<dyn SessionStore>,
    scoring: ScoringAdapter,
    config: ScreeningConfig,
}

impl ScreeningService {
    pub fn new(
        gateway: Arc<dyn AiGateway>,
        bank: Arc<dyn QuestionBank>,
        sessions: Arc<dyn SessionStore>,
        scorer: Arc<dyn DiagnosticScorer>,
        config: ScreeningConfig,
    ) -> Self {
        Self {
            gateway,
            bank,
            sessions,
            scoring: ScoringAdapter::new(scorer, config.scorer_timeout),
            config,
        }
    }

    pub fn config(&self) -> &ScreeningConfig {
        &self.config
    }

    /// Obtain a battery for `user_id` and store it as the session's oracle.
    ///
    /// Generation problems never surface here: they switch to the bank
    /// fallback. Only a failure to persist the session is an error.
    pub async fn start_session(&self, user_id: UserId) -> Result<StartedSession, ScreeningError> {
        let (document, source) = self.generate_battery().await;

        let session = self
            .sessions
            .create(user_id, &document)
            .await
            .map_err(|e| {
                tracing::error!(user_id, "failed to persist test session: {e}");
                ScreeningError::SessionPersist(e)
            })?;

        tracing::info!(
            session_id = session.session_id,
            user_id,
            %source,
            questions = document.question_count(),
            "test session started"
        );

        Ok(StartedSession {
            session_id: session.session_id,
            source,
            subtests: document.to_view(self.config.echo_answer_key),
        })
    }

    /// Grade a submission against the stored answer key and score it.
    ///
    /// Resubmitting replaces earlier results and the earlier diagnosis.
    pub async fn submit_test(
        &self,
        session_id: SessionId,
        user_id: UserId,
        submission: &Submission,
    ) -> Result<SubmissionOutcome, ScreeningError> {
        let session = self.sessions.read(session_id, user_id).await?;
        if session.correction_results.is_some() {
            tracing::warn!(session_id, "session already graded, overwriting previous results");
        }

        let correction_results = correction::correct(&session.answer_key_document, submission);
        self.sessions
            .save_correction(session_id, &correction_results)
            .await
            .map_err(|source| ScreeningError::ResultPersist { session_id, source })?;

        let features = FeatureVector::from_results(&correction_results, submission);
        let diagnosis = self.scoring.score(session_id, &features).await;
        self.sessions
            .save_diagnosis(&diagnosis)
            .await
            .map_err(|source| ScreeningError::ResultPersist { session_id, source })?;

        Ok(SubmissionOutcome {
            session_id,
            correction_results,
            features,
            diagnosis,
        })
    }

    /// The user's sessions, newest first.
    pub async fn history(&self, user_id: UserId) -> Result<Vec<HistoryEntry>, ScreeningError> {
        Ok(self.sessions.list_for_owner(user_id).await?)
    }

    /// AI battery if the whole AI chain succeeds, otherwise a bank battery.
    pub async fn generate_battery(&self) -> (AnswerKeyDocument, BatterySource) {
        match self.ai_battery().await {
            Ok(document) => {
                BankWriter::new(Arc::clone(&self.bank)).record(&document).await;
                (document, BatterySource::Ai)
            }
            Err(e) => {
                tracing::warn!("AI battery unavailable, composing from question bank: {e}");
                let composer =
                    FallbackComposer::new(Arc::clone(&self.bank), self.config.fallback.clone());
                (composer.compose().await, BatterySource::Fallback)
            }
        }
    }

    async fn ai_battery(&self) -> Result<AnswerKeyDocument, GenerationError> {
        let response = self.call_gateway().await?;
        tracing::debug!(
            model = %response.model,
            latency_ms = response.latency_ms,
            tokens = response.token_usage.total_tokens,
            "AI battery received"
        );
        sanitizer::extract(&response.content)
    }

    /// One gateway call per attempt, each under `ai_timeout`, with
    /// exponential backoff between attempts.
    async fn call_gateway(&self) -> Result<GenerateResponse, GenerationError> {
        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: self.config.prompt.clone(),
            system_prompt: self.config.system_prompt.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let start = Instant::now();
        let mut last_error = None;
        let mut retry_delay = self.config.retry_delay;
        for retry in 0..=self.config.max_retries {
            if retry > 0 {
                tokio::time::sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
            }

            let error = match tokio::time::timeout(
                self.config.ai_timeout,
                self.gateway.generate(&request),
            )
            .await
            {
                Ok(Ok(response)) if response.content.trim().is_empty() => {
                    ProviderError::EmptyResponse.to_string()
                }
                Ok(Ok(response)) => {
                    tracing::debug!(
                        gateway = self.gateway.name(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "gateway call succeeded after {} attempt(s)",
                        retry + 1
                    );
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    if let Some(provider_error) = e.downcast_ref::<ProviderError>() {
                        if provider_error.is_permanent() {
                            return Err(GenerationError::Upstream(format!("{e:#}")));
                        }
                        // Honor the provider's retry-after hint, within the backoff cap
                        if let Some(ms) = provider_error.retry_after_ms() {
                            retry_delay = Duration::from_millis(ms).min(MAX_RETRY_DELAY);
                        }
                    }
                    format!("{e:#}")
                }
                Err(_) => ProviderError::Timeout(self.config.ai_timeout.as_secs()).to_string(),
            };

            tracing::warn!(
                gateway = self.gateway.name(),
                attempt = retry + 1,
                "AI call failed: {error}"
            );
            last_error = Some(error);
        }

        Err(GenerationError::Upstream(
            last_error.unwrap_or_else(|| "no attempt made".to_string()),
        ))
    }
}
