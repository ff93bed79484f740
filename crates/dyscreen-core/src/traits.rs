//! Collaborator traits consumed by the screening pipelines.
//!
//! Gateways and scorers are implemented in `dyscreen-providers`; the bank,
//! session and user stores in `dyscreen-store`. Every seam is an async trait
//! object so tests can substitute fakes for each failure mode.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ScorerError, StoreError};
use crate::model::{
    AnswerKeyDocument, CorrectionResults, DiagnosisRecord, HistoryEntry, Question, SessionId,
    SubtestKind, TestSession, User, UserId,
};
use crate::scoring::FeatureVector;

// ---------------------------------------------------------------------------
// AI gateway
// ---------------------------------------------------------------------------

/// Trait for generative text backends that produce test batteries.
#[async_trait]
pub trait AiGateway: Send + Sync {
    /// Human-readable gateway name (e.g. "gemini").
    fn name(&self) -> &str;

    /// Send one prompt and return the model's raw text.
    ///
    /// Implementations fail with a [`crate::error::ProviderError`] inside the
    /// `anyhow::Error` so callers can classify the failure.
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse>;

    /// List models known to this gateway.
    fn available_models(&self) -> Vec<ModelInfo>;
}

/// Request to generate text from a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier (e.g. "gemini-1.5-flash").
    pub model: String,
    /// The main prompt.
    pub prompt: String,
    /// Optional system instruction.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Response from a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// The raw response text.
    pub content: String,
    /// Model that actually generated the response.
    pub model: String,
    /// Token usage.
    pub token_usage: TokenUsage,
    /// Latency in milliseconds.
    pub latency_ms: u64,
}

/// Token accounting reported by a gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Information about an available model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier.
    pub id: String,
    /// Human-readable model name.
    pub name: String,
    /// Gateway name.
    pub provider: String,
    /// Maximum context window size in tokens.
    pub max_context: u32,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Result of an upsert-if-absent into the question bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

/// Durable collection of previously seen questions keyed by question id.
#[async_trait]
pub trait QuestionBank: Send + Sync {
    /// Look up a question by id.
    async fn find(&self, question_id: &str) -> Result<Option<Question>, StoreError>;

    /// Insert unless the id already exists. Existing entries are never
    /// overwritten; losing a concurrent race reports `AlreadyPresent`.
    async fn insert_if_absent(&self, question: &Question) -> Result<InsertOutcome, StoreError>;

    /// Up to `limit` random questions of one subtest, without replacement.
    async fn sample(&self, kind: SubtestKind, limit: usize) -> Result<Vec<Question>, StoreError>;

    /// Number of stored questions of one subtest.
    async fn count(&self, kind: SubtestKind) -> Result<usize, StoreError>;
}

/// Persistence for test sessions and their diagnoses.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session holding `document` as its answer key.
    async fn create(
        &self,
        owner: UserId,
        document: &AnswerKeyDocument,
    ) -> Result<TestSession, StoreError>;

    /// Read a session. Fails with `NotFound` both when it does not exist and
    /// when `owner` does not own it.
    async fn read(&self, session_id: SessionId, owner: UserId) -> Result<TestSession, StoreError>;

    /// Replace the session's correction results.
    async fn save_correction(
        &self,
        session_id: SessionId,
        results: &CorrectionResults,
    ) -> Result<(), StoreError>;

    /// Insert or replace the session's diagnosis.
    async fn save_diagnosis(&self, record: &DiagnosisRecord) -> Result<(), StoreError>;

    /// The session's diagnosis, if one was recorded.
    async fn diagnosis(&self, session_id: SessionId) -> Result<Option<DiagnosisRecord>, StoreError>;

    /// All sessions of `owner`, newest first, with their diagnoses.
    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<HistoryEntry>, StoreError>;
}

/// Profile claims vouched for by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable subject identifier.
    pub subject: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture_url: Option<String>,
}

/// Maps external identities to internal users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Return the user with this subject, registering it first if needed.
    async fn find_or_create(&self, identity: &Identity) -> Result<User, StoreError>;

    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, StoreError>;

    async fn get(&self, user_id: UserId) -> Result<User, StoreError>;
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Verifies a bearer credential and yields the identity it belongs to.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> anyhow::Result<Identity>;
}

// ---------------------------------------------------------------------------
// Diagnostic scorer
// ---------------------------------------------------------------------------

/// What the diagnostic model returned for one feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerOutput {
    /// Integer class code, see [`crate::model::DiagnosisClass::from_code`].
    pub diagnosis_code: i64,
    /// Class code (as string) → probability.
    pub probabilities: BTreeMap<String, f64>,
    /// The scorer's full response.
    pub raw_payload: Value,
}

/// Opaque external model that turns performance features into a diagnosis.
#[async_trait]
pub trait DiagnosticScorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, features: &FeatureVector) -> Result<ScorerOutput, ScorerError>;
}
