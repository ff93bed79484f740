//! Process-local store used by tests and `serve --in-memory`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;

use dyscreen_core::error::StoreError;
use dyscreen_core::model::{
    AnswerKeyDocument, CorrectionResults, DiagnosisRecord, HistoryEntry, Question, SessionId,
    SubtestKind, TestSession, User, UserId,
};
use dyscreen_core::traits::{Identity, InsertOutcome, QuestionBank, SessionStore, UserDirectory};

#[derive(Default)]
struct Inner {
    questions: HashMap<String, Question>,
    sessions: BTreeMap<SessionId, TestSession>,
    diagnoses: HashMap<SessionId, DiagnosisRecord>,
    users: BTreeMap<UserId, User>,
    next_session_id: SessionId,
    next_user_id: UserId,
}

/// In-memory implementation of every store trait. Nothing survives the
/// process.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store lock poisoned")))
    }
}

#[async_trait]
impl QuestionBank for MemoryStore {
    async fn find(&self, question_id: &str) -> Result<Option<Question>, StoreError> {
        Ok(self.lock()?.questions.get(question_id).cloned())
    }

    async fn insert_if_absent(&self, question: &Question) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.lock()?;
        if inner.questions.contains_key(&question.question_id) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        inner
            .questions
            .insert(question.question_id.clone(), question.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn sample(&self, kind: SubtestKind, limit: usize) -> Result<Vec<Question>, StoreError> {
        let inner = self.lock()?;
        let candidates: Vec<&Question> = inner
            .questions
            .values()
            .filter(|q| q.subtest_kind == kind)
            .collect();
        Ok(candidates
            .choose_multiple(&mut rand::thread_rng(), limit)
            .map(|q| (*q).clone())
            .collect())
    }

    async fn count(&self, kind: SubtestKind) -> Result<usize, StoreError> {
        Ok(self
            .lock()?
            .questions
            .values()
            .filter(|q| q.subtest_kind == kind)
            .count())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(
        &self,
        owner: UserId,
        document: &AnswerKeyDocument,
    ) -> Result<TestSession, StoreError> {
        let mut inner = self.lock()?;
        inner.next_session_id += 1;
        let session = TestSession {
            session_id: inner.next_session_id,
            owner_user_id: owner,
            answer_key_document: document.clone(),
            correction_results: None,
            created_at: Utc::now(),
        };
        inner.sessions.insert(session.session_id, session.clone());
        Ok(session)
    }

    async fn read(&self, session_id: SessionId, owner: UserId) -> Result<TestSession, StoreError> {
        self.lock()?
            .sessions
            .get(&session_id)
            .filter(|s| s.owner_user_id == owner)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn save_correction(
        &self,
        session_id: SessionId,
        results: &CorrectionResults,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound)?;
        session.correction_results = Some(results.clone());
        Ok(())
    }

    async fn save_diagnosis(&self, record: &DiagnosisRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.sessions.contains_key(&record.session_id) {
            return Err(StoreError::NotFound);
        }
        inner.diagnoses.insert(record.session_id, record.clone());
        Ok(())
    }

    async fn diagnosis(&self, session_id: SessionId) -> Result<Option<DiagnosisRecord>, StoreError> {
        Ok(self.lock()?.diagnoses.get(&session_id).cloned())
    }

    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<HistoryEntry>, StoreError> {
        let inner = self.lock()?;
        // Ids grow monotonically, so reverse id order is newest first.
        Ok(inner
            .sessions
            .values()
            .rev()
            .filter(|s| s.owner_user_id == owner)
            .map(|s| HistoryEntry {
                session: s.clone(),
                diagnosis: inner.diagnoses.get(&s.session_id).cloned(),
            })
            .collect())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_or_create(&self, identity: &Identity) -> Result<User, StoreError> {
        let mut inner = self.lock()?;
        if let Some(user) = inner.users.values().find(|u| u.subject == identity.subject) {
            return Ok(user.clone());
        }

        inner.next_user_id += 1;
        let user = User {
            user_id: inner.next_user_id,
            subject: identity.subject.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
            picture_url: identity.picture_url.clone(),
            created_at: Utc::now(),
        };
        inner.users.insert(user.user_id, user.clone());
        tracing::info!(subject = %identity.subject, "registered new user");
        Ok(user)
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.subject == subject)
            .cloned())
    }

    async fn get(&self, user_id: UserId) -> Result<User, StoreError> {
        self.lock()?
            .users
            .get(&user_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}
