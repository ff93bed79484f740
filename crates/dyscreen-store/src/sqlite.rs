//! SQLite-backed store.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use dyscreen_core::error::StoreError;
use dyscreen_core::model::{
    AnswerKeyDocument, CorrectionResults, DiagnosisClass, DiagnosisRecord, HistoryEntry, Question,
    SessionId, SubtestKind, TestSession, User, UserId,
};
use dyscreen_core::traits::{Identity, InsertOutcome, QuestionBank, SessionStore, UserDirectory};

use crate::schema;

const SESSION_COLUMNS: &str =
    "t.test_id, t.user_id, t.answer_key_document, t.correction_results, t.created_at";

const SCORE_COLUMNS: &str = "s.status AS score_status, s.diagnosis, s.final_score, \
     s.probabilities, s.raw_response, s.created_at AS score_created_at";

/// Question bank, sessions and users in one SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url: {url}"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // Every connection to `:memory:` is its own database; keep exactly one.
        let in_memory = url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database: {url}"))?;

        let one: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&pool)
            .await
            .context("connection check failed")?;
        anyhow::ensure!(one == 1, "connection check failed");

        schema::create_schema(&pool)
            .await
            .context("failed to create schema")?;

        tracing::info!("database connection has been verified");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.into())
}

fn decode_json<T: serde::de::DeserializeOwned>(column: &str, text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Backend(e.into()))
}

fn question_from_row(row: &SqliteRow) -> Result<Question, StoreError> {
    let kind: String = row.try_get("subtest_kind").map_err(backend)?;
    let payload: String = row.try_get("payload").map_err(backend)?;
    Ok(Question {
        question_id: row.try_get("question_id").map_err(backend)?,
        subtest_kind: kind.parse::<SubtestKind>().map_err(StoreError::Corrupt)?,
        payload: decode_json("payload", &payload)?,
        expected_answer: row.try_get("expected_answer").map_err(backend)?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<TestSession, StoreError> {
    let document: String = row.try_get("answer_key_document").map_err(backend)?;
    let results: Option<String> = row.try_get("correction_results").map_err(backend)?;
    Ok(TestSession {
        session_id: row.try_get("test_id").map_err(backend)?,
        owner_user_id: row.try_get("user_id").map_err(backend)?,
        answer_key_document: decode_json::<AnswerKeyDocument>("answer_key_document", &document)?,
        correction_results: results
            .map(|r| decode_json::<CorrectionResults>("correction_results", &r))
            .transpose()?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

/// Decode the `ai_scores` columns of a row; `None` when the row has no score
/// (left join miss).
fn diagnosis_from_row(
    row: &SqliteRow,
    session_id: SessionId,
) -> Result<Option<DiagnosisRecord>, StoreError> {
    let Some(status) = row
        .try_get::<Option<String>, _>("score_status")
        .map_err(backend)?
    else {
        return Ok(None);
    };

    let code: Option<i64> = row.try_get("diagnosis").map_err(backend)?;
    let probabilities: String = row.try_get("probabilities").map_err(backend)?;
    let raw: String = row.try_get("raw_response").map_err(backend)?;
    let created_at: DateTime<Utc> = row.try_get("score_created_at").map_err(backend)?;

    Ok(Some(DiagnosisRecord {
        session_id,
        status: status.parse().map_err(StoreError::Corrupt)?,
        diagnosis_class: code.and_then(DiagnosisClass::from_code),
        final_score: row.try_get("final_score").map_err(backend)?,
        probability_vector: decode_json("probabilities", &probabilities)?,
        raw_payload: decode_json("raw_response", &raw)?,
        created_at,
    }))
}

fn user_from_row(row: &SqliteRow) -> Result<User, StoreError> {
    Ok(User {
        user_id: row.try_get("user_id").map_err(backend)?,
        subject: row.try_get("subject").map_err(backend)?,
        email: row.try_get("email").map_err(backend)?,
        name: row.try_get("name").map_err(backend)?,
        picture_url: row.try_get("picture_url").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

#[async_trait]
impl QuestionBank for SqliteStore {
    async fn find(&self, question_id: &str) -> Result<Option<Question>, StoreError> {
        let row = sqlx::query(
            "SELECT question_id, subtest_kind, payload, expected_answer FROM questions WHERE question_id = ?",
        )
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(question_from_row).transpose()
    }

    async fn insert_if_absent(&self, question: &Question) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO questions (question_id, subtest_kind, payload, expected_answer, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(question_id) DO NOTHING
            "#,
        )
        .bind(&question.question_id)
        .bind(question.subtest_kind.as_str())
        .bind(encode_json(&question.payload)?)
        .bind(&question.expected_answer)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(if result.rows_affected() == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyPresent
        })
    }

    async fn sample(&self, kind: SubtestKind, limit: usize) -> Result<Vec<Question>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT question_id, subtest_kind, payload, expected_answer
            FROM questions
            WHERE subtest_kind = ?
            ORDER BY RANDOM()
            LIMIT ?
            "#,
        )
        .bind(kind.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(question_from_row).collect()
    }

    async fn count(&self, kind: SubtestKind) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE subtest_kind = ?")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(count as usize)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create(
        &self,
        owner: UserId,
        document: &AnswerKeyDocument,
    ) -> Result<TestSession, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO user_tests (user_id, answer_key_document, created_at) VALUES (?, ?, ?)",
        )
        .bind(owner)
        .bind(encode_json(document)?)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(TestSession {
            session_id: result.last_insert_rowid(),
            owner_user_id: owner,
            answer_key_document: document.clone(),
            correction_results: None,
            created_at,
        })
    }

    async fn read(&self, session_id: SessionId, owner: UserId) -> Result<TestSession, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM user_tests t WHERE t.test_id = ? AND t.user_id = ?"
        ))
        .bind(session_id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?;

        session_from_row(&row)
    }

    async fn save_correction(
        &self,
        session_id: SessionId,
        results: &CorrectionResults,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE user_tests SET correction_results = ? WHERE test_id = ?")
            .bind(encode_json(results)?)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn save_diagnosis(&self, record: &DiagnosisRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ai_scores
                (test_id, status, diagnosis, final_score, probabilities, raw_response, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(test_id) DO UPDATE SET
                status = excluded.status,
                diagnosis = excluded.diagnosis,
                final_score = excluded.final_score,
                probabilities = excluded.probabilities,
                raw_response = excluded.raw_response,
                created_at = excluded.created_at
            "#,
        )
        .bind(record.session_id)
        .bind(record.status.to_string())
        .bind(record.diagnosis_class.map(|c| c.code()))
        .bind(record.final_score)
        .bind(encode_json(&record.probability_vector)?)
        .bind(encode_json(&record.raw_payload)?)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn diagnosis(&self, session_id: SessionId) -> Result<Option<DiagnosisRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SCORE_COLUMNS} FROM ai_scores s WHERE s.test_id = ?"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => diagnosis_from_row(&row, session_id),
            None => Ok(None),
        }
    }

    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS}, {SCORE_COLUMNS}
            FROM user_tests t
            LEFT JOIN ai_scores s ON s.test_id = t.test_id
            WHERE t.user_id = ?
            ORDER BY t.created_at DESC, t.test_id DESC
            "#
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|row| {
                let session = session_from_row(row)?;
                let diagnosis = diagnosis_from_row(row, session.session_id)?;
                Ok(HistoryEntry { session, diagnosis })
            })
            .collect()
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn find_or_create(&self, identity: &Identity) -> Result<User, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (subject, email, name, picture_url, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(subject) DO NOTHING
            "#,
        )
        .bind(&identity.subject)
        .bind(&identity.email)
        .bind(&identity.name)
        .bind(&identity.picture_url)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            tracing::info!(subject = %identity.subject, "registered new user");
        }

        self.find_by_subject(&identity.subject)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, subject, email, name, picture_url, created_at FROM users WHERE subject = ?",
        )
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn get(&self, user_id: UserId) -> Result<User, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, subject, email, name, picture_url, created_at FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound)?;

        user_from_row(&row)
    }
}
