//! End-to-end screening pipeline tests with mock gateways and scorers.
//!
//! These tests drive `start_session` → `submit_test` → `history` through the
//! same wiring the server uses, against both store engines.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use dyscreen_cli::{build_state, AppState};
use dyscreen_core::engine::ScreeningConfig;
use dyscreen_core::error::ScreeningError;
use dyscreen_core::model::{
    BatterySource, CorrectionResult, DiagnosisClass, DiagnosisStatus, Question, SubtestKind,
    Submission, User,
};
use dyscreen_core::traits::{Identity, IdentityVerifier, QuestionBank};
use dyscreen_providers::identity::StaticIdentityVerifier;
use dyscreen_providers::mock::{MockGateway, MockScorer};
use dyscreen_store::{MemoryStore, SqliteStore};

fn fast_config() -> ScreeningConfig {
    ScreeningConfig {
        max_retries: 1,
        retry_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

fn verifier() -> Arc<dyn IdentityVerifier> {
    Arc::new(StaticIdentityVerifier::default())
}

fn memory_state(gateway: MockGateway, scorer: Arc<MockScorer>) -> (Arc<MemoryStore>, AppState) {
    let store = Arc::new(MemoryStore::new());
    let state = build_state(
        Arc::clone(&store),
        Arc::new(gateway),
        scorer,
        verifier(),
        fast_config(),
    );
    (store, state)
}

async fn sqlite_state(
    gateway: MockGateway,
    scorer: Arc<MockScorer>,
) -> (tempfile::TempDir, Arc<SqliteStore>, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("pipeline.db").display());
    let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
    let state = build_state(
        Arc::clone(&store),
        Arc::new(gateway),
        scorer,
        verifier(),
        fast_config(),
    );
    (dir, store, state)
}

async fn register(state: &AppState, subject: &str) -> User {
    state
        .users
        .find_or_create(&Identity {
            subject: subject.into(),
            email: format!("{subject}@example.com"),
            name: subject.into(),
            picture_url: None,
        })
        .await
        .unwrap()
}

fn bank_question(id: &str, kind: SubtestKind, answer: &str) -> Question {
    Question {
        question_id: id.into(),
        subtest_kind: kind,
        payload: json!({ "type": "text_input", "text": format!("question {id}") }),
        expected_answer: answer.into(),
    }
}

fn submission(value: serde_json::Value) -> Submission {
    serde_json::from_value(value).unwrap()
}

// --- AI path ---

#[tokio::test]
async fn ai_battery_is_graded_and_scored() {
    let scorer = Arc::new(MockScorer::answering(1));
    let (_store, state) = memory_state(MockGateway::with_sample_battery(), scorer.clone());
    let user = register(&state, "ada").await;

    let started = state.service.start_session(user.user_id).await.unwrap();
    assert_eq!(started.source, BatterySource::Ai);
    assert_eq!(started.subtests.len(), 6);
    assert!(started.subtests.values().all(|s| s.answer_key.is_none()));

    let answers = submission(json!({
        "simple_reaction_time": {"performance_data": {"median_reaction_time": 310.0, "age": 9.7}},
        "addition": {
            "answers": {"mock_add_1": "21", "mock_add_2": "99"},
            "performance_data": {"median_reaction_time": 1500}
        }
    }));
    let outcome = state
        .service
        .submit_test(started.session_id, user.user_id, &answers)
        .await
        .unwrap();

    assert_eq!(
        outcome.correction_results[&SubtestKind::Addition],
        CorrectionResult {
            correct: 1,
            wrong: 1,
            total: 2
        }
    );
    assert_eq!(outcome.diagnosis.status, DiagnosisStatus::Scored);
    assert_eq!(outcome.diagnosis.diagnosis_class, Some(DiagnosisClass::Dyscalculia));

    let features = scorer.last_features().unwrap();
    assert_eq!(features.age, 9);
    assert_eq!(features.srt, 310.0);
    assert_eq!(features.add_rt, 1500.0);
    assert!((features.add_acc - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn total_is_answer_key_size_regardless_of_submission() {
    let (_store, state) =
        memory_state(MockGateway::with_sample_battery(), Arc::new(MockScorer::answering(0)));
    let user = register(&state, "ada").await;
    let started = state.service.start_session(user.user_id).await.unwrap();

    let answers = submission(json!({
        "dot": {"answers": {"mock_dot_1": "7", "not_a_question": "3", "another": "1"}}
    }));
    let outcome = state
        .service
        .submit_test(started.session_id, user.user_id, &answers)
        .await
        .unwrap();

    for kind in SubtestKind::CONTENT_BEARING {
        assert_eq!(outcome.correction_results[&kind].total, 2, "{kind}");
    }
    assert_eq!(outcome.correction_results[&SubtestKind::Dot].correct, 1);
    assert_eq!(outcome.correction_results[&SubtestKind::Dot].wrong, 1);
    assert_eq!(outcome.correction_results[&SubtestKind::Stroop].wrong, 2);
}

#[tokio::test]
async fn ai_questions_are_banked_once() {
    let (store, state) =
        memory_state(MockGateway::with_sample_battery(), Arc::new(MockScorer::answering(0)));
    let user = register(&state, "ada").await;

    state.service.start_session(user.user_id).await.unwrap();
    state.service.start_session(user.user_id).await.unwrap();

    for kind in SubtestKind::CONTENT_BEARING {
        assert_eq!(store.count(kind).await.unwrap(), 2, "{kind}");
    }
    let banked = store.find("mock_add_1").await.unwrap().unwrap();
    assert_eq!(banked.expected_answer, "21");
}

#[tokio::test]
async fn prose_with_braces_before_json_is_extracted() {
    let response = format!(
        "Here is your set {{as requested}}:\n```json\n{}\n```",
        dyscreen_providers::mock::SAMPLE_BATTERY
    );
    let (_store, state) = memory_state(
        MockGateway::with_fixed_response(&response),
        Arc::new(MockScorer::answering(0)),
    );
    let user = register(&state, "ada").await;

    let started = state.service.start_session(user.user_id).await.unwrap();
    assert_eq!(started.source, BatterySource::Ai);
    assert_eq!(started.subtests[&SubtestKind::Addition].questions.len(), 2);
}

// --- Fallback path ---

#[tokio::test]
async fn malformed_ai_payloads_still_yield_six_subtests() {
    for payload in [
        r#"{"tests": {}}"#,
        r#"{"subtests": {"addition": {"questions": [{"question_id": "a1""#,
        "I'm sorry, I can't help with that.",
    ] {
        let (_store, state) = memory_state(
            MockGateway::with_fixed_response(payload),
            Arc::new(MockScorer::answering(0)),
        );
        let user = register(&state, "ada").await;

        let started = state.service.start_session(user.user_id).await.unwrap();
        assert_eq!(started.source, BatterySource::Fallback, "{payload}");
        let kinds: Vec<SubtestKind> = started.subtests.keys().copied().collect();
        assert_eq!(kinds, SubtestKind::ALL.to_vec(), "{payload}");
    }
}

#[tokio::test]
async fn empty_bank_and_failed_ai_give_empty_sections() {
    let gateway = MockGateway::unreachable();
    let (_store, state) = memory_state(gateway, Arc::new(MockScorer::answering(0)));
    let user = register(&state, "ada").await;

    let started = state.service.start_session(user.user_id).await.unwrap();
    assert_eq!(started.source, BatterySource::Fallback);
    assert_eq!(started.subtests.len(), 6);
    for section in started.subtests.values() {
        assert!(section.questions.is_empty());
    }

    let session = state
        .service
        .history(user.user_id)
        .await
        .unwrap()
        .remove(0)
        .session;
    for kind in SubtestKind::CONTENT_BEARING {
        let section = session.answer_key_document.section(kind).unwrap();
        assert!(section.questions.is_empty());
        assert!(section.answer_key.is_empty());
    }
}

#[tokio::test]
async fn fallback_session_graded_against_bank_answers() {
    let (store, state) =
        memory_state(MockGateway::unreachable(), Arc::new(MockScorer::answering(0)));
    store
        .insert_if_absent(&bank_question("A", SubtestKind::Addition, "4"))
        .await
        .unwrap();
    store
        .insert_if_absent(&bank_question("B", SubtestKind::Addition, "9"))
        .await
        .unwrap();
    let user = register(&state, "ada").await;

    let started = state.service.start_session(user.user_id).await.unwrap();
    assert_eq!(started.subtests[&SubtestKind::Addition].questions.len(), 2);

    let outcome = state
        .service
        .submit_test(started.session_id, user.user_id, &Submission::default())
        .await
        .unwrap();
    assert_eq!(
        outcome.correction_results[&SubtestKind::Addition],
        CorrectionResult {
            correct: 0,
            wrong: 2,
            total: 2
        }
    );
}

#[tokio::test]
async fn fallback_returns_all_when_bank_is_short() {
    let (store, state) =
        memory_state(MockGateway::unreachable(), Arc::new(MockScorer::answering(0)));
    store
        .insert_if_absent(&bank_question("only_dot", SubtestKind::Dot, "6"))
        .await
        .unwrap();
    let user = register(&state, "ada").await;

    let started = state.service.start_session(user.user_id).await.unwrap();
    let dot = &started.subtests[&SubtestKind::Dot];
    assert_eq!(dot.questions.len(), 1);
    assert_eq!(dot.questions[0].question_id, "only_dot");
}

// --- Scoring and ownership ---

#[tokio::test]
async fn scorer_failure_records_pending_diagnosis() {
    let scorer = Arc::new(MockScorer::failing());
    let (_store, state) = memory_state(MockGateway::with_sample_battery(), scorer.clone());
    let user = register(&state, "ada").await;
    let started = state.service.start_session(user.user_id).await.unwrap();

    let outcome = state
        .service
        .submit_test(started.session_id, user.user_id, &Submission::default())
        .await
        .unwrap();

    assert_eq!(scorer.call_count(), 1);
    assert_eq!(outcome.diagnosis.status, DiagnosisStatus::Pending);
    assert!(outcome.diagnosis.diagnosis_class.is_none());

    let history = state.service.history(user.user_id).await.unwrap();
    let diagnosis = history[0].diagnosis.as_ref().unwrap();
    assert_eq!(diagnosis.status, DiagnosisStatus::Pending);
}

#[tokio::test]
async fn foreign_and_unknown_sessions_are_not_found() {
    let (_store, state) =
        memory_state(MockGateway::with_sample_battery(), Arc::new(MockScorer::answering(0)));
    let ada = register(&state, "ada").await;
    let eve = register(&state, "eve").await;
    let started = state.service.start_session(ada.user_id).await.unwrap();

    let err = state
        .service
        .submit_test(started.session_id, eve.user_id, &Submission::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ScreeningError::NotFound));

    let err = state
        .service
        .submit_test(started.session_id + 100, ada.user_id, &Submission::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ScreeningError::NotFound));
}

// --- SQLite engine ---

#[tokio::test]
async fn sqlite_full_flow_with_resubmission() {
    let (_dir, store, state) = sqlite_state(
        MockGateway::with_sample_battery(),
        Arc::new(MockScorer::answering(2)),
    )
    .await;
    let user = register(&state, "ada").await;

    let first = state.service.start_session(user.user_id).await.unwrap();
    let second = state.service.start_session(user.user_id).await.unwrap();
    assert_eq!(store.count(SubtestKind::Addition).await.unwrap(), 2);

    let wrong = submission(json!({"addition": {"answers": {"mock_add_1": "0"}}}));
    let right = submission(json!({"addition": {"answers": {"mock_add_1": "21", "mock_add_2": "13"}}}));

    state
        .service
        .submit_test(first.session_id, user.user_id, &wrong)
        .await
        .unwrap();
    let regraded = state
        .service
        .submit_test(first.session_id, user.user_id, &right)
        .await
        .unwrap();
    assert_eq!(regraded.correction_results[&SubtestKind::Addition].correct, 2);

    let history = state.service.history(user.user_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].session.session_id, second.session_id);
    assert!(history[0].diagnosis.is_none());

    let graded = &history[1];
    assert_eq!(graded.session.session_id, first.session_id);
    let results = graded.session.correction_results.as_ref().unwrap();
    assert_eq!(results[&SubtestKind::Addition].correct, 2);
    let diagnosis = graded.diagnosis.as_ref().unwrap();
    assert_eq!(diagnosis.diagnosis_class, Some(DiagnosisClass::PoorArithmetic));
    assert_eq!(diagnosis.final_score, Some(1.0));
}

#[tokio::test]
async fn sqlite_fallback_uses_seeded_bank() {
    let (_dir, store, state) =
        sqlite_state(MockGateway::unreachable(), Arc::new(MockScorer::answering(0))).await;
    for (id, answer) in [("m1", "12"), ("m2", "42"), ("m3", "9")] {
        store
            .insert_if_absent(&bank_question(id, SubtestKind::Multiplication, answer))
            .await
            .unwrap();
    }
    let user = register(&state, "ada").await;

    let started = state.service.start_session(user.user_id).await.unwrap();
    assert_eq!(started.source, BatterySource::Fallback);
    assert_eq!(started.subtests[&SubtestKind::Multiplication].questions.len(), 2);
    assert!(started.subtests[&SubtestKind::Addition].questions.is_empty());
}
