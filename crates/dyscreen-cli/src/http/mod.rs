//! JSON API served under `/api/v1`.

pub mod extractors;
pub mod rejections;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use dyscreen_core::engine::{StartedSession, SubmissionOutcome};
use dyscreen_core::model::{HistoryEntry, SessionId, Submission, User};

use crate::AppState;
use extractors::AuthUser;
use rejections::{AppError, ResultExt};

pub fn router(state: AppState) -> Router {
    Router::new().nest("/api/v1", routes()).with_state(state)
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/tests/start", post(start_test))
        .route("/tests/{id}/submit", post(submit_test))
        .route("/tests/history", get(history))
        .route("/users/me", get(me))
}

#[derive(Deserialize)]
struct LoginBody {
    token: String,
}

/// Exchange an identity token for the registered profile, registering the
/// user on first login.
async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> Result<Json<User>, AppError> {
    let Json(body) = body?;

    let identity = state.verifier.verify(&body.token).await.map_err(|e| {
        tracing::info!("login rejected: {e:#}");
        AppError::Unauthorized
    })?;

    let user = state
        .users
        .find_or_create(&identity)
        .await
        .reject("could not register user")?;

    tracing::info!(user_id = user.user_id, "user logged in");
    Ok(Json(user))
}

async fn start_test(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<StartedSession>, AppError> {
    let started = state.service.start_session(user.user_id).await?;
    Ok(Json(started))
}

async fn submit_test(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    id: Result<Path<SessionId>, PathRejection>,
    body: Result<Json<Submission>, JsonRejection>,
) -> Result<Json<SubmissionOutcome>, AppError> {
    let Path(session_id) = id?;
    let Json(submission) = body?;

    let outcome = state
        .service
        .submit_test(session_id, user.user_id, &submission)
        .await?;
    Ok(Json(outcome))
}

async fn history(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    Ok(Json(state.service.history(user.user_id).await?))
}

async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}
