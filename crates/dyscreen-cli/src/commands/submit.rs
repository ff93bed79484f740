//! The `dyscreen submit` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use dyscreen_core::model::{SessionId, Submission};
use dyscreen_providers::load_config_from;

use super::existing_user;

pub async fn execute(
    session_id: SessionId,
    subject: String,
    answers_path: PathBuf,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let content = std::fs::read_to_string(&answers_path)
        .with_context(|| format!("failed to read answers: {}", answers_path.display()))?;
    let submission: Submission = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse answers: {}", answers_path.display()))?;

    let config = load_config_from(config_path.as_deref())?;
    let state = dyscreen_cli::grading_state_from_config(&config).await?;

    let user = existing_user(state.users.as_ref(), &subject).await?;
    let outcome = state
        .service
        .submit_test(session_id, user.user_id, &submission)
        .await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
