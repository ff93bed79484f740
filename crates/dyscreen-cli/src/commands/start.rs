//! The `dyscreen start` command.

use std::path::PathBuf;

use anyhow::Result;

use dyscreen_providers::load_config_from;

use super::register_local_user;

pub async fn execute(subject: String, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let state = dyscreen_cli::state_from_config(&config, false).await?;

    let user = register_local_user(state.users.as_ref(), &subject).await?;
    let started = state.service.start_session(user.user_id).await?;

    eprintln!(
        "Started session {} for {} ({} battery)",
        started.session_id, user.subject, started.source
    );
    println!("{}", serde_json::to_string_pretty(&started)?);
    Ok(())
}
