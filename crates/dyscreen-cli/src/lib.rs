//! dyscreen-cli — HTTP API and command-line front end for the screening
//! service.
//!
//! [`build_state`] wires one store into every collaborator slot of the
//! [`ScreeningService`]; [`http::router`] exposes it under `/api/v1`.

pub mod http;

use std::sync::Arc;

use anyhow::{Context, Result};

use dyscreen_core::engine::{ScreeningConfig, ScreeningService};
use dyscreen_core::traits::{
    AiGateway, DiagnosticScorer, IdentityVerifier, QuestionBank, SessionStore, UserDirectory,
};
use dyscreen_providers::mock::MockGateway;
use dyscreen_providers::DyscreenConfig;
use dyscreen_store::{MemoryStore, SqliteStore};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ScreeningService>,
    pub bank: Arc<dyn QuestionBank>,
    pub users: Arc<dyn UserDirectory>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

/// Build the application state around a store that backs the bank, the
/// sessions and the user directory at once.
pub fn build_state<S>(
    store: Arc<S>,
    gateway: Arc<dyn AiGateway>,
    scorer: Arc<dyn DiagnosticScorer>,
    verifier: Arc<dyn IdentityVerifier>,
    config: ScreeningConfig,
) -> AppState
where
    S: QuestionBank + SessionStore + UserDirectory + 'static,
{
    let bank: Arc<dyn QuestionBank> = store.clone();
    let sessions: Arc<dyn SessionStore> = store.clone();
    let users: Arc<dyn UserDirectory> = store;

    let service = ScreeningService::new(gateway, Arc::clone(&bank), sessions, scorer, config);

    AppState {
        service: Arc::new(service),
        bank,
        users,
        verifier,
    }
}

/// Open the configured SQLite database.
pub async fn open_store(config: &DyscreenConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    Ok(Arc::new(store))
}

/// Build the full application state from configuration.
///
/// With `in_memory` the process keeps all data in a [`MemoryStore`] that is
/// lost on exit.
pub async fn state_from_config(config: &DyscreenConfig, in_memory: bool) -> Result<AppState> {
    let gateway = config.default_gateway()?;
    assemble(config, gateway, in_memory).await
}

/// State for commands that only grade or read back sessions.
///
/// No AI provider is needed, so a missing or broken provider section does not
/// block them. Any battery requested through this state comes from the bank.
pub async fn grading_state_from_config(config: &DyscreenConfig) -> Result<AppState> {
    assemble(config, Arc::new(MockGateway::unreachable()), false).await
}

async fn assemble(
    config: &DyscreenConfig,
    gateway: Arc<dyn AiGateway>,
    in_memory: bool,
) -> Result<AppState> {
    let scorer = config.create_scorer()?;
    let verifier: Arc<dyn IdentityVerifier> = Arc::new(config.identity_verifier());
    let screening = config.screening_config();

    tracing::info!(
        gateway = gateway.name(),
        scorer = scorer.name(),
        model = %screening.model,
        "screening service configured"
    );

    if in_memory {
        tracing::info!("using in-memory store, data is lost on exit");
        Ok(build_state(
            Arc::new(MemoryStore::new()),
            gateway,
            scorer,
            verifier,
            screening,
        ))
    } else {
        let store = open_store(config).await?;
        Ok(build_state(store, gateway, scorer, verifier, screening))
    }
}
