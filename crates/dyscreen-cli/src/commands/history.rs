//! The `dyscreen history` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use dyscreen_core::model::{DiagnosisRecord, HistoryEntry};
use dyscreen_providers::load_config_from;

use super::existing_user;

pub async fn execute(subject: String, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let state = dyscreen_cli::grading_state_from_config(&config).await?;

    let user = existing_user(state.users.as_ref(), &subject).await?;
    let entries = state.service.history(user.user_id).await?;

    if entries.is_empty() {
        println!("No sessions for {subject}.");
        return Ok(());
    }

    println!("{}", history_table(&entries));
    Ok(())
}

fn history_table(entries: &[HistoryEntry]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Session",
        "Started",
        "Questions",
        "Correct",
        "Status",
        "Diagnosis",
        "Score",
    ]);

    for entry in entries {
        let session = &entry.session;
        let correct = match &session.correction_results {
            Some(results) => {
                let correct: u32 = results.values().map(|r| r.correct).sum();
                let total: u32 = results.values().map(|r| r.total).sum();
                format!("{correct}/{total}")
            }
            None => "-".to_string(),
        };
        let (status, class, score) = diagnosis_cells(entry.diagnosis.as_ref());

        table.add_row(vec![
            Cell::new(session.session_id),
            Cell::new(session.created_at.format("%Y-%m-%d %H:%M")),
            Cell::new(session.answer_key_document.question_count()),
            Cell::new(correct),
            Cell::new(status),
            Cell::new(class),
            Cell::new(score),
        ]);
    }

    table
}

fn diagnosis_cells(diagnosis: Option<&DiagnosisRecord>) -> (String, String, String) {
    let Some(record) = diagnosis else {
        return ("not graded".into(), "-".into(), "-".into());
    };
    let class = record
        .diagnosis_class
        .map(|c| c.label().to_string())
        .unwrap_or_else(|| "-".into());
    let score = record
        .final_score
        .map(|s| format!("{:.1}%", s * 100.0))
        .unwrap_or_else(|| "-".into());
    (record.status.to_string(), class, score)
}
