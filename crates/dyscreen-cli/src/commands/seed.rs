//! The `dyscreen seed` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use dyscreen_core::bank::BankWriter;
use dyscreen_core::model::{Question, SubtestKind};
use dyscreen_core::traits::QuestionBank;
use dyscreen_providers::load_config_from;

pub async fn execute(file: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read seed file: {}", file.display()))?;
    let questions: Vec<Question> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse seed file: {}", file.display()))?;

    let config = load_config_from(config_path.as_deref())?;
    let bank: Arc<dyn QuestionBank> = dyscreen_cli::open_store(&config).await?;

    let report = BankWriter::new(Arc::clone(&bank))
        .write_all(&questions)
        .await;

    println!(
        "Imported {} questions ({} already present, {} failed) from {}",
        report.inserted,
        report.skipped,
        report.failed,
        file.display()
    );

    for kind in SubtestKind::CONTENT_BEARING {
        let count = bank.count(kind).await?;
        println!("  {kind}: {count} in bank");
    }

    if report.failed > 0 {
        anyhow::bail!("{} questions could not be written", report.failed);
    }
    Ok(())
}
