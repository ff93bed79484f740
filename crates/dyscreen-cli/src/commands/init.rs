//! The `dyscreen init` command.

use std::path::Path;

use anyhow::{Context, Result};

pub fn execute() -> Result<()> {
    write_if_absent(Path::new("dyscreen.toml"), SAMPLE_CONFIG)?;

    std::fs::create_dir_all("bank").context("failed to create bank directory")?;
    write_if_absent(Path::new("bank/seed.json"), SEED_BANK)?;

    println!("\nNext steps:");
    println!("  1. Set GEMINI_API_KEY and switch default_provider to \"gemini\" in dyscreen.toml");
    println!("  2. Run: dyscreen seed --file bank/seed.json");
    println!("  3. Run: dyscreen serve");

    Ok(())
}

fn write_if_absent(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        println!("{} already exists, skipping.", path.display());
    } else {
        std::fs::write(path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Created {}", path.display());
    }
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# dyscreen configuration

# "mock" answers with a built-in battery and needs no network access.
default_provider = "mock"
default_model = "gemini-1.5-flash"
temperature = 0.7
max_tokens = 4096
max_retries = 3
retry_delay_ms = 1000
ai_timeout_secs = 60
database_url = "sqlite://dyscreen.db"
echo_answer_key = false

[providers.mock]
type = "mock"

[providers.gemini]
type = "gemini"
api_key = "${GEMINI_API_KEY}"

# Bank questions per subtest when the AI battery is unavailable.
[fallback]
dot = 2
stroop = 2
addition = 2
multiplication = 2
substitution = 2

# Without a url every submission gets the fixed offline diagnosis.
[scorer]
# url = "http://localhost:5000/predict"
timeout_secs = 30

[server]
address = "127.0.0.1:8080"

[[identities]]
token = "dev-token"
subject = "dev-user"
email = "dev@example.com"
name = "Dev User"
"#;

const SEED_BANK: &str = r#"[
  {"question_id": "seed_dot_1", "subtest_kind": "dot", "payload": {"type": "dot_count", "dots": 5}, "expected_answer": "5"},
  {"question_id": "seed_dot_2", "subtest_kind": "dot", "payload": {"type": "dot_count", "dots": 8}, "expected_answer": "8"},
  {"question_id": "seed_dot_3", "subtest_kind": "dot", "payload": {"type": "dot_count", "dots": 3}, "expected_answer": "3"},
  {"question_id": "seed_stroop_1", "subtest_kind": "stroop", "payload": {"type": "choice", "left": 2, "right": 7, "text": "Which number is larger in value?"}, "expected_answer": "7"},
  {"question_id": "seed_stroop_2", "subtest_kind": "stroop", "payload": {"type": "choice", "left": 6, "right": 1, "text": "Which number is larger in value?"}, "expected_answer": "6"},
  {"question_id": "seed_stroop_3", "subtest_kind": "stroop", "payload": {"type": "choice", "left": 4, "right": 9, "text": "Which number is larger in value?"}, "expected_answer": "9"},
  {"question_id": "seed_add_1", "subtest_kind": "addition", "payload": {"type": "text_input", "text": "What is 8 + 5?"}, "expected_answer": "13"},
  {"question_id": "seed_add_2", "subtest_kind": "addition", "payload": {"type": "text_input", "text": "What is 14 + 7?"}, "expected_answer": "21"},
  {"question_id": "seed_add_3", "subtest_kind": "addition", "payload": {"type": "text_input", "text": "What is 26 + 9?"}, "expected_answer": "35"},
  {"question_id": "seed_mul_1", "subtest_kind": "multiplication", "payload": {"type": "text_input", "text": "What is 4 x 6?"}, "expected_answer": "24"},
  {"question_id": "seed_mul_2", "subtest_kind": "multiplication", "payload": {"type": "text_input", "text": "What is 7 x 8?"}, "expected_answer": "56"},
  {"question_id": "seed_mul_3", "subtest_kind": "multiplication", "payload": {"type": "text_input", "text": "What is 9 x 3?"}, "expected_answer": "27"},
  {"question_id": "seed_sub_1", "subtest_kind": "substitution", "payload": {"type": "symbol_digit", "symbol": "%", "key": {"%": 3, "&": 8}}, "expected_answer": "3"},
  {"question_id": "seed_sub_2", "subtest_kind": "substitution", "payload": {"type": "symbol_digit", "symbol": "&", "key": {"%": 3, "&": 8}}, "expected_answer": "8"},
  {"question_id": "seed_sub_3", "subtest_kind": "substitution", "payload": {"type": "symbol_digit", "symbol": "%", "key": {"%": 3, "&": 8}}, "expected_answer": "3"}
]
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use dyscreen_core::model::Question;
    use dyscreen_providers::DyscreenConfig;

    #[test]
    fn sample_config_parses() {
        let config: DyscreenConfig = toml::from_str(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.default_provider, "mock");
        assert!(config.providers.contains_key("gemini"));
        assert_eq!(config.identities.len(), 1);
        assert_eq!(config.server.address, "127.0.0.1:8080");
    }

    #[test]
    fn seed_bank_parses() {
        let questions: Vec<Question> = serde_json::from_str(SEED_BANK).unwrap();
        assert_eq!(questions.len(), 15);
    }
}
