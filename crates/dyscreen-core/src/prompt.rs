//! Built-in generation prompt.

/// Prompt asking the model for a complete six-subtest battery as JSON.
///
/// Can be replaced through the `prompt` configuration key; any replacement
/// must still ask for the same `subtests` document shape.
pub const DEFAULT_BATTERY_PROMPT: &str = r#"Create one set of test items for screening symptoms of dyscalculia, made of 6 subtests: simple_reaction_time, dot, stroop, addition, multiplication and substitution.

The output MUST be a single JSON object with one top-level key "subtests".
Every subtest object MUST have two keys: "questions" and "answer_key".
Every item in a "questions" array MUST have a "question_id" key whose value is a unique string.

- For the subtest without questions (simple_reaction_time), "questions" must be an empty array [] and "answer_key" an empty object {}.
- For subtests with questions, "questions" must be an array of objects, and "answer_key" must be an object whose keys are the matching "question_id" values.

Create 2 questions for each of the subtests "dot", "stroop", "addition", "multiplication" and "substitution".

Required format example:
{
  "subtests": {
    "addition": {
        "questions": [
            {"question_id": "add_1", "type": "text_input", "text": "What is 12 + 9?"},
            {"question_id": "add_2", "type": "text_input", "text": "What is 7 + 6?"}
        ],
        "answer_key": {
            "add_1": "21",
            "add_2": "13"
        }
    }
  }
}"#;

/// System instruction sent alongside the battery prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You write assessment items for a numeracy screening test. Respond with JSON only.";
