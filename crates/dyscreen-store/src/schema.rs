// Database schema initialization

use sqlx::SqlitePool;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        user_id INTEGER PRIMARY KEY AUTOINCREMENT,
        subject TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL,
        name TEXT NOT NULL,
        picture_url TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS questions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        question_id TEXT NOT NULL UNIQUE,
        subtest_kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        expected_answer TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_questions_kind ON questions(subtest_kind)",
    r#"
    CREATE TABLE IF NOT EXISTS user_tests (
        test_id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        answer_key_document TEXT NOT NULL,
        correction_results TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY(user_id) REFERENCES users(user_id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_user_tests_owner ON user_tests(user_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS ai_scores (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        test_id INTEGER NOT NULL UNIQUE,
        status TEXT NOT NULL,
        diagnosis INTEGER,
        final_score REAL,
        probabilities TEXT NOT NULL,
        raw_response TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(test_id) REFERENCES user_tests(test_id) ON DELETE CASCADE
    )
    "#,
];

pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in TABLES {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
