//! dyscreen-store — persistence for the question bank, test sessions,
//! diagnoses and users.
//!
//! [`SqliteStore`] is the durable engine; [`MemoryStore`] keeps everything
//! in process for tests and throwaway servers. Both implement
//! `QuestionBank`, `SessionStore` and `UserDirectory`.

pub mod memory;
mod schema;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
