//! dyscreen-core — Battery generation, fallback, correction and scoring.
//!
//! This crate defines the assessment data model, the collaborator traits
//! (AI gateway, question bank, session store, diagnostic scorer) and the
//! pipelines that turn a generative response or a bank sample into a
//! six-subtest battery, and a submission into a graded diagnosis.

pub mod bank;
pub mod correction;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod model;
pub mod prompt;
pub mod sanitizer;
pub mod scoring;
pub mod traits;
