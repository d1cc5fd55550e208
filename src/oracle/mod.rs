//! Text-generation oracle: the Gemini client plus the two consumers built on
//! top of it, semantic reranking and trade summaries.

pub mod client;
pub mod rerank;
pub mod summary;
mod types;

pub use client::{GeminiClient, OracleError, TextOracle};
