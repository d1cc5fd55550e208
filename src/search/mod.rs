//! Search: query parsing and synonym expansion, lexical scoring, country
//! filtering, and the lookup / search-all orchestration.

pub mod country;
pub mod engine;
pub mod query;
pub mod scorer;

pub use engine::{AggregateReport, EngineError, LookupReport, LookupRequest, SearchAllRequest, TradeSearch};
