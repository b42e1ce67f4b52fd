//! The decision pipeline: context assembly, prompt building, the model
//! call, response parsing, validation and the deduplication gate, plus
//! the memory-augmented composer.

/// The cycle orchestrator: market prep, model call, parse, validate.
pub mod engine;
/// Deduplication and conflict gate applied after validation.
pub mod gate;
/// News sentiment context extension.
pub mod news;
/// System and user prompt construction.
pub mod prompts;
/// Context, decision and market data types.
pub mod types;
/// Memory-augmented decision composer.
pub mod v2;

pub use engine::{extract_cot_trace, extract_decisions, validate_decision, DecisionEngine};
pub use gate::validate_and_deduplicate;
pub use news::{enrich_context, news_from_context, NewsArticle, NewsContext};
pub use prompts::{build_system_prompt, build_system_prompt_with_custom, build_user_prompt};
pub use types::{
    AccountInfo, Action, CandidateCoin, Context, Decision, FullDecision, MarketData,
    MarketDataProvider, OiTopData, PerformanceSummary, PositionInfo, PositionSide, SourceTag,
    StaticMarketData,
};
pub use v2::{MemoryAugmentedDecision, MemoryRecommendation, V2Metrics};
