//! # nofx-core
//!
//! The AI-driven trading decision and memory core of an automated crypto
//! futures platform. The crate consumes market data, historical trade
//! outcomes and news sentiment, asks a language model for trading
//! decisions, and wraps that call in the machinery that makes
//! LLM-mediated trading safe to run unattended.
//!
//! ## Pipeline
//!
//! ```text
//! Config -> Model Factory -> Context assembly
//!        -> Memory retrieval -> Compression -> Risk-stage filtering
//!        -> LLM call (circuit breaker) -> Parse -> Validate + dedup
//!        -> Decisions
//! ```
//!
//! ## Layers
//!
//! - [`memory`]: the store abstraction plus the caches and filters built
//!   on it (warmer, compressor, knowledge base, risk formatter, schema
//!   versioning)
//! - [`model`]: language-model clients and the factory with fallback
//! - [`resilience`]: the circuit breaker
//! - [`decision`]: prompt assembly, parsing, validation, the dedup gate
//!   and the memory-augmented composer
//! - [`abtest`]: variant traffic splitting and significance testing
//! - [`metrics`]: counters, latency percentiles and the Prometheus export
//! - [`config`]: typed configuration over a key/value store
//! - [`trader`]: the execution interface the pipeline emits into
//!
//! Services are constructed once at startup and passed by handle
//! (`Arc`); each guards its own state with a dedicated lock. Logging
//! goes through `tracing`; subscriber installation is left to the host
//! binary.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nofx_core::config::{GeminiConfig, InMemoryConfigStore, MemoryConfig};
//! use nofx_core::decision::{Context, DecisionEngine, StaticMarketData};
//! use nofx_core::model::ModelFactory;
//! use nofx_core::resilience::CircuitBreaker;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryConfigStore::new();
//!     let memory_config = MemoryConfig::load(&store).await?;
//!     let gemini_config = GeminiConfig::load(&store).await?;
//!
//!     let factory = ModelFactory::new(gemini_config);
//!     let model = factory.create_with_fallback(
//!         &memory_config.understanding_model,
//!         &memory_config.fallback_model,
//!     )?;
//!
//!     let breaker = Arc::new(CircuitBreaker::with_defaults());
//!     let engine = DecisionEngine::new(model, breaker);
//!
//!     let mut ctx = Context::default();
//!     let provider = Arc::new(StaticMarketData::default());
//!     let decision = engine.full_decision(&mut ctx, provider).await?;
//!     println!("{} decisions", decision.decisions.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// A/B testing of decision variants.
pub mod abtest;
/// Typed configuration loaded from a key/value store.
pub mod config;
/// The decision pipeline.
pub mod decision;
/// Error types and result aliases.
pub mod error;
/// The memory subsystem.
pub mod memory;
/// Aggregated metrics and the Prometheus export.
pub mod metrics;
/// Language-model clients and the factory.
pub mod model;
/// The circuit breaker.
pub mod resilience;
/// The exchange trader interface.
pub mod trader;

pub use config::{GeminiConfig, MemoryConfig};
pub use decision::{Context, Decision, DecisionEngine, FullDecision};
pub use error::{AppError, AppResult};
pub use memory::{Memory, MemoryStore};
pub use model::{LanguageModel, ModelFactory};
pub use resilience::{CircuitBreaker, CircuitState};
