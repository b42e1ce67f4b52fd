//! Language-model clients and the factory that selects between them.

/// Name-keyed client cache with primary/fallback selection.
pub mod factory;
/// Google Gemini client.
pub mod gemini;
/// Configurable test double.
pub mod mock;
/// The model trait and metadata types.
pub mod types;

pub use factory::ModelFactory;
pub use gemini::GeminiModel;
pub use mock::{MockCallRecord, MockModel};
pub use types::{LanguageModel, ModelInfo};
