use serde::{Deserialize, Serialize};
use tracing::warn;

use super::types::Context;

/// One headline with its sentiment score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    /// Headline text
    pub headline: String,
    /// Sentiment in [-1, 1]
    #[serde(default)]
    pub sentiment: f64,
    /// Symbol the article is about, when attributable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

/// News sentiment attached to a cycle's context as the `news` extension.
///
/// Produced by an external aggregator; retrieval failure never fails a
/// cycle, the block is simply absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsContext {
    /// Whether enrichment ran for this cycle
    #[serde(default)]
    pub enabled: bool,
    /// Mean sentiment across articles, in [-1, 1]
    #[serde(default)]
    pub sentiment_avg: f64,
    /// Recent articles, newest first
    #[serde(default)]
    pub articles: Vec<NewsArticle>,
}

impl NewsContext {
    /// Whether there is anything worth rendering into the prompt.
    pub fn has_content(&self) -> bool {
        self.enabled && !self.articles.is_empty()
    }
}

/// Read the news extension off a context, if present and well-formed.
pub fn news_from_context(ctx: &Context) -> Option<NewsContext> {
    let value = ctx.get_extension("news")?;
    match serde_json::from_value::<NewsContext>(value.clone()) {
        Ok(news) => Some(news),
        Err(e) => {
            warn!(error = %e, "malformed news extension ignored");
            None
        }
    }
}

/// Attach a news context to a cycle.
pub fn enrich_context(ctx: &mut Context, news: &NewsContext) {
    match serde_json::to_value(news) {
        Ok(value) => ctx.set_extension("news", value),
        Err(e) => warn!(error = %e, "failed to encode news context"),
    }
}
