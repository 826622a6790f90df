use std::sync::Arc;

use jd_core::config::Config;
use jd_core::models::ChatModel;
use jd_core::Result;

pub mod gemini;

pub use gemini::GeminiModel;

/// Builds the configured chat model. `None` when no API key is present;
/// the pipeline then short-circuits instead of attempting any calls.
pub fn create_model(config: &Config) -> Result<Option<Arc<dyn ChatModel>>> {
    match config.gemini_api_key.as_deref() {
        Some(key) => Ok(Some(Arc::new(GeminiModel::new(key)?))),
        None => Ok(None),
    }
}
