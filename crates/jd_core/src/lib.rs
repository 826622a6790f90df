pub mod config;
pub mod error;
pub mod html;
pub mod models;
pub mod source;
pub mod storage;
pub mod types;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use models::{ChatModel, ModelReply};
pub use source::ArticleSource;
pub use storage::DigestStore;
pub use types::{Article, ArticleCounts, PipelineStats, SummaryBundle, TokenUsage};
