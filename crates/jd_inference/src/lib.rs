pub mod diagnostics;
pub mod message;
pub mod models;
pub mod retry;
pub mod sections;
pub mod summarizer;

pub use diagnostics::Diagnostics;
pub use models::create_model;
pub use summarizer::Summarizer;
