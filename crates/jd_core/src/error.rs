use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("External error: {0}")]
    External(#[from] anyhow::Error),
}

impl Error {
    /// Short variant name, used in failure-reason tags and diagnostics file
    /// names where the full message would be too noisy.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "Io",
            Error::Serialization(_) => "Serialization",
            Error::Database(_) => "Database",
            Error::Fetch(_) => "Fetch",
            Error::Model(_) => "Model",
            Error::Transport(_) => "Transport",
            Error::Config(_) => "Config",
            Error::Http(_) => "Http",
            Error::External(_) => "External",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Error::Database("boom".to_string()).kind(), "Database");
        assert_eq!(Error::Model("quota".to_string()).kind(), "Model");
    }
}
