//! Error types for the recommender

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecommenderError {
    /// Dataset could not be located, read or parsed.
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// Chat template is missing or malformed for a chat-shaped dataset.
    #[error("Chat template resolution failed for '{model}': {reason}")]
    TemplateResolution { model: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RecommenderError {
    pub fn data_access(msg: impl Into<String>) -> Self {
        Self::DataAccess(msg.into())
    }

    pub fn template(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TemplateResolution {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Data-access failures are recoverable inside actions; everything else is fatal.
    pub fn is_data_access(&self) -> bool {
        matches!(self, Self::DataAccess(_))
    }
}

pub type Result<T> = std::result::Result<T, RecommenderError>;
