use hf_hub::api::sync::{Api, ApiBuilder, ApiError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Access settings for the Hugging Face hub
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubSettings {
    pub token: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl HubSettings {
    pub fn api(&self) -> Result<Api, ApiError> {
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(token) = &self.token {
            builder = builder.with_token(Some(token.clone()));
        }
        if let Some(dir) = &self.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        builder.build()
    }
}
