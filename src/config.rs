//! Recommender settings
//!
//! Loaded from an optional YAML file, then overridden from the environment
//! (a `.env` file is honoured).

use crate::collaborators::HubSettings;
use crate::error::Result;
use crate::heuristics::{
    owned, ChatShape, QaShape, TokenizedShape, DEFAULT_CHAT_KEYS, DEFAULT_CONTENT_KEYS, DEFAULT_QA_INPUT_KEYS,
    DEFAULT_QA_OUTPUT_KEYS, DEFAULT_ROLE_KEYS, DEFAULT_TOKENIZED_KEYS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_MAX_SEQ_LENGTH: u64 = 2048;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommenderSettings {
    /// Root directory for rendered configs
    pub output_dir: PathBuf,
    pub default_max_seq_length: u64,
    pub qa_input_keys: Vec<String>,
    pub qa_output_keys: Vec<String>,
    pub chat_keys: Vec<String>,
    pub chat_role_keys: Vec<String>,
    pub chat_content_keys: Vec<String>,
    pub tokenized_keys: Vec<String>,
    pub hf_token: Option<String>,
    pub hub_cache_dir: Option<PathBuf>,
}

impl Default for RecommenderSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("out/fms_final"),
            default_max_seq_length: DEFAULT_MAX_SEQ_LENGTH,
            qa_input_keys: owned(DEFAULT_QA_INPUT_KEYS),
            qa_output_keys: owned(DEFAULT_QA_OUTPUT_KEYS),
            chat_keys: owned(DEFAULT_CHAT_KEYS),
            chat_role_keys: owned(DEFAULT_ROLE_KEYS),
            chat_content_keys: owned(DEFAULT_CONTENT_KEYS),
            tokenized_keys: owned(DEFAULT_TOKENIZED_KEYS),
            hf_token: None,
            hub_cache_dir: None,
        }
    }
}

impl RecommenderSettings {
    /// Load settings: YAML file if it exists, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut settings = match path {
            Some(p) if p.exists() => {
                debug!("Loading recommender settings from {:?}", p);
                Self::from_yaml_str(&std::fs::read_to_string(p)?)?
            }
            Some(p) => {
                warn!("Settings file {:?} not found, using defaults", p);
                Self::default()
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `RECOMMENDER_OUTPUT_DIR`, `RECOMMENDER_MAX_SEQ_LENGTH`, `HF_TOKEN` and `HF_HOME`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("RECOMMENDER_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("RECOMMENDER_MAX_SEQ_LENGTH") {
            match raw.parse() {
                Ok(len) => self.default_max_seq_length = len,
                Err(_) => warn!("Ignoring invalid RECOMMENDER_MAX_SEQ_LENGTH={}", raw),
            }
        }
        if let Some(token) = lookup("HF_TOKEN").filter(|t| !t.is_empty()) {
            self.hf_token = Some(token);
        }
        if self.hub_cache_dir.is_none() {
            if let Some(home) = lookup("HF_HOME") {
                self.hub_cache_dir = Some(PathBuf::from(home).join("hub"));
            }
        }
    }

    pub fn qa_shape(&self) -> QaShape {
        QaShape::new(self.qa_input_keys.clone(), self.qa_output_keys.clone())
    }

    pub fn chat_shape(&self) -> ChatShape {
        ChatShape::new(
            self.chat_keys.clone(),
            self.chat_role_keys.clone(),
            self.chat_content_keys.clone(),
        )
    }

    pub fn tokenized_shape(&self) -> TokenizedShape {
        TokenizedShape::new(self.tokenized_keys.clone())
    }

    pub fn hub(&self) -> HubSettings {
        HubSettings {
            token: self.hf_token.clone(),
            cache_dir: self.hub_cache_dir.clone(),
        }
    }
}
