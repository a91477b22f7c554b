use super::{ChatTemplateResolver, HubSettings};
use crate::error::{RecommenderError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

const TOKENIZER_CONFIG: &str = "tokenizer_config.json";

/// Reads `chat_template` from a model's `tokenizer_config.json`, either in a
/// local model directory or on the hub.
pub struct HubChatTemplateResolver {
    hub: HubSettings,
}

impl HubChatTemplateResolver {
    pub fn new(hub: HubSettings) -> Self {
        Self { hub }
    }

    fn tokenizer_config_path(&self, model: &str) -> Result<Option<PathBuf>> {
        let local = Path::new(model);
        if local.is_dir() {
            let file = local.join(TOKENIZER_CONFIG);
            return Ok(file.is_file().then_some(file));
        }

        let api = self
            .hub
            .api()
            .map_err(|e| RecommenderError::template(model, e.to_string()))?;
        match api.model(model.to_string()).get(TOKENIZER_CONFIG) {
            Ok(path) => Ok(Some(path)),
            Err(e) => Err(RecommenderError::template(
                model,
                format!("could not fetch {}: {}", TOKENIZER_CONFIG, e),
            )),
        }
    }
}

impl ChatTemplateResolver for HubChatTemplateResolver {
    fn resolve_chat_template(&self, model: &str) -> Result<Option<String>> {
        let Some(path) = self.tokenizer_config_path(model)? else {
            debug!("No {} for model '{}'", TOKENIZER_CONFIG, model);
            return Ok(None);
        };
        let content = std::fs::read_to_string(&path)
            .map_err(|e| RecommenderError::template(model, format!("cannot read {}: {}", TOKENIZER_CONFIG, e)))?;
        let config: Value = serde_json::from_str(&content)
            .map_err(|e| RecommenderError::template(model, format!("malformed {}: {}", TOKENIZER_CONFIG, e)))?;
        extract_chat_template(&config).map_err(|reason| RecommenderError::template(model, reason))
    }
}

/// The `chat_template` field is either a string or a list of named templates;
/// for a list the one named `default` wins, else the first.
pub fn extract_chat_template(config: &Value) -> std::result::Result<Option<String>, String> {
    match config.get("chat_template") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(t)) => Ok(Some(t.clone())),
        Some(Value::Array(entries)) => {
            let template_of = |entry: &Value| entry.get("template").and_then(Value::as_str).map(str::to_string);
            let named_default = entries
                .iter()
                .find(|e| e.get("name").and_then(Value::as_str) == Some("default"));
            match named_default.or_else(|| entries.first()) {
                Some(entry) => template_of(entry)
                    .map(Some)
                    .ok_or_else(|| "chat_template entry has no 'template' string".to_string()),
                None => Ok(None),
            }
        }
        Some(other) => Err(format!("unexpected chat_template value: {}", other)),
    }
}
