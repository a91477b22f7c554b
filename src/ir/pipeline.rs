//! Typed data-preprocessing pipeline description.
//!
//! Actions build these structs and serialise them into the
//! `data_preprocessor_config` section. Caller-supplied sections are parsed
//! back through the same types to validate their shape.

use super::Section;
use crate::error::{RecommenderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_DATASET_NAME: &str = "dataset_from_inputs";
pub const QA_TEXT_FIELD: &str = "formatted_qa_data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProcessorSettings {
    #[serde(rename = "type", default = "default_processor_type")]
    pub processor_type: String,
    #[serde(default)]
    pub streaming: bool,
}

fn default_processor_type() -> String {
    "default".to_string()
}

impl Default for DataProcessorSettings {
    fn default() -> Self {
        Self {
            processor_type: default_processor_type(),
            streaming: false,
        }
    }
}

/// Columns dropped after a handler runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSelection {
    Named(String),
    List(Vec<String>),
}

impl ColumnSelection {
    pub fn all() -> Self {
        ColumnSelection::Named("all".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateKwargs {
    pub formatted_text_column_name: String,
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateArguments {
    pub remove_columns: ColumnSelection,
    #[serde(default)]
    pub batched: bool,
    pub fn_kwargs: TemplateKwargs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMaskingKwargs {
    pub max_seq_length: u64,
    pub conversation_column_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMaskingArguments {
    pub remove_columns: ColumnSelection,
    pub fn_kwargs: ChatMaskingKwargs,
}

/// Handlers the recommender knows how to emit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum BuiltinHandler {
    ApplyCustomJinjaTemplate(TemplateArguments),
    TokenizeAndApplyChatTemplateWithMasking(ChatMaskingArguments),
}

/// One transformation step over a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataHandler {
    Builtin(BuiltinHandler),
    Other {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
}

impl DataHandler {
    pub fn name(&self) -> &str {
        match self {
            DataHandler::Builtin(BuiltinHandler::ApplyCustomJinjaTemplate(_)) => "apply_custom_jinja_template",
            DataHandler::Builtin(BuiltinHandler::TokenizeAndApplyChatTemplateWithMasking(_)) => {
                "tokenize_and_apply_chat_template_with_masking"
            }
            DataHandler::Other { name, .. } => name.as_str(),
        }
    }

    /// Render a textual template over the detected input/response columns.
    pub fn render_template(template: impl Into<String>, text_field: impl Into<String>) -> Self {
        DataHandler::Builtin(BuiltinHandler::ApplyCustomJinjaTemplate(TemplateArguments {
            remove_columns: ColumnSelection::all(),
            batched: false,
            fn_kwargs: TemplateKwargs {
                formatted_text_column_name: text_field.into(),
                template: template.into(),
            },
        }))
    }

    /// Tokenize with the model chat template, masking non-response tokens.
    pub fn chat_masking(max_seq_length: u64, conversation_column: impl Into<String>) -> Self {
        DataHandler::Builtin(BuiltinHandler::TokenizeAndApplyChatTemplateWithMasking(
            ChatMaskingArguments {
                remove_columns: ColumnSelection::all(),
                fn_kwargs: ChatMaskingKwargs {
                    max_seq_length,
                    conversation_column_name: conversation_column.into(),
                },
            },
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    #[serde(default)]
    pub data_paths: Vec<String>,
    #[serde(default)]
    pub data_handlers: Vec<DataHandler>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPreprocessorConfig {
    #[serde(default)]
    pub dataprocessor: DataProcessorSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_template: Option<String>,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
    /// Runtime-only: passed to the trainer on the command line
    #[serde(rename = "_dataset_text_field", default, skip_serializing_if = "Option::is_none")]
    pub dataset_text_field: Option<String>,
    /// Runtime-only
    #[serde(rename = "_conversation_column_name", default, skip_serializing_if = "Option::is_none")]
    pub conversation_column_name: Option<String>,
}

impl DataPreprocessorConfig {
    /// A pipeline over one dataset source with one handler.
    pub fn single_dataset(path: impl Into<String>, handler: DataHandler) -> Self {
        Self {
            dataprocessor: DataProcessorSettings::default(),
            chat_template: None,
            datasets: vec![DatasetConfig {
                name: DEFAULT_DATASET_NAME.to_string(),
                data_paths: vec![path.into()],
                data_handlers: vec![handler],
            }],
            dataset_text_field: None,
            conversation_column_name: None,
        }
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.datasets
            .iter()
            .flat_map(|d| d.data_handlers.iter().map(DataHandler::name))
            .collect()
    }

    pub fn to_section(&self) -> Result<Section> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(RecommenderError::InvalidConfig(
                "data preprocessor config did not serialise to a mapping".to_string(),
            )),
        }
    }

    pub fn from_section(section: &Section) -> Result<Self> {
        serde_json::from_value(Value::Object(section.clone()))
            .map_err(|e| RecommenderError::InvalidConfig(format!("data_preprocessor_config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_pipeline_wire_shape() {
        let mut cfg = DataPreprocessorConfig::single_dataset(
            "data/train.jsonl",
            DataHandler::render_template("T", QA_TEXT_FIELD),
        );
        cfg.dataset_text_field = Some(QA_TEXT_FIELD.to_string());

        let section = cfg.to_section().unwrap();
        assert_eq!(
            Value::Object(section),
            json!({
                "dataprocessor": {"type": "default", "streaming": false},
                "datasets": [{
                    "name": "dataset_from_inputs",
                    "data_paths": ["data/train.jsonl"],
                    "data_handlers": [{
                        "name": "apply_custom_jinja_template",
                        "arguments": {
                            "remove_columns": "all",
                            "batched": false,
                            "fn_kwargs": {"formatted_text_column_name": "formatted_qa_data", "template": "T"}
                        }
                    }]
                }],
                "_dataset_text_field": "formatted_qa_data"
            })
        );
    }

    #[test]
    fn test_unknown_handler_is_preserved() {
        let section = json!({
            "datasets": [{
                "name": "d",
                "data_handlers": [{"name": "duplicate_columns", "arguments": {"fn_kwargs": {"old": "a"}}}]
            }]
        });
        let cfg = DataPreprocessorConfig::from_section(section.as_object().unwrap()).unwrap();
        assert_eq!(cfg.handler_names(), vec!["duplicate_columns"]);
    }

    #[test]
    fn test_invalid_shape_rejected() {
        let section = json!({"datasets": "not-a-list"});
        let err = DataPreprocessorConfig::from_section(section.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, RecommenderError::InvalidConfig(_)));
    }

    #[test]
    fn test_chat_handler_round_trips_as_builtin() {
        let handler = DataHandler::chat_masking(1024, "messages");
        let value = serde_json::to_value(&handler).unwrap();
        assert_eq!(value["name"], json!("tokenize_and_apply_chat_template_with_masking"));
        assert_eq!(value["arguments"]["fn_kwargs"]["conversation_column_name"], json!("messages"));

        let back: DataHandler = serde_json::from_value(value).unwrap();
        assert_eq!(back, handler);
    }
}
