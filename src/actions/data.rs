//! Data format actions
//!
//! Rewrite the data-preprocessing section so the trainer receives text it
//! can consume: QA records get a rendering template, chat records get the
//! model's chat template with response-only masking. Records that already
//! carry tokenizer output are left alone.

use super::{Action, Capability, Dependencies};
use crate::collaborators::Collaborators;
use crate::config::RecommenderSettings;
use crate::error::{RecommenderError, Result};
use crate::heuristics::{ChatShape, QaShape, Sample, Shape, TokenizedShape};
use crate::ir::pipeline::QA_TEXT_FIELD;
use crate::ir::{Comment, ConfigurationSnapshot, DataHandler, DataPreprocessorConfig};
use crate::utils::template::{escape_newlines_in_quoted, wrap_raw};
use crate::utils::truncate::{preview, DEFAULT_PREVIEW_BYTES};
use std::sync::Arc;
use tracing::{debug, info};

fn data_dependencies() -> Dependencies {
    Dependencies {
        training_config: true,
        dataset: true,
        ..Default::default()
    }
}

fn dataset_path(ir: &ConfigurationSnapshot) -> Result<&str> {
    ir.training_data_path()
        .ok_or_else(|| RecommenderError::InvalidConfig("training_data_path is not configured".to_string()))
}

/// Template combining the detected input and response columns
pub fn qa_template(input: &str, output: &str) -> String {
    format!(
        "\"### Input: {{{{ {} }}}}\\n\\n### Response: {{{{ {} }}}}\"",
        input, output
    )
}

/// Formats plain prompt/response records through a text template
pub struct ApplyQaFormat {
    shape: QaShape,
    tokenized: TokenizedShape,
}

impl ApplyQaFormat {
    pub fn new(shape: QaShape, tokenized: TokenizedShape) -> Self {
        Self { shape, tokenized }
    }

    pub fn from_settings(settings: &RecommenderSettings) -> Self {
        Self::new(settings.qa_shape(), settings.tokenized_shape())
    }
}

impl Default for ApplyQaFormat {
    fn default() -> Self {
        Self::new(QaShape::default(), TokenizedShape::default())
    }
}

impl Action for ApplyQaFormat {
    fn name(&self) -> String {
        "apply_qa_format".to_string()
    }

    fn capability(&self) -> Capability {
        Capability::DataFormat
    }

    fn dependencies(&self) -> Dependencies {
        data_dependencies()
    }

    fn heuristic_skip(&self, ir: &ConfigurationSnapshot) -> bool {
        ir.training_data_path().is_none()
    }

    fn matches(&self, sample: &Sample) -> bool {
        if self.tokenized.is_shape(sample) {
            debug!("Sample is already tokenized, QA formatting not needed");
            return false;
        }
        self.shape.is_shape(sample) && self.shape.columns(sample).is_some()
    }

    fn build_patch(
        &self,
        ir: &ConfigurationSnapshot,
        sample: &Sample,
        _collaborators: &Collaborators,
    ) -> Result<ConfigurationSnapshot> {
        let path = dataset_path(ir)?;
        let (input, output) = self
            .shape
            .columns(sample)
            .ok_or_else(|| RecommenderError::InvalidConfig("sample has no distinct input/response columns".to_string()))?;
        info!("QA dataset detected: input='{}', response='{}'", input, output);

        let mut pipeline = DataPreprocessorConfig::single_dataset(
            path,
            DataHandler::render_template(qa_template(&input, &output), QA_TEXT_FIELD),
        );
        pipeline.dataset_text_field = Some(QA_TEXT_FIELD.to_string());

        let mut patched = ir.working_copy();
        patched.data_preprocessor_config = pipeline.to_section()?;
        Ok(patched)
    }

    fn comment(&self, _ir: &ConfigurationSnapshot, sample: &Sample) -> Comment {
        let mut comment = Comment::new("QA dataset formatting applied.");
        if let Some((input, output)) = self.shape.columns(sample) {
            comment.add(format!("Input column '{}', response column '{}'.", input, output));
        }
        comment
    }
}

/// Formats multi-turn records with the model's chat template and masking
pub struct ApplyChatFormat {
    shape: ChatShape,
    tokenized: TokenizedShape,
    default_max_seq_length: u64,
}

impl ApplyChatFormat {
    pub fn new(shape: ChatShape, tokenized: TokenizedShape, default_max_seq_length: u64) -> Self {
        Self {
            shape,
            tokenized,
            default_max_seq_length,
        }
    }

    pub fn from_settings(settings: &RecommenderSettings) -> Self {
        Self::new(
            settings.chat_shape(),
            settings.tokenized_shape(),
            settings.default_max_seq_length,
        )
    }

    fn resolve_template(&self, ir: &ConfigurationSnapshot, collaborators: &Collaborators) -> Result<String> {
        let model = ir
            .model_name_or_path()
            .ok_or_else(|| RecommenderError::template("<unset>", "model_name_or_path is not configured"))?;
        let template = collaborators
            .templates
            .resolve_chat_template(model)?
            .ok_or_else(|| RecommenderError::template(model, "model does not define a chat template"))?;
        if template.trim().is_empty() {
            return Err(RecommenderError::template(model, "chat template is empty"));
        }
        debug!("Chat template for '{}': {}", model, preview(&template, DEFAULT_PREVIEW_BYTES));
        Ok(wrap_raw(&escape_newlines_in_quoted(&template)))
    }
}

impl Default for ApplyChatFormat {
    fn default() -> Self {
        Self::new(
            ChatShape::default(),
            TokenizedShape::default(),
            crate::config::DEFAULT_MAX_SEQ_LENGTH,
        )
    }
}

impl Action for ApplyChatFormat {
    fn name(&self) -> String {
        "apply_chat_format".to_string()
    }

    fn capability(&self) -> Capability {
        Capability::DataFormat
    }

    fn dependencies(&self) -> Dependencies {
        data_dependencies()
    }

    fn heuristic_skip(&self, ir: &ConfigurationSnapshot) -> bool {
        ir.training_data_path().is_none()
    }

    fn matches(&self, sample: &Sample) -> bool {
        if self.tokenized.is_shape(sample) {
            debug!("Sample is already tokenized, chat formatting not needed");
            return false;
        }
        self.shape.is_shape(sample)
    }

    fn build_patch(
        &self,
        ir: &ConfigurationSnapshot,
        sample: &Sample,
        collaborators: &Collaborators,
    ) -> Result<ConfigurationSnapshot> {
        let path = dataset_path(ir)?;
        let column = self
            .shape
            .conversation_key(sample)
            .ok_or_else(|| RecommenderError::InvalidConfig("sample has no conversation column".to_string()))?;
        let max_seq_length = ir.max_seq_length(self.default_max_seq_length)?;
        let chat_template = self.resolve_template(ir, collaborators)?;
        info!("Chat dataset detected: conversation column '{}'", column);

        let mut pipeline = DataPreprocessorConfig::single_dataset(
            path,
            DataHandler::chat_masking(max_seq_length, column),
        );
        pipeline.chat_template = Some(chat_template);
        pipeline.conversation_column_name = Some(column.to_string());

        let mut patched = ir.working_copy();
        patched.data_preprocessor_config = pipeline.to_section()?;
        Ok(patched)
    }

    fn comment(&self, ir: &ConfigurationSnapshot, sample: &Sample) -> Comment {
        let mut comment = Comment::new("Chat dataset formatting applied.");
        if let Some(column) = self.shape.conversation_key(sample) {
            comment.add(format!("Conversation column '{}'.", column));
        }
        if let Some(model) = ir.model_name_or_path() {
            comment.add(format!("Chat template taken from '{}'.", model));
        }
        comment
    }
}

/// Built-in actions in precedence order. Chat runs first: its predicate is
/// the stricter one, so a record that satisfies both shapes is formatted as
/// a conversation.
pub fn builtin_actions(settings: &RecommenderSettings) -> Vec<Arc<dyn Action>> {
    vec![
        Arc::new(ApplyChatFormat::from_settings(settings)),
        Arc::new(ApplyQaFormat::from_settings(settings)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::RequestContext;
    use crate::collaborators::testing::{collaborators, InMemoryLoader};
    use crate::ir::{PatchLevel, PatchType};
    use serde_json::{json, Value};

    fn ir(path: Option<&str>) -> ConfigurationSnapshot {
        let mut training = json!({"model_name_or_path": "ibm/granite-8b", "max_seq_length": 1024});
        if let Some(p) = path {
            training["training_data_path"] = json!(p);
        }
        ConfigurationSnapshot::from_parts(Some(training), None, None, None).unwrap()
    }

    fn ctx(records: Vec<Value>, template: Option<&str>) -> RequestContext {
        RequestContext::new(collaborators(InMemoryLoader::with("train.jsonl", records), template))
    }

    #[test]
    fn test_qa_template_text() {
        assert_eq!(
            qa_template("instruction", "output"),
            r####""### Input: {{ instruction }}\n\n### Response: {{ output }}""####
        );
    }

    #[test]
    fn test_qa_action_fires_once() {
        let action = ApplyQaFormat::default();
        let mut ctx = ctx(vec![json!({"instruction": "x", "output": "y"})], None);
        let snapshot = ir(Some("train.jsonl"));

        let patched = action.apply(&snapshot, &mut ctx).unwrap().expect("QA patch");
        let meta = patched.metadata.clone().unwrap();
        assert_eq!(meta.level, PatchLevel::Mandatory);
        assert_eq!(meta.patch_type, PatchType::Compatibility);
        assert_eq!(meta.effect, PatchType::Compatibility);
        assert!(meta.comment.as_str().starts_with("QA dataset formatting applied."));

        let data = Value::Object(patched.data_preprocessor_config.clone());
        let handler = &data["datasets"][0]["data_handlers"][0];
        assert_eq!(handler["name"], "apply_custom_jinja_template");
        assert_eq!(handler["arguments"]["fn_kwargs"]["template"], json!(qa_template("instruction", "output")));
        assert_eq!(data["_dataset_text_field"], "formatted_qa_data");
        assert_eq!(data["datasets"][0]["data_paths"], json!(["train.jsonl"]));

        assert!(action.apply(&snapshot, &mut ctx).unwrap().is_none());
    }

    #[test]
    fn test_chat_action_builds_masking_pipeline() {
        let action = ApplyChatFormat::default();
        let mut ctx = ctx(
            vec![json!({"messages": [{"role": "user", "content": "hi"}]})],
            Some("{% for m in messages %}{{ '<|' + m['role'] + '|>\n' }}{% endfor %}"),
        );

        let patched = action.apply(&ir(Some("train.jsonl")), &mut ctx).unwrap().expect("chat patch");
        let data = Value::Object(patched.data_preprocessor_config);
        let kwargs = &data["datasets"][0]["data_handlers"][0]["arguments"]["fn_kwargs"];
        assert_eq!(kwargs["conversation_column_name"], "messages");
        assert_eq!(kwargs["max_seq_length"], 1024);
        assert_eq!(data["_conversation_column_name"], "messages");

        let template = data["chat_template"].as_str().unwrap();
        assert!(template.starts_with("{% raw %}\n"));
        assert!(template.ends_with("\n{% endraw %}"));
        assert!(template.contains("'|>\\n'"));
    }

    #[test]
    fn test_chat_keeps_string_max_seq_length() {
        let action = ApplyChatFormat::default();
        let mut ctx = ctx(vec![json!({"messages": [{"role": "user", "content": "hi"}]})], Some("{{ m }}"));
        let mut snapshot = ir(Some("train.jsonl"));
        snapshot.training_config.insert("max_seq_length".to_string(), json!("4096"));

        let patched = action.apply(&snapshot, &mut ctx).unwrap().expect("chat patch");
        let data = Value::Object(patched.data_preprocessor_config);
        assert_eq!(data["datasets"][0]["data_handlers"][0]["arguments"]["fn_kwargs"]["max_seq_length"], 4096);
    }

    #[test]
    fn test_invalid_max_seq_length_is_fatal() {
        let action = ApplyChatFormat::default();
        let mut ctx = ctx(vec![json!({"messages": [{"role": "user", "content": "hi"}]})], Some("{{ m }}"));
        let mut snapshot = ir(Some("train.jsonl"));
        snapshot.training_config.insert("max_seq_length".to_string(), json!("long"));

        let err = action.apply(&snapshot, &mut ctx).unwrap_err();
        assert!(matches!(err, RecommenderError::InvalidConfig(_)));
    }

    #[test]
    fn test_missing_template_is_fatal() {
        let action = ApplyChatFormat::default();
        let mut ctx = ctx(vec![json!({"messages": [{"role": "user", "content": "hi"}]})], None);
        let err = action.apply(&ir(Some("train.jsonl")), &mut ctx).unwrap_err();
        assert!(matches!(err, RecommenderError::TemplateResolution { .. }));
    }

    #[test]
    fn test_no_dataset_path_skips_without_loading() {
        let mut ctx = ctx(vec![json!({"instruction": "x", "output": "y"})], None);
        let snapshot = ir(None);
        for action in builtin_actions(&RecommenderSettings::default()) {
            assert!(action.heuristic_skip(&snapshot));
            assert!(action.apply(&snapshot, &mut ctx).unwrap().is_none());
            assert!(ctx.is_skipped(&action.name()));
        }
    }

    #[test]
    fn test_unreadable_dataset_fails_closed() {
        let mut ctx = ctx(vec![], None);
        let snapshot = ir(Some("elsewhere.jsonl"));
        assert!(ApplyQaFormat::default().apply(&snapshot, &mut ctx).unwrap().is_none());
        assert!(ApplyChatFormat::default().apply(&snapshot, &mut ctx).unwrap().is_none());
    }

    #[test]
    fn test_tokenized_sample_short_circuits() {
        let sample = json!({"input_ids": [1, 2, 3], "labels": [1, 2, 3], "question": "q", "answer": "a"});
        let sample = sample.as_object().unwrap();
        assert!(!ApplyQaFormat::default().matches(sample));
        assert!(!ApplyChatFormat::default().matches(sample));
    }
}
