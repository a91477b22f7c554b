//! FMS Adapter
//!
//! Turns a caller request into a snapshot, runs the rule engine and renders
//! the outcome for the trainer. This is the surface a service layer calls.

use crate::actions::Action;
use crate::collaborators::Collaborators;
use crate::config::RecommenderSettings;
use crate::engine::{Patch, Recommendation, RuleEngine};
use crate::error::{RecommenderError, Result};
use crate::ir::{ConfigurationSnapshot, DataPreprocessorConfig};
use crate::render::{render, RenderedConfig};
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Caller-supplied configuration sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationRequest {
    #[serde(default, alias = "tuning_config")]
    pub training_config: Option<Value>,
    #[serde(default)]
    pub compute_config: Option<Value>,
    #[serde(default, alias = "accelerate_config")]
    pub distributed_config: Option<Value>,
    #[serde(default, alias = "tuning_data_config")]
    pub data_preprocessor_config: Option<Value>,
}

impl RecommendationRequest {
    pub fn new(training_config: Value) -> Self {
        Self {
            training_config: Some(training_config),
            ..Default::default()
        }
    }

    /// Validate the request and build the initial snapshot.
    pub fn into_snapshot(self) -> Result<ConfigurationSnapshot> {
        let ir = ConfigurationSnapshot::from_parts(
            self.training_config,
            self.compute_config,
            self.distributed_config,
            self.data_preprocessor_config,
        )?;
        if ir.model_name_or_path().is_none() {
            return Err(RecommenderError::InvalidConfig(
                "training_config.model_name_or_path is required".to_string(),
            ));
        }
        if !ir.data_preprocessor_config.is_empty() {
            DataPreprocessorConfig::from_section(&ir.data_preprocessor_config)?;
        }
        Ok(ir)
    }
}

/// Rendered files, launch command and the patches behind them
#[derive(Debug, Clone, Serialize)]
pub struct RenderedOutput {
    #[serde(flatten)]
    pub rendered: RenderedConfig,
    pub patches: Vec<Patch>,
}

pub struct FmsAdapter {
    settings: RecommenderSettings,
    engine: RuleEngine,
    collaborators: Collaborators,
}

impl FmsAdapter {
    /// Built-in actions with hub-backed collaborators
    pub fn new(settings: RecommenderSettings) -> Self {
        let collaborators = Collaborators::hub(settings.hub());
        Self::with_collaborators(settings, collaborators)
    }

    pub fn with_collaborators(settings: RecommenderSettings, collaborators: Collaborators) -> Self {
        let engine = RuleEngine::with_builtin_actions(&settings);
        Self {
            settings,
            engine,
            collaborators,
        }
    }

    /// Register extra actions after the built-in ones.
    pub fn with_additional_actions(mut self, actions: Vec<Arc<dyn Action>>) -> Self {
        for action in actions {
            self.engine.register_arc(action);
        }
        self
    }

    pub fn settings(&self) -> &RecommenderSettings {
        &self.settings
    }

    pub fn execute(&self, request: RecommendationRequest) -> Result<Recommendation> {
        let ir = request.into_snapshot()?;
        self.engine.apply(&ir, &self.collaborators)
    }

    /// Execute and render under `<output_dir>/<tag>/`.
    pub fn run(&self, request: RecommendationRequest, tag: &str) -> anyhow::Result<RenderedOutput> {
        let recommendation = self.execute(request).context("recommendation failed")?;
        let out_dir = self.settings.output_dir.join(tag);
        let rendered = render(&recommendation.ir, &out_dir)
            .with_context(|| format!("failed to render into {}", out_dir.display()))?;
        info!(
            "Recommendation '{}' rendered with {} patch(es)",
            tag,
            recommendation.patches.len()
        );
        Ok(RenderedOutput {
            rendered,
            patches: recommendation.patches,
        })
    }
}

/// Run [`FmsAdapter::run`] on the blocking pool; dataset sampling does file
/// and network I/O.
pub async fn recommend_async(
    adapter: Arc<FmsAdapter>,
    request: RecommendationRequest,
    tag: String,
) -> anyhow::Result<RenderedOutput> {
    tokio::task::spawn_blocking(move || adapter.run(request, &tag)).await?
}

/// `YYYYMMDDTHHMMSS_<8 hex>` tag for an output directory
pub fn unique_stamp() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%dT%H%M%S"), &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::{collaborators, InMemoryLoader};
    use serde_json::json;

    fn adapter(dir: &std::path::Path, records: Vec<Value>) -> FmsAdapter {
        let settings = RecommenderSettings {
            output_dir: dir.to_path_buf(),
            ..Default::default()
        };
        FmsAdapter::with_collaborators(settings, collaborators(InMemoryLoader::with("train.jsonl", records), None))
    }

    #[test]
    fn test_request_accepts_legacy_section_names() {
        let request: RecommendationRequest = serde_json::from_value(json!({
            "tuning_config": {"model_name_or_path": "m"},
            "accelerate_config": {"num_processes": 2}
        }))
        .unwrap();
        let ir = request.into_snapshot().unwrap();
        assert_eq!(ir.distributed_config["num_processes"], 2);
    }

    #[test]
    fn test_request_requires_model() {
        let err = RecommendationRequest::new(json!({"training_data_path": "x"}))
            .into_snapshot()
            .unwrap_err();
        assert!(matches!(err, RecommenderError::InvalidConfig(_)));
    }

    #[test]
    fn test_request_rejects_malformed_data_config() {
        let request = RecommendationRequest {
            data_preprocessor_config: Some(json!({"datasets": 5})),
            ..RecommendationRequest::new(json!({"model_name_or_path": "m"}))
        };
        assert!(request.into_snapshot().is_err());
    }

    #[test]
    fn test_run_renders_qa_recommendation() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = adapter(dir.path(), vec![json!({"question": "q", "answer": "a"})]);
        let request = RecommendationRequest::new(json!({
            "model_name_or_path": "ibm/granite",
            "training_data_path": "train.jsonl"
        }));

        let output = adapter.run(request, "run-1").unwrap();
        assert_eq!(output.patches.len(), 1);
        assert!(output.rendered.data_config.starts_with(dir.path().join("run-1")));
        assert!(output.rendered.launch_command.contains("--dataset_text_field 'formatted_qa_data'"));
        assert!(!output.rendered.launch_command.contains("training_data_path"));
    }

    #[test]
    fn test_recommend_async_offloads_run() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(adapter(dir.path(), vec![json!({"text": "plain"})]));
        let request = RecommendationRequest::new(json!({
            "model_name_or_path": "m",
            "training_data_path": "train.jsonl"
        }));

        let output = tokio_test::block_on(recommend_async(adapter, request, "async".to_string())).unwrap();
        assert!(output.patches.is_empty());
    }

    #[tokio::test]
    async fn test_recommend_async_reports_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(adapter(dir.path(), vec![]));
        let request = RecommendationRequest::new(json!({"training_data_path": "train.jsonl"}));

        let err = recommend_async(adapter, request, unique_stamp()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("model_name_or_path"));
    }

    #[test]
    fn test_unique_stamp_shape() {
        let stamp = unique_stamp();
        let (time, id) = stamp.split_once('_').unwrap();
        assert_eq!(time.len(), 15);
        assert_eq!(id.len(), 8);
    }
}
