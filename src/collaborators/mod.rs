//! External Collaborators
//!
//! Narrow, blocking interfaces the core needs from the outside world:
//! dataset sampling and chat template lookup. Callers that run inside an
//! async runtime offload these calls to a blocking worker.

mod hub;
mod loader;
mod templates;

pub use hub::HubSettings;
pub use loader::DatasetLoader;
pub use templates::{extract_chat_template, HubChatTemplateResolver};

use crate::error::{RecommenderError, Result};
use crate::heuristics::Sample;
use std::sync::Arc;

/// Source of dataset records
pub trait DataLoader: Send + Sync {
    /// Every record of the dataset at `path`
    fn load_all(&self, path: &str) -> Result<Vec<Sample>>;

    /// The first record, used as the representative sample
    fn load_sample(&self, path: &str) -> Result<Sample> {
        self.load_all(path)?
            .into_iter()
            .next()
            .ok_or_else(|| RecommenderError::data_access(format!("'{}' contains no data", path)))
    }
}

/// Lookup of a model's chat template
pub trait ChatTemplateResolver: Send + Sync {
    fn resolve_chat_template(&self, model: &str) -> Result<Option<String>>;
}

/// Collaborators handed to the engine for one request
#[derive(Clone)]
pub struct Collaborators {
    pub data: Arc<dyn DataLoader>,
    pub templates: Arc<dyn ChatTemplateResolver>,
}

impl Collaborators {
    pub fn new(data: Arc<dyn DataLoader>, templates: Arc<dyn ChatTemplateResolver>) -> Self {
        Self { data, templates }
    }

    /// Local files plus the Hugging Face hub for remote datasets and models
    pub fn hub(settings: HubSettings) -> Self {
        Self {
            data: Arc::new(DatasetLoader::new(settings.clone())),
            templates: Arc::new(HubChatTemplateResolver::new(settings)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Datasets keyed by path; unknown paths fail like a missing file.
    #[derive(Default)]
    pub struct InMemoryLoader {
        pub datasets: HashMap<String, Vec<Sample>>,
        pub loads: AtomicUsize,
    }

    impl InMemoryLoader {
        pub fn with(path: &str, records: Vec<serde_json::Value>) -> Self {
            let records = records
                .into_iter()
                .filter_map(|r| r.as_object().cloned())
                .collect();
            let mut datasets = HashMap::new();
            datasets.insert(path.to_string(), records);
            Self {
                datasets,
                loads: AtomicUsize::new(0),
            }
        }
    }

    impl DataLoader for InMemoryLoader {
        fn load_all(&self, path: &str) -> Result<Vec<Sample>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.datasets
                .get(path)
                .cloned()
                .ok_or_else(|| RecommenderError::data_access(format!("no dataset at '{}'", path)))
        }
    }

    pub struct FixedTemplate(pub Option<String>);

    impl ChatTemplateResolver for FixedTemplate {
        fn resolve_chat_template(&self, _model: &str) -> Result<Option<String>> {
            Ok(self.0.clone())
        }
    }

    pub fn collaborators(loader: InMemoryLoader, template: Option<&str>) -> Collaborators {
        Collaborators::new(
            Arc::new(loader),
            Arc::new(FixedTemplate(template.map(str::to_string))),
        )
    }
}
