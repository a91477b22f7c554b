//! Configuration Snapshot (IR)
//!
//! The intermediate representation every action reads and patches. The four
//! sections are always present; patch metadata only exists on snapshots an
//! action has accepted and emitted.

pub mod diff;
pub mod pipeline;

pub use diff::{apply_operations, diff, PatchOperation};
pub use pipeline::{DataHandler, DataPreprocessorConfig, DatasetConfig};

use crate::error::{RecommenderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One top-level mapping of the snapshot
pub type Section = Map<String, Value>;

/// How strongly a patch should be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchLevel {
    Mandatory,
    Suggestion,
    UserIntervention,
}

/// What concern a patch addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchType {
    SystemPerformance,
    ModelQuality,
    Compatibility,
}

impl std::fmt::Display for PatchLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchLevel::Mandatory => write!(f, "mandatory"),
            PatchLevel::Suggestion => write!(f, "suggestion"),
            PatchLevel::UserIntervention => write!(f, "user_intervention"),
        }
    }
}

impl std::fmt::Display for PatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchType::SystemPerformance => write!(f, "system_performance"),
            PatchType::ModelQuality => write!(f, "model_quality"),
            PatchType::Compatibility => write!(f, "compatibility"),
        }
    }
}

/// Append-only justification log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Comment(String);

impl Comment {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn add(&mut self, text: impl AsRef<str>) {
        if !self.0.is_empty() {
            self.0.push('\n');
        }
        self.0.push_str(text.as_ref());
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Comment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchMetadata {
    pub level: PatchLevel,
    pub patch_type: PatchType,
    pub comment: Comment,
    /// Defaults to `patch_type`
    pub effect: PatchType,
}

impl PatchMetadata {
    pub fn new(level: PatchLevel, patch_type: PatchType, comment: Comment) -> Self {
        Self {
            level,
            patch_type,
            comment,
            effect: patch_type,
        }
    }

    pub fn with_effect(mut self, effect: PatchType) -> Self {
        self.effect = effect;
        self
    }
}

/// Names of the four snapshot sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKind {
    Training,
    Compute,
    Distributed,
    DataPreprocessor,
}

impl SectionKind {
    pub const ALL: [SectionKind; 4] = [
        SectionKind::Training,
        SectionKind::Compute,
        SectionKind::Distributed,
        SectionKind::DataPreprocessor,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SectionKind::Training => "training_config",
            SectionKind::Compute => "compute_config",
            SectionKind::Distributed => "distributed_config",
            SectionKind::DataPreprocessor => "data_preprocessor_config",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    #[serde(default)]
    pub training_config: Section,
    #[serde(default)]
    pub compute_config: Section,
    #[serde(default)]
    pub distributed_config: Section,
    #[serde(default)]
    pub data_preprocessor_config: Section,
    #[serde(skip)]
    pub metadata: Option<PatchMetadata>,
}

impl ConfigurationSnapshot {
    pub fn new(training: Section, compute: Section, distributed: Section, data: Section) -> Self {
        Self {
            training_config: training,
            compute_config: compute,
            distributed_config: distributed,
            data_preprocessor_config: data,
            metadata: None,
        }
    }

    /// Build from optional caller values; anything that is not an object is rejected.
    pub fn from_parts(
        training: Option<Value>,
        compute: Option<Value>,
        distributed: Option<Value>,
        data: Option<Value>,
    ) -> Result<Self> {
        Ok(Self::new(
            into_section("training_config", training)?,
            into_section("compute_config", compute)?,
            into_section("distributed_config", distributed)?,
            into_section("data_preprocessor_config", data)?,
        ))
    }

    pub fn section(&self, kind: SectionKind) -> &Section {
        match kind {
            SectionKind::Training => &self.training_config,
            SectionKind::Compute => &self.compute_config,
            SectionKind::Distributed => &self.distributed_config,
            SectionKind::DataPreprocessor => &self.data_preprocessor_config,
        }
    }

    pub fn section_mut(&mut self, kind: SectionKind) -> &mut Section {
        match kind {
            SectionKind::Training => &mut self.training_config,
            SectionKind::Compute => &mut self.compute_config,
            SectionKind::Distributed => &mut self.distributed_config,
            SectionKind::DataPreprocessor => &mut self.data_preprocessor_config,
        }
    }

    /// Non-empty `training_data_path`, if configured
    pub fn training_data_path(&self) -> Option<&str> {
        self.training_config
            .get("training_data_path")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
    }

    pub fn model_name_or_path(&self) -> Option<&str> {
        self.training_config
            .get("model_name_or_path")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
    }

    /// `max_seq_length` from the training section, `default` when unset.
    /// Integer-valued floats and numeric strings are accepted.
    pub fn max_seq_length(&self, default: u64) -> Result<u64> {
        let value = match self.training_config.get("max_seq_length") {
            None | Some(Value::Null) => return Ok(default),
            Some(value) => value,
        };
        let parsed = match value {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        parsed.filter(|len| *len > 0).ok_or_else(|| {
            RecommenderError::InvalidConfig(format!(
                "training_config.max_seq_length must be a positive integer, got {}",
                value
            ))
        })
    }

    /// Attach patch metadata, marking this snapshot as an accepted patch.
    pub fn stamp(mut self, metadata: PatchMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The four sections as one JSON object (metadata excluded)
    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        for kind in SectionKind::ALL {
            root.insert(kind.key().to_string(), Value::Object(self.section(kind).clone()));
        }
        Value::Object(root)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Structural difference from `self` to `after`.
    pub fn diff(&self, after: &ConfigurationSnapshot) -> Vec<PatchOperation> {
        diff::diff(&self.to_value(), &after.to_value())
    }

    /// Fold an accepted patch into this snapshot. Patch keys win; when both
    /// sides hold a mapping under the same key, those are merged one level
    /// down. Keys the patch does not mention survive.
    pub fn merge(&mut self, patch: &ConfigurationSnapshot) {
        for kind in SectionKind::ALL {
            let incoming = patch.section(kind);
            if incoming.is_empty() {
                continue;
            }
            let target = self.section_mut(kind);
            for (key, value) in incoming {
                match (target.get_mut(key.as_str()), value) {
                    (Some(Value::Object(existing)), Value::Object(update)) => {
                        for (k, v) in update {
                            existing.insert(k.clone(), v.clone());
                        }
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
    }

    /// Keys of `kind` that `patch` rewrites but leaves out. [`merge`] keeps
    /// them, so they survive into the merged result unchanged.
    ///
    /// [`merge`]: ConfigurationSnapshot::merge
    pub fn retained_keys(&self, patch: &ConfigurationSnapshot, kind: SectionKind) -> Vec<String> {
        let incoming = patch.section(kind);
        if incoming.is_empty() {
            return Vec::new();
        }
        self.section(kind)
            .keys()
            .filter(|key| !incoming.contains_key(key.as_str()))
            .cloned()
            .collect()
    }

    /// Working copy with metadata cleared
    pub fn working_copy(&self) -> Self {
        Self {
            metadata: None,
            ..self.clone()
        }
    }
}

fn into_section(name: &str, value: Option<Value>) -> Result<Section> {
    match value {
        None | Some(Value::Null) => Ok(Section::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(RecommenderError::InvalidConfig(format!(
            "{} must be a mapping, got {}",
            name, other
        ))),
    }
}
