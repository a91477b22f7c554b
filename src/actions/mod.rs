//! Action System Module
//!
//! Actions are independent rules over a configuration snapshot. Each one
//! decides on its own whether it applies and, if so, returns a patched
//! snapshot stamped with its justification. Actions hold no per-request
//! state; skip flags and cached samples live in [`RequestContext`].

mod data;

pub use data::{builtin_actions, qa_template, ApplyChatFormat, ApplyQaFormat};

use crate::collaborators::Collaborators;
use crate::error::Result;
use crate::heuristics::Sample;
use crate::ir::{Comment, ConfigurationSnapshot, PatchLevel, PatchMetadata, PatchType, SectionKind};
use crate::utils::truncate::preview_json;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Concern an action addresses. At most one action wins per capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DataFormat,
    Custom(&'static str),
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::DataFormat => write!(f, "data-format"),
            Capability::Custom(tag) => write!(f, "{}", tag),
        }
    }
}

/// Snapshot sections (and the dataset) an action reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub training_config: bool,
    pub compute_config: bool,
    pub distributed_config: bool,
    pub data_preprocessor_config: bool,
    pub dataset: bool,
}

impl Dependencies {
    /// Name of the first prerequisite missing from `ir`, if any.
    pub fn unmet(&self, ir: &ConfigurationSnapshot) -> Option<&'static str> {
        let sections = [
            (self.training_config, SectionKind::Training),
            (self.compute_config, SectionKind::Compute),
            (self.distributed_config, SectionKind::Distributed),
            (self.data_preprocessor_config, SectionKind::DataPreprocessor),
        ];
        for (required, kind) in sections {
            if required && ir.section(kind).is_empty() {
                return Some(kind.key());
            }
        }
        if self.dataset && ir.training_data_path().is_none() {
            return Some("training_data_path");
        }
        None
    }
}

/// State scoped to one recommendation request
pub struct RequestContext {
    collaborators: Collaborators,
    skipped: BTreeSet<String>,
    samples: BTreeMap<String, Option<Sample>>,
}

impl RequestContext {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            skipped: BTreeSet::new(),
            samples: BTreeMap::new(),
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn is_skipped(&self, action: &str) -> bool {
        self.skipped.contains(action)
    }

    /// Once set, the flag holds for the rest of the request.
    pub fn mark_skipped(&mut self, action: &str) {
        self.skipped.insert(action.to_string());
    }

    /// Representative record for `path`, loaded once per request. Load
    /// failures are logged and cached as "no sample" so callers fail closed.
    pub fn sample(&mut self, path: &str) -> Option<&Sample> {
        if !self.samples.contains_key(path) {
            let loaded = match self.collaborators.data.load_sample(path) {
                Ok(sample) => {
                    debug!("Sample from '{}': {}", path, preview_json(&sample));
                    Some(sample)
                }
                Err(e) => {
                    warn!("Could not sample dataset '{}': {}", path, e);
                    None
                }
            };
            self.samples.insert(path.to_string(), loaded);
        }
        self.samples.get(path).and_then(Option::as_ref)
    }
}

/// A rule that inspects a snapshot and optionally emits a patch
pub trait Action: Send + Sync {
    /// Unique name of the action
    fn name(&self) -> String;

    fn capability(&self) -> Capability;

    fn dependencies(&self) -> Dependencies {
        Dependencies::default()
    }

    /// Cheap precondition check run before any data is loaded
    fn heuristic_skip(&self, _ir: &ConfigurationSnapshot) -> bool {
        false
    }

    /// Dataset to sample for `matches`; `None` means the action needs no data.
    fn sample_path(&self, ir: &ConfigurationSnapshot) -> Option<String> {
        ir.training_data_path().map(str::to_string)
    }

    /// Shape predicate over the representative record
    fn matches(&self, sample: &Sample) -> bool;

    /// Build the patched snapshot. Errors here are fatal for the request.
    fn build_patch(
        &self,
        ir: &ConfigurationSnapshot,
        sample: &Sample,
        collaborators: &Collaborators,
    ) -> Result<ConfigurationSnapshot>;

    fn comment(&self, ir: &ConfigurationSnapshot, sample: &Sample) -> Comment;

    fn level(&self) -> PatchLevel {
        PatchLevel::Mandatory
    }

    fn patch_type(&self) -> PatchType {
        PatchType::Compatibility
    }

    /// Would this action fire on `ir`? Loads (or reuses) the sample but builds nothing.
    fn detects(&self, ir: &ConfigurationSnapshot, ctx: &mut RequestContext) -> bool {
        if self.heuristic_skip(ir) {
            return false;
        }
        match self.sample_path(ir) {
            Some(path) => ctx.sample(&path).map(|s| self.matches(s)).unwrap_or(false),
            None => self.matches(&Sample::new()),
        }
    }

    /// Run the action once for this request.
    fn apply(&self, ir: &ConfigurationSnapshot, ctx: &mut RequestContext) -> Result<Option<ConfigurationSnapshot>> {
        let name = self.name();
        if ctx.is_skipped(&name) || self.heuristic_skip(ir) {
            debug!("Action '{}' skipped", name);
            ctx.mark_skipped(&name);
            return Ok(None);
        }

        let sample = match self.sample_path(ir) {
            Some(path) => match ctx.sample(&path) {
                Some(sample) => sample.clone(),
                None => {
                    ctx.mark_skipped(&name);
                    return Ok(None);
                }
            },
            None => Sample::new(),
        };

        if !self.matches(&sample) {
            debug!("Action '{}' does not match the sample", name);
            ctx.mark_skipped(&name);
            return Ok(None);
        }

        let patched = self.build_patch(&ir.working_copy(), &sample, ctx.collaborators())?;
        let metadata = PatchMetadata::new(self.level(), self.patch_type(), self.comment(ir, &sample));
        ctx.mark_skipped(&name);
        Ok(Some(patched.stamp(metadata)))
    }
}
