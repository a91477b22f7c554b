//! Rule Engine
//!
//! Runs registered actions in registration order against copies of the
//! running snapshot, folds accepted patches into one result and records an
//! audit trail. At most one action wins per capability; later actions that
//! would also have matched are reported as conflicts.

use crate::actions::{builtin_actions, Action, Capability, RequestContext};
use crate::collaborators::Collaborators;
use crate::config::RecommenderSettings;
use crate::error::Result;
use crate::ir::{Comment, ConfigurationSnapshot, PatchLevel, PatchMetadata, PatchOperation, PatchType, SectionKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

/// An accepted, annotated state transition produced by one action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patch {
    pub action: String,
    /// Snapshot the action produced
    pub snapshot: ConfigurationSnapshot,
    /// Edits from the snapshot the action saw to `snapshot`
    pub edits: Vec<PatchOperation>,
    pub comment: Comment,
    pub level: PatchLevel,
    pub patch_type: PatchType,
    pub effect: PatchType,
}

/// Two actions for the same capability both matched the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub capability: Capability,
    pub winner: String,
    pub contender: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    /// Input with every accepted patch merged in
    pub ir: ConfigurationSnapshot,
    pub patches: Vec<Patch>,
    pub conflicts: Vec<Conflict>,
}

impl Recommendation {
    /// Nothing to recommend: the input passes through as is.
    pub fn is_unchanged(&self) -> bool {
        self.patches.is_empty()
    }
}

/// Ordered registry of actions
#[derive(Default, Clone)]
pub struct RuleEngine {
    actions: Vec<Arc<dyn Action>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_actions(settings: &RecommenderSettings) -> Self {
        let mut engine = Self::new();
        engine.register_all_builtin_actions(settings);
        engine
    }

    pub fn register<A: Action + 'static>(&mut self, action: A) {
        self.register_arc(Arc::new(action));
    }

    pub fn register_arc(&mut self, action: Arc<dyn Action>) {
        debug!("Registered action '{}' ({})", action.name(), action.capability());
        self.actions.push(action);
    }

    pub fn register_all_builtin_actions(&mut self, settings: &RecommenderSettings) {
        for action in builtin_actions(settings) {
            self.register_arc(action);
        }
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name()).collect()
    }

    /// Run every action against `ir` with fresh request state.
    pub fn apply(&self, ir: &ConfigurationSnapshot, collaborators: &Collaborators) -> Result<Recommendation> {
        let mut ctx = RequestContext::new(collaborators.clone());
        self.apply_with_context(ir, &mut ctx)
    }

    pub fn apply_with_context(&self, ir: &ConfigurationSnapshot, ctx: &mut RequestContext) -> Result<Recommendation> {
        let span = info_span!("rule_engine.apply", actions = self.actions.len());
        let _enter = span.enter();

        let mut merged = ir.working_copy();
        let mut patches = Vec::new();
        let mut conflicts = Vec::new();
        let mut winners: BTreeMap<Capability, String> = BTreeMap::new();

        for action in &self.actions {
            let name = action.name();
            let capability = action.capability();

            if let Some(missing) = action.dependencies().unmet(&merged) {
                debug!("Action '{}' short-circuited: '{}' is absent", name, missing);
                ctx.mark_skipped(&name);
                continue;
            }

            if let Some(winner) = winners.get(&capability) {
                if !ctx.is_skipped(&name) && action.detects(&merged, ctx) {
                    warn!(
                        "Action '{}' also matches capability '{}' already satisfied by '{}'",
                        name, capability, winner
                    );
                    conflicts.push(Conflict {
                        capability,
                        winner: winner.clone(),
                        contender: name.clone(),
                    });
                }
                ctx.mark_skipped(&name);
                continue;
            }

            let before = merged.clone();
            let Some(patched) = action.apply(&before, ctx)? else {
                continue;
            };

            let edits = before.diff(&patched);
            let metadata = patched
                .metadata
                .clone()
                .unwrap_or_else(|| PatchMetadata::new(action.level(), action.patch_type(), Comment::default()));
            info!(
                "Action '{}' accepted: {} edit(s), level={}, type={}",
                name,
                edits.len(),
                metadata.level,
                metadata.patch_type
            );

            let retained = merged.retained_keys(&patched, SectionKind::DataPreprocessor);
            if !retained.is_empty() {
                warn!(
                    "Action '{}' rewrote data_preprocessor_config without {:?}; merged result keeps the caller's values",
                    name, retained
                );
            }
            merged.merge(&patched);
            winners.insert(capability, name.clone());
            patches.push(Patch {
                action: name,
                snapshot: patched.working_copy(),
                edits,
                comment: metadata.comment,
                level: metadata.level,
                patch_type: metadata.patch_type,
                effect: metadata.effect,
            });
        }

        if patches.is_empty() {
            info!("No action applied; configuration passes through unchanged");
        }
        Ok(Recommendation {
            ir: merged,
            patches,
            conflicts,
        })
    }
}
