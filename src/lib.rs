//! Tuning Config Recommender
//!
//! Inspects a fine-tuning job's configuration and a sample of its dataset,
//! then recommends the data-preprocessing changes the trainer needs:
//! - Shape heuristics over a representative record (QA, chat, tokenized)
//! - Independent actions that each emit an annotated configuration patch
//! - A rule engine that folds patches together and flags conflicts
//! - JSON-Patch style edit lists for every accepted change
//! - Rendering into trainer config files and a launch command

pub mod actions;
pub mod adapter;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod heuristics;
pub mod ir;
pub mod render;
pub mod utils;

// Re-exports for convenience
pub use actions::Action;
pub use adapter::{FmsAdapter, RecommendationRequest};
pub use config::RecommenderSettings;
pub use engine::{Recommendation, RuleEngine};
pub use error::RecommenderError;
pub use ir::ConfigurationSnapshot;
