//! Rendering
//!
//! Persists the merged snapshot as trainer/launcher config files and builds
//! the launch command line. Placeholder values such as `${MASTER_ADDR}` are
//! kept out of the persisted launcher config and passed on the command line
//! so the shell resolves them at launch time.

use crate::error::{RecommenderError, Result};
use crate::ir::{ConfigurationSnapshot, Section};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"^\$\{([A-Za-z0-9_]+)\}$").expect("placeholder pattern is valid");
}

pub const DATA_CONFIG_FILE: &str = "data_config.yaml";
pub const ACCELERATE_CONFIG_FILE: &str = "accelerate_config.yaml";
const TRAINER_MODULE: &str = "tuning.sft_trainer";

/// Files written for one recommendation plus the command that launches it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedConfig {
    pub data_config: PathBuf,
    pub accelerate_config: PathBuf,
    pub launch_command: String,
}

/// Split a launcher section into static values and `--key '${VAR}'` arguments.
pub fn split_static_and_dynamic(section: &Section) -> (Section, Vec<String>) {
    let mut statics = Section::new();
    let mut dynamic = Vec::new();
    for (key, value) in section {
        match value.as_str().and_then(|s| PLACEHOLDER.captures(s)) {
            Some(caps) => dynamic.push(format!("--{} '${{{}}}'", key, &caps[1])),
            None => {
                statics.insert(key.clone(), value.clone());
            }
        }
    }
    (statics, dynamic)
}

/// Separate runtime-only fields (leading `_`) from the persisted data config.
/// Runtime names are returned without the underscore.
pub fn extract_runtime_fields(section: &Section) -> (Section, Vec<(String, Value)>) {
    let mut persisted = Section::new();
    let mut runtime = Vec::new();
    for (key, value) in section {
        match key.strip_prefix('_') {
            Some(name) if !name.is_empty() => runtime.push((name.to_string(), value.clone())),
            _ => {
                persisted.insert(key.clone(), value.clone());
            }
        }
    }
    (persisted, runtime)
}

/// Quote a value for the launch command line.
pub fn fmt_cli_value(value: &Value) -> String {
    match value {
        Value::Bool(true) => "'true'".to_string(),
        Value::Bool(false) => "'false'".to_string(),
        Value::Number(n) => format!("'{}'", n),
        Value::Object(_) => format!("'{}'", value),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => format!("'{}'", s.to_lowercase()),
                other => format!("'{}'", other.to_string().to_lowercase()),
            })
            .collect::<Vec<_>>()
            .join(" "),
        Value::String(s) => format!("'{}'", s),
        Value::Null => "''".to_string(),
    }
}

/// Write a section as YAML, keeping key order and string values verbatim.
pub fn write_yaml(section: &Section, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(&Value::Object(section.clone()))?;
    std::fs::write(path, yaml)?;
    Ok(())
}

pub fn build_launch_command(
    training: &Section,
    data_config: &Path,
    accelerate_config: &Path,
    dynamic_args: &[String],
    runtime_args: &[(String, Value)],
) -> String {
    let mut cmd = vec![
        "accelerate launch".to_string(),
        format!("--config_file '{}'", accelerate_config.display()),
    ];
    cmd.extend(dynamic_args.iter().cloned());
    cmd.push(format!("-m '{}'", TRAINER_MODULE));

    for (key, value) in training {
        if value.is_null() || key == "training_data_path" {
            continue;
        }
        cmd.push(format!("--{} {}", key, fmt_cli_value(value)));
    }
    for (key, value) in runtime_args {
        if !value.is_null() {
            cmd.push(format!("--{} {}", key, fmt_cli_value(value)));
        }
    }

    cmd.push(format!("--data_config '{}'", data_config.display()));
    cmd.join(" \\\n")
}

/// Write the data and launcher configs under `out_dir` and build the command.
pub fn render(ir: &ConfigurationSnapshot, out_dir: &Path) -> Result<RenderedConfig> {
    std::fs::create_dir_all(out_dir)
        .map_err(|e| RecommenderError::Render(format!("cannot create {}: {}", out_dir.display(), e)))?;

    let (launcher, dynamic_args) = split_static_and_dynamic(&ir.distributed_config);
    let (data, runtime_args) = extract_runtime_fields(&ir.data_preprocessor_config);

    let data_path = out_dir.join(DATA_CONFIG_FILE);
    let accelerate_path = out_dir.join(ACCELERATE_CONFIG_FILE);
    write_yaml(&data, &data_path)?;
    write_yaml(&launcher, &accelerate_path)?;
    info!("Rendered {:?} and {:?}", data_path, accelerate_path);

    let launch_command = build_launch_command(
        &ir.training_config,
        &data_path,
        &accelerate_path,
        &dynamic_args,
        &runtime_args,
    );

    Ok(RenderedConfig {
        data_config: data_path,
        accelerate_config: accelerate_path,
        launch_command,
    })
}
