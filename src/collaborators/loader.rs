//! Dataset Loader
//!
//! Reads JSON, JSONL and CSV records from a local file, or resolves a
//! remote dataset id on the hub to one of its data files.

use super::{DataLoader, HubSettings};
use crate::error::{RecommenderError, Result};
use crate::heuristics::Sample;
use hf_hub::{Repo, RepoType};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SUPPORTED_EXTENSIONS: &[&str] = &["json", "jsonl", "csv"];

pub struct DatasetLoader {
    hub: HubSettings,
}

impl DatasetLoader {
    pub fn new(hub: HubSettings) -> Self {
        Self { hub }
    }

    /// Local file for `path`, downloading from the hub when it is not on disk.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let local = Path::new(path);
        if local.is_file() {
            return Ok(local.to_path_buf());
        }
        if local.is_dir() {
            return Err(RecommenderError::data_access(format!(
                "Local folder '{}' is not supported. Pass a file or dataset id (org/name).",
                path
            )));
        }
        self.fetch_remote(path)
    }

    fn fetch_remote(&self, dataset_id: &str) -> Result<PathBuf> {
        let hub_err = |e: hf_hub::api::sync::ApiError| {
            RecommenderError::data_access(format!("Failed to load dataset '{}': {}", dataset_id, e))
        };

        let api = self.hub.api().map_err(hub_err)?;
        let repo = api.repo(Repo::new(dataset_id.to_string(), RepoType::Dataset));
        let info = repo.info().map_err(hub_err)?;
        let files: Vec<String> = info.siblings.into_iter().map(|s| s.rfilename).collect();

        let file = pick_data_file(&files).ok_or_else(|| {
            RecommenderError::data_access(format!(
                "Dataset '{}' has no JSON/JSONL data files ({} files listed)",
                dataset_id,
                files.len()
            ))
        })?;
        info!("Resolved remote dataset '{}' to file '{}'", dataset_id, file);
        repo.get(&file).map_err(hub_err)
    }
}

impl DataLoader for DatasetLoader {
    fn load_all(&self, path: &str) -> Result<Vec<Sample>> {
        let file = self.resolve(path)?;
        let records = read_records(&file)?;
        if records.is_empty() {
            return Err(RecommenderError::data_access(format!("'{}' contains no data", path)));
        }
        debug!("Loaded {} records from {:?}", records.len(), file);
        Ok(records)
    }

    fn load_sample(&self, path: &str) -> Result<Sample> {
        let file = self.resolve(path)?;
        // JSONL and CSV can be sampled without reading the whole file
        let first = match extension(&file).as_str() {
            "jsonl" => Some(first_jsonl_record(&file)?),
            "csv" => Some(read_csv(&file, Some(1))?.into_iter().next()),
            _ => None,
        };
        if let Some(first) = first {
            return first.ok_or_else(|| RecommenderError::data_access(format!("'{}' contains no data", path)));
        }
        self.load_all(path)?
            .into_iter()
            .next()
            .ok_or_else(|| RecommenderError::data_access(format!("'{}' contains no data", path)))
    }
}

/// Prefer files whose name mentions `train`, otherwise keep listing order.
fn pick_data_file(files: &[String]) -> Option<String> {
    let candidates: Vec<&String> = files
        .iter()
        .filter(|f| SUPPORTED_EXTENSIONS.contains(&extension(Path::new(f.as_str())).as_str()))
        .collect();
    candidates
        .iter()
        .find(|f| f.to_lowercase().contains("train"))
        .or_else(|| candidates.first())
        .map(|f| f.to_string())
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

fn read_records(path: &Path) -> Result<Vec<Sample>> {
    match extension(path).as_str() {
        "json" => {
            let content = std::fs::read_to_string(path).map_err(|e| read_error(path, e))?;
            let value: Value = serde_json::from_str(&content).map_err(|e| parse_error(path, e))?;
            records_from_json(value, path)
        }
        "jsonl" => {
            let reader = BufReader::new(File::open(path).map_err(|e| read_error(path, e))?);
            let mut records = Vec::new();
            for (idx, line) in reader.lines().enumerate() {
                let line = line.map_err(|e| read_error(path, e))?;
                if let Some(record) = parse_jsonl_line(&line, idx, path)? {
                    records.push(record);
                }
            }
            Ok(records)
        }
        "csv" => read_csv(path, None),
        other => Err(RecommenderError::data_access(format!(
            "Unsupported file format: '.{}' ({})",
            other,
            path.display()
        ))),
    }
}

fn first_jsonl_record(path: &Path) -> Result<Option<Sample>> {
    let reader = BufReader::new(File::open(path).map_err(|e| read_error(path, e))?);
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| read_error(path, e))?;
        if let Some(record) = parse_jsonl_line(&line, idx, path)? {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

fn parse_jsonl_line(line: &str, idx: usize, path: &Path) -> Result<Option<Sample>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(line).map_err(|e| parse_error(path, e))?;
    match value {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(RecommenderError::data_access(format!(
            "Line {} of '{}' is not a JSON object",
            idx + 1,
            path.display()
        ))),
    }
}

/// Accepts an array of objects, a single object, or `{"data"|"train": [...]}`.
fn records_from_json(value: Value, path: &Path) -> Result<Vec<Sample>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let nested = ["data", "train"]
                .iter()
                .find(|k| map.get(**k).map(Value::is_array).unwrap_or(false))
                .copied();
            match nested.and_then(|k| map.remove(k)) {
                Some(Value::Array(items)) => items,
                _ => return Ok(vec![map]),
            }
        }
        _ => {
            return Err(RecommenderError::data_access(format!(
                "'{}' does not contain JSON records",
                path.display()
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(map) => Ok(map),
            _ => Err(RecommenderError::data_access(format!(
                "Record {} of '{}' is not a JSON object",
                idx,
                path.display()
            ))),
        })
        .collect()
}

fn read_error(path: &Path, e: std::io::Error) -> RecommenderError {
    RecommenderError::data_access(format!("Failed to read '{}': {}", path.display(), e))
}

/// Header row names the fields; every value is kept as a string.
fn read_csv(path: &Path, limit: Option<usize>) -> Result<Vec<Sample>> {
    let csv_error = |e: csv::Error| RecommenderError::data_access(format!("Failed to read CSV '{}': {}", path.display(), e));

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;
    let headers = reader.headers().map_err(csv_error)?.clone();

    let mut records = Vec::new();
    for row in reader.records().take(limit.unwrap_or(usize::MAX)) {
        let row = row.map_err(csv_error)?;
        let record: Sample = headers
            .iter()
            .zip(row.iter())
            .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
            .collect();
        records.push(record);
    }
    Ok(records)
}

fn parse_error(path: &Path, e: serde_json::Error) -> RecommenderError {
    RecommenderError::data_access(format!("Failed to parse '{}': {}", path.display(), e))
}
