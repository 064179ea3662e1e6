//! Capability-scoped loading of JSON documents from disk.

use std::path::Path;

use cap_std::{ambient_authority, fs::Dir};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::domain::{ConfigError, SchemaConfig};

/// Read and parse the schema configuration at `path`.
pub fn load_schema_config(path: &Path) -> Result<SchemaConfig, ConfigError> {
    read_json(path)
}

/// Read a records document: an object mapping table names to documents.
pub fn load_records(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    match read_json(path)? {
        Value::Object(records) => Ok(records),
        _ => Err(ConfigError::parse(format!(
            "{} must contain a JSON object keyed by table name",
            path.display()
        ))),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let read_error = |message: String| ConfigError::Read {
        path: path.to_path_buf(),
        message,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| read_error("path does not name a file".to_owned()))?;
    let directory = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|error| read_error(error.to_string()))?;
    let bytes = directory
        .read(file_name)
        .map_err(|error| read_error(error.to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|error| ConfigError::parse(format!("{}: {error}", path.display())))
}
