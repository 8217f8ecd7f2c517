use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::definition::Definition;
use super::error::SchemaError;
use super::SchemaOptions;

fn default_true() -> bool {
    true
}

/// A schema as stored on disk (YAML or JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFile {
    /// Overrides the configured database when set
    #[serde(default)]
    pub database: Option<String>,
    pub collection: String,
    #[serde(default = "default_true")]
    pub enforce: bool,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    pub definition: Definition,
}

impl SchemaFile {
    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: display.clone(),
            source,
        })?;

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let parsed = if is_json {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&content).map_err(|e| e.to_string())
        };
        parsed.map_err(|message| SchemaError::Parse { path: display, message })
    }

    /// Load every `.yaml`, `.yml` and `.json` file in a directory, sorted by file name
    pub fn load_dir(dir: &Path) -> Result<Vec<(PathBuf, SchemaFile)>, SchemaError> {
        let entries = fs::read_dir(dir).map_err(|source| SchemaError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SchemaError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if matches!(ext, "yaml" | "yml" | "json") {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .into_iter()
            .map(|path| Self::from_path(&path).map(|file| (path, file)))
            .collect()
    }

    pub fn options(&self, enforce_override: Option<bool>) -> SchemaOptions {
        SchemaOptions {
            enforce: enforce_override.unwrap_or(self.enforce),
            timestamps: self.timestamps,
        }
    }
}
