// packages/engine/src/api/languages.rs
//! File extension → image/command registry

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Placeholder replaced by the submitted filename
pub const FILE_PLACEHOLDER: &str = "{file}";

const DEFAULT_FORMAT: &str = "text/plain";

/// How to run one kind of source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub image: String,

    /// Command template, e.g. `python {file}`
    pub command: String,

    /// Response content type
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

impl Language {
    pub fn new(image: &str, command: &str) -> Self {
        Self {
            image: image.to_string(),
            command: command.to_string(),
            format: default_format(),
        }
    }

    pub fn command_for(&self, filename: &str) -> String {
        self.command.replace(FILE_PLACEHOLDER, filename)
    }
}

/// Languages keyed by lowercase extension including the dot (`.py`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LanguageRegistry {
    languages: BTreeMap<String, Language>,
}

impl LanguageRegistry {
    pub fn builtin() -> Self {
        let entries = [
            (".py", Language::new("python:3-alpine", "python {file}")),
            (".rb", Language::new("ruby:alpine", "ruby {file}")),
            (".js", Language::new("node:alpine", "node {file}")),
            (".go", Language::new("golang:alpine", "go run {file}")),
            (".sh", Language::new("alpine:latest", "sh {file}")),
        ];

        Self {
            languages: entries
                .into_iter()
                .map(|(ext, lang)| (ext.to_string(), lang))
                .collect(),
        }
    }

    /// Parse a JSON object of `{".ext": {image, command, format?}}`
    pub fn from_json(data: &str) -> Result<Self> {
        let raw: BTreeMap<String, Language> = serde_json::from_str(data)
            .map_err(|e| EngineError::Validation(format!("invalid language registry: {}", e)))?;

        let mut languages = BTreeMap::new();
        for (ext, lang) in raw {
            let ext = normalize_extension(&ext);
            if ext.len() < 2 {
                return Err(EngineError::Validation(
                    "language registry has an empty extension".into(),
                ));
            }
            if lang.image.trim().is_empty() || lang.command.trim().is_empty() {
                return Err(EngineError::Validation(format!(
                    "language {} needs an image and a command",
                    ext
                )));
            }
            languages.insert(ext, lang);
        }

        Ok(Self { languages })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Registry from `path` when given, built-ins otherwise
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin()),
        }
    }

    /// Look up the language for a filename by its extension
    pub fn resolve(&self, filename: &str) -> Result<&Language> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(normalize_extension)
            .unwrap_or_default();

        self.languages
            .get(&ext)
            .ok_or_else(|| EngineError::Validation(format!("Extension is not supported: {}", ext)))
    }

    pub fn get(&self, ext: &str) -> Option<&Language> {
        self.languages.get(&normalize_extension(ext))
    }

    /// Distinct images across all languages
    pub fn images(&self) -> Vec<String> {
        let mut images: Vec<String> = self.languages.values().map(|l| l.image.clone()).collect();
        images.sort();
        images.dedup();
        images
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
