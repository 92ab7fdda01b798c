// packages/engine/src/api/request.rs
//! Inbound run request parsing and validation

use crate::api::languages::LanguageRegistry;
use crate::runtime::run::RunRequest;
use crate::utils::errors::{EngineError, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;

const FILENAME_PATTERN: &str = r"^[a-z0-9_-]+\.[a-z]{1,12}$";

/// Body of `POST /api/v1/run`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunPayload {
    pub filename: String,
    pub content: String,
    pub command: Option<String>,
    pub image: Option<String>,
    pub input: Option<String>,
    #[serde(alias = "memoryLimit")]
    pub memory_limit: Option<i64>,

    /// Newline separated `KEY=VALUE` lines
    pub env: Option<String>,
    pub clean: bool,
}

/// A validated request plus the response content type for it
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub request: RunRequest,
    pub format: String,
}

/// Validates payloads and resolves missing fields from the language registry
pub struct RequestParser {
    languages: Arc<LanguageRegistry>,
    filename_pattern: Regex,
}

impl RequestParser {
    pub fn new(languages: Arc<LanguageRegistry>) -> Result<Self> {
        let filename_pattern = Regex::new(FILENAME_PATTERN)
            .map_err(|e| EngineError::Internal(format!("filename pattern: {}", e)))?;

        Ok(Self {
            languages,
            filename_pattern,
        })
    }

    pub fn languages(&self) -> &Arc<LanguageRegistry> {
        &self.languages
    }

    /// Parse a JSON request body
    pub fn parse_body(&self, body: &[u8]) -> Result<ParsedRequest> {
        let payload: RunPayload = serde_json::from_slice(body)
            .map_err(|e| EngineError::Validation(format!("Invalid request body: {}", e)))?;
        self.parse(payload)
    }

    pub fn parse(&self, payload: RunPayload) -> Result<ParsedRequest> {
        let filename = payload.filename.trim().to_lowercase();

        if filename.is_empty() {
            return Err(EngineError::Validation("Filename is required".into()));
        }
        if !self.filename_pattern.is_match(&filename) {
            return Err(EngineError::Validation("Invalid filename".into()));
        }
        if payload.content.is_empty() {
            return Err(EngineError::Validation("Content is required".into()));
        }

        let language = self.languages.resolve(&filename)?;

        let image = non_empty(payload.image).unwrap_or_else(|| language.image.clone());
        let command =
            non_empty(payload.command).unwrap_or_else(|| language.command_for(&filename));

        let request = RunRequest {
            filename,
            content: payload.content,
            command,
            image,
            input: payload.input.unwrap_or_default(),
            memory_limit: payload.memory_limit.filter(|m| *m > 0),
            env: parse_env(payload.env.as_deref().unwrap_or(""))?,
            clean: payload.clean,
        };

        Ok(ParsedRequest {
            request,
            format: language.format.clone(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split newline separated `KEY=VALUE` lines, dropping blank ones
pub fn parse_env(env: &str) -> Result<Vec<String>> {
    env.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('=') {
            Some((key, _)) if !key.is_empty() => Ok(line.to_string()),
            _ => Err(EngineError::Validation(format!(
                "Invalid environment variable: {}",
                line
            ))),
        })
        .collect()
}
