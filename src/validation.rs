//! Task content validation: size limits, a dangerous-pattern blocklist, and
//! a character allowlist, applied to task titles/descriptions and to
//! free-text context values submitted via the HTTP API.

use crate::constants::{MAX_CONTENT_LENGTH, MAX_CONTEXT_KEY_LENGTH, MAX_CONTEXT_VALUE_LENGTH};
use crate::FleetError;
use html_escape::encode_text;
use regex::Regex;
use std::collections::HashSet;

static SAFE_CONTENT_REGEX: &str = r"^[a-zA-Z0-9\s\.,!?:;()\[\]{}\-_+=@#$%^&*|\\/<>'`~\n\r\t]+$";

static DANGEROUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "data:text/html",
    "vbscript:",
    "&&",
    "||",
    ";rm",
    ";del",
    "`rm",
    "`del",
    "$(rm",
    "$(del",
    "';",
    "\";",
    "union select",
    "drop table",
    "delete from",
    "../",
    "..\\",
    "file://",
    "/etc/passwd",
    "/etc/shadow",
    "c:\\windows\\system32",
];

#[derive(Debug, Clone)]
pub struct TaskContentValidator {
    safe_content_regex: Regex,
    dangerous_patterns: HashSet<String>,
}

impl TaskContentValidator {
    pub fn new() -> Result<Self, FleetError> {
        let safe_content_regex = Regex::new(SAFE_CONTENT_REGEX).map_err(|e| FleetError::Config(format!("invalid validation regex: {e}")))?;
        let dangerous_patterns = DANGEROUS_PATTERNS.iter().map(|s| s.to_lowercase()).collect();
        Ok(Self { safe_content_regex, dangerous_patterns })
    }

    pub fn validate_and_sanitize_task_content(&self, content: &str) -> Result<String, FleetError> {
        if content.len() > MAX_CONTENT_LENGTH {
            return Err(FleetError::Validation(format!("content exceeds maximum length of {MAX_CONTENT_LENGTH} characters")));
        }
        if content.trim().is_empty() {
            return Err(FleetError::Validation("content cannot be empty".to_string()));
        }
        self.reject_dangerous(content)?;
        if !self.safe_content_regex.is_match(content) {
            return Err(FleetError::Validation("content contains invalid characters".to_string()));
        }
        Ok(encode_text(content).to_string())
    }

    pub fn validate_context_key(&self, key: &str) -> Result<(), FleetError> {
        if key.is_empty() || key.len() > MAX_CONTEXT_KEY_LENGTH {
            return Err(FleetError::Validation(format!("context key must be non-empty and under {MAX_CONTEXT_KEY_LENGTH} characters")));
        }
        if !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(FleetError::Validation("context keys can only contain alphanumeric characters and underscores".to_string()));
        }
        Ok(())
    }

    pub fn validate_and_sanitize_context_value(&self, value: &str) -> Result<String, FleetError> {
        if value.len() > MAX_CONTEXT_VALUE_LENGTH {
            return Err(FleetError::Validation(format!("context value exceeds maximum length of {MAX_CONTEXT_VALUE_LENGTH} characters")));
        }
        self.reject_dangerous(value)?;
        Ok(encode_text(value).to_string())
    }

    fn reject_dangerous(&self, text: &str) -> Result<(), FleetError> {
        let lower = text.to_lowercase();
        for pattern in &self.dangerous_patterns {
            if lower.contains(pattern) {
                return Err(FleetError::Validation("content contains a disallowed pattern".to_string()));
            }
        }
        Ok(())
    }
}

impl Default for TaskContentValidator {
    fn default() -> Self {
        Self::new().expect("TaskContentValidator regex is a compile-time constant")
    }
}
