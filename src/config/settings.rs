//! Persisted run-state record written at acquisition time.
//!
//! One `key=value` pair per line; `#` starts a comment. The record is the
//! source of truth for sample identity in every later stage.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::debug;

use crate::config::defs::PipelineError;
use crate::utils::file::is_safe_sample_name;

#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub experiment: String,
    pub sample: String,
    pub chemistry: String,
    pub kit: String,
    pub multiplexed: bool,
}

const REQUIRED_FIELDS: &[&str] = &["experiment", "sample", "chemistry", "kit"];

impl RunSettings {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("Cannot read settings record {}: {}", path.display(), e))
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parses the record text. `origin` only labels error messages.
    pub fn parse(text: &str, origin: &str) -> Result<Self, PipelineError> {
        let mut fields: HashMap<&str, &str> = HashMap::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "Settings record {}: line {} is not key=value: '{}'",
                    origin,
                    line_no + 1,
                    line
                ))
            })?;
            let key = key.trim();
            if !REQUIRED_FIELDS.contains(&key) && key != "multiplexed" {
                debug!("Ignoring unknown settings key '{}' in {}", key, origin);
                continue;
            }
            fields.insert(key, value.trim());
        }

        let take = |field: &str| -> Result<String, PipelineError> {
            match fields.get(field) {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                _ => Err(PipelineError::MissingSetting {
                    path: origin.to_string(),
                    field: field.to_string(),
                }),
            }
        };

        let multiplexed = match fields.get("multiplexed") {
            None => false,
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" | "" => false,
                other => {
                    return Err(PipelineError::InvalidConfig(format!(
                        "Settings record {}: multiplexed must be true/false, got '{}'",
                        origin, other
                    )));
                }
            },
        };

        // Both end up in file and directory names
        let name = |field: &str| -> Result<String, PipelineError> {
            let value = take(field)?;
            if !is_safe_sample_name(&value) {
                return Err(PipelineError::InvalidConfig(format!(
                    "Settings record {}: {} '{}' may only use letters, digits, '.', '_' or '-'",
                    origin, field, value
                )));
            }
            Ok(value)
        };

        Ok(RunSettings {
            experiment: name("experiment")?,
            sample: name("sample")?,
            chemistry: take("chemistry")?,
            kit: take("kit")?,
            multiplexed,
        })
    }
}
