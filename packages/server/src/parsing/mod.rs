//! Output parsing: templates plus raw text in, structured rows out.
//!
//! A template is a text file of regexes with named capture groups, one per
//! line (`#` comments allowed). Each line of device output is tried against
//! the patterns in order; a match contributes one row of captured fields.
//! Template selection is by explicit name or derived from
//! `<driver>_<command>` with whitespace flattened to underscores.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("template '{0}' not found")]
    TemplateNotFound(String),
    #[error("template '{name}' is invalid: {detail}")]
    InvalidTemplate { name: String, detail: String },
}

impl From<ParseError> for crate::common::ApiError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::TemplateNotFound(_) => crate::common::ApiError::NotFound(err.to_string()),
            ParseError::InvalidTemplate { .. } => {
                crate::common::ApiError::Validation(err.to_string())
            }
        }
    }
}

/// A compiled template.
#[derive(Debug)]
pub struct Template {
    name: String,
    patterns: Vec<Regex>,
}

impl Template {
    fn compile(name: &str, text: &str) -> Result<Self, ParseError> {
        let mut patterns = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let pattern = Regex::new(line).map_err(|e| ParseError::InvalidTemplate {
                name: name.to_string(),
                detail: e.to_string(),
            })?;
            patterns.push(pattern);
        }
        if patterns.is_empty() {
            return Err(ParseError::InvalidTemplate {
                name: name.to_string(),
                detail: "no patterns".to_string(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            patterns,
        })
    }

    /// Apply the template line-wise; every matching line yields one row of
    /// named captures.
    pub fn parse(&self, raw: &str) -> Vec<BTreeMap<String, String>> {
        let mut rows = Vec::new();
        for line in raw.lines() {
            for pattern in &self.patterns {
                if let Some(captures) = pattern.captures(line) {
                    let row: BTreeMap<String, String> = pattern
                        .capture_names()
                        .flatten()
                        .filter_map(|name| {
                            captures
                                .name(name)
                                .map(|m| (name.to_string(), m.as_str().to_string()))
                        })
                        .collect();
                    if !row.is_empty() {
                        rows.push(row);
                    }
                    break;
                }
            }
        }
        rows
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Loads templates from the configured directory on demand.
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolve a template by explicit name, or derive one from the driver
    /// dialect and the command text.
    pub fn resolve(
        &self,
        explicit: Option<&str>,
        driver: &str,
        command: &str,
    ) -> Result<Template, ParseError> {
        let name = match explicit {
            Some(name) => name.to_string(),
            None => derive_template_name(driver, command),
        };
        let path = self.path_for(&name);
        let text = std::fs::read_to_string(&path)
            .map_err(|_| ParseError::TemplateNotFound(name.clone()))?;
        Template::compile(&name, &text)
    }

    /// Template names available on disk.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| {
                        let name = entry.file_name().to_string_lossy().into_owned();
                        name.ends_with(".tmpl").then_some(name)
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn path_for(&self, name: &str) -> PathBuf {
        // Reject path traversal in caller-supplied names.
        let file = Path::new(name)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.dir.join(file)
    }
}

fn derive_template_name(driver: &str, command: &str) -> String {
    let flatten = |text: &str| {
        text.split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect::<String>()
    };
    format!("{}_{}.tmpl", flatten(driver), flatten(command))
}

/// Parse raw output, returning `{parsed: [...]}` plus the raw text when asked.
pub fn parse_output(
    raw: &str,
    template: &Template,
    include_raw: bool,
) -> Value {
    let rows = template.parse(raw);
    let mut result = json!({
        "template": template.name(),
        "parsed": rows,
    });
    if include_raw {
        result["raw"] = Value::String(raw.to_string());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn derived_names_flatten_whitespace() {
        assert_eq!(
            derive_template_name("cisco_ios", "show ip int brief"),
            "cisco_ios_show_ip_int_brief.tmpl"
        );
        assert_eq!(derive_template_name("Arista EOS", "show  version"),
            "arista_eos_show_version.tmpl");
    }

    #[test]
    fn template_parses_matching_lines_into_rows() {
        let template = Template::compile(
            "test",
            r"(?P<interface>\S+)\s+(?P<ip>\d+\.\d+\.\d+\.\d+)\s+(?P<status>up|down)",
        )
        .unwrap();

        let raw = "Interface IP-Address Status\n\
                   Gi0/0 10.0.0.1 up\n\
                   Gi0/1 10.0.0.2 down\n";
        let rows = template.parse(raw);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["interface"], "Gi0/0");
        assert_eq!(rows[1]["status"], "down");
    }

    #[test]
    fn missing_template_is_a_not_found() {
        let store = TemplateStore::new("/nonexistent");
        let err = store.resolve(None, "cisco_ios", "show version").unwrap_err();
        assert!(matches!(err, ParseError::TemplateNotFound(_)));
    }

    #[test]
    fn explicit_template_name_wins_over_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.tmpl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r"(?P<word>\w+)").unwrap();

        let store = TemplateStore::new(dir.path());
        let template = store.resolve(Some("custom.tmpl"), "cisco_ios", "show x").unwrap();
        assert_eq!(template.name(), "custom.tmpl");
        assert_eq!(template.parse("hello")[0]["word"], "hello");
    }

    #[test]
    fn template_names_cannot_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        let err = store
            .resolve(Some("../../etc/passwd"), "cisco_ios", "show x")
            .unwrap_err();
        assert!(matches!(err, ParseError::TemplateNotFound(_)));
    }

    #[test]
    fn empty_template_is_invalid() {
        assert!(matches!(
            Template::compile("empty", "# just a comment\n"),
            Err(ParseError::InvalidTemplate { .. })
        ));
    }
}
