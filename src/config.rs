//! Configuration for the weekly merge engine.
//!
//! Settings are read from `merge.toml` and layered (file → environment → CLI).
//!
//! # Configuration File Format
//!
//! ```toml
//! [github]
//! org = "my-org"
//!
//! [history]
//! capacity = 50
//!
//! [logging]
//! level = "info"
//! json = false
//! directory = "logs"
//!
//! [[plan.phases]]
//! repositories = ["danal-core"]
//!
//! [[plan.phases]]
//! repositories = ["smart-settlement-batch", "smart-settlement-api"]
//! parallel = true
//! ```
//!
//! An absent `[[plan.phases]]` list means the built-in weekly plan.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::PlanError;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::plan::{Concurrency, ExecutionPlan};

/// Default config file name, resolved against the working directory.
pub const CONFIG_FILE: &str = "merge.toml";

/// Organization value shipped in the template; treated as unset.
const ORG_PLACEHOLDER: &str = "your_organization_name_here";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Template written by `weekly-merge init`.
pub const CONFIG_TEMPLATE: &str = r#"# Weekly merge configuration

[github]
# Organization that owns every repository in the plan.
org = "your_organization_name_here"

[history]
# Number of finished runs kept in memory.
capacity = 50

[logging]
level = "info"
json = false
# Daily-rolling log files are written here when set.
directory = "logs"

# Phases run in order. Repositories inside a parallel phase are merged together.
[[plan.phases]]
repositories = ["danal-core"]

[[plan.phases]]
repositories = ["smart-settlement-extapi"]

[[plan.phases]]
repositories = [
    "smart-settlement-batch",
    "smart-settlement-api",
    "smart-settlement-merchant-interface",
]
parallel = true
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GithubSection {
    /// Organization that owns the repositories.
    #[serde(default)]
    pub org: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling log files. No file log when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

/// One `[[plan.phases]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub repositories: Vec<String>,
    #[serde(default)]
    pub parallel: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSection {
    #[serde(default)]
    pub phases: Vec<PhaseEntry>,
}

/// The complete merge.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeToml {
    #[serde(default)]
    pub github: GithubSection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub plan: PlanSection,
}

impl MergeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse merge.toml")
    }

    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `GITHUB_ORG`, `MERGE_HISTORY_CAPACITY` and `LOG_LEVEL` overrides
    /// using the given lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(org) = lookup("GITHUB_ORG").filter(|v| !v.trim().is_empty()) {
            self.github.org = Some(org.trim().to_string());
        }
        if let Some(raw) = lookup("MERGE_HISTORY_CAPACITY") {
            self.history.capacity = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid MERGE_HISTORY_CAPACITY '{}'", raw))?;
        }
        if let Some(level) = lookup("LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.logging.level = level.trim().to_lowercase();
        }
        Ok(())
    }

    /// The configured plan, or the built-in weekly plan when none is listed.
    pub fn execution_plan(&self) -> Result<ExecutionPlan, PlanError> {
        if self.plan.phases.is_empty() {
            return Ok(ExecutionPlan::weekly_default());
        }
        ExecutionPlan::from_groups(self.plan.phases.iter().map(|entry| {
            (
                entry.repositories.clone(),
                Concurrency::from_parallel(entry.parallel),
            )
        }))
    }

    /// Configured organization, ignoring blanks and the template placeholder.
    pub fn org(&self) -> Option<&str> {
        self.github
            .org
            .as_deref()
            .map(str::trim)
            .filter(|org| !org.is_empty() && *org != ORG_PLACEHOLDER)
    }

    /// Validate against the process environment.
    pub fn validate(&self) -> ValidationReport {
        self.validate_with(|key| std::env::var(key).ok())
    }

    pub fn validate_with<F>(&self, lookup: F) -> ValidationReport
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut report = ValidationReport::default();

        if self.org().is_none() {
            report
                .errors
                .push("github.org is not set (set it in merge.toml or GITHUB_ORG)".to_string());
        }

        match self.execution_plan() {
            Ok(plan) => {
                for phase in plan.phases() {
                    if phase.is_parallel() && phase.repositories.len() == 1 {
                        report.warnings.push(format!(
                            "Phase {} is parallel but lists a single repository",
                            phase.number
                        ));
                    }
                }
            }
            Err(e) => report.errors.push(format!("Invalid plan: {}", e)),
        }

        if self.history.capacity == 0 {
            report
                .errors
                .push("history.capacity must be at least 1".to_string());
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            report.warnings.push(format!(
                "Unknown logging.level '{}': expected one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        if lookup("GITHUB_TOKEN").is_some_and(|token| !token.trim().is_empty()) {
            report.warnings.push(
                "GITHUB_TOKEN is set in plaintext in the environment; prefer a secret store"
                    .to_string(),
            );
        }

        report
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Effective configuration: merge.toml, then environment, then CLI flags.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Path the file layer was read from (it may not exist).
    pub path: PathBuf,
    pub toml: MergeToml,
    /// CLI override: verbose mode
    pub verbose: bool,
}

impl MergeConfig {
    /// Load `path` (or `./merge.toml`) and apply environment overrides.
    ///
    /// A `.env` file, if present, should already have been loaded.
    pub fn load(path: Option<&Path>, verbose: bool) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        let mut toml = MergeToml::load_or_default(&path)?;
        toml.apply_env()?;

        Ok(Self {
            path,
            toml,
            verbose,
        })
    }

    pub fn file_exists(&self) -> bool {
        self.path.exists()
    }

    /// Log level filter (CLI → env/file → default).
    pub fn log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.toml.logging.level
        }
    }

    pub fn log_json(&self) -> bool {
        self.toml.logging.json
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.toml.logging.directory.as_deref()
    }

    pub fn history_capacity(&self) -> usize {
        self.toml.history.capacity
    }

    pub fn execution_plan(&self) -> Result<ExecutionPlan> {
        self.toml
            .execution_plan()
            .with_context(|| format!("Invalid plan in {}", self.path.display()))
    }

    pub fn validate(&self) -> ValidationReport {
        self.toml.validate()
    }
}

/// Write the configuration template, refusing to clobber unless `force`.
pub fn write_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempdir().unwrap();
        let toml = MergeToml::load_or_default(&dir.path().join(CONFIG_FILE)).unwrap();

        assert_eq!(toml.history.capacity, 50);
        assert_eq!(toml.logging.level, "info");
        assert!(!toml.logging.json);
        assert_eq!(toml.execution_plan().unwrap(), ExecutionPlan::weekly_default());
    }

    #[test]
    fn test_parse_full_file() {
        let toml = MergeToml::parse(
            r#"
            [github]
            org = "acme"

            [history]
            capacity = 5

            [logging]
            level = "debug"
            json = true
            directory = "var/log"

            [[plan.phases]]
            repositories = ["core"]

            [[plan.phases]]
            repositories = ["a", "b"]
            parallel = true
            "#,
        )
        .unwrap();

        assert_eq!(toml.org(), Some("acme"));
        assert_eq!(toml.history.capacity, 5);
        assert!(toml.logging.json);
        assert_eq!(toml.logging.directory, Some(PathBuf::from("var/log")));

        let plan = toml.execution_plan().unwrap();
        assert_eq!(plan.len(), 2);
        assert!(!plan.phases()[0].is_parallel());
        assert!(plan.phases()[1].is_parallel());
        assert_eq!(plan.phases()[1].number, 2);
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        let err = MergeToml::parse("[history\ncapacity = ").unwrap_err();
        assert!(err.to_string().contains("merge.toml"));
    }

    #[test]
    fn test_template_parses_to_default_plan() {
        let toml = MergeToml::parse(CONFIG_TEMPLATE).unwrap();
        assert_eq!(toml.execution_plan().unwrap(), ExecutionPlan::weekly_default());
        // The placeholder org must still be flagged.
        assert!(toml.org().is_none());
        assert!(!toml.validate_with(env(&[])).is_valid());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut toml = MergeToml::parse("[github]\norg = \"file-org\"").unwrap();
        toml.apply_env_from(env(&[
            ("GITHUB_ORG", "env-org"),
            ("MERGE_HISTORY_CAPACITY", "7"),
            ("LOG_LEVEL", "WARN"),
        ]))
        .unwrap();

        assert_eq!(toml.org(), Some("env-org"));
        assert_eq!(toml.history.capacity, 7);
        assert_eq!(toml.logging.level, "warn");
    }

    #[test]
    fn test_env_invalid_capacity_is_error() {
        let mut toml = MergeToml::default();
        let err = toml
            .apply_env_from(env(&[("MERGE_HISTORY_CAPACITY", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("MERGE_HISTORY_CAPACITY"));
    }

    #[test]
    fn test_validate_reports_missing_org() {
        let report = MergeToml::default().validate_with(env(&[]));
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.contains("github.org")));
    }

    #[test]
    fn test_validate_warns_on_plaintext_token() {
        let toml = MergeToml::parse("[github]\norg = \"acme\"").unwrap();
        let report = toml.validate_with(env(&[("GITHUB_TOKEN", "ghp_secret")]));
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("GITHUB_TOKEN")));
    }

    #[test]
    fn test_validate_reports_invalid_plan() {
        let toml = MergeToml::parse(
            r#"
            [github]
            org = "acme"
            [[plan.phases]]
            repositories = ["core"]
            [[plan.phases]]
            repositories = ["core"]
            "#,
        )
        .unwrap();
        let report = toml.validate_with(env(&[]));
        assert!(report.errors.iter().any(|e| e.contains("core")));
    }

    #[test]
    fn test_validate_warns_on_single_repo_parallel_phase() {
        let toml = MergeToml::parse(
            r#"
            [github]
            org = "acme"
            [[plan.phases]]
            repositories = ["core"]
            parallel = true
            "#,
        )
        .unwrap();
        let report = toml.validate_with(env(&[]));
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("Phase 1")));
    }

    #[test]
    fn test_validate_zero_capacity_and_unknown_level() {
        let mut toml = MergeToml::parse("[github]\norg = \"acme\"").unwrap();
        toml.history.capacity = 0;
        toml.logging.level = "loud".to_string();
        let report = toml.validate_with(env(&[]));
        assert!(report.errors.iter().any(|e| e.contains("history.capacity")));
        assert!(report.warnings.iter().any(|w| w.contains("loud")));
    }

    #[test]
    fn test_verbose_forces_debug() {
        let config = MergeConfig {
            path: PathBuf::from(CONFIG_FILE),
            toml: MergeToml::default(),
            verbose: true,
        };
        assert_eq!(config.log_level(), "debug");
    }

    #[test]
    fn test_write_template_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        write_template(&path, false).unwrap();
        assert!(write_template(&path, false).is_err());
        write_template(&path, true).unwrap();

        let loaded = MergeToml::load(&path).unwrap();
        assert_eq!(loaded.history.capacity, 50);
    }
}
