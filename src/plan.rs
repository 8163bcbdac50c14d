//! Suite plan model: scenarios, their templates and bindings, and expected state.
//!
//! The plan is the only place scenario intent lives; Rust stays a mechanical
//! executor of materialize, deploy, verify and remove.
mod resolve;
mod validate;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use resolve::{generate_run_id, resolve_scenario, ResolvedScenario, ScenarioOverrides};
pub(crate) use validate::is_contained_relative;
pub use validate::validate_plan;

pub const PLAN_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_PLAN_FILE: &str = "deploy-check.json";
/// Placeholder inside binding values that expands to the per-run suffix.
pub const RUN_ID_PLACEHOLDER: &str = "{run_id}";
pub const DEFAULT_METADATA_HEADER: &str = "Cache-Control";

fn default_tool_command() -> Vec<String> {
    vec!["serverless".to_string(), "client".to_string()]
}

fn default_config_file() -> String {
    "serverless.yml".to_string()
}

fn default_head_object_command() -> Vec<String> {
    vec![
        "aws".to_string(),
        "s3api".to_string(),
        "head-object".to_string(),
    ]
}

fn default_metadata_header() -> String {
    DEFAULT_METADATA_HEADER.to_string()
}

/// Top-level suite plan parsed from JSON.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SuitePlan {
    pub schema_version: u32,
    #[serde(default)]
    pub tool: ToolSpec,
    #[serde(default)]
    pub storage: StorageSpec,
    #[serde(default)]
    pub defaults: PlanDefaults,
    pub scenarios: Vec<ScenarioSpec>,
    /// Local artifacts removed after a fully passing run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup_paths: Vec<String>,
}

/// Deployment tool invocation settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    /// argv prefix; `deploy`/`remove` and flags are appended.
    #[serde(default = "default_tool_command")]
    pub command: Vec<String>,
    /// File name of the active configuration inside the work dir.
    #[serde(default = "default_config_file")]
    pub config_file: String,
}

impl Default for ToolSpec {
    fn default() -> Self {
        Self {
            command: default_tool_command(),
            config_file: default_config_file(),
        }
    }
}

/// Object metadata lookup settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StorageSpec {
    /// argv prefix; `--bucket <container> --key <key>` is appended.
    #[serde(default = "default_head_object_command")]
    pub head_object: Vec<String>,
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self {
            head_object: default_head_object_command(),
        }
    }
}

/// How a scenario treats checks after the first failure.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckPolicy {
    #[default]
    CollectAll,
    FailFast,
}

/// How the suite treats scenarios after the first failed scenario.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Halt,
    Continue,
}

/// Bounded retry around a single check probe.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetrySpec {
    pub attempts: u32,
    #[serde(default)]
    pub initial_delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_ms: Option<u64>,
}

/// Suite-wide defaults applied when scenarios omit a field.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct PlanDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_policy: Option<CheckPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown_on_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_seconds: Option<u64>,
}

/// One deployment-and-verify case.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScenarioSpec {
    pub id: String,
    pub description: String,
    /// Template path, relative to the plan directory unless absolute.
    pub template: String,
    /// Placeholder token -> resource identifier.
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    pub checks: Vec<CheckSpec>,
}

/// Expected-state assertion. String fields may reference binding tokens.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum CheckSpec {
    /// GET `url`; body must contain `contains`.
    Content { url: String, contains: String },
    /// Head `key` in `container`; `header` must equal `equals`.
    Metadata {
        container: String,
        key: String,
        #[serde(default = "default_metadata_header")]
        header: String,
        equals: String,
    },
    /// GET `url`; response header must equal `equals`.
    Header {
        url: String,
        header: String,
        equals: String,
    },
    /// GET `url`; must be redirected and the final body must contain `contains`.
    Redirect { url: String, contains: String },
}

impl CheckSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckSpec::Content { .. } => "content",
            CheckSpec::Metadata { .. } => "metadata",
            CheckSpec::Header { .. } => "header",
            CheckSpec::Redirect { .. } => "redirect",
        }
    }

    /// Short human-readable description used in transcripts and reports.
    pub fn label(&self) -> String {
        match self {
            CheckSpec::Content { url, contains } => {
                format!("content {url} contains {contains:?}")
            }
            CheckSpec::Metadata {
                container,
                key,
                header,
                equals,
            } => format!("metadata {container}/{key} {header} == {equals:?}"),
            CheckSpec::Header {
                url,
                header,
                equals,
            } => format!("header {url} {header} == {equals:?}"),
            CheckSpec::Redirect { url, contains } => {
                format!("redirect {url} contains {contains:?}")
            }
        }
    }

    /// Apply `rewrite` to every string field that may carry a binding token.
    pub(crate) fn map_fields(&self, rewrite: impl Fn(&str) -> String) -> CheckSpec {
        match self {
            CheckSpec::Content { url, contains } => CheckSpec::Content {
                url: rewrite(url.as_str()),
                contains: contains.clone(),
            },
            CheckSpec::Metadata {
                container,
                key,
                header,
                equals,
            } => CheckSpec::Metadata {
                container: rewrite(container.as_str()),
                key: rewrite(key.as_str()),
                header: header.clone(),
                equals: equals.clone(),
            },
            CheckSpec::Header {
                url,
                header,
                equals,
            } => CheckSpec::Header {
                url: rewrite(url.as_str()),
                header: header.clone(),
                equals: equals.clone(),
            },
            CheckSpec::Redirect { url, contains } => CheckSpec::Redirect {
                url: rewrite(url.as_str()),
                contains: contains.clone(),
            },
        }
    }
}

/// A loaded plan plus the directory relative paths resolve against.
#[derive(Debug, Clone)]
pub struct LoadedPlan {
    pub plan: SuitePlan,
    pub path: PathBuf,
    pub root: PathBuf,
}

impl LoadedPlan {
    pub fn scenario(&self, id: &str) -> Result<&ScenarioSpec> {
        self.plan
            .scenarios
            .iter()
            .find(|scenario| scenario.id == id)
            .ok_or_else(|| anyhow!("scenario {id:?} not found in {}", self.path.display()))
    }

    /// Scenarios in plan order, restricted to `only` when non-empty.
    pub fn select(&self, only: &[String]) -> Result<Vec<&ScenarioSpec>> {
        if only.is_empty() {
            return Ok(self.plan.scenarios.iter().collect());
        }
        for id in only {
            self.scenario(id)?;
        }
        Ok(self
            .plan
            .scenarios
            .iter()
            .filter(|scenario| only.contains(&scenario.id))
            .collect())
    }

    pub fn resolve_path(&self, rel: &str) -> PathBuf {
        let path = Path::new(rel);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Load and parse a suite plan.
pub fn load_plan(path: &Path) -> Result<LoadedPlan> {
    let bytes = fs::read(path).with_context(|| format!("read plan {}", path.display()))?;
    let plan: SuitePlan = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse plan JSON {}", path.display()))?;
    let path = path
        .canonicalize()
        .with_context(|| format!("resolve plan path {}", path.display()))?;
    let root = path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("plan path has no parent directory"))?;
    Ok(LoadedPlan { plan, path, root })
}
