//! Report types for suite runs.
//!
//! Reports are tagged per scenario so a run that continues past failures still
//! yields one record per scenario.
use crate::tool::ToolRun;
use crate::verify::CheckOutcome;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Failure taxonomy shared by setup, deployment, verification and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Setup,
    Deployment,
    ContentMismatch,
    Transport,
    HttpStatus,
    NotRedirected,
    HeaderMismatch,
    MetadataMismatch,
    ObjectNotFound,
    HeaderMissing,
    MetadataHeaderMissing,
    LookupFailed,
    Teardown,
}

/// Lifecycle state of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Setup,
    SetupFailed,
    Deployed,
    DeployFailed,
    Verified,
    VerificationFailed,
    TornDown,
    Aborted,
    NotRun,
}

impl ScenarioState {
    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioState::Setup => "setup",
            ScenarioState::SetupFailed => "setup_failed",
            ScenarioState::Deployed => "deployed",
            ScenarioState::DeployFailed => "deploy_failed",
            ScenarioState::Verified => "verified",
            ScenarioState::VerificationFailed => "verification_failed",
            ScenarioState::TornDown => "torn_down",
            ScenarioState::Aborted => "aborted",
            ScenarioState::NotRun => "not_run",
        }
    }
}

/// Final record for one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario_id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Every state the scenario passed through, in order.
    pub states: Vec<ScenarioState>,
    pub pass: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy: Option<ToolRun>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<CheckOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown: Option<ToolRun>,
    /// Teardown problems are recorded but never change `pass`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
    pub duration_ms: u128,
}

impl ScenarioReport {
    pub fn new(scenario_id: &str, description: &str, region: Option<&str>) -> Self {
        Self {
            scenario_id: scenario_id.to_string(),
            description: description.to_string(),
            region: region.map(str::to_string),
            states: Vec::new(),
            pass: false,
            failure_kind: None,
            failure: None,
            config_sha256: None,
            deploy: None,
            checks: Vec::new(),
            teardown: None,
            teardown_failure_kind: None,
            teardown_error: None,
            duration_ms: 0,
        }
    }

    pub fn not_run(scenario_id: &str, description: &str) -> Self {
        let mut report = Self::new(scenario_id, description, None);
        report.states.push(ScenarioState::NotRun);
        report
    }

    pub fn state(&self) -> Option<ScenarioState> {
        self.states.last().copied()
    }

    pub fn enter(&mut self, state: ScenarioState) {
        tracing::debug!(scenario = %self.scenario_id, state = state.as_str(), "scenario state");
        self.states.push(state);
    }

    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        self.pass = false;
        self.failure_kind = Some(kind);
        self.failure = Some(message.into());
    }

    /// Record a teardown problem without touching the scenario outcome.
    pub fn teardown_failed(&mut self, message: impl Into<String>) {
        self.teardown_failure_kind = Some(FailureKind::Teardown);
        self.teardown_error = Some(message.into());
    }

    pub fn was_run(&self) -> bool {
        self.state() != Some(ScenarioState::NotRun)
    }
}

/// Aggregate result of one suite run.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub schema_version: u32,
    pub generated_at_epoch_ms: u128,
    pub plan_path: String,
    pub run_id: String,
    pub scenario_count: usize,
    pub pass_count: usize,
    pub fail_count: usize,
    pub not_run_count: usize,
    pub halted: bool,
    pub scenarios: Vec<ScenarioReport>,
}

impl SuiteReport {
    pub fn success(&self) -> bool {
        self.fail_count == 0 && self.not_run_count == 0
    }
}

/// Write any report value as pretty JSON, creating parent directories.
pub fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
    }
    let text = serde_json::to_string_pretty(report).context("serialize report")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write report {}", path.display()))?;
    Ok(())
}
