use crate::materialize::{materialize, ConfigSlot};
use crate::plan::{is_contained_relative, LoadedPlan, ResolvedScenario};
use crate::report::{ScenarioReport, ScenarioState};
use crate::tool::{self, DeployParams, DeploymentTool};
use std::fs;

/// Remove the resources of the config currently in the slot.
///
/// Failures are logged and recorded on the report; they never change `pass`.
pub(super) fn teardown_scenario(
    tool: &mut dyn DeploymentTool,
    slot: &ConfigSlot,
    params: &DeployParams,
    report: &mut ScenarioReport,
) {
    match tool::remove(tool, slot, params) {
        Ok(run) if run.success => {
            report.teardown = Some(run);
            report.enter(ScenarioState::TornDown);
        }
        Ok(run) => {
            let message = format!(
                "{} failed ({}): {}",
                run.command_line,
                run.exit_description(),
                run.output_excerpt()
            );
            tracing::warn!(scenario = %report.scenario_id, %message, "teardown failed");
            report.teardown_failed(message);
            report.teardown = Some(run);
        }
        Err(err) => {
            tracing::warn!(scenario = %report.scenario_id, error = %err, "teardown failed");
            report.teardown_failed(err.to_string());
        }
    }
}

/// Remove leftovers of earlier runs for every scenario, ignoring failures.
pub(super) fn pre_clean(
    slot: &mut ConfigSlot,
    tool: &mut dyn DeploymentTool,
    scenarios: &[ResolvedScenario],
) {
    for scenario in scenarios {
        if let Err(err) = materialize(slot, &scenario.template_path, &scenario.bindings) {
            tracing::warn!(scenario = %scenario.id, error = %format!("{err:#}"), "pre-clean skipped");
            continue;
        }
        let params = DeployParams {
            region: scenario.region.clone(),
            verbose: scenario.verbose,
        };
        match tool::remove(tool, slot, &params) {
            Ok(run) if !run.success => {
                tracing::debug!(scenario = %scenario.id, "pre-clean remove reported failure")
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(scenario = %scenario.id, error = %err, "pre-clean failed"),
        }
    }
}

/// Delete the active config and the plan's `cleanup_paths`.
///
/// Only local files are touched; deployed resources are left to teardown.
pub fn clean_local_artifacts(slot: &mut ConfigSlot, loaded: &LoadedPlan) {
    match slot.clear() {
        Ok(true) => tracing::debug!(config = %slot.path().display(), "removed active config"),
        Ok(false) => {}
        Err(err) => tracing::warn!(error = %format!("{err:#}"), "remove active config"),
    }
    for rel in &loaded.plan.cleanup_paths {
        if !is_contained_relative(rel) {
            tracing::warn!(path = %rel, "refusing to clean path outside the plan directory");
            continue;
        }
        let path = loaded.resolve_path(rel);
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else if path.exists() {
            fs::remove_file(&path)
        } else {
            continue;
        };
        match result {
            Ok(()) => tracing::debug!(path = %path.display(), "removed local artifact"),
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "remove local artifact"),
        }
    }
}
