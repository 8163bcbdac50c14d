//! Scenario orchestration.
//!
//! Each scenario runs materialize, deploy, verify and teardown in strict
//! sequence against the one config slot. Scenarios never overlap.
mod teardown;

use crate::materialize::{materialize, ConfigSlot};
use crate::plan::{
    resolve_scenario, validate_plan, CheckPolicy, FailurePolicy, LoadedPlan, PlanDefaults,
    ResolvedScenario, ScenarioOverrides,
};
use crate::report::{
    FailureKind, ScenarioReport, ScenarioState, SuiteReport, REPORT_SCHEMA_VERSION,
};
use crate::tool::{self, DeployParams, DeploymentTool};
use crate::util::now_epoch_ms;
use crate::verify::{verify_checks, CheckOutcome, Probes};
use anyhow::Result;
use std::time::Instant;

pub use teardown::clean_local_artifacts;

/// Run-wide knobs, plan defaults layered under command-line flags.
#[derive(Debug, Clone)]
pub struct SuiteOptions {
    pub run_id: String,
    pub check_policy: CheckPolicy,
    pub failure_policy: FailurePolicy,
    pub teardown_on_failure: bool,
    pub only: Vec<String>,
    pub pre_clean: bool,
    pub overrides: ScenarioOverrides,
}

impl SuiteOptions {
    pub fn from_defaults(defaults: &PlanDefaults, run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            check_policy: defaults.check_policy.unwrap_or_default(),
            failure_policy: defaults.failure_policy.unwrap_or_default(),
            teardown_on_failure: defaults.teardown_on_failure.unwrap_or(true),
            only: Vec::new(),
            pre_clean: false,
            overrides: ScenarioOverrides::default(),
        }
    }
}

/// Run every selected scenario and aggregate the results.
///
/// Plan problems are returned as errors before anything is deployed.
/// Scenario failures are recorded in the report, never returned.
pub fn run_suite(
    loaded: &LoadedPlan,
    slot: &mut ConfigSlot,
    tool: &mut dyn DeploymentTool,
    probes: Probes<'_>,
    options: &SuiteOptions,
) -> Result<SuiteReport> {
    validate_plan(loaded, &options.run_id)?;
    let scenarios: Vec<ResolvedScenario> = loaded
        .select(&options.only)?
        .into_iter()
        .map(|scenario| resolve_scenario(loaded, scenario, &options.run_id, &options.overrides))
        .collect();
    tracing::info!(
        run_id = %options.run_id,
        scenarios = scenarios.len(),
        "starting suite"
    );

    if options.pre_clean {
        teardown::pre_clean(slot, tool, &scenarios);
    }

    let mut reports = Vec::with_capacity(scenarios.len());
    let mut halted = false;
    for scenario in &scenarios {
        if halted {
            reports.push(ScenarioReport::not_run(&scenario.id, &scenario.description));
            continue;
        }
        println!("==> {}", scenario.description);
        let report = run_scenario(scenario, slot, tool, probes, options);
        print_outcome(&report);
        if !report.pass && options.failure_policy == FailurePolicy::Halt {
            tracing::info!(scenario = %scenario.id, "halting suite after failure");
            halted = true;
        }
        reports.push(report);
    }

    let report = summarize(loaded, &options.run_id, reports)?;
    println!(
        "{} passed, {} failed, {} not run",
        report.pass_count, report.fail_count, report.not_run_count
    );
    if report.success() {
        clean_local_artifacts(slot, loaded);
    }
    Ok(report)
}

fn run_scenario(
    scenario: &ResolvedScenario,
    slot: &mut ConfigSlot,
    tool: &mut dyn DeploymentTool,
    probes: Probes<'_>,
    options: &SuiteOptions,
) -> ScenarioReport {
    let started = Instant::now();
    let mut report = ScenarioReport::new(
        &scenario.id,
        &scenario.description,
        scenario.region.as_deref(),
    );
    drive_scenario(scenario, slot, tool, probes, options, &mut report);
    report.duration_ms = started.elapsed().as_millis();
    report
}

fn drive_scenario(
    scenario: &ResolvedScenario,
    slot: &mut ConfigSlot,
    tool: &mut dyn DeploymentTool,
    probes: Probes<'_>,
    options: &SuiteOptions,
    report: &mut ScenarioReport,
) {
    report.enter(ScenarioState::Setup);
    match materialize(slot, &scenario.template_path, &scenario.bindings) {
        Ok(config) => report.config_sha256 = Some(config.sha256),
        Err(err) => {
            setup_failed(report, format!("{err:#}"));
            return;
        }
    }

    let params = DeployParams {
        region: scenario.region.clone(),
        verbose: scenario.verbose,
    };
    let run = match tool::deploy(tool, slot, &params) {
        Ok(run) => run,
        Err(err) => {
            setup_failed(report, err.to_string());
            return;
        }
    };
    let deployed = run.success;
    if !deployed {
        report.enter(ScenarioState::DeployFailed);
        report.fail(
            FailureKind::Deployment,
            format!(
                "{} failed ({}): {}",
                run.command_line,
                run.exit_description(),
                run.output_excerpt()
            ),
        );
    }
    report.deploy = Some(run);

    if deployed {
        report.enter(ScenarioState::Deployed);
        report.checks = verify_checks(
            &scenario.checks,
            probes.in_region(scenario.region.as_deref()),
            options.check_policy,
            &scenario.retry,
        );
        match first_failure(&report.checks) {
            None => {
                report.pass = true;
                report.enter(ScenarioState::Verified);
            }
            Some((kind, message)) => {
                report.enter(ScenarioState::VerificationFailed);
                report.fail(kind, message);
            }
        }
    }

    if report.pass || options.teardown_on_failure {
        teardown::teardown_scenario(tool, slot, &params, report);
    } else {
        tracing::info!(scenario = %scenario.id, "leaving failed scenario in place");
    }
    if !report.pass {
        report.enter(ScenarioState::Aborted);
    }
}

fn setup_failed(report: &mut ScenarioReport, message: String) {
    report.enter(ScenarioState::SetupFailed);
    report.fail(FailureKind::Setup, message);
    report.enter(ScenarioState::Aborted);
}

/// Kind of the first failed check plus every failure message.
fn first_failure(outcomes: &[CheckOutcome]) -> Option<(FailureKind, String)> {
    let failures: Vec<_> = outcomes
        .iter()
        .filter_map(|outcome| outcome.failure.as_ref())
        .collect();
    let kind = failures.first()?.kind();
    let message = failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Some((kind, message))
}

fn print_outcome(report: &ScenarioReport) {
    if report.pass {
        println!("PASS: {}", report.scenario_id);
    } else {
        println!(
            "FAIL: {}: {}",
            report.scenario_id,
            report.failure.as_deref().unwrap_or("unknown failure")
        );
    }
}

fn summarize(
    loaded: &LoadedPlan,
    run_id: &str,
    scenarios: Vec<ScenarioReport>,
) -> Result<SuiteReport> {
    let not_run_count = scenarios.iter().filter(|report| !report.was_run()).count();
    let pass_count = scenarios.iter().filter(|report| report.pass).count();
    let fail_count = scenarios.len() - pass_count - not_run_count;
    Ok(SuiteReport {
        schema_version: REPORT_SCHEMA_VERSION,
        generated_at_epoch_ms: now_epoch_ms()?,
        plan_path: loaded.path.display().to_string(),
        run_id: run_id.to_string(),
        scenario_count: scenarios.len(),
        pass_count,
        fail_count,
        not_run_count,
        halted: not_run_count > 0,
        scenarios,
    })
}

#[cfg(test)]
mod tests;
