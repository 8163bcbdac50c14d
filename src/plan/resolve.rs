use super::{CheckSpec, LoadedPlan, ScenarioSpec, RUN_ID_PLACEHOLDER};
use crate::materialize::substitute;
use crate::verify::RetryPolicy;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Command-line values layered under scenario fields.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOverrides {
    /// Region for scenarios that set none themselves.
    pub region: Option<String>,
    pub verbose: bool,
}

/// A scenario with defaults merged, `{run_id}` expanded and check tokens bound.
#[derive(Debug, Clone)]
pub struct ResolvedScenario {
    pub id: String,
    pub description: String,
    pub template_path: PathBuf,
    pub bindings: BTreeMap<String, String>,
    pub region: Option<String>,
    pub verbose: bool,
    pub retry: RetryPolicy,
    pub checks: Vec<CheckSpec>,
}

impl ResolvedScenario {
    /// Resource identifiers owned by this scenario for its lifetime.
    pub fn resource_identifiers(&self) -> impl Iterator<Item = &str> {
        self.bindings.values().map(String::as_str)
    }
}

pub fn resolve_scenario(
    loaded: &LoadedPlan,
    scenario: &ScenarioSpec,
    run_id: &str,
    overrides: &ScenarioOverrides,
) -> ResolvedScenario {
    let defaults = &loaded.plan.defaults;

    let bindings: BTreeMap<String, String> = scenario
        .bindings
        .iter()
        .map(|(token, value)| (token.clone(), value.replace(RUN_ID_PLACEHOLDER, run_id)))
        .collect();

    let region = scenario
        .region
        .clone()
        .or_else(|| overrides.region.clone())
        .or_else(|| defaults.region.clone());
    let verbose = overrides.verbose || scenario.verbose.or(defaults.verbose).unwrap_or(false);
    let retry = scenario
        .retry
        .or(defaults.retry)
        .map(RetryPolicy::from_spec)
        .unwrap_or_default();

    let checks = scenario
        .checks
        .iter()
        .map(|check| {
            check.map_fields(|value| {
                substitute(value, &bindings).replace(RUN_ID_PLACEHOLDER, run_id)
            })
        })
        .collect();

    ResolvedScenario {
        id: scenario.id.clone(),
        description: scenario.description.clone(),
        template_path: loaded.resolve_path(&scenario.template),
        bindings,
        region,
        verbose,
        retry,
        checks,
    }
}

/// Short lowercase suffix that keeps resource names unique across runs.
pub fn generate_run_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    format!("{secs:x}{:03x}", std::process::id() & 0xfff)
}
