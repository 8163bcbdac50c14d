//! Command implementations behind the CLI.
use crate::cli::{
    InitArgs, MaterializeArgs, RemoveArgs, RunArgs, ScenarioArg, ValidateArgs, VerifyArgs,
};
use crate::materialize::{materialize, ConfigSlot};
use crate::plan::{
    generate_run_id, load_plan, resolve_scenario, validate_plan, CheckPolicy, FailurePolicy,
    LoadedPlan, ResolvedScenario, ScenarioOverrides, DEFAULT_PLAN_FILE,
};
use crate::report::write_report;
use crate::suite::{run_suite, SuiteOptions};
use crate::templates;
use crate::tool::{self, ensure_success, CommandTool, DeployParams};
use crate::util::display_path;
use crate::verify::{verify_checks, CommandMetadataSource, HttpContentSource, Probes};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn run_init(args: InitArgs) -> Result<()> {
    fs::create_dir_all(&args.dir).with_context(|| format!("create {}", args.dir.display()))?;
    let plan_path = args.dir.join(DEFAULT_PLAN_FILE);
    if plan_path.is_file() && !args.force {
        return Err(anyhow!(
            "plan already exists at {} (use --force to overwrite)",
            plan_path.display()
        ));
    }
    for (rel, contents) in templates::STARTER_TEMPLATES {
        write_starter_file(&args.dir.join(rel), contents, args.force)?;
    }
    fs::write(&plan_path, templates::PLAN_JSON.as_bytes())
        .with_context(|| format!("write {}", plan_path.display()))?;
    println!("wrote {}", plan_path.display());
    Ok(())
}

fn write_starter_file(path: &Path, contents: &str, force: bool) -> Result<()> {
    if path.is_file() && !force {
        println!("kept {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

pub fn run_validate(args: ValidateArgs) -> Result<()> {
    let loaded = load_plan(&args.plan.plan)?;
    let run_id = args.run_id.unwrap_or_else(generate_run_id);
    validate_plan(&loaded, &run_id)?;
    for scenario in &loaded.plan.scenarios {
        println!(
            "{}: {} ({} check{})",
            scenario.id,
            scenario.description,
            scenario.checks.len(),
            if scenario.checks.len() == 1 { "" } else { "s" }
        );
    }
    println!(
        "plan ok: {} scenario(s) in {}",
        loaded.plan.scenarios.len(),
        loaded.path.display()
    );
    Ok(())
}

pub fn run_materialize(args: MaterializeArgs) -> Result<()> {
    let loaded = load_plan(&args.plan.plan)?;
    let run_id = args.run_id.unwrap_or_else(generate_run_id);
    validate_plan(&loaded, &run_id)?;
    let spec = loaded.scenario(&args.scenario)?;
    let scenario = resolve_scenario(&loaded, spec, &run_id, &ScenarioOverrides::default());

    let mut slot = match args.out.as_deref() {
        Some(out) => output_slot(out)?,
        None => config_slot(&loaded, args.work_dir.as_deref()),
    };
    let config = materialize(&mut slot, &scenario.template_path, &scenario.bindings)?;
    println!(
        "{} (sha256 {}, run id {run_id})",
        display_path(&config.path, Some(&loaded.root)),
        config.sha256
    );
    Ok(())
}

pub fn run_verify(args: VerifyArgs) -> Result<()> {
    let (loaded, scenario) = load_scenario(&args.scenario)?;
    let (web, storage) = build_probes(&loaded)?;
    let probes = Probes {
        web: &web,
        storage: &storage,
        region: scenario.region.as_deref(),
    };
    let policy = if args.fail_fast_checks {
        CheckPolicy::FailFast
    } else {
        loaded.plan.defaults.check_policy.unwrap_or_default()
    };

    println!("==> {}", scenario.description);
    let outcomes = verify_checks(&scenario.checks, probes, policy, &scenario.retry);
    for outcome in &outcomes {
        match &outcome.failure {
            None if outcome.passed() => println!("  ok: {}", outcome.label),
            None => println!("  skipped: {}", outcome.label),
            Some(failure) => println!("  failed: {}: {failure}", outcome.label),
        }
    }
    if let Some(path) = args.report.as_deref() {
        write_report(path, &outcomes)?;
    }

    let failed = outcomes.iter().filter(|outcome| !outcome.passed()).count();
    if failed > 0 {
        println!("FAIL: {}", scenario.id);
        return Err(anyhow!(
            "{failed} of {} check(s) did not pass for {}",
            outcomes.len(),
            scenario.id
        ));
    }
    println!("PASS: {}", scenario.id);
    Ok(())
}

pub fn run_remove(args: RemoveArgs) -> Result<()> {
    let (loaded, scenario) = load_scenario(&args.scenario)?;
    let mut slot = config_slot(&loaded, args.work_dir.as_deref());
    materialize(&mut slot, &scenario.template_path, &scenario.bindings)?;
    let mut tool = CommandTool::from_plan(&loaded.plan.tool, &loaded.root)?;
    let params = DeployParams {
        region: scenario.region.clone(),
        verbose: scenario.verbose,
    };
    let run = tool::remove(&mut tool, &slot, &params)?;
    ensure_success(&run)?;
    slot.clear()?;
    println!("removed {}", scenario.id);
    Ok(())
}

pub fn run_suite_command(args: RunArgs) -> Result<()> {
    let loaded = load_plan(&args.plan.plan)?;
    let run_id = args.run_id.clone().unwrap_or_else(generate_run_id);
    let mut options = SuiteOptions::from_defaults(&loaded.plan.defaults, run_id);
    if args.keep_failed {
        options.teardown_on_failure = false;
    }
    if args.continue_on_failure {
        options.failure_policy = FailurePolicy::Continue;
    }
    if args.fail_fast_checks {
        options.check_policy = CheckPolicy::FailFast;
    }
    options.only = args.only.clone();
    options.pre_clean = args.pre_clean;
    options.overrides = ScenarioOverrides {
        region: args.region.clone(),
        verbose: args.verbose,
    };

    let mut slot = config_slot(&loaded, args.work_dir.as_deref());
    let mut tool = CommandTool::from_plan(&loaded.plan.tool, &loaded.root)?;
    let (web, storage) = build_probes(&loaded)?;
    // Each scenario scopes lookups to its own resolved region.
    let probes = Probes {
        web: &web,
        storage: &storage,
        region: None,
    };

    let report = run_suite(&loaded, &mut slot, &mut tool, probes, &options)?;
    if let Some(path) = args.report.as_deref() {
        write_report(path, &report)?;
        println!("report: {}", path.display());
    }
    if report.success() {
        return Ok(());
    }
    Err(anyhow!(
        "{} of {} scenario(s) failed (run id {})",
        report.fail_count,
        report.scenario_count,
        report.run_id
    ))
}

fn load_scenario(args: &ScenarioArg) -> Result<(LoadedPlan, ResolvedScenario)> {
    let loaded = load_plan(&args.plan.plan)?;
    let run_id = args.run_id.clone().unwrap_or_else(generate_run_id);
    validate_plan(&loaded, &run_id)?;
    let overrides = ScenarioOverrides {
        region: args.region.clone(),
        verbose: args.verbose,
    };
    let spec = loaded.scenario(&args.scenario)?;
    let scenario = resolve_scenario(&loaded, spec, &run_id, &overrides);
    Ok((loaded, scenario))
}

fn config_slot(loaded: &LoadedPlan, work_dir: Option<&Path>) -> ConfigSlot {
    let dir = work_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| loaded.root.clone());
    ConfigSlot::new(dir, loaded.plan.tool.config_file.clone())
}

fn output_slot(out: &Path) -> Result<ConfigSlot> {
    let file_name = out
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("--out must name a file: {}", out.display()))?;
    let dir = match out.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok(ConfigSlot::new(dir, file_name))
}

fn build_probes(loaded: &LoadedPlan) -> Result<(HttpContentSource, CommandMetadataSource)> {
    let timeout = loaded
        .plan
        .defaults
        .request_timeout_seconds
        .map(Duration::from_secs);
    let web = HttpContentSource::new(timeout);
    let storage = CommandMetadataSource::from_plan(&loaded.plan.storage, &loaded.root)?;
    Ok((web, storage))
}
