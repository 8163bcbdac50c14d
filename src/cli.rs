//! CLI argument parsing for deploy-check.
//!
//! The CLI only wires flags onto the plan; scenario intent stays in the plan file.
use crate::plan::DEFAULT_PLAN_FILE;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "dcheck",
    version,
    about = "End-to-end verification harness for static-site deployments",
    after_help = "Commands:\n  init --dir <dir>                    Write a starter plan and config templates\n  validate                            Validate the plan and list scenarios\n  materialize --scenario <id>         Render one scenario's config\n  verify --scenario <id>              Check live state without deploying\n  remove --scenario <id>              Tear down one scenario's resources\n  run                                 Deploy, verify and tear down every scenario\n\nExamples:\n  dcheck init --dir test\n  dcheck validate --plan test/deploy-check.json\n  dcheck run --plan test/deploy-check.json --report out/report.json\n  dcheck run --only headers-custom-index --keep-failed",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Validate(ValidateArgs),
    Materialize(MaterializeArgs),
    Verify(VerifyArgs),
    Remove(RemoveArgs),
    Run(RunArgs),
}

impl Command {
    /// Whether the command asked for debug-level logging.
    pub fn verbose(&self) -> bool {
        match self {
            Command::Verify(args) => args.scenario.verbose,
            Command::Remove(args) => args.scenario.verbose,
            Command::Run(args) => args.verbose,
            Command::Init(_) | Command::Validate(_) | Command::Materialize(_) => false,
        }
    }
}

/// Plan file location shared by every command that reads a plan.
#[derive(Args, Debug, Clone)]
pub struct PlanArg {
    /// Suite plan JSON
    #[arg(long, value_name = "PATH", default_value = DEFAULT_PLAN_FILE)]
    pub plan: PathBuf,
}

/// Selects one scenario and the run it belongs to.
#[derive(Args, Debug, Clone)]
pub struct ScenarioArg {
    #[command(flatten)]
    pub plan: PlanArg,

    /// Scenario id from the plan
    #[arg(long, value_name = "ID")]
    pub scenario: String,

    /// Suffix substituted for {run_id} in binding values
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Region for a scenario that sets none
    #[arg(long, value_name = "REGION")]
    pub region: Option<String>,

    /// Pass --verbose to the deployment tool and log at debug level
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Write a starter plan and config templates")]
pub struct InitArgs {
    /// Directory to write the plan into
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,

    /// Overwrite existing files
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Validate the plan and list its scenarios")]
pub struct ValidateArgs {
    #[command(flatten)]
    pub plan: PlanArg,

    /// Suffix substituted for {run_id} while checking bindings
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Render one scenario's config into the work dir")]
pub struct MaterializeArgs {
    #[command(flatten)]
    pub plan: PlanArg,

    /// Scenario id from the plan
    #[arg(long, value_name = "ID")]
    pub scenario: String,

    /// Suffix substituted for {run_id} in binding values
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Directory holding the active config (defaults to the plan directory)
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Write the rendered config here instead of the work dir
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Evaluate one scenario's checks against live state")]
pub struct VerifyArgs {
    #[command(flatten)]
    pub scenario: ScenarioArg,

    /// Stop at the first failing check
    #[arg(long)]
    pub fail_fast_checks: bool,

    /// Output path for the check outcomes as JSON
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Materialize one scenario and remove its resources")]
pub struct RemoveArgs {
    #[command(flatten)]
    pub scenario: ScenarioArg,

    /// Directory holding the active config (defaults to the plan directory)
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Deploy, verify and tear down every scenario in order")]
pub struct RunArgs {
    #[command(flatten)]
    pub plan: PlanArg,

    /// Region for scenarios that set none
    #[arg(long, value_name = "REGION")]
    pub region: Option<String>,

    /// Pass --verbose to the deployment tool and log at debug level
    #[arg(long)]
    pub verbose: bool,

    /// Leave failed scenarios deployed for inspection
    #[arg(long)]
    pub keep_failed: bool,

    /// Run remaining scenarios after a failure
    #[arg(long)]
    pub continue_on_failure: bool,

    /// Skip a scenario's remaining checks after its first failure
    #[arg(long)]
    pub fail_fast_checks: bool,

    /// Run only these scenario ids (repeatable)
    #[arg(long, value_name = "ID")]
    pub only: Vec<String>,

    /// Suffix substituted for {run_id} (generated when omitted)
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Output path for the suite report JSON
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Remove every selected scenario before the run, ignoring failures
    #[arg(long)]
    pub pre_clean: bool,

    /// Directory holding the active config (defaults to the plan directory)
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,
}
