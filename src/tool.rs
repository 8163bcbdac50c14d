//! Deployment tool invocation for `deploy` and `remove`.
//!
//! The tool is a black box: it reads the active config from the slot directory
//! and is judged only by its exit status and captured output.
use crate::materialize::ConfigSlot;
use crate::plan::ToolSpec;
use crate::util::format_command_line;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

/// Env var that replaces `tool.command` (shell-words syntax).
pub const TOOL_COMMAND_ENV: &str = "DEPLOY_CHECK_TOOL";
/// Bytes of captured output kept in reports.
const MAX_REPORTED_OUTPUT: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOperation {
    Deploy,
    Remove,
}

impl ToolOperation {
    pub fn subcommand(self) -> &'static str {
        match self {
            ToolOperation::Deploy => "deploy",
            ToolOperation::Remove => "remove",
        }
    }
}

/// Per-invocation parameters passed through as tool flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployParams {
    pub region: Option<String>,
    pub verbose: bool,
}

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolRun {
    pub operation: ToolOperation,
    pub command_line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub success: bool,
    pub duration_ms: u128,
    #[serde(skip)]
    pub stdout: String,
    #[serde(skip)]
    pub stderr: String,
}

impl ToolRun {
    /// Tail of stderr (or stdout when stderr is empty) for failure messages.
    pub fn output_excerpt(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let trimmed = source.trim();
        let mut start = trimmed.len().saturating_sub(MAX_REPORTED_OUTPUT);
        while !trimmed.is_char_boundary(start) {
            start += 1;
        }
        trimmed[start..].to_string()
    }

    pub fn exit_description(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("deployment tool command is empty")]
    EmptyCommand,

    #[error("deployment tool {program:?} not found: {reason}")]
    NotFound { program: String, reason: String },

    #[error("spawn {command_line}: {source}")]
    Spawn {
        command_line: String,
        #[source]
        source: std::io::Error,
    },
}

/// Seam between the orchestrator and the external deployment tool.
pub trait DeploymentTool {
    fn run(
        &mut self,
        operation: ToolOperation,
        slot: &ConfigSlot,
        params: &DeployParams,
    ) -> std::result::Result<ToolRun, ToolError>;
}

/// Runs the real tool as a child process.
#[derive(Debug, Clone)]
pub struct CommandTool {
    argv: Vec<String>,
}

impl CommandTool {
    pub fn new(argv: Vec<String>) -> std::result::Result<Self, ToolError> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(ToolError::EmptyCommand);
        }
        Ok(Self { argv })
    }

    /// Build from the plan, honoring the env override. Relative program paths
    /// resolve against `plan_root`.
    pub fn from_plan(spec: &ToolSpec, plan_root: &Path) -> Result<Self> {
        let argv = match env::var(TOOL_COMMAND_ENV) {
            Ok(raw) if !raw.trim().is_empty() => shell_words::split(&raw)
                .with_context(|| format!("parse {TOOL_COMMAND_ENV}: {raw}"))?,
            _ => spec.command.clone(),
        };
        let argv = resolve_program(argv, plan_root);
        Ok(Self::new(argv)?)
    }

    /// Full argv for an operation: `<prefix> <op> [--region R] --no-confirm [--verbose]`.
    pub fn argv_for(&self, operation: ToolOperation, params: &DeployParams) -> Vec<String> {
        let mut argv = self.argv.clone();
        argv.push(operation.subcommand().to_string());
        if let Some(region) = params.region.as_deref() {
            argv.push("--region".to_string());
            argv.push(region.to_string());
        }
        argv.push("--no-confirm".to_string());
        if params.verbose {
            argv.push("--verbose".to_string());
        }
        argv
    }
}

impl DeploymentTool for CommandTool {
    fn run(
        &mut self,
        operation: ToolOperation,
        slot: &ConfigSlot,
        params: &DeployParams,
    ) -> std::result::Result<ToolRun, ToolError> {
        let argv = self.argv_for(operation, params);
        let command_line = format_command_line(&argv);
        let program = locate_program(&argv[0])?;
        tracing::debug!(cwd = %slot.dir().display(), %command_line, "invoking deployment tool");

        let started = Instant::now();
        let output = Command::new(&program)
            .args(&argv[1..])
            .current_dir(slot.dir())
            .output()
            .map_err(|source| ToolError::Spawn {
                command_line: command_line.clone(),
                source,
            })?;
        let duration_ms = started.elapsed().as_millis();

        let run = ToolRun {
            operation,
            command_line,
            exit_code: output.status.code(),
            success: output.status.success(),
            duration_ms,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if params.verbose {
            echo_output(&run);
        }
        Ok(run)
    }
}

/// Invoke `deploy` for the active config. Non-success is returned, not raised.
pub fn deploy(
    tool: &mut dyn DeploymentTool,
    slot: &ConfigSlot,
    params: &DeployParams,
) -> std::result::Result<ToolRun, ToolError> {
    let run = tool.run(ToolOperation::Deploy, slot, params)?;
    tracing::info!(
        command = %run.command_line,
        success = run.success,
        duration_ms = run.duration_ms as u64,
        "deploy finished"
    );
    Ok(run)
}

/// Invoke `remove` for the active config without a confirmation prompt.
pub fn remove(
    tool: &mut dyn DeploymentTool,
    slot: &ConfigSlot,
    params: &DeployParams,
) -> std::result::Result<ToolRun, ToolError> {
    let run = tool.run(ToolOperation::Remove, slot, params)?;
    tracing::info!(
        command = %run.command_line,
        success = run.success,
        duration_ms = run.duration_ms as u64,
        "remove finished"
    );
    Ok(run)
}

fn resolve_program(mut argv: Vec<String>, plan_root: &Path) -> Vec<String> {
    if let Some(program) = argv.first_mut() {
        let path = Path::new(program.as_str());
        if program.contains('/') && path.is_relative() {
            *program = plan_root.join(path).display().to_string();
        }
    }
    argv
}

fn locate_program(program: &str) -> std::result::Result<PathBuf, ToolError> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        if path.is_file() {
            return Ok(path);
        }
        return Err(ToolError::NotFound {
            program: program.to_string(),
            reason: "no such file".to_string(),
        });
    }
    which::which(program).map_err(|err| ToolError::NotFound {
        program: program.to_string(),
        reason: err.to_string(),
    })
}

fn echo_output(run: &ToolRun) {
    for line in run.stdout.lines() {
        eprintln!("  | {line}");
    }
    for line in run.stderr.lines() {
        eprintln!("  ! {line}");
    }
}

/// Fail with the tool's output when a run did not succeed.
pub fn ensure_success(run: &ToolRun) -> Result<()> {
    if run.success {
        return Ok(());
    }
    Err(anyhow!(
        "{} failed ({}): {}",
        run.command_line,
        run.exit_description(),
        run.output_excerpt()
    ))
}
