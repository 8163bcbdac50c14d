//! Plan validation run by `dcheck validate` and before every suite run.
//!
//! All problems are collected so authors can fix a plan in one pass.
use super::resolve::{resolve_scenario, ScenarioOverrides};
use super::{CheckSpec, LoadedPlan, PLAN_SCHEMA_VERSION};
use crate::materialize::unused_tokens;
use anyhow::{anyhow, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path};
use std::sync::OnceLock;

fn bucket_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").expect("valid bucket name regex")
    })
}

/// Validate plan structure, templates, bindings and checks for `run_id`.
pub fn validate_plan(loaded: &LoadedPlan, run_id: &str) -> Result<()> {
    let errors = plan_errors(loaded, run_id);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!(
        "plan {} is invalid:\n  - {}",
        loaded.path.display(),
        errors.join("\n  - ")
    ))
}

pub(super) fn plan_errors(loaded: &LoadedPlan, run_id: &str) -> Vec<String> {
    let plan = &loaded.plan;
    let mut errors = Vec::new();

    if plan.schema_version != PLAN_SCHEMA_VERSION {
        errors.push(format!(
            "unsupported schema_version {} (expected {PLAN_SCHEMA_VERSION})",
            plan.schema_version
        ));
    }
    if plan.scenarios.is_empty() {
        errors.push("scenarios must be non-empty".to_string());
    }
    if plan.tool.command.is_empty() {
        errors.push("tool.command must be non-empty".to_string());
    }
    if plan.tool.config_file.trim().is_empty()
        || plan.tool.config_file.contains('/')
        || plan.tool.config_file.contains('\\')
    {
        errors.push(format!(
            "tool.config_file must be a bare file name (got {:?})",
            plan.tool.config_file
        ));
    }
    if plan.storage.head_object.is_empty() {
        errors.push("storage.head_object must be non-empty".to_string());
    }
    if let Some(retry) = plan.defaults.retry {
        if retry.attempts == 0 {
            errors.push("defaults.retry.attempts must be > 0".to_string());
        }
    }
    for rel in &plan.cleanup_paths {
        if !is_contained_relative(rel) {
            errors.push(format!(
                "cleanup_paths entry {rel:?} must be a relative path inside the plan directory"
            ));
        }
    }

    let mut seen_ids = BTreeSet::new();
    // resource identifier -> owning scenario id
    let mut owners: BTreeMap<String, String> = BTreeMap::new();

    for scenario in &plan.scenarios {
        let label = if scenario.id.trim().is_empty() {
            "<unnamed>".to_string()
        } else {
            scenario.id.clone()
        };
        if scenario.id.trim().is_empty() {
            errors.push("scenario id is required".to_string());
        } else if !seen_ids.insert(scenario.id.clone()) {
            errors.push(format!("duplicate scenario id {:?}", scenario.id));
        }
        if scenario.description.trim().is_empty() {
            errors.push(format!("{label}: description is required"));
        }
        if scenario.checks.is_empty() {
            errors.push(format!("{label}: at least one check is required"));
        }
        if let Some(retry) = scenario.retry {
            if retry.attempts == 0 {
                errors.push(format!("{label}: retry.attempts must be > 0"));
            }
        }

        let tokens: Vec<&String> = scenario.bindings.keys().collect();
        for token in &tokens {
            if token.is_empty() {
                errors.push(format!("{label}: binding tokens must be non-empty"));
            }
        }
        for (idx, outer) in tokens.iter().enumerate() {
            for inner in tokens.iter().skip(idx + 1) {
                if !outer.is_empty()
                    && !inner.is_empty()
                    && (outer.contains(inner.as_str()) || inner.contains(outer.as_str()))
                {
                    errors.push(format!(
                        "{label}: binding tokens {outer:?} and {inner:?} overlap"
                    ));
                }
            }
        }

        let template_path = loaded.resolve_path(&scenario.template);
        match fs::read_to_string(&template_path) {
            Ok(template) => {
                let unused = unused_tokens(&template, &scenario.bindings);
                if !unused.is_empty() {
                    errors.push(format!(
                        "{label}: binding token(s) not found in template: {}",
                        unused.join(", ")
                    ));
                }
            }
            Err(err) => errors.push(format!(
                "{label}: template {} unreadable: {err}",
                template_path.display()
            )),
        }

        let resolved = resolve_scenario(loaded, scenario, run_id, &ScenarioOverrides::default());
        for value in resolved.resource_identifiers() {
            if value.trim().is_empty() {
                errors.push(format!("{label}: binding values must be non-empty"));
                continue;
            }
            match owners.get(value).cloned() {
                Some(owner) if owner != scenario.id => errors.push(format!(
                    "{label}: resource identifier {value:?} is also bound by {owner}"
                )),
                Some(_) => {}
                None => {
                    owners.insert(value.to_string(), scenario.id.clone());
                }
            }
        }
        for (idx, check) in resolved.checks.iter().enumerate() {
            for problem in check_errors(check) {
                errors.push(format!("{label}: checks[{idx}] {problem}"));
            }
        }
    }

    errors
}

fn check_errors(check: &CheckSpec) -> Vec<String> {
    let mut errors = Vec::new();
    match check {
        CheckSpec::Content { url, contains } | CheckSpec::Redirect { url, contains } => {
            validate_url(url, &mut errors);
            if contains.is_empty() {
                errors.push("contains must be non-empty".to_string());
            }
        }
        CheckSpec::Header {
            url,
            header,
            equals: _,
        } => {
            validate_url(url, &mut errors);
            if header.trim().is_empty() {
                errors.push("header must be non-empty".to_string());
            }
        }
        CheckSpec::Metadata {
            container,
            key,
            header,
            equals: _,
        } => {
            if !bucket_name_regex().is_match(container) {
                errors.push(format!("container {container:?} is not a valid bucket name"));
            }
            if key.is_empty() {
                errors.push("key must be non-empty".to_string());
            }
            if header.trim().is_empty() {
                errors.push("header must be non-empty".to_string());
            }
        }
    }
    errors
}

fn validate_url(url: &str, errors: &mut Vec<String>) {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match rest {
        Some(rest) if !rest.is_empty() && !rest.starts_with('/') => {}
        _ => errors.push(format!("url {url:?} must be an absolute http(s) URL")),
    }
}

/// True for relative paths that name something below the base directory.
pub(crate) fn is_contained_relative(rel: &str) -> bool {
    let path = Path::new(rel);
    path.is_relative()
        && path
            .components()
            .any(|component| matches!(component, Component::Normal(_)))
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
