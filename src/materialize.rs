//! Config materialization into the single active configuration slot.
//!
//! Templates are opaque text; the only transformation is token substitution.
use crate::util::sha256_hex;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The one well-known location the deployment tool reads its config from.
///
/// Exactly one document is active at a time; every write replaces the last.
/// Callers hold the slot mutably while materializing so two scenarios cannot
/// interleave writes.
#[derive(Debug)]
pub struct ConfigSlot {
    dir: PathBuf,
    file_name: String,
}

/// Result of writing a document into the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedConfig {
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: usize,
}

impl ConfigSlot {
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
        }
    }

    /// Working directory the deployment tool runs in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Overwrite the active document.
    pub fn write(&mut self, text: &str) -> Result<MaterializedConfig> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create work dir {}", self.dir.display()))?;
        let path = self.path();
        fs::write(&path, text.as_bytes())
            .with_context(|| format!("write config {}", path.display()))?;
        Ok(MaterializedConfig {
            path,
            sha256: sha256_hex(text.as_bytes()),
            bytes: text.len(),
        })
    }

    /// Remove the active document if present; returns whether a file was removed.
    pub fn clear(&mut self) -> Result<bool> {
        let path = self.path();
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("remove config {}", path.display()))?;
        Ok(true)
    }
}

/// Replace every occurrence of each bound token in one left-to-right pass.
///
/// At each position the longest matching token wins and substituted values are
/// never rescanned, so the output does not depend on binding order.
pub fn substitute(template: &str, bindings: &BTreeMap<String, String>) -> String {
    let mut tokens: Vec<(&str, &str)> = bindings
        .iter()
        .filter(|(token, _)| !token.is_empty())
        .map(|(token, value)| (token.as_str(), value.as_str()))
        .collect();
    tokens.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(ch) = rest.chars().next() {
        if let Some((token, value)) = tokens.iter().find(|(token, _)| rest.starts_with(token)) {
            out.push_str(value);
            rest = &rest[token.len()..];
            continue;
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    out
}

/// Tokens bound by the scenario that never occur in the template.
pub fn unused_tokens<'a>(template: &str, bindings: &'a BTreeMap<String, String>) -> Vec<&'a str> {
    bindings
        .keys()
        .filter(|token| !token.is_empty() && !template.contains(token.as_str()))
        .map(String::as_str)
        .collect()
}

/// Render a template, rejecting empty and unused tokens.
pub fn render(template: &str, bindings: &BTreeMap<String, String>) -> Result<String> {
    if bindings.keys().any(|token| token.is_empty()) {
        return Err(anyhow!("binding tokens must be non-empty"));
    }
    let unused = unused_tokens(template, bindings);
    if !unused.is_empty() {
        return Err(anyhow!(
            "binding token(s) not found in template: {}",
            unused.join(", ")
        ));
    }
    Ok(substitute(template, bindings))
}

/// Read `template_path`, substitute `bindings`, and make the result the active config.
pub fn materialize(
    slot: &mut ConfigSlot,
    template_path: &Path,
    bindings: &BTreeMap<String, String>,
) -> Result<MaterializedConfig> {
    let template = fs::read_to_string(template_path)
        .with_context(|| format!("read template {}", template_path.display()))?;
    let text = render(&template, bindings)
        .with_context(|| format!("render template {}", template_path.display()))?;
    let materialized = slot.write(&text)?;
    tracing::debug!(
        template = %template_path.display(),
        config = %materialized.path.display(),
        sha256 = %materialized.sha256,
        bytes = materialized.bytes,
        "materialized config"
    );
    Ok(materialized)
}
