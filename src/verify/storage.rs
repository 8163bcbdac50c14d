use super::{find_header, normalize_header_name, CheckFailure, MetadataSource};
use crate::plan::StorageSpec;
use crate::util::{format_command_line, truncate_string};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::process::Command;

/// Env var that replaces `storage.head_object` (shell-words syntax).
pub const HEAD_OBJECT_COMMAND_ENV: &str = "DEPLOY_CHECK_HEAD_OBJECT";
const USER_METADATA_PREFIX: &str = "x-amz-meta-";
/// Fields of the head-object response that are not object headers.
const NON_HEADER_FIELDS: &[&str] = &["Metadata", "ResponseMetadata"];
const MAX_REASON_BYTES: usize = 512;

/// Metadata of one stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// System headers such as `CacheControl` or `ContentType`.
    pub headers: BTreeMap<String, String>,
    /// User-defined metadata, without the `x-amz-meta-` prefix.
    pub user_metadata: BTreeMap<String, String>,
}

impl ObjectMetadata {
    /// Parse a head-object JSON response.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| anyhow!("head-object output is not a JSON object"))?;
        let mut metadata = ObjectMetadata::default();
        for (name, field) in object {
            if NON_HEADER_FIELDS.contains(&name.as_str()) {
                continue;
            }
            if let Some(text) = scalar_text(field) {
                metadata.headers.insert(name.clone(), text);
            }
        }
        if let Some(Value::Object(user)) = object.get("Metadata") {
            for (name, field) in user {
                if let Some(text) = scalar_text(field) {
                    metadata.user_metadata.insert(name.clone(), text);
                }
            }
        }
        Ok(metadata)
    }

    /// Look up a header by name. `x-amz-meta-*` names (or bare names missing
    /// from the system headers) fall through to user metadata.
    pub fn get(&self, header: &str) -> Option<&str> {
        let lowered = header.to_ascii_lowercase();
        if let Some(user_key) = lowered.strip_prefix(USER_METADATA_PREFIX) {
            return find_header(&self.user_metadata, user_key);
        }
        find_header(&self.headers, header).or_else(|| {
            let wanted = normalize_header_name(header);
            self.user_metadata
                .iter()
                .find(|(name, _)| normalize_header_name(name) == wanted)
                .map(|(_, value)| value.as_str())
        })
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Looks up object metadata through an external head-object command that
/// prints the response as JSON.
#[derive(Debug, Clone)]
pub struct CommandMetadataSource {
    argv: Vec<String>,
}

impl CommandMetadataSource {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(anyhow!("head-object command is empty"));
        }
        Ok(Self { argv })
    }

    /// Build from the plan, honoring the env override. Relative program paths
    /// resolve against `plan_root`.
    pub fn from_plan(spec: &StorageSpec, plan_root: &Path) -> Result<Self> {
        let mut argv = match env::var(HEAD_OBJECT_COMMAND_ENV) {
            Ok(raw) if !raw.trim().is_empty() => shell_words::split(&raw)
                .with_context(|| format!("parse {HEAD_OBJECT_COMMAND_ENV}: {raw}"))?,
            _ => spec.head_object.clone(),
        };
        if let Some(program) = argv.first_mut() {
            if program.contains('/') && Path::new(program.as_str()).is_relative() {
                *program = plan_root.join(program.as_str()).display().to_string();
            }
        }
        Self::new(argv)
    }

    /// Full argv for one lookup; `region` is passed as `--region`.
    pub fn argv_for(&self, container: &str, key: &str, region: Option<&str>) -> Vec<String> {
        let mut argv = self.argv.clone();
        argv.extend([
            "--bucket".to_string(),
            container.to_string(),
            "--key".to_string(),
            key.to_string(),
        ]);
        if let Some(region) = region {
            argv.push("--region".to_string());
            argv.push(region.to_string());
        }
        argv
    }
}

impl MetadataSource for CommandMetadataSource {
    fn head_object(
        &self,
        container: &str,
        key: &str,
        region: Option<&str>,
    ) -> Result<ObjectMetadata, CheckFailure> {
        let argv = self.argv_for(container, key, region);
        let lookup_failed = |reason: String| CheckFailure::LookupFailed {
            container: container.to_string(),
            key: key.to_string(),
            reason,
        };
        tracing::debug!(command = %format_command_line(&argv), "head object");
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .map_err(|err| lookup_failed(format!("spawn {}: {err}", argv[0])))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Err(CheckFailure::ObjectNotFound {
                    container: container.to_string(),
                    key: key.to_string(),
                });
            }
            return Err(lookup_failed(truncate_string(stderr.trim(), MAX_REASON_BYTES)));
        }

        let value: Value = serde_json::from_slice(&output.stdout)
            .map_err(|err| lookup_failed(format!("parse head-object output: {err}")))?;
        ObjectMetadata::from_json(&value).map_err(|err| lookup_failed(err.to_string()))
    }
}

/// Matches the CLI's `(404)` error code, not bare digits that may be part of
/// a bucket or key name.
fn is_not_found(stderr: &str) -> bool {
    ["(404)", "NoSuchKey", "NoSuchBucket"]
        .iter()
        .any(|marker| stderr.contains(marker))
}
