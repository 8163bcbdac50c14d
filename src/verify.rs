//! Verification engine: evaluates a scenario's checks against live state.
//!
//! Two independent probes back the checks: a web fetch and an object metadata
//! lookup. Each check is pass or fail; failures carry a typed reason.
mod retry;
mod storage;
mod web;

use crate::plan::{CheckPolicy, CheckSpec};
use crate::report::FailureKind;
use serde::Serialize;
use std::collections::BTreeMap;

pub use retry::RetryPolicy;
pub use storage::{CommandMetadataSource, ObjectMetadata};
pub use web::{FetchedPage, HttpContentSource};

/// Why a single check did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckFailure {
    #[error("body of {url} does not contain {expected:?}")]
    ContentMismatch { url: String, expected: String },

    #[error("fetch {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("{url} was not redirected (final URL {final_url})")]
    NotRedirected { url: String, final_url: String },

    #[error("{url} header {header} is {actual:?}, expected {expected:?}")]
    HeaderMismatch {
        url: String,
        header: String,
        expected: String,
        actual: String,
    },

    #[error("{container}/{key} {header} is {actual:?}, expected {expected:?}")]
    MetadataMismatch {
        container: String,
        key: String,
        header: String,
        expected: String,
        actual: String,
    },

    #[error("{container}/{key} not found")]
    ObjectNotFound { container: String, key: String },

    #[error("{url} has no {header} header")]
    HeaderMissing { url: String, header: String },

    /// The object exists but carries no such header. Reported apart from
    /// `ObjectNotFound` so a missing upload and a missing header differ.
    #[error("{container}/{key} has no {header} metadata")]
    MetadataHeaderMissing {
        container: String,
        key: String,
        header: String,
    },

    #[error("metadata lookup for {container}/{key} failed: {reason}")]
    LookupFailed {
        container: String,
        key: String,
        reason: String,
    },
}

impl CheckFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            CheckFailure::ContentMismatch { .. } => FailureKind::ContentMismatch,
            CheckFailure::Transport { .. } => FailureKind::Transport,
            CheckFailure::HttpStatus { .. } => FailureKind::HttpStatus,
            CheckFailure::NotRedirected { .. } => FailureKind::NotRedirected,
            CheckFailure::HeaderMismatch { .. } => FailureKind::HeaderMismatch,
            CheckFailure::MetadataMismatch { .. } => FailureKind::MetadataMismatch,
            CheckFailure::ObjectNotFound { .. } => FailureKind::ObjectNotFound,
            CheckFailure::HeaderMissing { .. } => FailureKind::HeaderMissing,
            CheckFailure::MetadataHeaderMissing { .. } => FailureKind::MetadataHeaderMissing,
            CheckFailure::LookupFailed { .. } => FailureKind::LookupFailed,
        }
    }

    /// Failures that may clear up once the deployment propagates.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckFailure::Transport { .. }
                | CheckFailure::HttpStatus { .. }
                | CheckFailure::ContentMismatch { .. }
                | CheckFailure::ObjectNotFound { .. }
        )
    }
}

/// Fetches web content for `content`, `header` and `redirect` checks.
pub trait ContentSource {
    fn fetch(&self, url: &str) -> Result<FetchedPage, CheckFailure>;
}

/// Looks up object metadata for `metadata` checks.
pub trait MetadataSource {
    /// `region` is the deployed scenario's region; `None` leaves the choice
    /// to the lookup backend.
    fn head_object(
        &self,
        container: &str,
        key: &str,
        region: Option<&str>,
    ) -> Result<ObjectMetadata, CheckFailure>;
}

/// The probes a check may use.
#[derive(Clone, Copy)]
pub struct Probes<'a> {
    pub web: &'a dyn ContentSource,
    pub storage: &'a dyn MetadataSource,
    /// Region metadata lookups are sent to.
    pub region: Option<&'a str>,
}

impl<'a> Probes<'a> {
    pub fn in_region(self, region: Option<&'a str>) -> Self {
        Self { region, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

/// Result of one check, in plan order.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub label: String,
    pub check: CheckSpec,
    pub status: CheckStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<CheckFailure>,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

/// Case-sensitive substring match on the text form of a body.
pub fn content_matches(body: &str, expected: &str) -> bool {
    body.contains(expected)
}

/// Header names compare case-insensitively and ignore `-`/`_`, so
/// `Cache-Control`, `cache-control` and `CacheControl` are the same header.
pub(crate) fn normalize_header_name(name: &str) -> String {
    name.chars()
        .filter(|ch| *ch != '-' && *ch != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

pub(crate) fn find_header<'a>(
    headers: &'a BTreeMap<String, String>,
    name: &str,
) -> Option<&'a str> {
    let wanted = normalize_header_name(name);
    headers
        .iter()
        .find(|(candidate, _)| normalize_header_name(candidate) == wanted)
        .map(|(_, value)| value.as_str())
}

/// Evaluate one check once.
pub fn evaluate_check(check: &CheckSpec, probes: Probes<'_>) -> Result<(), CheckFailure> {
    match check {
        CheckSpec::Content { url, contains } => {
            let page = probes.web.fetch(url)?;
            tracing::debug!(url = %page.final_url, status = page.status, "page fetched");
            if content_matches(&page.body, contains) {
                Ok(())
            } else {
                Err(CheckFailure::ContentMismatch {
                    url: url.clone(),
                    expected: contains.clone(),
                })
            }
        }
        CheckSpec::Header {
            url,
            header,
            equals,
        } => {
            let page = probes.web.fetch(url)?;
            match find_header(&page.headers, header) {
                Some(actual) if actual == equals.as_str() => Ok(()),
                Some(actual) => Err(CheckFailure::HeaderMismatch {
                    url: url.clone(),
                    header: header.clone(),
                    expected: equals.clone(),
                    actual: actual.to_string(),
                }),
                None => Err(CheckFailure::HeaderMissing {
                    url: url.clone(),
                    header: header.clone(),
                }),
            }
        }
        CheckSpec::Redirect { url, contains } => {
            let page = probes.web.fetch(url)?;
            if !page.was_redirected() {
                return Err(CheckFailure::NotRedirected {
                    url: url.clone(),
                    final_url: page.final_url.clone(),
                });
            }
            if content_matches(&page.body, contains) {
                Ok(())
            } else {
                Err(CheckFailure::ContentMismatch {
                    url: page.final_url.clone(),
                    expected: contains.clone(),
                })
            }
        }
        CheckSpec::Metadata {
            container,
            key,
            header,
            equals,
        } => {
            let metadata = probes.storage.head_object(container, key, probes.region)?;
            match metadata.get(header) {
                Some(actual) if actual == equals.as_str() => Ok(()),
                Some(actual) => Err(CheckFailure::MetadataMismatch {
                    container: container.clone(),
                    key: key.clone(),
                    header: header.clone(),
                    expected: equals.clone(),
                    actual: actual.to_string(),
                }),
                None => Err(CheckFailure::MetadataHeaderMissing {
                    container: container.clone(),
                    key: key.clone(),
                    header: header.clone(),
                }),
            }
        }
    }
}

/// Evaluate one check under the retry policy.
pub fn run_check(check: &CheckSpec, probes: Probes<'_>, retry: &RetryPolicy) -> CheckOutcome {
    let (result, attempts) = retry.run(
        || evaluate_check(check, probes),
        CheckFailure::is_retryable,
    );
    let label = check.label();
    match result {
        Ok(()) => {
            tracing::info!(kind = check.kind(), check = %label, attempts, "check passed");
            CheckOutcome {
                label,
                check: check.clone(),
                status: CheckStatus::Pass,
                attempts,
                failure: None,
            }
        }
        Err(failure) => {
            tracing::info!(kind = check.kind(), check = %label, attempts, %failure, "check failed");
            CheckOutcome {
                label,
                check: check.clone(),
                status: CheckStatus::Fail,
                attempts,
                failure: Some(failure),
            }
        }
    }
}

/// Evaluate checks in order. Under `FailFast`, checks after the first failure
/// are reported as skipped without touching the network.
pub fn verify_checks(
    checks: &[CheckSpec],
    probes: Probes<'_>,
    policy: CheckPolicy,
    retry: &RetryPolicy,
) -> Vec<CheckOutcome> {
    let mut outcomes = Vec::with_capacity(checks.len());
    let mut failed = false;
    for check in checks {
        if failed && policy == CheckPolicy::FailFast {
            outcomes.push(CheckOutcome {
                label: check.label(),
                check: check.clone(),
                status: CheckStatus::Skipped,
                attempts: 0,
                failure: None,
            });
            continue;
        }
        let outcome = run_check(check, probes, retry);
        failed |= !outcome.passed();
        outcomes.push(outcome);
    }
    outcomes
}
