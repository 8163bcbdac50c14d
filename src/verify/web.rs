use super::{CheckFailure, ContentSource};
use std::collections::BTreeMap;
use std::time::Duration;
use ureq::ResponseExt;

/// Response bodies larger than this are truncated before matching.
const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// One fetched page after redirects were followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub requested_url: String,
    pub final_url: String,
    pub status: u16,
    /// Response headers keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl FetchedPage {
    pub fn was_redirected(&self) -> bool {
        self.requested_url.trim_end_matches('/') != self.final_url.trim_end_matches('/')
    }
}

/// Plain HTTP GET client following redirects.
pub struct HttpContentSource {
    agent: ureq::Agent,
}

impl HttpContentSource {
    pub fn new(timeout: Option<Duration>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(timeout)
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl ContentSource for HttpContentSource {
    fn fetch(&self, url: &str) -> Result<FetchedPage, CheckFailure> {
        tracing::debug!(url, "fetching page");
        let transport = |err: ureq::Error| CheckFailure::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        };
        let mut response = self.agent.get(url).call().map_err(transport)?;
        let status = response.status().as_u16();
        let final_url = response.get_uri().to_string();
        if !(200..300).contains(&status) {
            return Err(CheckFailure::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let mut headers = BTreeMap::new();
        for (name, value) in response.headers().iter() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }
        let bytes = response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(transport)?;

        Ok(FetchedPage {
            requested_url: url.to_string(),
            final_url,
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}
