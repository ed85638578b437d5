//! Revision to commit lookup
//!
//! Snapshot revisions are Chromium commit positions. The crrev service maps
//! them back to git hashes so the final range can be shown as a changelog.

use crate::error::{BisectError, Result};
use crate::revision::{Revision, SearchInterval};
use serde::Deserialize;
use std::time::Duration;

const CRREV_URL: &str = "https://cr-rev.appspot.com/_ah/api/crrev/v1/redirect";
const CHANGELOG_URL: &str = "https://chromium.googlesource.com/chromium/src/+log";
const USER_AGENT: &str = concat!("snapshot-bisect/", env!("CARGO_PKG_VERSION"));
const LOOKUP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct RedirectResponse {
    git_sha: Option<String>,
}

pub struct CommitResolver {
    client: reqwest::Client,
    base_url: String,
}

impl CommitResolver {
    pub fn new() -> Result<Self> {
        Self::with_base_url(CRREV_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
            .build()
            .map_err(|e| BisectError::Metadata(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn lookup_url(&self, revision: Revision) -> String {
        format!("{}/{}", self.base_url, revision)
    }

    /// Git hash of the commit at `revision`.
    pub async fn commit_sha(&self, revision: Revision) -> Result<String> {
        let url = self.lookup_url(revision);
        let metadata_err = |e: reqwest::Error| BisectError::Metadata(format!("r{}: {}", revision, e));

        let response: RedirectResponse = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(metadata_err)?
            .json()
            .await
            .map_err(metadata_err)?;

        match response.git_sha {
            Some(sha) if is_sha(&sha) => Ok(sha),
            _ => Err(BisectError::Metadata(format!("r{}: no commit for this revision", revision))),
        }
    }

    /// Changelog between the two endpoints, ordered oldest first.
    pub async fn changelog(&self, interval: &SearchInterval) -> Result<String> {
        let low = self.commit_sha(interval.low()).await?;
        let high = self.commit_sha(interval.high()).await?;
        Ok(changelog_url(&low, &high))
    }
}

pub fn changelog_url(from: &str, to: &str) -> String {
    format!("{}/{}..{}", CHANGELOG_URL, from, to)
}

fn is_sha(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changelog_url() {
        assert_eq!(
            changelog_url("aaa", "bbb"),
            "https://chromium.googlesource.com/chromium/src/+log/aaa..bbb"
        );
    }

    #[test]
    fn test_lookup_url() {
        let resolver = CommitResolver::with_base_url("https://example.test/redirect/").unwrap();
        assert_eq!(
            resolver.lookup_url(Revision(577361)),
            "https://example.test/redirect/577361"
        );
    }

    #[test]
    fn test_is_sha() {
        assert!(is_sha("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_sha("0123456789abcdef"));
        assert!(!is_sha("zz23456789abcdef0123456789abcdef01234567"));
    }

    #[test]
    fn test_redirect_response_parsing() {
        let body = r#"{"git_sha": "0123456789abcdef0123456789abcdef01234567", "repo": "chromium/src"}"#;
        let parsed: RedirectResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.git_sha.as_deref(),
            Some("0123456789abcdef0123456789abcdef01234567")
        );

        let parsed: RedirectResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.git_sha.is_none());
    }
}
