//! Job model — scrape jobs and the fetch outcomes they produce.
//!
//! A `Job` is one URL to fetch. Jobs are grouped by `Domain` for
//! connection/cache affinity, and every fetch attempt reports a
//! `FetchOutcome` that drives the HTTP-vs-browser routing decision.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Unique identifier for a scrape job.
pub type JobId = String;

/// Unique identifier for a pooled browser unit.
pub type ResourceId = String;

/// Lowercase registrable host name; the scheduler's grouping key.
pub type Domain = String;

/// A single scrape job: one URL to fetch and extract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    /// Host the URL points at; drives scheduler affinity.
    pub domain: Domain,
    /// Opaque extraction payload (selectors, pagination hints, item
    /// targets). Passed through to the executor untouched.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Job {
    /// Build a job from a URL, deriving the domain from its host.
    pub fn from_url(id: impl Into<JobId>, url: &str) -> CoreResult<Self> {
        let domain = domain_of(url)?;
        Ok(Self {
            id: id.into(),
            url: url.to_string(),
            domain,
            payload: serde_json::Value::Null,
        })
    }
}

/// Extract the scheduling domain (lowercase host) from a URL.
pub fn domain_of(url: &str) -> CoreResult<Domain> {
    let parsed =
        url::Url::parse(url).map_err(|e| CoreError::InvalidUrl(format!("{url}: {e}")))?;
    parsed
        .host_str()
        .map(|h| h.to_string())
        .ok_or_else(|| CoreError::InvalidUrl(format!("{url}: no host")))
}

// ── Fetch outcomes ─────────────────────────────────────────────────

/// Which transport served a fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    Http,
    Browser,
}

/// Why an HTTP attempt has to be replayed in a real browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    /// The response looked like a captcha or bot-wall interstitial.
    BotDetection,
    /// The page fetched fine but yielded no items (likely JS-rendered).
    NoItemsFound,
    /// Fewer items than the target; JS may render the rest.
    BelowTarget { got: u32, want: u32 },
    Timeout,
    RequestError,
}

/// Result of a single fetch attempt over either transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub success: bool,
    pub item_count: u32,
    /// Set on HTTP attempts that should be replayed in a browser.
    pub needs_browser: bool,
    pub reason: Option<FallbackReason>,
    /// Wall time of the attempt; feeds adaptive routing averages.
    pub elapsed: Duration,
}

impl FetchOutcome {
    /// A successful attempt that extracted `item_count` items.
    pub fn success(item_count: u32, elapsed: Duration) -> Self {
        Self {
            success: true,
            item_count,
            needs_browser: false,
            reason: None,
            elapsed,
        }
    }

    /// A failed HTTP attempt worth replaying in a browser.
    pub fn needs_browser(reason: FallbackReason, elapsed: Duration) -> Self {
        Self {
            success: false,
            item_count: 0,
            needs_browser: true,
            reason: Some(reason),
            elapsed,
        }
    }

    /// A terminal failure; the browser would not help.
    pub fn failed(reason: FallbackReason, elapsed: Duration) -> Self {
        Self {
            success: false,
            item_count: 0,
            needs_browser: false,
            reason: Some(reason),
            elapsed,
        }
    }
}

// ── Jobs file ──────────────────────────────────────────────────────

/// On-disk jobs file entry: a URL plus optional overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub url: String,
    pub id: Option<String>,
    pub domain: Option<Domain>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Load a jobs file (a JSON array of job specs) into fully-formed jobs.
///
/// Ids default to `job-N`; domains derive from each URL's host unless
/// overridden in the file.
pub fn load_jobs(path: &Path) -> CoreResult<Vec<Job>> {
    let content = std::fs::read_to_string(path)?;
    let specs: Vec<JobSpec> = serde_json::from_str(&content)?;

    let mut jobs = Vec::with_capacity(specs.len());
    for (i, spec) in specs.into_iter().enumerate() {
        let domain = match spec.domain {
            Some(d) => d.to_lowercase(),
            None => domain_of(&spec.url)?,
        };
        jobs.push(Job {
            id: spec.id.unwrap_or_else(|| format!("job-{i}")),
            url: spec.url,
            domain,
            payload: spec.payload,
        });
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_from_url_derives_domain() {
        let job = Job::from_url("j1", "https://Shop.Example.com/items?page=2").unwrap();
        assert_eq!(job.domain, "shop.example.com");
        assert_eq!(job.id, "j1");
    }

    #[test]
    fn domain_of_rejects_garbage() {
        assert!(matches!(domain_of("not a url"), Err(CoreError::InvalidUrl(_))));
        assert!(matches!(domain_of("data:text/plain,hi"), Err(CoreError::InvalidUrl(_))));
    }

    #[test]
    fn outcome_constructors() {
        let ok = FetchOutcome::success(12, Duration::from_millis(80));
        assert!(ok.success);
        assert_eq!(ok.item_count, 12);
        assert!(!ok.needs_browser);

        let fb = FetchOutcome::needs_browser(
            FallbackReason::BotDetection,
            Duration::from_millis(40),
        );
        assert!(!fb.success);
        assert!(fb.needs_browser);
        assert_eq!(fb.reason, Some(FallbackReason::BotDetection));

        let dead = FetchOutcome::failed(FallbackReason::RequestError, Duration::ZERO);
        assert!(!dead.success);
        assert!(!dead.needs_browser);
    }

    #[test]
    fn below_target_serializes_with_counts() {
        let reason = FallbackReason::BelowTarget { got: 3, want: 20 };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("below_target"));
        assert!(json.contains("\"got\":3"));
    }

    #[test]
    fn load_jobs_fills_defaults() {
        let dir = std::env::temp_dir().join("crawl-core-jobs-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("jobs.json");
        std::fs::write(
            &path,
            r#"[
                {"url": "https://a.example/1"},
                {"url": "https://b.example/2", "id": "custom", "domain": "B.EXAMPLE"},
                {"url": "https://a.example/3", "payload": {"item_target": 20}}
            ]"#,
        )
        .unwrap();

        let jobs = load_jobs(&path).unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].id, "job-0");
        assert_eq!(jobs[0].domain, "a.example");
        assert_eq!(jobs[1].id, "custom");
        assert_eq!(jobs[1].domain, "b.example");
        assert_eq!(jobs[2].payload["item_target"], 20);
    }

    #[test]
    fn load_jobs_rejects_bad_url() {
        let dir = std::env::temp_dir().join("crawl-core-jobs-bad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("jobs.json");
        std::fs::write(&path, r#"[{"url": "nope"}]"#).unwrap();
        assert!(load_jobs(&path).is_err());
    }
}
