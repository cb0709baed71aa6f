//! Instance discovery.
//!
//! Two providers ship: [`ProcessScanDiscovery`] walks the local process table
//! for server processes and verifies each candidate with an HTTP probe, and
//! [`IndexDiscovery`] asks a remote index endpoint. Both honor the provider
//! contract: discovery never fails, it just returns what it could find.

use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{ProcessRefreshKind, RefreshKind, System, UpdateKind};
use tracing::{debug, warn};

use scout_core::model::{Project, Session};

/// Knobs for a discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    /// Per-candidate HTTP probe timeout.
    pub probe_timeout: Duration,
    /// Also list the candidate's session ids (one extra read per candidate).
    pub include_session_ids: bool,
    /// Surface full session records, not just ids. Shares the same extra
    /// read as `include_session_ids`.
    pub include_session_details: bool,
    /// Surface project metadata from the probe.
    pub include_project: bool,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(1000),
            include_session_ids: false,
            include_session_details: false,
            include_project: true,
        }
    }
}

/// One verified backend instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveredInstance {
    /// Listening port. Primary key downstream.
    pub port: u16,
    /// OS process id, when the provider observed one.
    pub pid: Option<u32>,
    /// Working directory the instance serves.
    pub directory: String,
    /// Session ids, when `include_session_ids` was set.
    pub session_ids: Vec<String>,
    /// Full session records, when `include_session_details` was set.
    pub sessions: Vec<Session>,
    /// Project metadata, when `include_project` was set.
    pub project: Option<Project>,
}

/// A source of backend instances.
///
/// Infallible by contract: a provider that cannot look (no process table,
/// index unreachable) reports nothing and logs why.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// One discovery pass.
    async fn discover(&self, options: &DiscoverOptions) -> Vec<DiscoveredInstance>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Process-table discovery
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    port: u16,
    pid: u32,
}

/// Scans the local process table for server processes, then verifies each
/// candidate port with an HTTP probe before reporting it.
pub struct ProcessScanDiscovery {
    client: reqwest::Client,
    process_name: String,
}

impl ProcessScanDiscovery {
    /// A scanner matching processes whose name contains `process_name`.
    #[must_use]
    pub fn new(process_name: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), process_name: process_name.into() }
    }

    fn scan_process_table(process_name: &str) -> Vec<Candidate> {
        let refresh = RefreshKind::new()
            .with_processes(ProcessRefreshKind::new().with_cmd(UpdateKind::Always));
        let system = System::new_with_specifics(refresh);
        let mut candidates: Vec<Candidate> = system
            .processes()
            .iter()
            .filter(|(_, process)| process.name().contains(process_name))
            .filter_map(|(pid, process)| {
                extract_port(process.cmd()).map(|port| Candidate { port, pid: pid.as_u32() })
            })
            .collect();
        candidates.sort_by_key(|c| c.port);
        candidates.dedup_by_key(|c| c.port);
        candidates
    }

    async fn probe(
        &self,
        candidate: Candidate,
        options: &DiscoverOptions,
    ) -> Option<DiscoveredInstance> {
        let base = format!("http://127.0.0.1:{}", candidate.port);
        let project: Project = match self
            .client
            .get(format!("{base}/project/current"))
            .timeout(options.probe_timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(response) => match response.json().await {
                Ok(project) => project,
                Err(error) => {
                    debug!(port = candidate.port, %error, "probe returned unreadable project");
                    return None;
                }
            },
            Err(error) => {
                debug!(port = candidate.port, %error, "candidate did not answer probe");
                return None;
            }
        };

        let sessions: Vec<Session> = if options.include_session_ids
            || options.include_session_details
        {
            match self
                .client
                .get(format!("{base}/session"))
                .timeout(options.probe_timeout)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
            {
                Ok(response) => response.json().await.unwrap_or_default(),
                Err(error) => {
                    debug!(port = candidate.port, %error, "session listing failed during probe");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let session_ids = if options.include_session_ids {
            sessions.iter().map(|s| s.id.clone()).collect()
        } else {
            Vec::new()
        };
        Some(DiscoveredInstance {
            port: candidate.port,
            pid: Some(candidate.pid),
            directory: project.directory.clone(),
            session_ids,
            sessions: if options.include_session_details { sessions } else { Vec::new() },
            project: options.include_project.then_some(project),
        })
    }
}

#[async_trait]
impl DiscoveryProvider for ProcessScanDiscovery {
    fn name(&self) -> &str {
        "process-scan"
    }

    async fn discover(&self, options: &DiscoverOptions) -> Vec<DiscoveredInstance> {
        let process_name = self.process_name.clone();
        let candidates =
            match tokio::task::spawn_blocking(move || Self::scan_process_table(&process_name))
                .await
            {
                Ok(candidates) => candidates,
                Err(error) => {
                    warn!(%error, "process table scan panicked");
                    return Vec::new();
                }
            };

        let probes = candidates.into_iter().map(|candidate| self.probe(candidate, options));
        futures::future::join_all(probes).await.into_iter().flatten().collect()
    }
}

/// Pull the listening port out of a process argument list.
/// Accepts `--port 4056`, `--port=4056`, and `-p 4056`.
fn extract_port(args: &[String]) -> Option<u16> {
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if arg == "--port" || arg == "-p" {
            if let Some(next) = iter.peek() {
                if let Ok(port) = next.parse() {
                    return Some(port);
                }
            }
        } else if let Some(value) = arg.strip_prefix("--port=") {
            if let Ok(port) = value.parse() {
                return Some(port);
            }
        }
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Index discovery
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    port: u16,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    directory: String,
}

/// Asks a remote index endpoint which instances exist.
pub struct IndexDiscovery {
    client: reqwest::Client,
    endpoint: String,
}

impl IndexDiscovery {
    /// A provider reading `endpoint`, which must return a JSON array of
    /// `{port, pid?, directory?}` entries.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into() }
    }
}

#[async_trait]
impl DiscoveryProvider for IndexDiscovery {
    fn name(&self) -> &str {
        "index"
    }

    async fn discover(&self, options: &DiscoverOptions) -> Vec<DiscoveredInstance> {
        let entries: Vec<IndexEntry> = match self
            .client
            .get(&self.endpoint)
            .timeout(options.probe_timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(response) => match response.json().await {
                Ok(entries) => entries,
                Err(error) => {
                    warn!(endpoint = %self.endpoint, %error, "index returned unreadable body");
                    return Vec::new();
                }
            },
            Err(error) => {
                warn!(endpoint = %self.endpoint, %error, "index unreachable");
                return Vec::new();
            }
        };
        entries
            .into_iter()
            .map(|entry| DiscoveredInstance {
                port: entry.port,
                pid: entry.pid,
                directory: entry.directory,
                session_ids: Vec::new(),
                sessions: Vec::new(),
                project: None,
            })
            .collect()
    }
}
