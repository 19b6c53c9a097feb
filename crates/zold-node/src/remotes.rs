//! The persistent peer table.
//!
//! Peers live in a CSV file (`host,port,score,errors`, one per line);
//! unparseable lines are dropped on load. Every failed interaction
//! increments the peer's error counter; a counter exceeding [`TOLERANCE`]
//! removes the peer, and one successful iteration resets it. Iteration
//! ranks peers by `(1 - errors/TOLERANCE) * 5 + score/max_score`, so
//! low-error high-score peers go first and degrade quickly as errors
//! accumulate.
//!
//! A standalone node uses [`Remotes::standalone`], which is always empty
//! and never mutates.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use zold_core::atomic_file::AtomicFile;
use zold_core::constants::PROTOCOL;
use zold_farm::{Farm, Score};

use crate::error::NodeError;

/// Errors a peer may accumulate before being removed.
pub const TOLERANCE: u32 = 8;

/// Wall-clock budget for one peer interaction during iteration.
pub const RUNTIME_LIMIT: Duration = Duration::from_secs(16);

/// Well-known bootstrap peers seeded by `reset`.
const DEFAULTS: &[(&str, u16)] = &[("b1.zold.io", 4096), ("b2.zold.io", 4096)];

/// One row of the peer table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    pub host: String,
    pub port: u16,
    pub score: u64,
    pub errors: u32,
}

impl RemoteEntry {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split(',');
        let host = parts.next()?.trim().to_string();
        if host.is_empty() {
            return None;
        }
        let port = parts.next()?.parse().ok()?;
        let score = parts.next()?.parse().ok()?;
        let errors = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            host,
            port,
            score,
            errors,
        })
    }

    fn render(&self) -> String {
        format!("{},{},{},{}", self.host, self.port, self.score, self.errors)
    }

    fn rank(&self, max_score: u64) -> f64 {
        (1.0 - f64::from(self.errors) / f64::from(TOLERANCE)) * 5.0
            + self.score as f64 / max_score as f64
    }
}

/// The peer registry.
pub struct Remotes {
    /// Backing CSV; `None` for the standalone specialization.
    file: Option<PathBuf>,
    lock: Mutex<()>,
}

impl Remotes {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(file.into()),
            lock: Mutex::new(()),
        }
    }

    /// A registry that is always empty and never mutates.
    pub fn standalone() -> Self {
        Self {
            file: None,
            lock: Mutex::new(()),
        }
    }

    pub fn is_standalone(&self) -> bool {
        self.file.is_none()
    }

    /// All peers, highest ranked first.
    pub fn all(&self) -> Vec<RemoteEntry> {
        let _guard = self.lock.lock();
        let mut entries = self.load();
        let max_score = entries.iter().map(|e| e.score).max().unwrap_or(0).max(1);
        entries.sort_by(|a, b| {
            b.rank(max_score)
                .partial_cmp(&a.rank(max_score))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries
    }

    pub fn contains(&self, host: &str, port: u16) -> bool {
        let _guard = self.lock.lock();
        self.load().iter().any(|e| e.host == host && e.port == port)
    }

    pub fn add(&self, host: &str, port: u16) {
        let _guard = self.lock.lock();
        let mut entries = self.load();
        if entries.iter().any(|e| e.host == host && e.port == port) {
            return;
        }
        entries.push(RemoteEntry {
            host: host.to_string(),
            port,
            score: 0,
            errors: 0,
        });
        self.save(&entries);
        info!(host, port, "remote added");
    }

    pub fn remove(&self, host: &str, port: u16) {
        let _guard = self.lock.lock();
        let mut entries = self.load();
        entries.retain(|e| !(e.host == host && e.port == port));
        self.save(&entries);
    }

    /// Replace the table with the well-known bootstrap peers.
    pub fn reset(&self) {
        let _guard = self.lock.lock();
        let entries: Vec<RemoteEntry> = DEFAULTS
            .iter()
            .map(|(host, port)| RemoteEntry {
                host: host.to_string(),
                port: *port,
                score: 0,
                errors: 0,
            })
            .collect();
        self.save(&entries);
    }

    /// Record one failed interaction; removes the peer once its counter
    /// exceeds [`TOLERANCE`].
    pub fn error(&self, host: &str, port: u16) {
        let _guard = self.lock.lock();
        let mut entries = self.load();
        let Some(entry) = entries.iter_mut().find(|e| e.host == host && e.port == port) else {
            return;
        };
        entry.errors += 1;
        if entry.errors > TOLERANCE {
            info!(host, port, errors = entry.errors, "remote exceeded tolerance, removing");
            entries.retain(|e| !(e.host == host && e.port == port));
        }
        self.save(&entries);
    }

    pub fn errors(&self, host: &str, port: u16) -> u32 {
        let _guard = self.lock.lock();
        self.load()
            .iter()
            .find(|e| e.host == host && e.port == port)
            .map_or(0, |e| e.errors)
    }

    /// Update the cached score of a peer.
    pub fn rescore(&self, host: &str, port: u16, score: u64) {
        let _guard = self.lock.lock();
        let mut entries = self.load();
        if let Some(entry) = entries.iter_mut().find(|e| e.host == host && e.port == port) {
            entry.score = score;
            self.save(&entries);
        }
    }

    fn unerror(&self, host: &str, port: u16) {
        let _guard = self.lock.lock();
        let mut entries = self.load();
        if let Some(entry) = entries.iter_mut().find(|e| e.host == host && e.port == port) {
            entry.errors = 0;
            self.save(&entries);
        }
    }

    pub fn count(&self) -> usize {
        let _guard = self.lock.lock();
        self.load().len()
    }

    /// Visit every peer, highest ranked first, with a score-stamped HTTP
    /// helper, applying [`RUNTIME_LIMIT`] per peer. Returns the number of
    /// peers that failed.
    pub async fn iterate<F, Fut>(&self, farm: &Farm, network: &str, f: F) -> usize
    where
        F: Fn(RemoteNode) -> Fut,
        Fut: Future<Output = Result<(), NodeError>>,
    {
        self.iterate_with_timeout(farm, network, RUNTIME_LIMIT, f)
            .await
    }

    /// [`Remotes::iterate`] with an explicit per-peer budget. Failures and
    /// overruns are collected per peer; tolerance-based removal is applied
    /// once the loop is done.
    pub async fn iterate_with_timeout<F, Fut>(
        &self,
        farm: &Farm,
        network: &str,
        limit: Duration,
        f: F,
    ) -> usize
    where
        F: Fn(RemoteNode) -> Fut,
        Fut: Future<Output = Result<(), NodeError>>,
    {
        let best = farm.best().into_iter().next();
        let mut failed = 0;
        for entry in self.all() {
            let node = RemoteNode::new(&entry.host, entry.port, network, best.clone(), limit);
            let outcome = match tokio::time::timeout(limit, f(node)).await {
                Ok(result) => result,
                Err(_) => Err(NodeError::Timeout),
            };
            match outcome {
                Ok(()) => {
                    debug!(host = %entry.host, port = entry.port, "remote iterated");
                    self.unerror(&entry.host, entry.port);
                }
                Err(e) => {
                    warn!(host = %entry.host, port = entry.port, error = %e, "remote failed");
                    self.error(&entry.host, entry.port);
                    failed += 1;
                }
            }
        }
        for entry in self.all() {
            if entry.errors > TOLERANCE {
                self.remove(&entry.host, entry.port);
            }
        }
        failed
    }

    fn load(&self) -> Vec<RemoteEntry> {
        let Some(path) = &self.file else {
            return Vec::new();
        };
        let file = AtomicFile::new(path);
        if !file.exists() {
            return Vec::new();
        }
        let Ok(text) = file.read() else {
            return Vec::new();
        };
        let mut entries = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            match RemoteEntry::parse(line) {
                Some(entry) => entries.push(entry),
                None => warn!(line, "Invalid remote"),
            }
        }
        entries
    }

    fn save(&self, entries: &[RemoteEntry]) {
        let Some(path) = &self.file else {
            return;
        };
        let body: String = entries.iter().map(|e| e.render() + "\n").collect();
        if let Err(e) = AtomicFile::new(path).write(&body) {
            warn!(error = %e, "failed to save remotes");
        }
    }
}

/// A score-stamped HTTP helper for one peer, handed to iteration blocks.
#[derive(Clone, Debug)]
pub struct RemoteNode {
    pub host: String,
    pub port: u16,
    network: String,
    score: Option<Score>,
    client: reqwest::Client,
}

impl RemoteNode {
    pub fn new(
        host: &str,
        port: u16,
        network: &str,
        score: Option<Score>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            host: host.to_string(),
            port,
            network: network.to_string(),
            score,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    fn stamp(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request
            .header("X-Zold-Version", env!("CARGO_PKG_VERSION"))
            .header("X-Zold-Protocol", PROTOCOL.to_string())
            .header("X-Zold-Network", &self.network);
        if let Some(score) = &self.score {
            request = request.header("X-Zold-Score", score.to_header());
        }
        request
    }

    /// GET a path on the peer with the protocol headers stamped on.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response, NodeError> {
        Ok(self.stamp(self.client.get(self.url(path))).send().await?)
    }

    /// PUT a body to a path on the peer.
    pub async fn put(&self, path: &str, body: String) -> Result<reqwest::Response, NodeError> {
        Ok(self
            .stamp(self.client.put(self.url(path)))
            .body(body)
            .send()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &std::path::Path) -> Remotes {
        Remotes::new(dir.join("zold-remotes"))
    }

    fn farm(dir: &std::path::Path) -> Farm {
        let farm = Farm::new("NOPREFIX@ffffffffffffffff", dir.join("farm"));
        farm.start("localhost", 4096, 0, 1).unwrap();
        farm
    }

    #[test]
    fn add_contains_remove() {
        let dir = tempfile::tempdir().unwrap();
        let remotes = registry(dir.path());
        remotes.add("a.example.com", 4096);
        assert!(remotes.contains("a.example.com", 4096));
        assert!(!remotes.contains("a.example.com", 8080));
        remotes.add("a.example.com", 4096);
        assert_eq!(remotes.count(), 1);
        remotes.remove("a.example.com", 4096);
        assert_eq!(remotes.count(), 0);
    }

    #[test]
    fn csv_round_trips() {
        let entry = RemoteEntry {
            host: "b1.zold.io".to_string(),
            port: 4096,
            score: 120,
            errors: 3,
        };
        assert_eq!(RemoteEntry::parse(&entry.render()).unwrap(), entry);
    }

    #[test]
    fn unparseable_lines_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zold-remotes");
        std::fs::write(&path, "b1.zold.io,4096,0,0\nnot a line\n,,\n").unwrap();
        let remotes = Remotes::new(&path);
        assert_eq!(remotes.count(), 1);
    }

    #[test]
    fn error_beyond_tolerance_removes() {
        let dir = tempfile::tempdir().unwrap();
        let remotes = registry(dir.path());
        remotes.add("flaky.example.com", 4096);
        for _ in 0..TOLERANCE {
            remotes.error("flaky.example.com", 4096);
        }
        assert!(remotes.contains("flaky.example.com", 4096));
        assert_eq!(remotes.errors("flaky.example.com", 4096), TOLERANCE);
        remotes.error("flaky.example.com", 4096);
        assert!(!remotes.contains("flaky.example.com", 4096));
    }

    #[test]
    fn ranking_prefers_low_errors_and_high_score() {
        let dir = tempfile::tempdir().unwrap();
        let remotes = registry(dir.path());
        remotes.add("errored.example.com", 4096);
        remotes.add("strong.example.com", 4096);
        remotes.add("weak.example.com", 4096);
        remotes.rescore("strong.example.com", 4096, 100);
        remotes.rescore("weak.example.com", 4096, 10);
        for _ in 0..4 {
            remotes.error("errored.example.com", 4096);
        }
        let all = remotes.all();
        assert_eq!(all[0].host, "strong.example.com");
        assert_eq!(all[1].host, "weak.example.com");
        assert_eq!(all[2].host, "errored.example.com");
    }

    #[test]
    fn standalone_is_empty_and_immutable() {
        let remotes = Remotes::standalone();
        remotes.add("a.example.com", 4096);
        remotes.reset();
        assert!(remotes.is_standalone());
        assert!(remotes.all().is_empty());
        assert_eq!(remotes.count(), 0);
    }

    #[test]
    fn reset_seeds_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let remotes = registry(dir.path());
        remotes.reset();
        assert!(remotes.contains("b1.zold.io", 4096));
        assert!(remotes.contains("b2.zold.io", 4096));
    }

    #[tokio::test]
    async fn iterate_marks_slow_peer_erroneous() {
        let dir = tempfile::tempdir().unwrap();
        let remotes = registry(dir.path());
        remotes.add("127.0.0.1", 4096);
        let farm = farm(dir.path());
        remotes
            .iterate_with_timeout(&farm, "test", Duration::from_secs(1), |_remote| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(())
            })
            .await;
        assert!(remotes.errors("127.0.0.1", 4096) >= 1);
        farm.stop();
    }

    #[tokio::test]
    async fn iterate_success_resets_errors() {
        let dir = tempfile::tempdir().unwrap();
        let remotes = registry(dir.path());
        remotes.add("127.0.0.1", 4096);
        for _ in 0..3 {
            remotes.error("127.0.0.1", 4096);
        }
        let farm = farm(dir.path());
        remotes
            .iterate(&farm, "test", |_remote| async { Ok(()) })
            .await;
        assert_eq!(remotes.errors("127.0.0.1", 4096), 0);
        farm.stop();
    }

    #[tokio::test]
    async fn iterate_visits_highest_ranked_first() {
        let dir = tempfile::tempdir().unwrap();
        let remotes = registry(dir.path());
        remotes.add("weak.example.com", 4096);
        remotes.add("strong.example.com", 4096);
        remotes.rescore("strong.example.com", 4096, 50);
        let farm = farm(dir.path());
        let visited = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = visited.clone();
        remotes
            .iterate(&farm, "test", move |remote| {
                let log = log.clone();
                async move {
                    log.lock().push(remote.host.clone());
                    Ok(())
                }
            })
            .await;
        assert_eq!(
            *visited.lock(),
            vec!["strong.example.com".to_string(), "weak.example.com".to_string()]
        );
        farm.stop();
    }
}
