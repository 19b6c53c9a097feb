//! Per-wallet candidate copies fetched from peers.
//!
//! Each copy file under `zold-copies/<id>/` is a full wallet body named by
//! the first 16 hex digits of its SHA-256 digest; once written it is never
//! overwritten. A `scores` sidecar CSV accumulates one row per source:
//!
//! ```text
//! <name>,<host>,<port>,<score>,<iso8601>
//! ```
//!
//! Adding the same body twice is idempotent; scores from distinct sources
//! accumulate to rank the copy.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::atomic_file::AtomicFile;
use crate::error::CopiesError;
use crate::txn::iso8601;

/// Hours after which a source's score no longer counts.
const EXPIRY_HOURS: i64 = 24;

/// Name of the sidecar metadata file.
const SCORES_FILE: &str = "scores";

/// A ranked candidate copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Copy {
    /// Content-addressed file name.
    pub name: String,
    /// Full path of the body file.
    pub path: PathBuf,
    /// Accumulated score across live sources.
    pub score: u64,
}

#[derive(Clone, Debug)]
struct Row {
    name: String,
    host: String,
    port: u16,
    score: u64,
    time: DateTime<Utc>,
}

impl Row {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split(',');
        let name = parts.next()?.to_string();
        let host = parts.next()?.to_string();
        let port = parts.next()?.parse().ok()?;
        let score = parts.next()?.parse().ok()?;
        let time = DateTime::parse_from_rfc3339(parts.next()?)
            .ok()?
            .with_timezone(&Utc);
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            name,
            host,
            port,
            score,
            time,
        })
    }

    fn render(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.name,
            self.host,
            self.port,
            self.score,
            iso8601(&self.time)
        )
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        now - self.time > Duration::hours(EXPIRY_HOURS)
    }
}

/// The set of candidate bodies for one wallet.
#[derive(Clone, Debug)]
pub struct Copies {
    dir: PathBuf,
}

impl Copies {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store a body fetched from `host:port` whose source holds `score`.
    ///
    /// Returns the content-addressed copy name. A body already present is
    /// not rewritten; a source already known is rescored in place.
    pub fn add(
        &self,
        body: &str,
        host: &str,
        port: u16,
        score: u64,
    ) -> Result<String, CopiesError> {
        let name = hex::encode(&Sha256::digest(body.as_bytes())[..8]);
        let path = self.dir.join(&name);
        if !path.exists() {
            AtomicFile::new(&path).write(body)?;
        }
        let mut rows = self.rows()?;
        rows.retain(|r| !(r.host == host && r.port == port));
        rows.push(Row {
            name: name.clone(),
            host: host.to_string(),
            port,
            score,
            time: Utc::now(),
        });
        self.save(&rows)?;
        Ok(name)
    }

    /// All copies ranked by accumulated score, strongest first. Expired
    /// sidecar rows contribute nothing.
    pub fn load(&self) -> Result<Vec<Copy>, CopiesError> {
        let now = Utc::now();
        let mut copies: Vec<Copy> = Vec::new();
        for row in self.rows()? {
            if row.expired(now) {
                continue;
            }
            let path = self.dir.join(&row.name);
            if !path.exists() {
                continue;
            }
            match copies.iter_mut().find(|c| c.name == row.name) {
                Some(copy) => copy.score += row.score,
                None => copies.push(Copy {
                    name: row.name,
                    path,
                    score: row.score,
                }),
            }
        }
        copies.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(copies)
    }

    /// Drop expired sidecar rows and delete body files nothing references.
    pub fn clean(&self) -> Result<(), CopiesError> {
        let now = Utc::now();
        let mut rows = self.rows()?;
        rows.retain(|r| !r.expired(now));
        self.save(&rows)?;
        if self.dir.exists() {
            for entry in std::fs::read_dir(&self.dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name == SCORES_FILE {
                    continue;
                }
                if !rows.iter().any(|r| r.name == name) {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    }

    fn rows(&self) -> Result<Vec<Row>, CopiesError> {
        let sidecar = AtomicFile::new(self.dir.join(SCORES_FILE));
        if !sidecar.exists() {
            return Ok(Vec::new());
        }
        let mut rows = Vec::new();
        for line in sidecar.read()?.lines() {
            if line.is_empty() {
                continue;
            }
            match Row::parse(line) {
                Some(row) => rows.push(row),
                None => warn!(line, "dropping malformed copies row"),
            }
        }
        Ok(rows)
    }

    fn save(&self, rows: &[Row]) -> Result<(), CopiesError> {
        let body: String = rows.iter().map(|r| r.render() + "\n").collect();
        AtomicFile::new(self.dir.join(SCORES_FILE)).write(&body)?;
        Ok(())
    }
}
