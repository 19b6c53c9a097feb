//! The concurrent miner.
//!
//! A farm runs `threads` workers that continuously extend the best known
//! score for this node's invoice. Workers partition the 64-bit nonce space
//! and search it in chunks, re-reading the best score between chunks so
//! they converge on the same chain. Every advance appends one canonical
//! line to the history file; on startup the history re-seeds the pool.
//!
//! All coordination goes through one mutex around the score pool; writer
//! contention is low because extensions are seconds to minutes apart.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::FarmError;
use crate::score::Score;

/// Nonces searched per chunk between shutdown checks.
const CHUNK: u64 = 16_384;

/// Scores kept in the candidate pool.
const POOL_SIZE: usize = 8;

struct Inner {
    invoice: String,
    cache: PathBuf,
    scores: Mutex<Vec<Score>>,
    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cycles: AtomicU64,
}

impl Inner {
    /// Insert a score into the pool, dropping expired entries and keeping
    /// the pool sorted by value descending.
    fn commit(&self, score: Score) {
        let mut pool = self.scores.lock();
        pool.retain(|s| !s.expired() && s.valid());
        if !pool.contains(&score) {
            pool.push(score);
        }
        pool.sort_by(|a, b| b.value().cmp(&a.value()));
        pool.truncate(POOL_SIZE);
    }

    /// Record an advance: one history line, then the pool.
    fn advance(&self, score: Score) {
        use std::io::Write as _;
        debug!(value = score.value(), "farm advanced");
        // One write_all per line so concurrent workers never interleave.
        let line = format!("{score}\n");
        let append = || -> std::io::Result<()> {
            if let Some(parent) = self.cache.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&self.cache)?;
            file.write_all(line.as_bytes())
        };
        if let Err(e) = append() {
            warn!(error = %e, "failed to append farm history");
        }
        self.commit(score);
    }
}

/// The score engine.
#[derive(Clone)]
pub struct Farm {
    inner: Arc<Inner>,
}

impl Farm {
    /// A stopped farm for `invoice`, persisting history at `cache`.
    pub fn new(invoice: &str, cache: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                invoice: invoice.to_string(),
                cache: cache.into(),
                scores: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
                cycles: AtomicU64::new(0),
            }),
        }
    }

    /// Seed the pool from history and launch `threads` workers extending
    /// the best score at the given strength. With zero threads the pool
    /// is seeded but never extended.
    pub fn start(
        &self,
        host: &str,
        port: u16,
        threads: usize,
        strength: u32,
    ) -> Result<(), FarmError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(FarmError::AlreadyRunning);
        }
        let mut seeded = self.load_history();
        if seeded.is_empty() {
            seeded.push(Score::new(Utc::now(), host, port, &self.inner.invoice, strength));
        }
        seeded.sort_by(|a, b| b.value().cmp(&a.value()));
        seeded.truncate(POOL_SIZE);
        info!(candidates = seeded.len(), threads, strength, "farm starting");
        *self.inner.scores.lock() = seeded;
        let mut workers = self.inner.workers.lock();
        for index in 0..threads {
            let inner = Arc::clone(&self.inner);
            let host = host.to_string();
            workers.push(std::thread::spawn(move || {
                work(inner, index, threads, host, port, strength);
            }));
        }
        Ok(())
    }

    /// Current scores, strongest first. Empty only before [`Farm::start`].
    pub fn best(&self) -> Vec<Score> {
        self.inner.scores.lock().clone()
    }

    /// Cooperative shutdown; blocks until all workers exit.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let workers: Vec<_> = self.inner.workers.lock().drain(..).collect();
        for worker in workers {
            worker.join().ok();
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let best: Vec<String> = self.best().iter().map(Score::to_string).collect();
        serde_json::json!({
            "threads": self.inner.workers.lock().len(),
            "cycles": self.inner.cycles.load(Ordering::Relaxed),
            "invoice": self.inner.invoice,
            "best": best,
        })
    }

    pub fn to_text(&self) -> String {
        let mut out = format!(
            "invoice: {}\nthreads: {}\ncycles: {}\n",
            self.inner.invoice,
            self.inner.workers.lock().len(),
            self.inner.cycles.load(Ordering::Relaxed),
        );
        for score in self.best() {
            out.push_str(&score.to_string());
            out.push('\n');
        }
        out
    }

    /// Parse the history file, keeping valid, fresh scores for this
    /// node's invoice.
    fn load_history(&self) -> Vec<Score> {
        let Ok(text) = std::fs::read_to_string(&self.inner.cache) else {
            return Vec::new();
        };
        let mut scores = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            match line.parse::<Score>() {
                Ok(score)
                    if score.invoice == self.inner.invoice
                        && !score.expired()
                        && score.valid() =>
                {
                    if !scores.contains(&score) {
                        scores.push(score);
                    }
                }
                Ok(score) => {
                    debug!(%score, "dropping stale or foreign score");
                }
                Err(e) => warn!(line, error = %e, "Invalid score"),
            }
        }
        scores
    }
}

/// One worker: extend the head of the pool inside this worker's nonce
/// partition, restarting the search whenever the head changes.
fn work(inner: Arc<Inner>, index: usize, threads: usize, host: String, port: u16, strength: u32) {
    let span = u64::MAX / threads as u64;
    let base = span * index as u64;
    let mut offset = 0u64;
    let mut tail = String::new();
    while inner.running.load(Ordering::Relaxed) {
        let head = inner.scores.lock().first().cloned();
        let score = match head {
            Some(s) if s.expired() => {
                info!(value = s.value(), "score expired, restarting from zero");
                let fresh = Score::new(Utc::now(), &host, port, &inner.invoice, strength);
                inner.commit(fresh.clone());
                fresh
            }
            Some(s) => s,
            None => {
                let fresh = Score::new(Utc::now(), &host, port, &inner.invoice, strength);
                inner.commit(fresh.clone());
                fresh
            }
        };
        let current = score.tail();
        if current != tail {
            tail = current;
            offset = 0;
        }
        match mine_chunk(&tail, strength, base.wrapping_add(offset), CHUNK) {
            Some(nonce) => {
                let extended = score.extended(&format!("{nonce:x}"));
                if extended.valid() && !extended.expired() {
                    inner.advance(extended);
                }
            }
            None => {
                offset = offset.wrapping_add(CHUNK);
                if offset >= span {
                    offset = 0;
                }
            }
        }
        inner.cycles.fetch_add(CHUNK, Ordering::Relaxed);
    }
}

/// Search `len` nonces starting at `start` for one whose hex form hashes
/// the tail to `strength` trailing zero nibbles.
///
/// The hasher state over `"<tail> "` is computed once and cloned per
/// nonce, so the shared portion of the input is never re-hashed.
fn mine_chunk(tail: &str, strength: u32, start: u64, len: u64) -> Option<u64> {
    let base = Sha256::new_with_prefix(format!("{tail} ").as_bytes());
    let mut buf = itoa_hex::Buffer::new();
    for nonce in start..start.wrapping_add(len) {
        let mut hasher = base.clone();
        hasher.update(buf.format(nonce));
        if digest_ends_in_zeros(&hasher.finalize(), strength) {
            return Some(nonce);
        }
    }
    None
}

/// Trailing-zero-nibble check on the raw digest, avoiding hex encoding in
/// the hot loop.
fn digest_ends_in_zeros(digest: &[u8], strength: u32) -> bool {
    let n = strength as usize;
    let full = n / 2;
    if digest.len() < full + 1 {
        return false;
    }
    if digest[digest.len() - full..].iter().any(|b| *b != 0) {
        return false;
    }
    if n % 2 == 1 && digest[digest.len() - full - 1] & 0x0F != 0 {
        return false;
    }
    true
}

/// Allocation-free lowercase-hex rendering of a u64.
mod itoa_hex {
    pub struct Buffer {
        bytes: [u8; 16],
    }

    impl Buffer {
        pub fn new() -> Self {
            Self { bytes: [0; 16] }
        }

        pub fn format(&mut self, mut value: u64) -> &[u8] {
            if value == 0 {
                self.bytes[15] = b'0';
                return &self.bytes[15..];
            }
            let mut pos = 16;
            while value > 0 {
                pos -= 1;
                let digit = (value & 0xF) as u8;
                self.bytes[pos] = if digit < 10 { b'0' + digit } else { b'a' + digit - 10 };
                value >>= 4;
            }
            &self.bytes[pos..]
        }
    }
}
