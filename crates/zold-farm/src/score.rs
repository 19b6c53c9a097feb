//! Immutable proof-of-work artifacts.
//!
//! A score binds `(time, host, port, invoice)` into a prefix string and
//! extends it with a chain of suffixes. With `h0 = prefix` and
//! `hi = sha256_hex(h(i-1) + " " + si)`, the score is valid iff the final
//! hash ends in `strength` hex zeros. The value of a score is the number
//! of suffixes; a score older than 24 hours counts as zero.
//!
//! Two text forms exist:
//!
//! - canonical (farm file, `/score` route):
//!   `<value>/<strength>: <iso8601> <host> <port> <invoice> <suffix>*`
//! - wire header (`X-Zold-Score`):
//!   `<strength> <time-hex-unix> <host> <port-hex> <prefix> <id> <suffix>*`

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, TimeZone, Utc};
use sha2::{Digest, Sha256};

use zold_core::txn::iso8601;

use crate::error::ScoreError;

/// Default required number of trailing zero hex nibbles.
pub const STRENGTH: u32 = 6;

/// Hours after which a score counts as zero.
pub const EXPIRY_HOURS: i64 = 24;

/// An immutable proof-of-work score.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Score {
    pub time: DateTime<Utc>,
    pub host: String,
    pub port: u16,
    pub invoice: String,
    pub suffixes: Vec<String>,
    pub strength: u32,
}

impl Score {
    /// A fresh score of value zero.
    pub fn new(
        time: DateTime<Utc>,
        host: &str,
        port: u16,
        invoice: &str,
        strength: u32,
    ) -> Self {
        Self {
            time: time.trunc_subsecs(0),
            host: host.to_string(),
            port,
            invoice: invoice.to_string(),
            suffixes: Vec::new(),
            strength,
        }
    }

    /// The number of suffixes in the chain.
    pub fn value(&self) -> usize {
        self.suffixes.len()
    }

    /// The fixed prefix every chain hash builds on.
    pub fn prefix(&self) -> String {
        format!(
            "{} {} {} {}",
            iso8601(&self.time),
            self.host,
            self.port,
            self.invoice
        )
    }

    /// The last hash of the chain, or the raw prefix when empty.
    pub fn tail(&self) -> String {
        let mut cur = self.prefix();
        for suffix in &self.suffixes {
            cur = hex::encode(Sha256::digest(format!("{cur} {suffix}").as_bytes()));
        }
        cur
    }

    /// True if the chain is empty or its final hash ends in `strength`
    /// hex zeros.
    pub fn valid(&self) -> bool {
        self.suffixes.is_empty() || ends_in_zeros(&self.tail(), self.strength)
    }

    /// Time since the score was minted.
    pub fn age(&self) -> Duration {
        Utc::now() - self.time
    }

    /// True once the score is older than [`EXPIRY_HOURS`].
    pub fn expired(&self) -> bool {
        self.age() > Duration::hours(EXPIRY_HOURS)
    }

    /// A copy with one more suffix appended.
    pub fn extended(&self, suffix: &str) -> Self {
        let mut next = self.clone();
        next.suffixes.push(suffix.to_string());
        next
    }

    /// The wire header form carried in `X-Zold-Score`.
    pub fn to_header(&self) -> String {
        let mut out = format!(
            "{} {:x} {} {:x} {}",
            self.strength,
            self.time.timestamp(),
            self.host,
            self.port,
            self.invoice.replacen('@', " ", 1)
        );
        for suffix in &self.suffixes {
            out.push(' ');
            out.push_str(suffix);
        }
        out
    }

    /// Parse the wire header form.
    pub fn parse_header(text: &str) -> Result<Self, ScoreError> {
        let malformed = || ScoreError::Malformed(text.to_string());
        let mut parts = text.split(' ');
        let strength: u32 = parts.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
        let secs = i64::from_str_radix(parts.next().ok_or_else(malformed)?, 16)
            .map_err(|_| malformed())?;
        let time = Utc.timestamp_opt(secs, 0).single().ok_or_else(malformed)?;
        let host = parts.next().ok_or_else(malformed)?.to_string();
        let port = u16::from_str_radix(parts.next().ok_or_else(malformed)?, 16)
            .map_err(|_| malformed())?;
        let prefix = parts.next().ok_or_else(malformed)?;
        let id = parts.next().ok_or_else(malformed)?;
        let invoice = format!("{prefix}@{id}");
        let suffixes: Vec<String> = parts.map(str::to_string).collect();
        if suffixes.iter().any(|s| s.is_empty()) {
            return Err(malformed());
        }
        Ok(Self {
            time,
            host,
            port,
            invoice,
            suffixes,
            strength,
        })
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {} {} {} {}",
            self.value(),
            self.strength,
            iso8601(&self.time),
            self.host,
            self.port,
            self.invoice
        )?;
        for suffix in &self.suffixes {
            write!(f, " {suffix}")?;
        }
        Ok(())
    }
}

impl FromStr for Score {
    type Err = ScoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ScoreError::Malformed(s.to_string());
        let (head, rest) = s.split_once(": ").ok_or_else(malformed)?;
        let (value, strength) = head.split_once('/').ok_or_else(malformed)?;
        let value: usize = value.parse().map_err(|_| malformed())?;
        let strength: u32 = strength.parse().map_err(|_| malformed())?;
        let mut parts = rest.split(' ');
        let time = DateTime::parse_from_rfc3339(parts.next().ok_or_else(malformed)?)
            .map_err(|_| malformed())?
            .with_timezone(&Utc);
        let host = parts.next().ok_or_else(malformed)?.to_string();
        let port: u16 = parts.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
        let invoice = parts.next().ok_or_else(malformed)?.to_string();
        if !invoice.contains('@') {
            return Err(malformed());
        }
        let suffixes: Vec<String> = parts.map(str::to_string).collect();
        if suffixes.iter().any(|s| s.is_empty()) {
            return Err(malformed());
        }
        if suffixes.len() != value {
            return Err(ScoreError::ValueMismatch {
                value,
                count: suffixes.len(),
            });
        }
        Ok(Self {
            time,
            host,
            port,
            invoice,
            suffixes,
            strength,
        })
    }
}

/// True if the hex string ends in `strength` zero characters.
pub fn ends_in_zeros(hash: &str, strength: u32) -> bool {
    strength == 0
        || hash
            .bytes()
            .rev()
            .take(strength as usize)
            .all(|b| b == b'0')
            && hash.len() >= strength as usize
}
