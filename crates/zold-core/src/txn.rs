//! A single ledger row.
//!
//! Negative rows are the signed, authoritative side of a payment; positive
//! rows are unsigned mirrors created by propagation. The text line form is
//! semicolon-separated:
//!
//! ```text
//! <id-hex4>;<iso8601>;<zents>;<prefix>;<bnf>;<details>;<sign?>
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};

use crate::amount::Amount;
use crate::constants::{MAX_DETAILS, MAX_TXN_ID, PREFIX_MAX, PREFIX_MIN};
use crate::error::{AmountError, TxnError};
use crate::id::Id;

/// One signed or mirrored row in a wallet ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Txn {
    /// Per-wallet id, monotonically increasing across negative rows.
    pub id: u32,
    /// UTC timestamp, second precision.
    pub date: DateTime<Utc>,
    /// Non-zero amount; the sign determines direction.
    pub amount: Amount,
    /// Invoice prefix chosen by the payee.
    pub prefix: String,
    /// The other party: beneficiary when negative, payer when positive.
    pub bnf: Id,
    /// Free-form payment details.
    pub details: String,
    /// Base64 RSA signature; present iff the row is the outgoing side.
    pub sign: Option<String>,
}

impl Txn {
    /// Construct a validated, unsigned row. The date is truncated to
    /// second precision so text round-trips are exact.
    pub fn new(
        id: u32,
        date: DateTime<Utc>,
        amount: Amount,
        prefix: &str,
        bnf: Id,
        details: &str,
    ) -> Result<Self, TxnError> {
        if id > MAX_TXN_ID {
            return Err(TxnError::IdTooLarge(id));
        }
        if amount.is_zero() {
            return Err(TxnError::ZeroAmount);
        }
        if !valid_prefix(prefix) {
            return Err(TxnError::BadPrefix(prefix.to_string()));
        }
        if !valid_details(details) {
            return Err(TxnError::BadDetails(details.to_string()));
        }
        Ok(Self {
            id,
            date: date.trunc_subsecs(0),
            amount,
            prefix: prefix.to_string(),
            bnf,
            details: details.to_string(),
            sign: None,
        })
    }

    /// The canonical bytes signed by the owner of `wallet_id`.
    pub fn signature_body(&self, wallet_id: Id) -> Vec<u8> {
        format!(
            "{} {:04x} {} {} {} {} {}",
            wallet_id,
            self.id,
            iso8601(&self.date),
            self.amount.zents(),
            self.prefix,
            self.bnf,
            self.details
        )
        .into_bytes()
    }

    /// The unsigned positive mirror of this (negative) row, to be
    /// appended to the beneficiary's wallet. `source` is the wallet the
    /// original row lives in.
    pub fn inverse(&self, source: Id) -> Result<Self, AmountError> {
        Ok(Self {
            id: self.id,
            date: self.date,
            amount: self.amount.checked_neg()?,
            prefix: self.prefix.clone(),
            bnf: source,
            details: self.details.clone(),
            sign: None,
        })
    }

    pub fn is_negative(&self) -> bool {
        self.amount.is_negative()
    }
}

impl fmt::Display for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x};{};{};{};{};{};{}",
            self.id,
            iso8601(&self.date),
            self.amount.zents(),
            self.prefix,
            self.bnf,
            self.details,
            self.sign.as_deref().unwrap_or("")
        )
    }
}

impl FromStr for Txn {
    type Err = TxnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(';').collect();
        if parts.len() != 7 {
            return Err(TxnError::Malformed(format!(
                "expected 7 fields, got {} in {s:?}",
                parts.len()
            )));
        }
        let id = u32::from_str_radix(parts[0], 16)
            .map_err(|_| TxnError::Malformed(format!("bad txn id {:?}", parts[0])))?;
        let date = DateTime::parse_from_rfc3339(parts[1])
            .map_err(|_| TxnError::Malformed(format!("bad date {:?}", parts[1])))?
            .with_timezone(&Utc);
        let zents: i64 = parts[2]
            .parse()
            .map_err(|_| TxnError::Malformed(format!("bad amount {:?}", parts[2])))?;
        let bnf: Id = parts[4].parse()?;
        let mut txn = Self::new(id, date, Amount::from_zents(zents), parts[3], bnf, parts[5])?;
        if !parts[6].is_empty() {
            txn.sign = Some(parts[6].to_string());
        }
        Ok(txn)
    }
}

/// Sort rows canonically: date ascending, then amount descending.
pub fn sort(txns: &mut [Txn]) {
    txns.sort_by(|a, b| a.date.cmp(&b.date).then(b.amount.cmp(&a.amount)));
}

/// Render a UTC timestamp as `2018-06-26T00:32:43Z`.
pub fn iso8601(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn valid_prefix(prefix: &str) -> bool {
    (PREFIX_MIN..=PREFIX_MAX).contains(&prefix.len())
        && prefix.chars().all(|c| c.is_ascii_alphanumeric())
}

fn valid_details(details: &str) -> bool {
    !details.is_empty()
        && details.len() <= MAX_DETAILS
        && details
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || " @!?*_-.:,'/".contains(c))
}
