//! File-backed append-only wallet ledgers.
//!
//! A wallet file is line-oriented UTF-8 text:
//!
//! ```text
//! <network>
//! <protocol-version>
//! <id>
//! <public-key>
//!
//! <txn line>
//! ...
//! ```
//!
//! [`Wallet`] re-reads the file on every operation; all writes go through
//! [`AtomicFile`] so concurrent readers never observe a partial body.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::amount::Amount;
use crate::atomic_file::AtomicFile;
use crate::constants::{MAX_TXN_ID, PROTOCOL, TAX_DETAILS_PREFIX};
use crate::crypto::{PrivateKey, PublicKey};
use crate::error::{TxnError, WalletError};
use crate::id::Id;
use crate::txn::{self, Txn};

/// The parsed form of a wallet file.
#[derive(Clone, Debug)]
pub struct WalletBody {
    pub network: String,
    pub protocol: u32,
    pub id: Id,
    pub key: PublicKey,
    pub txns: Vec<Txn>,
}

impl WalletBody {
    /// Parse a full wallet file body.
    pub fn parse(text: &str) -> Result<Self, WalletError> {
        let mut lines = text.lines();
        let network = lines
            .next()
            .ok_or_else(|| WalletError::Malformed("missing network line".into()))?
            .to_string();
        if !valid_network(&network) {
            return Err(WalletError::BadNetwork(network));
        }
        let protocol: u32 = lines
            .next()
            .ok_or_else(|| WalletError::Malformed("missing protocol line".into()))?
            .parse()
            .map_err(|_| WalletError::Malformed("bad protocol line".into()))?;
        let id: Id = lines
            .next()
            .ok_or_else(|| WalletError::Malformed("missing id line".into()))?
            .parse()?;
        let mut key_lines = Vec::new();
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            key_lines.push(line);
        }
        if key_lines.is_empty() {
            return Err(WalletError::Malformed("missing public key".into()));
        }
        let key = PublicKey::parse(&key_lines.join("\n"))?;
        let mut txns = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            txns.push(line.parse::<Txn>()?);
        }
        Ok(Self {
            network,
            protocol,
            id,
            key,
            txns,
        })
    }

    /// Render back to the canonical file text.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{}\n{}\n{}\n{}\n\n",
            self.network,
            self.protocol,
            self.id,
            self.key.to_text()
        );
        for t in &self.txns {
            out.push_str(&t.to_string());
            out.push('\n');
        }
        out
    }

    /// Sum of all rows; overflow is a hard error.
    pub fn balance(&self) -> Result<Amount, WalletError> {
        let mut total = Amount::ZERO;
        for t in &self.txns {
            total = total.checked_add(t.amount)?;
        }
        Ok(total)
    }

    /// Largest id among negative rows, if any.
    pub fn max_negative_id(&self) -> Option<u32> {
        self.txns
            .iter()
            .filter(|t| t.is_negative())
            .map(|t| t.id)
            .max()
    }
}

/// A file-backed wallet.
#[derive(Clone, Debug)]
pub struct Wallet {
    file: AtomicFile,
}

impl Wallet {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: AtomicFile::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn exists(&self) -> bool {
        self.file.exists()
    }

    /// Create a fresh wallet file. Refuses to overwrite unless told to.
    pub fn init(
        path: impl Into<PathBuf>,
        id: Id,
        key: &PublicKey,
        network: &str,
        overwrite: bool,
    ) -> Result<Self, WalletError> {
        if !valid_network(network) {
            return Err(WalletError::BadNetwork(network.to_string()));
        }
        let file = AtomicFile::new(path);
        if file.exists() && !overwrite {
            return Err(WalletError::AlreadyExists(
                file.path().display().to_string(),
            ));
        }
        let body = WalletBody {
            network: network.to_string(),
            protocol: PROTOCOL,
            id,
            key: key.clone(),
            txns: Vec::new(),
        };
        file.write(&body.render())?;
        Ok(Self { file })
    }

    /// Parse the current file contents.
    pub fn body(&self) -> Result<WalletBody, WalletError> {
        if !self.file.exists() {
            return Err(WalletError::NotFound(
                self.file.path().display().to_string(),
            ));
        }
        WalletBody::parse(&self.file.read()?)
    }

    pub fn id(&self) -> Result<Id, WalletError> {
        Ok(self.body()?.id)
    }

    pub fn network(&self) -> Result<String, WalletError> {
        Ok(self.body()?.network)
    }

    pub fn protocol(&self) -> Result<u32, WalletError> {
        Ok(self.body()?.protocol)
    }

    pub fn key(&self) -> Result<PublicKey, WalletError> {
        Ok(self.body()?.key)
    }

    pub fn is_root(&self) -> Result<bool, WalletError> {
        Ok(self.id()?.is_root())
    }

    /// All rows, sorted by date ascending then amount descending.
    pub fn txns(&self) -> Result<Vec<Txn>, WalletError> {
        let mut txns = self.body()?.txns;
        txn::sort(&mut txns);
        Ok(txns)
    }

    pub fn balance(&self) -> Result<Amount, WalletError> {
        self.body()?.balance()
    }

    /// True if a row with this id and counterparty is already present.
    pub fn has(&self, id: u32, bnf: Id) -> Result<bool, WalletError> {
        Ok(self.body()?.txns.iter().any(|t| t.id == id && t.bnf == bnf))
    }

    /// True if `prefix` belongs to this wallet's public key.
    pub fn prefix(&self, prefix: &str) -> Result<bool, WalletError> {
        Ok(self.key()?.contains(prefix))
    }

    /// Append a row. Rejects balance overflow, duplicate `(id, bnf)`
    /// pairs, and duplicate tax payments.
    pub fn add(&self, txn: Txn) -> Result<(), WalletError> {
        let mut body = self.body()?;
        if body.txns.iter().any(|t| t.id == txn.id && t.bnf == txn.bnf) {
            return Err(WalletError::DuplicateTxn {
                id: txn.id,
                bnf: txn.bnf.to_string(),
            });
        }
        if txn.details.starts_with(TAX_DETAILS_PREFIX)
            && body.txns.iter().any(|t| t.details == txn.details)
        {
            return Err(WalletError::DuplicateTax(txn.details));
        }
        body.balance()?
            .checked_add(txn.amount)
            .map_err(|_| WalletError::BalanceOverflow)?;
        debug!(wallet = %body.id, id = txn.id, amount = %txn.amount, "adding txn");
        body.txns.push(txn);
        self.file.write(&body.render())?;
        Ok(())
    }

    /// Construct, sign, verify, and append the outgoing side of a
    /// payment. `amount` is the positive magnitude to send; `invoice` is
    /// `<prefix>@<id>`.
    pub fn sub(
        &self,
        amount: Amount,
        invoice: &str,
        pvt: &PrivateKey,
        details: &str,
        time: DateTime<Utc>,
    ) -> Result<Txn, WalletError> {
        if amount.is_negative() || amount.is_zero() {
            return Err(WalletError::NegativeSub);
        }
        let (prefix, bnf) = parse_invoice(invoice)?;
        let body = self.body()?;
        let id = body.max_negative_id().map_or(1, |m| m + 1);
        if id > MAX_TXN_ID {
            return Err(WalletError::Exhausted);
        }
        let mut txn = Txn::new(
            id,
            time,
            amount.checked_neg()?,
            &prefix,
            bnf,
            details,
        )?;
        txn.sign = Some(pvt.sign(&txn.signature_body(body.id)));
        let sign = txn.sign.as_deref().unwrap_or_default();
        body.key
            .verify(&txn.signature_body(body.id), sign)
            .map_err(|_| WalletError::BadSignature)?;
        self.add(txn.clone())?;
        Ok(txn)
    }

    /// Rewrite header and body canonically, sorting rows by date then
    /// descending amount.
    pub fn refurbish(&self) -> Result<(), WalletError> {
        let mut body = self.body()?;
        txn::sort(&mut body.txns);
        let rendered = body.render();
        if self.file.read()? != rendered {
            self.file.write(&rendered)?;
        }
        Ok(())
    }

    /// SHA-256 of the raw file bytes, hex-encoded.
    pub fn digest(&self) -> Result<String, WalletError> {
        let raw = self.file.read()?;
        Ok(hex::encode(Sha256::digest(raw.as_bytes())))
    }

    pub fn mtime(&self) -> Result<DateTime<Utc>, WalletError> {
        let meta = std::fs::metadata(self.file.path())?;
        Ok(DateTime::<Utc>::from(meta.modified()?))
    }

    /// Time since the file was last modified.
    pub fn age(&self) -> Result<Duration, WalletError> {
        let meta = std::fs::metadata(self.file.path())?;
        Ok(meta.modified()?.elapsed().unwrap_or_default())
    }
}

/// Split `<prefix>@<id>` into its parts.
pub fn parse_invoice(invoice: &str) -> Result<(String, Id), WalletError> {
    let (prefix, id) = invoice.split_once('@').ok_or_else(|| {
        WalletError::Txn(TxnError::Malformed(format!("bad invoice {invoice:?}")))
    })?;
    Ok((prefix.to_string(), id.parse()?))
}

/// Network names are 4 to 16 lowercase letters.
pub fn valid_network(network: &str) -> bool {
    (4..=16).contains(&network.len()) && network.chars().all(|c| c.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TEST_NETWORK;
    use chrono::TimeZone;
    use std::sync::OnceLock;

    fn fixture_key() -> &'static PrivateKey {
        static KEY: OnceLock<PrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            let mut rng = rand::rngs::OsRng;
            PrivateKey::from_rsa(rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap())
        })
    }

    fn second_key() -> &'static PrivateKey {
        static KEY: OnceLock<PrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            let mut rng = rand::rngs::OsRng;
            PrivateKey::from_rsa(rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap())
        })
    }

    fn init_wallet(dir: &Path, id: Id) -> Wallet {
        let path = dir.join(format!("{id}.z"));
        Wallet::init(path, id, &fixture_key().public_key(), TEST_NETWORK, false).unwrap()
    }

    fn invoice_for(wallet: &Wallet) -> String {
        let prefix = wallet.key().unwrap().sub_prefix(8).unwrap();
        format!("{}@{}", prefix, wallet.id().unwrap())
    }

    #[test]
    fn init_writes_header_and_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = init_wallet(dir.path(), Id::new(0xdead));
        assert_eq!(wallet.network().unwrap(), TEST_NETWORK);
        assert_eq!(wallet.protocol().unwrap(), PROTOCOL);
        assert_eq!(wallet.id().unwrap(), Id::new(0xdead));
        assert!(wallet.txns().unwrap().is_empty());
        assert!(wallet.balance().unwrap().is_zero());
    }

    #[test]
    fn init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = init_wallet(dir.path(), Id::new(1));
        let err = Wallet::init(
            wallet.path(),
            Id::new(1),
            &fixture_key().public_key(),
            TEST_NETWORK,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::AlreadyExists(_)));
        assert!(Wallet::init(
            wallet.path(),
            Id::new(1),
            &fixture_key().public_key(),
            TEST_NETWORK,
            true,
        )
        .is_ok());
    }

    #[test]
    fn init_rejects_bad_network() {
        let dir = tempfile::tempdir().unwrap();
        for network in ["ab", "UPPER", "waytoolongnetworkname", "with-dash"] {
            let err = Wallet::init(
                dir.path().join("x.z"),
                Id::new(1),
                &fixture_key().public_key(),
                network,
                false,
            )
            .unwrap_err();
            assert!(matches!(err, WalletError::BadNetwork(_)), "{network}");
        }
    }

    #[test]
    fn body_round_trips_through_render() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = init_wallet(dir.path(), Id::new(42));
        let date = Utc.with_ymd_and_hms(2018, 6, 26, 0, 32, 43).unwrap();
        let txn = Txn::new(
            1,
            date,
            Amount::from_zents(500),
            "NOPREFIX",
            Id::new(7),
            "Payback",
        )
        .unwrap();
        wallet.add(txn).unwrap();
        let body = wallet.body().unwrap();
        let reparsed = WalletBody::parse(&body.render()).unwrap();
        assert_eq!(reparsed.render(), body.render());
        assert_eq!(reparsed.txns, body.txns);
    }

    #[test]
    fn sub_signs_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let payer = init_wallet(dir.path(), Id::new(0xa));
        let payee = init_wallet(dir.path(), Id::new(0xb));
        let txn = payer
            .sub(
                Amount::from_zld(14.99).unwrap(),
                &invoice_for(&payee),
                fixture_key(),
                "For a beer",
                Utc::now(),
            )
            .unwrap();
        assert_eq!(txn.id, 1);
        assert!(txn.is_negative());
        assert!(txn.sign.is_some());
        assert_eq!(payer.txns().unwrap().len(), 1);
        assert_eq!(
            payer.balance().unwrap(),
            Amount::from_zld(-14.99).unwrap()
        );
    }

    #[test]
    fn sub_ids_increase_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let payer = init_wallet(dir.path(), Id::new(0xa));
        let payee = init_wallet(dir.path(), Id::new(0xb));
        for expected in 1..=3 {
            let txn = payer
                .sub(
                    Amount::from_zents(100),
                    &invoice_for(&payee),
                    fixture_key(),
                    "ping",
                    Utc::now(),
                )
                .unwrap();
            assert_eq!(txn.id, expected);
        }
    }

    #[test]
    fn sub_rejects_non_positive_amount() {
        let dir = tempfile::tempdir().unwrap();
        let payer = init_wallet(dir.path(), Id::new(0xa));
        let payee = init_wallet(dir.path(), Id::new(0xb));
        for zents in [0, -5] {
            let err = payer
                .sub(
                    Amount::from_zents(zents),
                    &invoice_for(&payee),
                    fixture_key(),
                    "x",
                    Utc::now(),
                )
                .unwrap_err();
            assert!(matches!(err, WalletError::NegativeSub));
        }
    }

    #[test]
    fn sub_rejects_wrong_private_key() {
        let dir = tempfile::tempdir().unwrap();
        let payer = init_wallet(dir.path(), Id::new(0xa));
        let payee = init_wallet(dir.path(), Id::new(0xb));
        let err = payer
            .sub(
                Amount::from_zents(100),
                &invoice_for(&payee),
                second_key(),
                "x",
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, WalletError::BadSignature));
    }

    #[test]
    fn add_rejects_duplicate_id_bnf_pair() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = init_wallet(dir.path(), Id::new(0xa));
        let txn = Txn::new(
            9,
            Utc::now(),
            Amount::from_zents(5),
            "NOPREFIX",
            Id::new(0xb),
            "x",
        )
        .unwrap();
        wallet.add(txn.clone()).unwrap();
        assert!(matches!(
            wallet.add(txn),
            Err(WalletError::DuplicateTxn { .. })
        ));
    }

    #[test]
    fn add_rejects_duplicate_tax_payment() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = init_wallet(dir.path(), Id::new(0xa));
        let details = format!("{TAX_DETAILS_PREFIX} 6 5b5a21a9");
        let one = Txn::new(
            1,
            Utc::now(),
            Amount::from_zents(-5),
            "NOPREFIX",
            Id::new(0xb),
            &details,
        )
        .unwrap();
        let two = Txn::new(
            2,
            Utc::now(),
            Amount::from_zents(-5),
            "NOPREFIX",
            Id::new(0xc),
            &details,
        )
        .unwrap();
        wallet.add(one).unwrap();
        assert!(matches!(
            wallet.add(two),
            Err(WalletError::DuplicateTax(_))
        ));
    }

    #[test]
    fn add_rejects_balance_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = init_wallet(dir.path(), Id::new(0xa));
        let near_max = Txn::new(
            1,
            Utc::now(),
            Amount::from_zents(i64::MAX - 10),
            "NOPREFIX",
            Id::new(0xb),
            "x",
        )
        .unwrap();
        wallet.add(near_max).unwrap();
        let push_over = Txn::new(
            2,
            Utc::now(),
            Amount::from_zents(100),
            "NOPREFIX",
            Id::new(0xc),
            "x",
        )
        .unwrap();
        assert!(matches!(
            wallet.add(push_over),
            Err(WalletError::BalanceOverflow)
        ));
    }

    #[test]
    fn has_and_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let payer = init_wallet(dir.path(), Id::new(0xa));
        let payee = init_wallet(dir.path(), Id::new(0xb));
        let invoice = invoice_for(&payee);
        let txn = payer
            .sub(
                Amount::from_zents(100),
                &invoice,
                fixture_key(),
                "x",
                Utc::now(),
            )
            .unwrap();
        assert!(payer.has(txn.id, payee.id().unwrap()).unwrap());
        assert!(!payer.has(txn.id, Id::new(0xdead)).unwrap());
        let prefix = invoice.split('@').next().unwrap();
        assert!(payee.prefix(prefix).unwrap());
        assert!(!payee.prefix("00000000").unwrap());
    }

    #[test]
    fn refurbish_sorts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = init_wallet(dir.path(), Id::new(0xa));
        let d1 = Utc.with_ymd_and_hms(2018, 1, 2, 0, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        let late = Txn::new(1, d1, Amount::from_zents(5), "NOPREFIX", Id::new(1), "a").unwrap();
        let early = Txn::new(2, d2, Amount::from_zents(7), "NOPREFIX", Id::new(2), "b").unwrap();
        wallet.add(late).unwrap();
        wallet.add(early.clone()).unwrap();
        wallet.refurbish().unwrap();
        let body = wallet.body().unwrap();
        assert_eq!(body.txns[0], early);
    }

    #[test]
    fn digest_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = init_wallet(dir.path(), Id::new(0xa));
        let before = wallet.digest().unwrap();
        assert_eq!(before.len(), 64);
        let txn = Txn::new(
            1,
            Utc::now(),
            Amount::from_zents(5),
            "NOPREFIX",
            Id::new(1),
            "x",
        )
        .unwrap();
        wallet.add(txn).unwrap();
        assert_ne!(wallet.digest().unwrap(), before);
    }

    #[test]
    fn missing_wallet_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = Wallet::new(dir.path().join("absent.z"));
        assert!(!wallet.exists());
        assert!(matches!(wallet.body(), Err(WalletError::NotFound(_))));
    }

    #[test]
    fn parse_invoice_splits_prefix_and_id() {
        let (prefix, id) = parse_invoice("NOPREFIX@ffffffffffffffff").unwrap();
        assert_eq!(prefix, "NOPREFIX");
        assert_eq!(id, Id::new(u64::MAX));
        assert!(parse_invoice("noat").is_err());
    }
}
