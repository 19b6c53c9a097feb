//! Entrance pipeline scenarios: push, merge, propagate.

use chrono::Utc;

use zold_core::amount::Amount;
use zold_core::crypto::PrivateKey;
use zold_core::id::Id;
use zold_core::wallet::{Wallet, WalletBody};
use zold_core::wallets::Wallets;
use zold_node_lib::entrance::{Entrance, PushSource};

const NETWORK: &str = "test";

fn new_key() -> PrivateKey {
    let mut rng = rand::rngs::OsRng;
    PrivateKey::from_rsa(rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap())
}

fn invoice_of(wallet: &Wallet) -> String {
    let prefix = wallet.key().unwrap().sub_prefix(8).unwrap();
    format!("{}@{}", prefix, wallet.id().unwrap())
}

fn source(score: u64) -> Option<PushSource> {
    source_at("127.0.0.1", score)
}

fn source_at(host: &str, score: u64) -> Option<PushSource> {
    Some(PushSource {
        host: host.to_string(),
        port: 4096,
        score,
    })
}

struct Bench {
    home: tempfile::TempDir,
    client: tempfile::TempDir,
}

impl Bench {
    fn new() -> Self {
        Self {
            home: tempfile::tempdir().unwrap(),
            client: tempfile::tempdir().unwrap(),
        }
    }

    fn entrance(&self) -> Entrance {
        Entrance::new(
            Wallets::new(self.home.path().join("zold-wallets")),
            self.home.path().join("zold-copies"),
            NETWORK,
        )
    }

    fn node_wallets(&self) -> Wallets {
        Wallets::new(self.home.path().join("zold-wallets"))
    }

    /// A client-side wallet, not yet known to the node.
    fn client_wallet(&self, id: Id, key: &PrivateKey) -> Wallet {
        Wallet::init(
            self.client.path().join(format!("{id}.z")),
            id,
            &key.public_key(),
            NETWORK,
            false,
        )
        .unwrap()
    }

    fn body_of(&self, wallet: &Wallet) -> String {
        std::fs::read_to_string(wallet.path()).unwrap()
    }
}

#[test]
fn pay_then_propagate() {
    let bench = Bench::new();
    let entrance = bench.entrance();
    let key_a = new_key();
    let key_b = new_key();
    let a = bench.client_wallet(Id::new(0xaaaa), &key_a);
    let b = bench.client_wallet(Id::new(0xbbbb), &key_b);

    let payment = a
        .sub(
            Amount::from_zld(14.99).unwrap(),
            &invoice_of(&b),
            &key_a,
            "For a beer",
            Utc::now(),
        )
        .unwrap();

    let pushed_b = entrance
        .push(b.id().unwrap(), &bench.body_of(&b), source(1))
        .unwrap();
    assert_eq!(pushed_b, vec![b.id().unwrap()]);

    let pushed_a = entrance
        .push(a.id().unwrap(), &bench.body_of(&a), source(1))
        .unwrap();
    assert!(pushed_a.contains(&a.id().unwrap()));
    assert!(pushed_a.contains(&b.id().unwrap()));

    let local_b = bench.node_wallets().find(b.id().unwrap());
    assert_eq!(local_b.balance().unwrap(), Amount::from_zld(14.99).unwrap());
    let mirror = &local_b.txns().unwrap()[0];
    assert_eq!(mirror.id, payment.id);
    assert_eq!(mirror.prefix, payment.prefix);
    assert_eq!(mirror.bnf, a.id().unwrap());
    assert_eq!(mirror.amount, payment.amount.checked_neg().unwrap());
    assert_eq!(mirror.sign, None);
}

#[test]
fn push_is_idempotent() {
    let bench = Bench::new();
    let entrance = bench.entrance();
    let key = new_key();
    let a = bench.client_wallet(Id::new(0xaaaa), &key);

    let first = entrance
        .push(a.id().unwrap(), &bench.body_of(&a), source(1))
        .unwrap();
    assert!(!first.is_empty());
    let second = entrance
        .push(a.id().unwrap(), &bench.body_of(&a), source(1))
        .unwrap();
    assert!(second.is_empty(), "identical push must be a no-op");
}

#[test]
fn double_spend_keeps_the_highest_scored_copy() {
    let bench = Bench::new();
    let entrance = bench.entrance();
    let key_a = new_key();
    let a = bench.client_wallet(Id::new(0xaaaa), &key_a);
    let id_a = a.id().unwrap();

    // Two conflicting negatives with the same id, each validly signed,
    // spending the same funds to different beneficiaries.
    let honest = bench.body_of(&a);
    a.sub(
        Amount::from_zents(100),
        &invoice_of(&bench.client_wallet(Id::new(0xbbbb), &new_key())),
        &key_a,
        "to b",
        Utc::now(),
    )
    .unwrap();
    let spend_to_b = bench.body_of(&a);

    // Rebuild the wallet from the pre-payment state and double-spend.
    std::fs::write(a.path(), &honest).unwrap();
    a.sub(
        Amount::from_zents(100),
        &invoice_of(&bench.client_wallet(Id::new(0xcccc), &new_key())),
        &key_a,
        "to c",
        Utc::now(),
    )
    .unwrap();
    let spend_to_c = bench.body_of(&a);

    // Root wallets are exempt from the overdraft rule, and 0xaaaa is not
    // root, so fund the copies first through a root mirror.
    let spend_to_b = fund(&spend_to_b);
    let spend_to_c = fund(&spend_to_c);

    entrance.push(id_a, &spend_to_b, source_at("1.1.1.1", 9)).unwrap();
    entrance.push(id_a, &spend_to_c, source_at("2.2.2.2", 1)).unwrap();

    let merged = bench.node_wallets().find(id_a).body().unwrap();
    let negatives: Vec<_> = merged.txns.iter().filter(|t| t.is_negative()).collect();
    assert_eq!(negatives.len(), 1);
    assert_eq!(negatives[0].bnf, Id::new(0xbbbb));
}

/// Prepend an incoming row from root so the copy can afford its spend.
fn fund(body: &str) -> String {
    let mut doc = WalletBody::parse(body).unwrap();
    let income = zold_core::txn::Txn::new(
        7,
        Utc::now(),
        Amount::from_zents(1_000_000),
        "FUNDING0",
        Id::ROOT,
        "funding",
    )
    .unwrap();
    doc.txns.insert(0, income);
    doc.render()
}

#[test]
fn rejects_foreign_network_and_wrong_id() {
    let bench = Bench::new();
    let entrance = bench.entrance();
    let key = new_key();
    let a = bench.client_wallet(Id::new(0xaaaa), &key);
    let body = bench.body_of(&a);

    assert!(entrance.push(Id::new(0xdead), &body, source(1)).is_err());
    let foreign = body.replacen(NETWORK, "mainnet", 1);
    assert!(entrance.push(a.id().unwrap(), &foreign, source(1)).is_err());
    assert!(entrance.push(a.id().unwrap(), "garbage", source(1)).is_err());
}

#[test]
fn self_payment_is_not_propagated() {
    let bench = Bench::new();
    let entrance = bench.entrance();
    let key = new_key();
    let a = bench.client_wallet(Id::new(0xaaaa), &key);
    let id_a = a.id().unwrap();
    a.sub(
        Amount::from_zents(50),
        &invoice_of(&a),
        &key,
        "to myself",
        Utc::now(),
    )
    .unwrap();
    let body = fund(&bench.body_of(&a));

    let modified = entrance.push(id_a, &body, source(1)).unwrap();
    assert_eq!(modified, vec![id_a]);
    let local = bench.node_wallets().find(id_a);
    // The mirror was not appended on top of the pushed rows.
    assert_eq!(
        local
            .txns()
            .unwrap()
            .iter()
            .filter(|t| !t.is_negative())
            .count(),
        1
    );
}
