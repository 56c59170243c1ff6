//! Building, relaying and releasing transactions against the in-memory
//! daemon.

mod common;

use common::*;
use std::collections::HashSet;
use veil_tx::Transaction;
use veil_types::{Address, Network};
use veil_wallet::{FeePriority, KeyManager, OutputId, PendingTx, TxConfig, TxDestination, Wallet, WalletError};

const COIN: u64 = 1_000_000_000_000;

/// A synced wallet owning `amounts`, all unlocked.
async fn funded(seed_n: u8, amounts: &[u64]) -> (MockDaemon, Wallet) {
    init_logger();
    let daemon = MockDaemon::with_blocks(20);
    let me = address_of(seed_n);
    let dests: Vec<(Address, u64)> = amounts.iter().map(|a| (me, *a)).collect();
    daemon.fund(&dests);
    daemon.mine(20);
    let wallet = wallet(seed_n, &daemon);
    wallet.sync().await.unwrap();
    assert_eq!(wallet.get_unlocked_balance(0).unwrap(), amounts.iter().sum::<u64>());
    (daemon, wallet)
}

fn assert_fee_identity(tx: &PendingTx) {
    assert_eq!(tx.input_total - tx.destination_total - tx.change_amount, tx.fee);
}

fn pay(to: &Address, amount: u64) -> TxConfig {
    TxConfig::to(to.to_string(), amount)
}

#[tokio::test]
async fn test_spend_half_of_one_output() {
    let (daemon, alice) = funded(20, &[COIN]).await;
    let bob = address_of(21);

    let set = alice.create_tx(&pay(&bob, COIN / 2)).await.unwrap();
    assert_eq!(set.txs.len(), 1);
    let tx = &set.txs[0];
    assert_eq!(tx.spent_outputs.len(), 1);
    assert_eq!(tx.num_outputs, 2);
    assert!(tx.fee > 0);
    assert!(tx.change_amount > 0);
    assert_eq!(tx.input_total, COIN);
    assert_eq!(tx.destination_total, COIN / 2);
    assert_fee_identity(tx);
    assert_eq!(set.fee(), tx.fee);
    assert_eq!(set.get_serialized(), hex::encode(&tx.blob));
    assert_eq!(set.tx_hash(), hex::encode(tx.hash));

    let parsed = Transaction::from_bytes(&tx.blob).unwrap();
    assert_eq!(parsed.input_count(), 1);
    assert_eq!(parsed.output_count(), 2);
    assert_eq!(parsed.rct.fee, tx.fee);
    assert_eq!(parsed.tx_hash().unwrap(), tx.hash);

    // Reserved, so not selectable, but still part of the balance.
    assert_eq!(alice.get_balance(0).unwrap(), COIN);
    assert!(matches!(
        alice.create_tx(&pay(&bob, COIN / 4)).await,
        Err(WalletError::InsufficientFunds { have: 0, .. })
    ));

    assert_eq!(alice.relay_tx(&set).await.unwrap(), vec![tx.hash]);
    assert_eq!(daemon.relayed(), vec![tx.hash]);
    daemon.mine(1);
    alice.sync().await.unwrap();

    let change = COIN - COIN / 2 - tx.fee;
    assert_eq!(tx.change_amount, change);
    assert_eq!(alice.get_balance(0).unwrap(), change);
    let outputs = alice.outputs().unwrap();
    assert_eq!(outputs.len(), 2);
    assert!(outputs.iter().any(|o| o.spent && o.amount == COIN));
    assert!(outputs.iter().any(|o| !o.spent && o.amount == change));
    assert!(alice.snapshot().unwrap().reserved.is_empty());

    daemon.mine(10);
    alice.sync().await.unwrap();
    assert_eq!(alice.get_unlocked_balance(0).unwrap(), change);

    let bob_wallet = wallet(21, &daemon);
    bob_wallet.sync().await.unwrap();
    assert_eq!(bob_wallet.get_balance(0).unwrap(), COIN / 2);
}

#[tokio::test]
async fn test_relay_flag() {
    let (daemon, alice) = funded(22, &[COIN]).await;
    let config = TxConfig { relay: true, ..pay(&address_of(23), COIN / 10) };
    let set = alice.create_tx(&config).await.unwrap();
    assert_eq!(daemon.mempool_len(), 1);
    assert_eq!(daemon.relayed(), vec![set.txs[0].hash]);
}

#[tokio::test]
async fn test_relay_flag_failure_releases_inputs() {
    let (daemon, alice) = funded(48, &[COIN]).await;
    let bob = address_of(49);
    daemon.set_relay_down(true);
    let config = TxConfig { relay: true, ..pay(&bob, COIN / 2) };
    assert!(matches!(alice.create_tx(&config).await, Err(WalletError::Connection(_))));
    assert!(alice.snapshot().unwrap().reserved.is_empty());
    assert_eq!(daemon.mempool_len(), 0);

    daemon.set_relay_down(false);
    let set = alice.create_tx(&config).await.unwrap();
    assert_eq!(daemon.relayed(), vec![set.txs[0].hash]);
}

#[tokio::test]
async fn test_empty_wallet() {
    init_logger();
    let daemon = MockDaemon::with_blocks(30);
    let wallet = wallet(24, &daemon);
    wallet.sync().await.unwrap();
    match wallet.create_tx(&pay(&address_of(25), COIN)).await {
        Err(WalletError::InsufficientFunds { need, have }) => {
            assert_eq!(have, 0);
            assert!(need > COIN);
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_destinations() {
    init_logger();
    let daemon = MockDaemon::with_blocks(5);
    let wallet = wallet(26, &daemon);
    let bob = address_of(27);

    let invalid = |r: Result<_, WalletError>| matches!(r, Err(WalletError::InvalidDestination(_)));
    assert!(invalid(wallet.create_tx(&TxConfig::default()).await));
    assert!(invalid(wallet.create_tx(&TxConfig::to("not an address", COIN)).await));
    let mainnet = KeyManager::from_seed([27; 32], Network::Mainnet).primary_address();
    assert!(invalid(wallet.create_tx(&pay(&mainnet, COIN)).await));
    assert!(invalid(wallet.create_tx(&pay(&bob, 0)).await));

    match wallet.create_tx(&pay(&bob, 999_999)).await {
        Err(WalletError::DustOutput { amount, threshold }) => {
            assert_eq!(amount, 999_999);
            assert_eq!(threshold, 1_000_000);
        }
        other => panic!("expected DustOutput, got {:?}", other),
    }

    // One bad destination fails the whole set.
    let config = TxConfig {
        destinations: vec![TxDestination::new(bob.to_string(), COIN), TxDestination::new("x", COIN)],
        ..Default::default()
    };
    assert!(invalid(wallet.create_tx(&config).await));
}

#[tokio::test]
async fn test_locked_outputs_not_selected() {
    init_logger();
    let daemon = MockDaemon::with_blocks(20);
    let me = address_of(28);
    daemon.fund(&[(me, COIN)]);
    daemon.mine(3);
    let wallet = wallet(28, &daemon);
    wallet.sync().await.unwrap();
    assert_eq!(wallet.get_balance(0).unwrap(), COIN);
    assert_eq!(wallet.get_unlocked_balance(0).unwrap(), 0);
    assert!(matches!(
        wallet.create_tx(&pay(&address_of(29), COIN / 2)).await,
        Err(WalletError::InsufficientFunds { have: 0, .. })
    ));
}

#[tokio::test]
async fn test_relay_rejection_releases_inputs() {
    let (daemon, alice) = funded(30, &[COIN]).await;
    let bob = address_of(31);
    let set = alice.create_tx(&pay(&bob, COIN / 2)).await.unwrap();

    daemon.reject_next_relay("fee too low");
    match alice.relay_tx(&set).await {
        Err(WalletError::RelayRejected { reason }) => assert_eq!(reason, "fee too low"),
        other => panic!("expected RelayRejected, got {:?}", other),
    }
    assert!(alice.snapshot().unwrap().reserved.is_empty());

    let retry = alice.create_tx(&pay(&bob, COIN / 2)).await.unwrap();
    assert_eq!(retry.spent_outputs(), set.spent_outputs());
}

#[tokio::test]
async fn test_relay_connection_error_keeps_reservation() {
    let (daemon, alice) = funded(32, &[COIN]).await;
    let bob = address_of(33);
    let set = alice.create_tx(&pay(&bob, COIN / 2)).await.unwrap();

    daemon.set_offline(true);
    assert!(matches!(alice.relay_tx(&set).await, Err(WalletError::Connection(_))));
    daemon.set_offline(false);
    assert!(matches!(
        alice.create_tx(&pay(&bob, COIN / 2)).await,
        Err(WalletError::InsufficientFunds { .. })
    ));

    // Retrying the same set works once the daemon is back.
    alice.relay_tx(&set).await.unwrap();
    assert_eq!(daemon.mempool_len(), 1);

    // Relayed but not yet mined, so still reserved.
    let again = alice.create_tx(&pay(&bob, COIN / 2)).await;
    assert!(matches!(again, Err(WalletError::InsufficientFunds { .. })));
}

#[tokio::test]
async fn test_release_tx() {
    let (_daemon, alice) = funded(34, &[COIN]).await;
    let bob = address_of(35);
    let set = alice.create_tx(&pay(&bob, COIN / 2)).await.unwrap();
    assert_eq!(alice.snapshot().unwrap().reserved.len(), 1);
    alice.release_tx(&set).unwrap();
    assert!(alice.snapshot().unwrap().reserved.is_empty());
    alice.create_tx(&pay(&bob, COIN / 2)).await.unwrap();
}

#[tokio::test]
async fn test_failed_build_releases_inputs() {
    let (daemon, alice) = funded(36, &[COIN]).await;
    let bob = address_of(37);
    daemon.set_offline(true);
    assert!(matches!(alice.create_tx(&pay(&bob, COIN / 2)).await, Err(WalletError::Connection(_))));
    assert!(alice.snapshot().unwrap().reserved.is_empty());
    daemon.set_offline(false);
    alice.create_tx(&pay(&bob, COIN / 2)).await.unwrap();
}

#[tokio::test]
async fn test_builds_never_share_inputs() {
    let (_daemon, alice) = funded(38, &[COIN / 10, COIN / 10, COIN / 10, COIN / 10]).await;
    let bob = address_of(39);

    let first = pay(&bob, COIN / 20);
    let (a, b) = tokio::join!(alice.create_tx(&first), alice.create_tx(&first));
    let (a, b) = (a.unwrap(), b.unwrap());
    let c = alice.create_tx(&pay(&bob, COIN / 20)).await.unwrap();
    let d = alice.create_tx(&pay(&bob, COIN / 20)).await.unwrap();

    let mut seen: HashSet<OutputId> = HashSet::new();
    for set in [&a, &b, &c, &d] {
        assert_fee_identity(&set.txs[0]);
        for id in set.spent_outputs() {
            assert!(seen.insert(id), "output {} selected twice", id);
        }
    }
    assert_eq!(seen.len(), 4);
    assert!(matches!(
        alice.create_tx(&pay(&bob, COIN / 20)).await,
        Err(WalletError::InsufficientFunds { have: 0, .. })
    ));
}

#[tokio::test]
async fn test_multiple_inputs() {
    let (daemon, alice) = funded(40, &[COIN / 10, COIN / 10, COIN / 10]).await;
    let set = alice.create_tx(&pay(&address_of(41), COIN / 4)).await.unwrap();
    let tx = &set.txs[0];
    assert_eq!(tx.spent_outputs.len(), 3);
    assert_fee_identity(tx);
    alice.relay_tx(&set).await.unwrap();
    daemon.mine(1);
    alice.sync().await.unwrap();
    assert_eq!(alice.get_balance(0).unwrap(), tx.change_amount);
}

#[tokio::test]
async fn test_priority_scales_fee() {
    let (_daemon, alice) = funded(42, &[COIN]).await;
    let bob = address_of(43);
    let low = alice
        .create_tx(&TxConfig { priority: FeePriority::Low, ..pay(&bob, COIN / 2) })
        .await
        .unwrap();
    alice.release_tx(&low).unwrap();
    let high = alice
        .create_tx(&TxConfig { priority: FeePriority::High, ..pay(&bob, COIN / 2) })
        .await
        .unwrap();
    assert!(high.fee() > low.fee());
    assert_fee_identity(&low.txs[0]);
    assert_fee_identity(&high.txs[0]);
}

#[tokio::test]
async fn test_accounts_and_subaddresses() {
    init_logger();
    let daemon = MockDaemon::with_blocks(20);
    let alice_keys = KeyManager::from_seed_str(&seed(44), NETWORK).unwrap();
    let bob_keys = KeyManager::from_seed_str(&seed(45), NETWORK).unwrap();
    daemon.fund(&[(alice_keys.address(1, 0).unwrap(), COIN)]);
    daemon.mine(20);

    let alice = wallet(44, &daemon);
    alice.sync().await.unwrap();
    assert_eq!(alice.get_balance(0).unwrap(), 0);
    assert_eq!(alice.get_balance(1).unwrap(), COIN);
    assert!(matches!(
        alice.create_tx(&pay(&address_of(45), COIN / 2)).await,
        Err(WalletError::InsufficientFunds { .. })
    ));

    let bob_sub = bob_keys.address(0, 5).unwrap();
    let config = TxConfig { account: 1, relay: true, ..pay(&bob_sub, COIN / 2) };
    let set = alice.create_tx(&config).await.unwrap();
    daemon.mine(1);

    alice.sync().await.unwrap();
    assert_eq!(alice.get_balance(1).unwrap(), COIN / 2 - set.fee());
    assert!(alice.outputs().unwrap().iter().all(|o| o.subaddress.major == 1));

    let bob = wallet(45, &daemon);
    bob.sync().await.unwrap();
    assert_eq!(bob.get_balance(0).unwrap(), COIN / 2);
    let received = bob.outputs().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!((received[0].subaddress.major, received[0].subaddress.minor), (0, 5));
    assert_eq!(bob.balances().subaddress_balances(0).unwrap().get(&5), Some(&(COIN / 2)));
}

#[tokio::test]
async fn test_spend_coinbase_output() {
    init_logger();
    let daemon = MockDaemon::with_blocks(10);
    daemon.fund_coinbase(address_of(46), COIN);
    daemon.mine(70);
    let wallet = wallet(46, &daemon);
    wallet.sync().await.unwrap();
    assert_eq!(wallet.get_unlocked_balance(0).unwrap(), COIN);

    let set = wallet.create_tx(&pay(&address_of(47), COIN / 3)).await.unwrap();
    wallet.relay_tx(&set).await.unwrap();
    daemon.mine(1);
    wallet.sync().await.unwrap();
    assert_eq!(wallet.get_balance(0).unwrap(), set.txs[0].change_amount);
}
