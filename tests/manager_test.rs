// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use libp2p::PeerId;
use num_bigint::BigInt;
use parking_lot::Mutex;
use tipset_sync::blocks::{BlockHeader, ChainEpoch, Tipset, TipsetKey};
use tipset_sync::chain_sync::{SyncConfig, SyncFunc, SyncManager, SyncManagerError};
use tokio::time::{sleep, timeout};

type Recorded = Arc<Mutex<Vec<TipsetKey>>>;
type Release = flume::Sender<anyhow::Result<()>>;

fn mock_tipset(miner_id: u64, weight: u64, epoch: ChainEpoch) -> Arc<Tipset> {
    let header = BlockHeader::builder()
        .miner_id(miner_id)
        .weight(BigInt::from(weight))
        .epoch(epoch)
        .build()
        .unwrap();
    Arc::new(Tipset::new(vec![header]).unwrap())
}

fn mock_child(parent: &Tipset, miner_id: u64, weight: u64) -> Arc<Tipset> {
    let header = BlockHeader::builder()
        .miner_id(miner_id)
        .weight(BigInt::from(weight))
        .epoch(parent.epoch() + 1)
        .parents(parent.key().clone())
        .build()
        .unwrap();
    Arc::new(Tipset::new(vec![header]).unwrap())
}

/// A sync function stub that records the targets it was invoked with and
/// holds each worker until the test releases it with a result.
fn gated_sync_func() -> (SyncFunc, Recorded, Release) {
    let recorded: Recorded = Default::default();
    let (release_tx, release_rx) = flume::unbounded::<anyhow::Result<()>>();

    let targets = recorded.clone();
    let func: SyncFunc = Arc::new(move |_state, target| {
        let targets = targets.clone();
        let release = release_rx.clone();
        async move {
            targets.lock().push(target.key().clone());
            match release.recv_async().await {
                Ok(result) => result,
                // test is done with the gate; finish cleanly
                Err(_) => Ok(()),
            }
        }
        .boxed()
    });

    (func, recorded, release_tx)
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Give the scheduler time to process reports that are expected to NOT
/// result in observable changes.
async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

fn active_target_keys(manager: &SyncManager) -> Vec<TipsetKey> {
    manager
        .state()
        .iter()
        .map(|s| s.target().as_ref().unwrap().key().clone())
        .collect()
}

/// Boots a manager to the steady state with a single worker syncing `target`.
async fn bootstrapped_manager(
    func: SyncFunc,
    recorded: &Recorded,
    base: Arc<Tipset>,
    target: Arc<Tipset>,
) -> SyncManager {
    let manager = SyncManager::new(SyncConfig::default(), func);
    manager.start();

    manager
        .set_peer_head(PeerId::random(), base)
        .await
        .unwrap();
    manager
        .set_peer_head(PeerId::random(), target.clone())
        .await
        .unwrap();
    wait_for("bootstrap worker", || recorded.lock().len() == 1).await;
    assert_eq!(active_target_keys(&manager), vec![target.key().clone()]);

    manager
}

#[tokio::test]
async fn single_peer_does_not_bootstrap() {
    let (func, recorded, _release) = gated_sync_func();
    let manager = SyncManager::new(SyncConfig::default(), func);
    manager.start();

    let ta = mock_tipset(1, 100, 10);
    manager.set_peer_head(PeerId::random(), ta).await.unwrap();

    settle().await;
    assert!(manager.state().is_empty());
    assert!(recorded.lock().is_empty());
}

#[tokio::test]
async fn bootstrap_syncs_heaviest_reported_head() {
    let (func, recorded, _release) = gated_sync_func();
    let ta = mock_tipset(1, 100, 10);
    let tb = mock_tipset(2, 120, 12);

    let manager = bootstrapped_manager(func, &recorded, ta, tb.clone()).await;

    assert_eq!(*recorded.lock(), vec![tb.key().clone()]);
    let state = manager.state();
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].target().as_ref().unwrap().key(), tb.key());
}

#[tokio::test]
async fn repeated_head_from_same_peer_does_not_bootstrap() {
    let (func, recorded, _release) = gated_sync_func();
    let manager = SyncManager::new(SyncConfig::default(), func);
    manager.start();

    let peer = PeerId::random();
    manager
        .set_peer_head(peer, mock_tipset(1, 100, 10))
        .await
        .unwrap();
    manager
        .set_peer_head(peer, mock_tipset(1, 110, 11))
        .await
        .unwrap();

    settle().await;
    assert!(recorded.lock().is_empty());
}

#[tokio::test]
async fn bootstrap_threshold_of_one_syncs_first_head() {
    let (func, recorded, _release) = gated_sync_func();
    let config = SyncConfig {
        bootstrap_peer_threshold: 1,
        ..Default::default()
    };
    let manager = SyncManager::new(config, func);
    manager.start();

    let ta = mock_tipset(1, 100, 10);
    manager
        .set_peer_head(PeerId::random(), ta.clone())
        .await
        .unwrap();

    wait_for("bootstrap worker", || recorded.lock().len() == 1).await;
    assert_eq!(active_target_keys(&manager), vec![ta.key().clone()]);
}

#[tokio::test]
async fn chain_extension_waits_for_active_sync() {
    let (func, recorded, release) = gated_sync_func();
    let ta = mock_tipset(1, 100, 10);
    let tb = mock_tipset(2, 120, 12);
    let manager = bootstrapped_manager(func, &recorded, ta, tb.clone()).await;

    // a direct child of the active target is parked, not synced concurrently
    let tc = mock_child(&tb, 3, 140);
    manager
        .set_peer_head(PeerId::random(), tc.clone())
        .await
        .unwrap();
    settle().await;
    assert_eq!(recorded.lock().len(), 1);
    assert_eq!(manager.state().len(), 1);

    // once the active sync completes, the extension gets its worker
    release.send(Ok(())).unwrap();
    wait_for("extension worker", || recorded.lock().len() == 2).await;
    assert_eq!(recorded.lock()[1], tc.key().clone());
    wait_for("extension visible in state", || {
        active_target_keys(&manager) == vec![tc.key().clone()]
    })
    .await;
}

#[tokio::test]
async fn duplicate_report_is_ignored() {
    let (func, recorded, _release) = gated_sync_func();
    let ta = mock_tipset(1, 100, 10);
    let tb = mock_tipset(2, 120, 12);
    let manager = bootstrapped_manager(func, &recorded, ta, tb.clone()).await;

    manager.set_peer_head(PeerId::random(), tb).await.unwrap();

    settle().await;
    assert_eq!(recorded.lock().len(), 1);
    assert_eq!(manager.state().len(), 1);
}

#[tokio::test]
async fn dominated_fork_is_discarded() {
    let (func, recorded, release) = gated_sync_func();
    let ta = mock_tipset(1, 100, 10);
    let tb = mock_tipset(2, 120, 12);
    let manager = bootstrapped_manager(func, &recorded, ta, tb.clone()).await;

    // an unrelated fork below the active height never gets a worker
    let td = mock_tipset(4, 500, 8);
    manager.set_peer_head(PeerId::random(), td).await.unwrap();
    settle().await;
    assert_eq!(manager.state().len(), 1);

    release.send(Ok(())).unwrap();
    wait_for("active sync drained", || manager.state().is_empty()).await;
    assert_eq!(*recorded.lock(), vec![tb.key().clone()]);
}

#[tokio::test]
async fn taller_unrelated_fork_spawns_second_worker() {
    let (func, recorded, _release) = gated_sync_func();
    let ta = mock_tipset(1, 100, 10);
    let tb = mock_tipset(2, 120, 12);
    let manager = bootstrapped_manager(func, &recorded, ta, tb.clone()).await;

    let te = mock_tipset(5, 90, 20);
    manager
        .set_peer_head(PeerId::random(), te.clone())
        .await
        .unwrap();

    wait_for("second worker", || manager.state().len() == 2).await;
    // snapshots come back in worker id order
    assert_eq!(
        active_target_keys(&manager),
        vec![tb.key().clone(), te.key().clone()]
    );
}

#[tokio::test]
async fn failed_sync_still_schedules_pending_extension() {
    let (func, recorded, release) = gated_sync_func();
    let ta = mock_tipset(1, 100, 10);
    let tb = mock_tipset(2, 120, 12);
    let manager = bootstrapped_manager(func, &recorded, ta, tb.clone()).await;

    let tc = mock_child(&tb, 3, 140);
    manager
        .set_peer_head(PeerId::random(), tc.clone())
        .await
        .unwrap();
    settle().await;

    release.send(Err(anyhow::anyhow!("no peers to sync from"))).unwrap();
    wait_for("extension worker after failure", || {
        recorded.lock().len() == 2
    })
    .await;
    assert_eq!(recorded.lock()[1], tc.key().clone());
}

#[tokio::test]
async fn stop_is_idempotent_and_rejects_new_heads() {
    let (func, _recorded, _release) = gated_sync_func();
    let manager = SyncManager::new(SyncConfig::default(), func);
    manager.start();

    manager.stop();
    manager.stop();

    let result = manager
        .set_peer_head(PeerId::random(), mock_tipset(1, 100, 10))
        .await;
    assert_eq!(result, Err(SyncManagerError::Stopped));
}
