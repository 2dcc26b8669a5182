// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;
use itertools::Itertools;
use libp2p::PeerId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::bucket::SyncBucketSet;
use super::sync_state::{SyncStage, SyncState, WorkerState};
use crate::blocks::Tipset;
use crate::utils::is_env_truthy;

/// Number of distinct peer heads required before the initial sync target is
/// selected.
const DEFAULT_BOOTSTRAP_PEER_THRESHOLD: usize = 2;

/// Environment variable controlling whether sibling forks sharing a parent
/// set are grouped into the same sync bucket.
pub const COALESCE_TIPSET_FORKS_ENV: &str = "TIPSET_SYNC_COALESCE_FORKS";

/// The function invoked by a sync worker to bring the local chain up to the
/// target tipset. Progress is published through the provided [`WorkerState`]
/// so that it is visible via [`SyncManager::state`].
pub type SyncFunc =
    Arc<dyn Fn(WorkerState, Arc<Tipset>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Structure that defines syncing configuration options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Number of distinct peer heads required before the initial sync target
    /// is selected and the first worker is spawned.
    pub bootstrap_peer_threshold: usize,
    /// Treat sibling tipsets sharing a parent set as chain-related when
    /// grouping pending sync targets.
    pub coalesce_tipset_forks: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bootstrap_peer_threshold: DEFAULT_BOOTSTRAP_PEER_THRESHOLD,
            coalesce_tipset_forks: is_env_truthy(COALESCE_TIPSET_FORKS_ENV),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncManagerError {
    #[error("sync manager has been stopped")]
    Stopped,
}

/// A peer head report on its way to the scheduler.
struct PeerHead {
    peer: PeerId,
    tipset: Arc<Tipset>,
}

/// Completion report posted by a sync worker back to the scheduler.
struct WorkerStatus {
    id: u64,
    result: anyhow::Result<()>,
}

/// A currently running sync job.
struct ActiveSync {
    target: Arc<Tipset>,
    state: WorkerState,
}

type ActiveSyncs = Arc<RwLock<BTreeMap<u64, ActiveSync>>>;

/// The `SyncManager` translates peer head reports into a bounded set of sync
/// jobs. A single scheduler task owns all sync scheduling state; peer heads
/// and worker completions reach it over rendezvous channels, so every
/// scheduling decision is made on one task without locking.
///
/// At most one worker runs per distinct chain at a time: reports extending
/// in-flight work are parked in a bucket set and picked up when the worker
/// for their chain completes, while unrelated forks spawn a worker only if
/// they are taller than everything already known.
pub struct SyncManager {
    config: SyncConfig,
    sync_func: SyncFunc,

    /// Currently running sync jobs, shared with `state` readers.
    active_syncs: ActiveSyncs,

    work_tx: flume::Sender<PeerHead>,
    work_rx: flume::Receiver<PeerHead>,
    status_tx: flume::Sender<WorkerStatus>,
    status_rx: flume::Receiver<WorkerStatus>,

    cancel: CancellationToken,
}

impl SyncManager {
    pub fn new(config: SyncConfig, sync_func: SyncFunc) -> Self {
        // Rendezvous channels: a peer head report is handed directly to the
        // scheduler, and a worker blocks until its completion is taken.
        let (work_tx, work_rx) = flume::bounded(0);
        let (status_tx, status_rx) = flume::bounded(0);

        Self {
            config,
            sync_func,
            active_syncs: Default::default(),
            work_tx,
            work_rx,
            status_tx,
            status_rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Launches the scheduler task. Expected to be called once.
    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = SyncScheduler {
            config: self.config.clone(),
            sync_func: self.sync_func.clone(),
            active_syncs: self.active_syncs.clone(),
            peer_heads: Some(HashMap::new()),
            pending: SyncBucketSet::new(self.config.coalesce_tipset_forks),
            next_worker_id: 1,
            work_rx: self.work_rx.clone(),
            status_rx: self.status_rx.clone(),
            status_tx: self.status_tx.clone(),
            cancel: self.cancel.clone(),
        };
        tokio::spawn(scheduler.run())
    }

    /// Stops the manager: the scheduler exits and in-flight workers are
    /// cancelled. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Informs the scheduler that a peer reports the given tipset as its
    /// chain head. Blocks until the report is handed to the scheduler, and
    /// fails only if the manager has been stopped.
    pub async fn set_peer_head(
        &self,
        peer: PeerId,
        tipset: Arc<Tipset>,
    ) -> Result<(), SyncManagerError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SyncManagerError::Stopped),
            sent = self.work_tx.send_async(PeerHead { peer, tipset }) => {
                sent.map_err(|_| SyncManagerError::Stopped)
            }
        }
    }

    /// Returns a snapshot of every active worker's sync state, ordered by
    /// ascending worker id. Never blocks on the scheduler.
    pub fn state(&self) -> Vec<SyncState> {
        let handles: Vec<WorkerState> = self
            .active_syncs
            .read()
            .values()
            .map(|sync| sync.state.clone())
            .collect();
        handles.iter().map(|state| state.read().snapshot()).collect()
    }
}

/// The scheduler event loop. Exactly one event is processed at a time:
/// either an incoming peer head or a worker completion.
struct SyncScheduler {
    config: SyncConfig,
    sync_func: SyncFunc,

    active_syncs: ActiveSyncs,
    /// Peer head cache used to pick the initial sync target. `Some` only
    /// until the first worker is spawned; dropped at bootstrap.
    peer_heads: Option<HashMap<PeerId, Arc<Tipset>>>,
    /// Tipsets queued behind active or deferred work.
    pending: SyncBucketSet,
    next_worker_id: u64,

    work_rx: flume::Receiver<PeerHead>,
    status_rx: flume::Receiver<WorkerStatus>,
    status_tx: flume::Sender<WorkerStatus>,
    cancel: CancellationToken,
}

impl SyncScheduler {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("sync scheduler shutting down");
                    return;
                }
                head = self.work_rx.recv_async() => match head {
                    Ok(PeerHead { peer, tipset }) => self.handle_peer_head(peer, tipset),
                    Err(_) => return,
                },
                status = self.status_rx.recv_async() => match status {
                    Ok(status) => self.handle_worker_status(status),
                    Err(_) => return,
                },
            }
        }
    }

    fn handle_peer_head(&mut self, peer: PeerId, tipset: Arc<Tipset>) {
        trace!("new peer head: {} {} ({})", peer, tipset.key(), tipset.epoch());

        if let Some(heads) = self.peer_heads.as_mut() {
            heads.insert(peer, tipset);
            if heads.len() < self.config.bootstrap_peer_threshold {
                debug!(
                    "waiting for more peer heads to bootstrap sync ({} of {})",
                    heads.len(),
                    self.config.bootstrap_peer_threshold
                );
                return;
            }

            let heads = heads.values().cloned().collect();
            match Self::select_initial_sync_target(heads, self.config.coalesce_tipset_forks) {
                Some(target) => {
                    // The peer head cache has served its purpose; from here
                    // on all reports go through the steady-state policy.
                    self.peer_heads = None;
                    self.spawn_worker(target);
                }
                None => error!("failed to select initial sync target"),
            }
            return;
        }

        if let Some(target) = self.add_sync_target(tipset) {
            self.spawn_worker(target);
        }
    }

    /// Picks the heaviest reported head as the initial sync target. Heads
    /// are bucketed in ascending height order so that chains reported at
    /// several heights group from their earliest parents up.
    fn select_initial_sync_target(
        heads: Vec<Arc<Tipset>>,
        coalesce_forks: bool,
    ) -> Option<Arc<Tipset>> {
        let mut buckets = SyncBucketSet::new(coalesce_forks);
        for ts in heads.into_iter().sorted_by_key(|ts| ts.epoch()) {
            buckets.insert(ts);
        }

        if buckets.buckets().len() > 1 {
            warn!(
                "peers report {} unrelated chains, syncing the heaviest",
                buckets.buckets().len()
            );
        }

        buckets.pop().and_then(|b| b.heaviest_tipset())
    }

    /// Applies the steady-state selection policy to an incoming tipset and
    /// returns the tipset to sync if a new worker should be spawned.
    fn add_sync_target(&mut self, tipset: Arc<Tipset>) -> Option<Arc<Tipset>> {
        let active = self.active_syncs.read();

        // A quiescent node takes up any new head directly.
        if active.is_empty() {
            drop(active);
            return Some(tipset);
        }

        let mut extends_active = false;
        for sync in active.values() {
            if *tipset == *sync.target {
                trace!("already syncing tipset {}", tipset.key());
                return None;
            }
            if tipset.parents() == sync.target.key() {
                extends_active = true;
            }
        }

        if extends_active || self.pending.related_to_any(&tipset) {
            drop(active);
            self.pending.insert(tipset);
            return None;
        }

        // The tipset opens a new fork. Its weight claim is unvalidated at
        // this point, so admission goes by height, the cheap upper bound:
        // only forks taller than everything already known get a worker.
        if let Some(max_epoch) = active.values().map(|sync| sync.target.epoch()).max() {
            if max_epoch > tipset.epoch() {
                debug!(
                    "dropping fork {} at height {}, active sync is ahead at {}",
                    tipset.key(),
                    tipset.epoch(),
                    max_epoch
                );
                return None;
            }
        }
        drop(active);

        if let Some(heaviest) = self.pending.heaviest() {
            if heaviest.epoch() > tipset.epoch() {
                debug!(
                    "dropping fork {} at height {}, pending sync is ahead at {}",
                    tipset.key(),
                    tipset.epoch(),
                    heaviest.epoch()
                );
                return None;
            }
        }

        Some(tipset)
    }

    fn handle_worker_status(&mut self, status: WorkerStatus) {
        let done = self.active_syncs.write().remove(&status.id);
        let Some(done) = done else {
            warn!("worker {} reported status but is not active", status.id);
            return;
        };

        match status.result {
            Ok(()) => debug!("worker {} done syncing {}", status.id, done.target.key()),
            Err(e) => error!("worker {} failed syncing {}: {}", status.id, done.target.key(), e),
        }

        // A failed target may still have heavier pending extensions worth
        // attempting, so continuation selection runs either way.
        if let Some(next) = self.select_sync_target(&done.target) {
            self.spawn_worker(next);
        }
    }

    /// Selects follow-on work for the chain the finished worker was on.
    fn select_sync_target(&mut self, done: &Tipset) -> Option<Arc<Tipset>> {
        let related = self.pending.pop_related(done)?;
        let heaviest = related.heaviest_tipset()?;

        let active = self.active_syncs.read();
        if let Some(max_epoch) = active.values().map(|sync| sync.target.epoch()).max() {
            if max_epoch > heaviest.epoch() {
                debug!(
                    "dropping continuation {} at height {}, active sync is ahead at {}",
                    heaviest.key(),
                    heaviest.epoch(),
                    max_epoch
                );
                return None;
            }
        }

        Some(heaviest)
    }

    fn spawn_worker(&mut self, target: Arc<Tipset>) {
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        let state: WorkerState = Default::default();
        state.write().init(None, target.clone());
        self.active_syncs.write().insert(
            id,
            ActiveSync {
                target: target.clone(),
                state: state.clone(),
            },
        );
        debug!("worker {} syncing to {} ({})", id, target.key(), target.epoch());

        let sync_func = self.sync_func.clone();
        let status_tx = self.status_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let sync = (sync_func)(state.clone(), target);
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = sync => result,
            };

            match &result {
                Ok(()) => {
                    let mut state = state.write();
                    if state.stage() != SyncStage::Error {
                        state.set_stage(SyncStage::Complete);
                    }
                }
                Err(e) => state.write().error(e.to_string()),
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                sent = status_tx.send_async(WorkerStatus { id, result }) => {
                    let _ = sent;
                }
            }
        });
    }
}
