// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::blocks::{ChainEpoch, Tipset};

/// Shared handle to the [`SyncState`] of one sync worker. The scheduler
/// creates one per worker; the sync function publishes progress through it
/// and `SyncManager::state` readers snapshot it.
pub type WorkerState = Arc<RwLock<SyncState>>;

/// Current state of a worker syncing a chain to its target tipset.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum SyncStage {
    /// Idle state.
    Idle,
    /// Syncing headers from the heaviest tipset to genesis.
    Headers,
    /// Persisting headers on chain from heaviest to genesis.
    PersistHeaders,
    /// Syncing messages and performing state transitions.
    Messages,
    /// Sync completed and is following chain.
    Complete,
    /// Error has occurred while syncing.
    Error,
}

impl Default for SyncStage {
    fn default() -> Self {
        Self::Headers
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncStage::Idle => write!(f, "idle worker"),
            SyncStage::Headers => write!(f, "header sync"),
            SyncStage::PersistHeaders => write!(f, "persisting headers"),
            SyncStage::Messages => write!(f, "message sync"),
            SyncStage::Complete => write!(f, "complete"),
            SyncStage::Error => write!(f, "error"),
        }
    }
}

/// State of an individual sync worker's syncing process.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncState {
    base: Option<Arc<Tipset>>,
    target: Option<Arc<Tipset>>,

    stage: SyncStage,
    epoch: ChainEpoch,

    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    message: String,
}

impl SyncState {
    /// Initializes the syncing state with a target tipset, an optional base
    /// and sets the start time.
    pub fn init(&mut self, base: Option<Arc<Tipset>>, target: Arc<Tipset>) {
        *self = Self {
            target: Some(target),
            base,
            start: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Get the current [`SyncStage`] of the worker.
    pub fn stage(&self) -> SyncStage {
        self.stage
    }

    /// Returns the current target [`Tipset`].
    pub fn target(&self) -> &Option<Arc<Tipset>> {
        &self.target
    }

    /// Returns a reference to the base [`Tipset`].
    pub fn base(&self) -> &Option<Arc<Tipset>> {
        &self.base
    }

    /// Returns the current [`ChainEpoch`] the worker has reached.
    pub fn epoch(&self) -> ChainEpoch {
        self.epoch
    }

    /// Returns the message describing an error, if one occurred.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the elapsed time of the current syncing process, or `None` if
    /// syncing has not started.
    pub fn get_elapsed_time(&self) -> Option<Duration> {
        self.start.map(|start| {
            let end = self.end.unwrap_or_else(Utc::now);
            end - start
        })
    }

    /// Sets the sync stage for the syncing state. If setting to complete,
    /// sets the end timer to now.
    pub fn set_stage(&mut self, stage: SyncStage) {
        if let SyncStage::Complete = stage {
            self.end = Some(Utc::now());
        }
        self.stage = stage;
    }

    /// Sets the epoch the sync has progressed to.
    pub fn set_epoch(&mut self, epoch: ChainEpoch) {
        self.epoch = epoch;
    }

    /// Sets an error for the sync.
    pub fn error(&mut self, err: String) {
        self.message = err;
        self.stage = SyncStage::Error;
        self.end = Some(Utc::now());
    }

    /// Returns a copy of the state, the read-only view handed out by
    /// `SyncManager::state`.
    pub fn snapshot(&self) -> SyncState {
        self.clone()
    }
}
