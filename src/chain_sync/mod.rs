// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The chain sync manager: turns a noisy stream of peer chain-head reports
//! into a bounded, deduplicated set of sync jobs.

mod bucket;
mod sync_manager;
mod sync_state;

pub use self::sync_manager::{
    SyncConfig, SyncFunc, SyncManager, SyncManagerError, COALESCE_TIPSET_FORKS_ENV,
};
pub use self::sync_state::{SyncStage, SyncState, WorkerState};
