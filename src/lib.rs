// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Chain synchronization scheduling for a tipset-based blockchain node.
//!
//! Peers continuously report the tipsets they believe to be the chain head.
//! The [`chain_sync::SyncManager`] folds these reports into sync jobs, each
//! driving an injected sync function towards one candidate head, while
//! grouping related reports so that no two jobs ever chase the same chain.

pub mod blocks;
pub mod chain_sync;
pub mod utils;
