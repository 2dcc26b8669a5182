// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Block header and tipset value types consumed by the chain sync manager.

mod header;
mod tipset;

pub use self::header::{BlockHeader, BlockHeaderBuilder};
pub use self::tipset::{Tipset, TipsetKey};

use thiserror::Error;

/// The height of a tipset within the chain, in epochs since genesis.
pub type ChainEpoch = i64;

/// Errors raised while constructing a [`Tipset`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CreateTipsetError {
    /// The given tipset has no blocks.
    #[error("No blocks for tipset")]
    NoBlocks,
    /// Tipset contains invalid data, as described by the string parameter.
    #[error("Invalid tipset: {0}")]
    InvalidTipset(String),
}
