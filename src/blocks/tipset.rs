// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::HashSet;
use std::fmt;

use cid::Cid;
use itertools::Itertools;
use num_bigint::BigInt;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{BlockHeader, ChainEpoch, CreateTipsetError};

/// A set of `CIDs` forming a unique key for a tipset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TipsetKey {
    cids: Vec<Cid>,
}

impl TipsetKey {
    pub fn new(cids: Vec<Cid>) -> Self {
        Self { cids }
    }

    /// Returns the tipset header `cids`.
    pub fn cids(&self) -> &[Cid] {
        &self.cids
    }
}

impl fmt::Display for TipsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.cids.iter().join(", "))
    }
}

/// An immutable set of blocks at the same height with the same parent set.
///
/// Headers are kept in a deterministic order so that equal tipsets produce
/// equal keys regardless of the order blocks were received in.
#[derive(Clone, Debug)]
pub struct Tipset {
    headers: Vec<BlockHeader>,
    key: OnceCell<TipsetKey>,
}

impl PartialEq for Tipset {
    fn eq(&self, other: &Self) -> bool {
        self.headers.eq(&other.headers)
    }
}

impl Eq for Tipset {}

#[allow(clippy::len_without_is_empty)]
impl Tipset {
    /// Builds a new tipset from a collection of blocks.
    ///
    /// A valid tipset contains a non-empty collection of blocks with distinct
    /// miners that all specify identical epoch, parents and weight.
    pub fn new(mut headers: Vec<BlockHeader>) -> Result<Self, CreateTipsetError> {
        verify_headers(&headers)?;

        headers.sort_by_cached_key(|header| header.cid().to_bytes());

        Ok(Self {
            headers,
            key: OnceCell::new(),
        })
    }

    /// Returns the epoch of the tipset.
    pub fn epoch(&self) -> ChainEpoch {
        self.first_header().epoch()
    }

    /// Returns all block headers in the tipset.
    pub fn blocks(&self) -> &[BlockHeader] {
        &self.headers
    }

    /// Returns the number of blocks in the tipset.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Returns a key for the tipset.
    pub fn key(&self) -> &TipsetKey {
        self.key.get_or_init(|| {
            TipsetKey::new(self.headers.iter().map(|h| *h.cid()).collect())
        })
    }

    /// Returns the key identifying the parents of the blocks in the tipset.
    pub fn parents(&self) -> &TipsetKey {
        self.first_header().parents()
    }

    /// Returns the tipset's calculated weight.
    pub fn weight(&self) -> &BigInt {
        self.first_header().weight()
    }

    fn first_header(&self) -> &BlockHeader {
        // `Tipset::new` guarantees that `headers` isn't empty
        self.headers.first().expect("tipset is non-empty")
    }
}

fn verify_headers(headers: &[BlockHeader]) -> Result<(), CreateTipsetError> {
    let first_header = headers.first().ok_or(CreateTipsetError::NoBlocks)?;

    let verify = |predicate: bool, message: &'static str| {
        if predicate {
            Ok(())
        } else {
            Err(CreateTipsetError::InvalidTipset(message.to_string()))
        }
    };

    let mut miners: HashSet<u64> = HashSet::new();
    miners.insert(first_header.miner_id());

    for header in headers.iter().skip(1) {
        verify(
            header.parents() == first_header.parents(),
            "parent cids are not equal",
        )?;
        verify(
            header.epoch() == first_header.epoch(),
            "epochs are not equal",
        )?;
        verify(
            header.weight() == first_header.weight(),
            "weights are not equal",
        )?;
        verify(
            miners.insert(header.miner_id()),
            "miner ids are not distinct",
        )?;
    }

    Ok(())
}
