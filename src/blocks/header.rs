// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use derive_builder::Builder;
use num_bigint::BigInt;
use once_cell::sync::OnceCell;
use serde::Serialize;

use super::{ChainEpoch, TipsetKey};
use crate::utils::cid::CidCborExt;

/// Header of a block.
///
/// Carries only the fields the sync scheduler observes: chain linking via
/// `parents`, the aggregate `weight` of the parent set, the `epoch` the block
/// was mined in and the id of the miner actor that produced it.
#[derive(Clone, Debug, Builder, Serialize)]
#[builder(name = "BlockHeaderBuilder")]
pub struct BlockHeader {
    /// The set of parents this block was based on. Typically one, but can be
    /// several in the case where there were multiple winning ticket holders
    /// for an epoch.
    #[builder(default)]
    parents: TipsetKey,

    /// The aggregate chain weight of the parent set.
    #[builder(default)]
    weight: BigInt,

    /// The period in which the block was generated.
    #[builder(default)]
    epoch: ChainEpoch,

    /// The id of the miner actor that mined this block.
    miner_id: u64,

    /// Stores the CID for the block after the first call to `cid()`.
    #[builder(setter(skip), default)]
    #[serde(skip)]
    cid: OnceCell<Cid>,
}

impl BlockHeader {
    /// Generates a [`BlockHeaderBuilder`] as a constructor.
    pub fn builder() -> BlockHeaderBuilder {
        BlockHeaderBuilder::default()
    }

    pub fn parents(&self) -> &TipsetKey {
        &self.parents
    }

    pub fn weight(&self) -> &BigInt {
        &self.weight
    }

    pub fn epoch(&self) -> ChainEpoch {
        self.epoch
    }

    pub fn miner_id(&self) -> u64 {
        self.miner_id
    }

    /// Returns the content id of the header, computing and caching it on the
    /// first call.
    pub fn cid(&self) -> &Cid {
        self.cid.get_or_init(|| {
            Cid::from_cbor_blake2b256(self)
                .expect("internal error - block header serialization may not fail")
        })
    }
}

impl PartialEq for BlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.cid() == other.cid()
    }
}

impl Eq for BlockHeader {}
