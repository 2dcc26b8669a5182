// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::multihash::Multihash;
use cid::Cid;
use fvm_ipld_encoding::DAG_CBOR;

use super::blake2b_256;

/// Multihash code for BLAKE2b-256.
const BLAKE2B_256: u64 = 0xb220;

/// Extension methods for constructing `dag-cbor` [Cid]s.
pub trait CidCborExt {
    /// Default CID builder for Filecoin.
    ///
    /// - The default codec is [`DAG_CBOR`]
    /// - The default hash function is 256 bit BLAKE2b
    fn from_cbor_blake2b256<S: serde::ser::Serialize>(obj: &S) -> anyhow::Result<Cid> {
        let bytes = fvm_ipld_encoding::to_vec(obj)?;
        let mh = Multihash::wrap(BLAKE2B_256, &blake2b_256(&bytes))
            .map_err(|e| anyhow::anyhow!("multihash digest: {e}"))?;
        Ok(Cid::new_v1(DAG_CBOR, mh))
    }
}

impl CidCborExt for Cid {}
