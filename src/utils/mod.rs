// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod cid;

use blake2b_simd::Params;

/// Returns true if the given environment variable is set to a truthy value
/// (`1`, `true` or `yes`, case-insensitive).
pub fn is_env_truthy(env: &str) -> bool {
    match std::env::var(env) {
        Ok(var) => matches!(var.to_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    }
}

/// Generates a BLAKE2b hash of fixed 32 bytes size.
pub fn blake2b_256(ingest: &[u8]) -> [u8; 32] {
    let digest = Params::new()
        .hash_length(32)
        .to_state()
        .update(ingest)
        .finalize();

    let mut ret = [0u8; 32];
    ret.clone_from_slice(digest.as_bytes());
    ret
}
