// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use num_bigint::BigInt;

use crate::blocks::Tipset;

/// Returns true if the two tipsets are on the same chain: either equal, or
/// linked by an immediate parent/child relation. When `coalesce_forks` is
/// set, sibling tipsets sharing a parent set are also treated as related.
///
/// The relation is symmetric and reflexive but not transitive; see
/// [`SyncBucketSet::pop_related`] for how that is compensated for.
fn same_chain(a: &Tipset, b: &Tipset, coalesce_forks: bool) -> bool {
    a.key() == b.key()
        || a.key() == b.parents()
        || a.parents() == b.key()
        || (coalesce_forks && a.parents() == b.parents())
}

/// `SyncBucket` defines a bucket of tipsets to sync. All tipsets in a bucket
/// are connected on the same chain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncBucket {
    tips: Vec<Arc<Tipset>>,
}

impl SyncBucket {
    fn new(tips: Vec<Arc<Tipset>>) -> SyncBucket {
        Self { tips }
    }

    /// Returns the weight of the heaviest tipset in the bucket.
    fn max_weight(&self) -> Option<&BigInt> {
        self.tips.iter().map(|ts| ts.weight()).max()
    }

    /// Returns the tipset with the max weight. Ties are broken in favour of
    /// the tipset that was seen first.
    pub fn heaviest_tipset(&self) -> Option<Arc<Tipset>> {
        let mut heaviest: Option<&Arc<Tipset>> = None;
        for ts in &self.tips {
            if heaviest.map_or(true, |h| ts.weight() > h.weight()) {
                heaviest = Some(ts);
            }
        }
        heaviest.cloned()
    }

    /// Returns true if the tipset is related to any tipset in the bucket.
    pub fn is_same_chain_as(&self, ts: &Tipset, coalesce_forks: bool) -> bool {
        self.tips.iter().any(|t| same_chain(ts, t, coalesce_forks))
    }

    /// Adds a tipset to the bucket. Adding a tipset that is already a member
    /// is a no-op.
    pub fn add(&mut self, ts: Arc<Tipset>) {
        if !self.tips.iter().any(|t| *t == ts) {
            self.tips.push(ts);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tips.len()
    }
}

/// Set of tipset buckets. This keeps track of all individual groupings of
/// tipsets queued for syncing, so that extensions of a pending chain coalesce
/// into the same bucket while unrelated forks remain distinguishable.
#[derive(Clone, Debug, Default)]
pub(crate) struct SyncBucketSet {
    buckets: Vec<SyncBucket>,
    coalesce_forks: bool,
}

impl SyncBucketSet {
    pub(crate) fn new(coalesce_forks: bool) -> Self {
        Self {
            buckets: Vec::new(),
            coalesce_forks,
        }
    }

    /// Inserts a tipset into the first bucket it is connected to, or into a
    /// new bucket if it is not related to any.
    pub(crate) fn insert(&mut self, tipset: Arc<Tipset>) {
        let coalesce_forks = self.coalesce_forks;
        if let Some(b) = self
            .buckets
            .iter_mut()
            .find(|b| b.is_same_chain_as(&tipset, coalesce_forks))
        {
            b.add(tipset);
        } else {
            self.buckets.push(SyncBucket::new(vec![tipset]))
        }
    }

    /// Removes and returns the bucket holding the heaviest weighted tipset.
    pub(crate) fn pop(&mut self) -> Option<SyncBucket> {
        let (i, _) = self
            .buckets
            .iter()
            .enumerate()
            .map(|(i, b)| (i, b.max_weight()))
            .max_by(|(_, w1), (_, w2)| w1.cmp(w2))?;
        // we can't use `max_by_key` here because the weight is a reference,
        // see https://github.com/rust-lang/rust/issues/34162

        Some(self.buckets.swap_remove(i))
    }

    /// Removes every bucket related to the given tipset and returns their
    /// contents merged into a single bucket, or `None` if no bucket matched.
    ///
    /// The chain relation is not transitive, so tipsets of the same chain can
    /// end up in separate buckets depending on arrival order. Gathering all
    /// matching buckets here keeps such stragglers from being stranded.
    pub(crate) fn pop_related(&mut self, tipset: &Tipset) -> Option<SyncBucket> {
        let coalesce_forks = self.coalesce_forks;
        let (related, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.buckets)
            .into_iter()
            .partition(|b| b.is_same_chain_as(tipset, coalesce_forks));
        self.buckets = kept;

        if related.is_empty() {
            return None;
        }
        let tips = related.into_iter().flat_map(|b| b.tips).collect();
        Some(SyncBucket::new(tips))
    }

    /// Returns true if the tipset is related to any tipset in the bucket set.
    pub(crate) fn related_to_any(&self, ts: &Tipset) -> bool {
        self.buckets
            .iter()
            .any(|b| b.is_same_chain_as(ts, self.coalesce_forks))
    }

    /// Heaviest tipset among all the buckets.
    pub(crate) fn heaviest(&self) -> Option<Arc<Tipset>> {
        self.buckets
            .iter()
            .filter_map(|b| b.heaviest_tipset())
            .max_by(|a, b| a.weight().cmp(b.weight()))
    }

    /// Returns a reference to the underlying buckets.
    pub(crate) fn buckets(&self) -> &[SyncBucket] {
        &self.buckets
    }
}
