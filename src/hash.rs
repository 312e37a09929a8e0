//! Zero-sized hash builder for the engine's internal collections.
//!
//! Dependency entries, pending sets and derived registries all key on small
//! integer ids, so the default SipHash is pure overhead and HashDoS
//! resistance is irrelevant. `FastHashBuilder` is a zero-sized
//! `BuildHasher` over foldhash with a fixed seed: deterministic, free to
//! store per collection.

use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};

/// Zero-sized, deterministic `BuildHasher` backed by foldhash.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x9e3779b97f4a7c15).build_hasher()
    }
}
