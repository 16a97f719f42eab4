// Modern, minimalistic & standard-compliant cold wallet library.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2020-2024 by
//     Dr Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// Copyright (C) 2020-2024 LNP/BP Standards Association. All rights reserved.
// Copyright (C) 2020-2024 Dr Maxim Orlovsky. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Memoization of BIP32 derivations.
//!
//! Matching many annotated keys against a single account key re-derives the
//! same intermediary keys again and again (all the keys of an account share
//! the account-level prefix, and keys on a keychain share the keychain
//! prefix). [`DerivationCache`] stores every intermediary key under its path
//! from the basis key, so the cost becomes proportional to the number of
//! distinct path prefixes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::{ChainCode, DerivationError, DerivationIndex, DerivationPath, Xpriv, Xpub, XpubId};

/// Default number of derived keys kept by a [`DerivationCache`].
pub const DERIVATION_CACHE_CAPACITY: usize = 256;

/// Extended key which can be used as a basis for derivations stored in a
/// [`DerivationCache`].
pub trait DeriveChild: Copy {
    /// Identifier and chain code of the key, distinguishing it from other
    /// basis keys stored in the same cache. Two keys sharing a public key but
    /// not a chain code derive different children.
    fn key_id(&self) -> (XpubId, ChainCode);

    /// Single-step child key derivation.
    fn derive_child(&self, idx: DerivationIndex) -> Result<Self, DerivationError>;
}

impl DeriveChild for Xpub {
    fn key_id(&self) -> (XpubId, ChainCode) { (self.identifier(), self.chain_code()) }

    fn derive_child(&self, idx: DerivationIndex) -> Result<Self, DerivationError> {
        self.ckd_pub(idx)
    }
}

impl DeriveChild for Xpriv {
    fn key_id(&self) -> (XpubId, ChainCode) { (self.identifier(), self.chain_code()) }

    fn derive_child(&self, idx: DerivationIndex) -> Result<Self, DerivationError> {
        self.ckd_priv(idx)
    }
}

/// Bounded cache of derived keys, safe to share between threads.
///
/// The cache is meant to be constructed for a session (scanning outputs of a
/// PSBT, signing it) and passed by reference to the operations which need key
/// matching. Once the capacity is reached, new derivations are still performed
/// but are not stored anymore.
#[derive(Debug)]
pub struct DerivationCache<K: DeriveChild> {
    capacity: usize,
    entries: Mutex<HashMap<(XpubId, ChainCode, DerivationPath), K>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<K: DeriveChild> Default for DerivationCache<K> {
    fn default() -> Self { Self::new() }
}

impl<K: DeriveChild> DerivationCache<K> {
    pub fn new() -> Self { Self::with_capacity(DERIVATION_CACHE_CAPACITY) }

    pub fn with_capacity(capacity: usize) -> Self {
        DerivationCache {
            capacity,
            entries: Mutex::new(HashMap::with_capacity(capacity.min(DERIVATION_CACHE_CAPACITY))),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize { self.capacity }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Number of derivation steps served from the cache.
    pub fn hits(&self) -> usize { self.hits.load(Ordering::Relaxed) }

    /// Number of derivation steps which had to be computed.
    pub fn misses(&self) -> usize { self.misses.load(Ordering::Relaxed) }

    /// Derives a key from `basis` following the `path`, re-using the keys
    /// derived before for any prefix of the path.
    ///
    /// The lock is never held while a derivation is computed, so concurrent
    /// callers may redundantly compute the same key; the first inserted value
    /// is kept.
    pub fn derive(
        &self,
        basis: &K,
        path: impl IntoIterator<Item = DerivationIndex>,
    ) -> Result<K, DerivationError> {
        let (key_id, chain_code) = basis.key_id();
        let mut prefix = DerivationPath::new();
        let mut key = *basis;
        for idx in path {
            prefix.push(idx);
            let lookup = (key_id, chain_code, prefix.clone());

            let cached = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&lookup)
                .copied();
            if let Some(child) = cached {
                self.hits.fetch_add(1, Ordering::Relaxed);
                key = child;
                continue;
            }

            self.misses.fetch_add(1, Ordering::Relaxed);
            let child = key.derive_child(idx)?;
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            key = if entries.len() < self.capacity || entries.contains_key(&lookup) {
                *entries.entry(lookup).or_insert(child)
            } else {
                log::trace!(target: "derive", "derivation cache is full, {prefix} is not stored");
                child
            };
        }
        Ok(key)
    }

    /// Drops all the stored keys.
    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn account() -> Xpub {
        Xpriv::new_master(true, &[0x42; 32])
            .ckd_priv(DerivationIndex::hardened(84))
            .unwrap()
            .to_xpub()
    }

    #[test]
    fn shared_prefixes() {
        let xpub = account();
        let cache = DerivationCache::<Xpub>::new();
        for no in 0..10u16 {
            let path = [DerivationIndex::normal(0), DerivationIndex::normal(no)];
            let derived = cache.derive(&xpub, path).unwrap();
            assert_eq!(derived, xpub.derive_pub(path).unwrap());
        }
        // the keychain key is derived only once
        assert_eq!(cache.misses(), 11);
        assert_eq!(cache.hits(), 9);
        assert_eq!(cache.len(), 11);
    }

    #[test]
    fn bounded() {
        let xpub = account();
        let cache = DerivationCache::<Xpub>::with_capacity(2);
        for no in 0..5u16 {
            let path = [DerivationIndex::normal(no)];
            assert_eq!(cache.derive(&xpub, path).unwrap(), xpub.ckd_pub(path[0]).unwrap());
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.misses(), 5);
        cache.derive(&xpub, [DerivationIndex::normal(1)]).unwrap();
        assert_eq!(cache.hits(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn distinct_chain_codes() {
        let xpub = account();
        let mut data = xpub.encode();
        data[13..45].copy_from_slice(&[0x5A; 32]);
        let sibling = Xpub::decode(data).unwrap();
        assert_eq!(sibling.identifier(), xpub.identifier());

        let cache = DerivationCache::<Xpub>::new();
        let path = [DerivationIndex::normal(0)];
        let derived = cache.derive(&xpub, path).unwrap();
        let other = cache.derive(&sibling, path).unwrap();
        assert_ne!(derived, other);
        assert_eq!(other, sibling.ckd_pub(path[0]).unwrap());
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn hardened_public() {
        let cache = DerivationCache::<Xpub>::new();
        assert_eq!(
            cache.derive(&account(), [DerivationIndex::hardened(0)]),
            Err(DerivationError::HardenedPublic(DerivationIndex::hardened(0)))
        );
        assert!(cache.is_empty());
    }
}
