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

use std::thread;

use derive::{DerivationCache, DerivationIndex, Xpriv, Xpub};

fn account() -> Xpub {
    Xpriv::new_master(false, &[0x5A; 32])
        .derive_priv([DerivationIndex::hardened(84), DerivationIndex::hardened(0)])
        .unwrap()
        .to_xpub()
}

#[test]
fn concurrent_scans() {
    let xpub = account();
    let cache = DerivationCache::<Xpub>::new();

    let results = thread::scope(|scope| {
        let workers = (0..4u16)
            .map(|worker| {
                let cache = &cache;
                scope.spawn(move || {
                    (0..20u16)
                        .map(|no| {
                            let keychain = DerivationIndex::normal(worker % 2);
                            let path = [keychain, DerivationIndex::normal(no)];
                            (path, cache.derive(&xpub, path).unwrap())
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        workers.into_iter().flat_map(|worker| worker.join().unwrap()).collect::<Vec<_>>()
    });

    for (path, derived) in results {
        assert_eq!(derived, xpub.derive_pub(path).unwrap());
    }
    // two keychains with 20 keys each
    assert_eq!(cache.len(), 42);
    assert_eq!(cache.hits() + cache.misses(), 4 * 20 * 2);
    assert!(cache.misses() >= 42);
}

#[test]
fn private_derivation() {
    let master = Xpriv::new_master(true, &[0x01; 32]);
    let cache = DerivationCache::<Xpriv>::with_capacity(8);
    let path = [
        DerivationIndex::hardened(48),
        DerivationIndex::hardened(1),
        DerivationIndex::normal(2),
    ];
    let derived = cache.derive(&master, path).unwrap();
    assert_eq!(derived, master.derive_priv(path).unwrap());
    assert_eq!(cache.derive(&master, path).unwrap().to_xpub(), derived.to_xpub());
    assert_eq!(cache.hits(), 3);
}
