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

//! Reference signer using extended private keys.

use derive::secp256k1::{ecdsa, Message, SECP256K1};
use derive::{DerivationCache, KeyOrigin, LegacyPk, Sign, Sighash, Xpriv, XprivAccount};
use psbt::{Psbt, Rejected, Signer};

/// Signer holding extended private keys of one or several accounts.
///
/// The keys for signing are found by matching BIP32 derivation information of
/// PSBT inputs against the account origins.
#[derive(Clone, Debug)]
pub struct XprivSigner {
    accounts: Vec<XprivAccount>,
    cache_capacity: usize,
}

impl XprivSigner {
    pub fn new(account: XprivAccount) -> Self { Self::with([account]) }

    pub fn with(accounts: impl IntoIterator<Item = XprivAccount>) -> Self {
        XprivSigner {
            accounts: accounts.into_iter().collect(),
            cache_capacity: derive::DERIVATION_CACHE_CAPACITY,
        }
    }

    /// Limits the number of derived keys kept during a signing session.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn accounts(&self) -> &[XprivAccount] { &self.accounts }

    /// Starts a signing session. Keys derived during the session are cached
    /// until the session is dropped.
    pub fn session(&self) -> SigningSession<'_> {
        SigningSession {
            accounts: &self.accounts,
            cache: DerivationCache::with_capacity(self.cache_capacity),
        }
    }
}

impl Signer for XprivSigner {
    type Sign<'s> = SigningSession<'s>;

    fn approve(&self, psbt: &Psbt) -> Result<Self::Sign<'_>, Rejected> {
        log::debug!(
            target: "psbt",
            "signing PSBT {} with keys of {} accounts",
            psbt.unique_id(),
            self.accounts.len()
        );
        Ok(self.session())
    }
}

/// Signing session of [`XprivSigner`].
#[derive(Debug)]
pub struct SigningSession<'a> {
    accounts: &'a [XprivAccount],
    cache: DerivationCache<Xpriv>,
}

impl<'a> SigningSession<'a> {
    pub fn cache(&self) -> &DerivationCache<Xpriv> { &self.cache }

    fn xpriv(&self, origin: &KeyOrigin) -> Option<Xpriv> {
        self.accounts.iter().find_map(|account| {
            let path = account.child_derivation(origin)?;
            self.cache.derive(account.xpriv(), path.iter().copied()).ok()
        })
    }
}

impl<'a> Sign for SigningSession<'a> {
    fn sign_ecdsa(
        &self,
        message: Sighash,
        pk: LegacyPk,
        origin: Option<&KeyOrigin>,
    ) -> Option<ecdsa::Signature> {
        if !pk.compressed {
            return None;
        }
        let sk = self.xpriv(origin?)?.to_private_ecdsa();
        if sk.public_key(SECP256K1) != pk.pubkey {
            return None;
        }
        Some(SECP256K1.sign_ecdsa(&Message::from(message), &sk))
    }
}
