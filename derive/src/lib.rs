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

//! BIP32 hierarchical key derivation: extended keys, key origins, derivation
//! paths and a shared cache of derived keys.

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod index;
mod path;
mod xkey;
mod cache;
mod sign;

pub use bc::*;
pub use cache::{DerivationCache, DeriveChild, DERIVATION_CACHE_CAPACITY};
pub use index::{DerivationIndex, IndexError, IndexParseError, HARDENED_INDEX_BOUNDARY};
pub use path::{DerivationParseError, DerivationPath};
pub use sign::Sign;
pub use xkey::{
    ChainCode, DerivationError, KeyOrigin, OriginParseError, XkeyDecodeError, XkeyMeta, Xpriv,
    XprivAccount, XprivCore, Xpub, XpubAccount, XpubCore, XpubFp, XpubId, XPRIV_MAINNET_MAGIC,
    XPRIV_TESTNET_MAGIC, XPUB_MAINNET_MAGIC, XPUB_TESTNET_MAGIC,
};
