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

use std::borrow::Borrow;
use std::fmt::{self, Debug, Display, Formatter, LowerHex};
use std::str::FromStr;

use amplify::hex::FromHex;
use bc::secp256k1::{self, PublicKey, SecretKey, SECP256K1};
use bc::{CompressedPk, InvalidPubkey, LegacyPk};
use bitcoin_hashes::{hash160, sha512, Hash, HashEngine, Hmac, HmacEngine};

use crate::{DerivationIndex, DerivationParseError, DerivationPath};

pub const XPRIV_MAINNET_MAGIC: [u8; 4] = [0x04u8, 0x88, 0xAD, 0xE4];
pub const XPRIV_TESTNET_MAGIC: [u8; 4] = [0x04u8, 0x35, 0x83, 0x94];

pub const XPUB_MAINNET_MAGIC: [u8; 4] = [0x04u8, 0x88, 0xB2, 0x1E];
pub const XPUB_TESTNET_MAGIC: [u8; 4] = [0x04u8, 0x35, 0x87, 0xCF];

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum XkeyDecodeError {
    /// wrong length of extended key data ({0}).
    WrongExtendedKeyLength(usize),

    /// provided key is not a standard BIP-32 extended key
    UnknownKeyType([u8; 4]),

    /// extended pubkey contains {0}
    #[from]
    InvalidPubkey(InvalidPubkey<33>),

    /// xpriv contains invalid byte for the secret key type ({0:#04x}) which must be set to zero.
    InvalidType(u8),

    /// xpriv contains invalid data with secret key value overflowing over field order.
    InvalidSecretKey,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum DerivationError {
    /// hardened index {0} can't be derived from an extended public key.
    HardenedPublic(DerivationIndex),

    /// extended key has reached the maximum derivation depth of 255.
    DepthExceeded,
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum OriginParseError {
    /// invalid derivation path - {0}
    #[from]
    DerivationPath(DerivationParseError),

    /// invalid master key fingerprint '{0}'.
    InvalidMasterFp(String),
}

macro_rules! key_bytes {
    ($(#[$attr:meta])* $ty:ident, $len:literal) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, From)]
        #[cfg_attr(
            feature = "serde",
            derive(Serialize, Deserialize),
            serde(crate = "serde_crate", transparent)
        )]
        pub struct $ty(#[from] [u8; $len]);

        impl $ty {
            #[inline]
            pub const fn from_byte_array(bytes: [u8; $len]) -> Self { Self(bytes) }
            #[inline]
            pub const fn to_byte_array(&self) -> [u8; $len] { self.0 }
        }

        impl AsRef<[u8]> for $ty {
            fn as_ref(&self) -> &[u8] { self.0.as_ref() }
        }

        impl From<$ty> for [u8; $len] {
            fn from(value: $ty) -> Self { value.0 }
        }

        impl LowerHex for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                for byte in self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl Display for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { LowerHex::fmt(self, f) }
        }
    };
}

key_bytes!(
    /// BIP32 chain code used for hierarchical derivation
    ChainCode,
    32
);
key_bytes!(
    /// Extended key fingerprint: the first four bytes of the key identifier.
    XpubFp,
    4
);
key_bytes!(
    /// Extended key identifier: HASH160 of the public key.
    XpubId,
    20
);

impl XpubFp {
    pub const fn master() -> Self { Self([0u8; 4]) }
}

impl FromStr for XpubFp {
    type Err = OriginParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vec::<u8>::from_hex(s)
            .ok()
            .and_then(|vec| <[u8; 4]>::try_from(vec).ok())
            .map(XpubFp)
            .ok_or_else(|| OriginParseError::InvalidMasterFp(s.to_owned()))
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct XkeyMeta {
    pub depth: u8,
    pub parent_fp: XpubFp,
    pub child_number: DerivationIndex,
}

impl XkeyMeta {
    fn child(&self, parent_fp: XpubFp, idx: DerivationIndex) -> Result<Self, DerivationError> {
        Ok(XkeyMeta {
            depth: self.depth.checked_add(1).ok_or(DerivationError::DepthExceeded)?,
            parent_fp,
            child_number: idx,
        })
    }
}

/// Deterministic part of the extended public key.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct XpubCore {
    /// Public key
    pub public_key: CompressedPk,
    /// BIP32 chain code used for hierarchical derivation
    pub chain_code: ChainCode,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Xpub {
    testnet: bool,
    meta: XkeyMeta,
    core: XpubCore,
}

fn decode_meta(data: &[u8]) -> (XkeyMeta, ChainCode) {
    let mut parent_fp = [0u8; 4];
    parent_fp.copy_from_slice(&data[5..9]);

    let mut child_number = [0u8; 4];
    child_number.copy_from_slice(&data[9..13]);
    let child_number = u32::from_be_bytes(child_number);

    let mut chain_code = [0u8; 32];
    chain_code.copy_from_slice(&data[13..45]);

    let meta = XkeyMeta {
        depth: data[4],
        parent_fp: parent_fp.into(),
        child_number: child_number.into(),
    };
    (meta, chain_code.into())
}

fn decode_network(data: &[u8], mainnet: [u8; 4], testnet: [u8; 4]) -> Result<bool, XkeyDecodeError> {
    if data.len() != 78 {
        return Err(XkeyDecodeError::WrongExtendedKeyLength(data.len()));
    }
    match &data[0..4] {
        magic if magic == mainnet => Ok(false),
        magic if magic == testnet => Ok(true),
        unknown => {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(unknown);
            Err(XkeyDecodeError::UnknownKeyType(magic))
        }
    }
}

fn encode_meta(magic: [u8; 4], meta: &XkeyMeta, chain_code: &ChainCode) -> [u8; 78] {
    let mut ret = [0; 78];
    ret[0..4].copy_from_slice(&magic);
    ret[4] = meta.depth;
    ret[5..9].copy_from_slice(meta.parent_fp.as_ref());
    ret[9..13].copy_from_slice(&meta.child_number.to_be_bytes());
    ret[13..45].copy_from_slice(chain_code.as_ref());
    ret
}

impl Xpub {
    /// Decodes 78-byte BIP32 serialization of an extended public key.
    pub fn decode(data: impl Borrow<[u8]>) -> Result<Xpub, XkeyDecodeError> {
        let data = data.borrow();
        let testnet = decode_network(data, XPUB_MAINNET_MAGIC, XPUB_TESTNET_MAGIC)?;
        let (meta, chain_code) = decode_meta(data);
        let public_key = CompressedPk::from_bytes(&data[45..78])?;
        Ok(Xpub {
            testnet,
            meta,
            core: XpubCore {
                public_key,
                chain_code,
            },
        })
    }

    pub fn encode(&self) -> [u8; 78] {
        let magic = match self.testnet {
            false => XPUB_MAINNET_MAGIC,
            true => XPUB_TESTNET_MAGIC,
        };
        let mut ret = encode_meta(magic, &self.meta, &self.core.chain_code);
        ret[45..78].copy_from_slice(&self.core.public_key.to_byte_array());
        ret
    }

    #[must_use]
    pub fn is_testnet(&self) -> bool { self.testnet }

    pub fn depth(&self) -> u8 { self.meta.depth }

    pub fn child_number(&self) -> DerivationIndex { self.meta.child_number }

    pub fn parent_fp(&self) -> XpubFp { self.meta.parent_fp }

    pub fn chain_code(&self) -> ChainCode { self.core.chain_code }

    /// Returns the HASH160 of the public key
    pub fn identifier(&self) -> XpubId {
        let hash = hash160::Hash::hash(&self.core.public_key.to_byte_array());
        XpubId::from_byte_array(hash.to_byte_array())
    }

    pub fn fingerprint(&self) -> XpubFp {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.identifier().as_ref()[..4]);
        XpubFp::from_byte_array(bytes)
    }

    /// Constructs ECDSA public key valid in legacy context (compressed by default).
    pub fn to_legacy_pk(&self) -> LegacyPk { LegacyPk::from(self.core.public_key) }

    /// Constructs ECDSA public key.
    pub fn to_compr_pk(&self) -> CompressedPk { self.core.public_key }

    /// Attempts to derive an extended public key from a path.
    pub fn derive_pub(
        &self,
        path: impl IntoIterator<Item = DerivationIndex>,
    ) -> Result<Xpub, DerivationError> {
        path.into_iter().try_fold(*self, |xpub, idx| xpub.ckd_pub(idx))
    }

    /// Compute the scalar tweak added to this key to get a child key
    fn ckd_pub_tweak(&self, idx: DerivationIndex) -> (secp256k1::Scalar, ChainCode) {
        let mut hmac_engine: HmacEngine<sha512::Hash> =
            HmacEngine::new(self.core.chain_code.as_ref());
        hmac_engine.input(&self.core.public_key.to_byte_array());
        hmac_engine.input(&idx.to_be_bytes());

        let hmac_result: Hmac<sha512::Hash> = Hmac::from_engine(hmac_engine);

        let private_key = SecretKey::from_slice(&hmac_result[..32])
            .expect("negligible probability")
            .into();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hmac_result[32..]);
        (private_key, ChainCode::from_byte_array(bytes))
    }

    /// Public->Public child key derivation
    pub fn ckd_pub(&self, idx: DerivationIndex) -> Result<Xpub, DerivationError> {
        if idx.is_hardened() {
            return Err(DerivationError::HardenedPublic(idx));
        }
        let (scalar, chain_code) = self.ckd_pub_tweak(idx);
        let tweaked =
            self.core.public_key.add_exp_tweak(SECP256K1, &scalar).expect("negligible probability");

        Ok(Xpub {
            testnet: self.testnet,
            meta: self.meta.child(self.fingerprint(), idx)?,
            core: XpubCore {
                public_key: tweaked.into(),
                chain_code,
            },
        })
    }
}

/// Deterministic part of the extended private key.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct XprivCore {
    /// Secret key
    pub private_key: SecretKey,
    /// BIP32 chain code used for hierarchical derivation
    pub chain_code: ChainCode,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Xpriv {
    testnet: bool,
    meta: XkeyMeta,
    core: XprivCore,
}

impl Debug for Xpriv {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Xpriv")
            .field("testnet", &self.testnet)
            .field("meta", &self.meta)
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl Xpriv {
    pub fn new_master(testnet: bool, seed: &[u8]) -> Xpriv {
        let mut hmac_engine: HmacEngine<sha512::Hash> = HmacEngine::new(b"Bitcoin seed");
        hmac_engine.input(seed);
        let hmac_result: Hmac<sha512::Hash> = Hmac::from_engine(hmac_engine);

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&hmac_result[32..]);

        Xpriv {
            testnet,
            meta: XkeyMeta {
                depth: 0,
                parent_fp: XpubFp::master(),
                child_number: DerivationIndex::ZERO,
            },
            core: XprivCore {
                private_key: SecretKey::from_slice(&hmac_result[..32])
                    .expect("negligible probability"),
                chain_code: chain_code.into(),
            },
        }
    }

    /// Decodes 78-byte BIP32 serialization of an extended private key.
    pub fn decode(data: impl Borrow<[u8]>) -> Result<Xpriv, XkeyDecodeError> {
        let data = data.borrow();
        let testnet = decode_network(data, XPRIV_MAINNET_MAGIC, XPRIV_TESTNET_MAGIC)?;
        let (meta, chain_code) = decode_meta(data);
        if data[45] != 0x00 {
            return Err(XkeyDecodeError::InvalidType(data[45]));
        }
        let private_key =
            SecretKey::from_slice(&data[46..78]).map_err(|_| XkeyDecodeError::InvalidSecretKey)?;
        Ok(Xpriv {
            testnet,
            meta,
            core: XprivCore {
                private_key,
                chain_code,
            },
        })
    }

    pub fn encode(&self) -> [u8; 78] {
        let magic = match self.testnet {
            false => XPRIV_MAINNET_MAGIC,
            true => XPRIV_TESTNET_MAGIC,
        };
        let mut ret = encode_meta(magic, &self.meta, &self.core.chain_code);
        ret[45] = 0;
        ret[46..78].copy_from_slice(&self.core.private_key.secret_bytes());
        ret
    }

    #[must_use]
    pub fn is_testnet(&self) -> bool { self.testnet }

    pub fn depth(&self) -> u8 { self.meta.depth }

    pub fn child_number(&self) -> DerivationIndex { self.meta.child_number }

    pub fn parent_fp(&self) -> XpubFp { self.meta.parent_fp }

    pub fn chain_code(&self) -> ChainCode { self.core.chain_code }

    pub fn fingerprint(&self) -> XpubFp { self.to_xpub().fingerprint() }

    pub fn identifier(&self) -> XpubId { self.to_xpub().identifier() }

    pub fn to_xpub(&self) -> Xpub {
        Xpub {
            testnet: self.testnet,
            meta: self.meta,
            core: XpubCore {
                public_key: self.core.private_key.public_key(SECP256K1).into(),
                chain_code: self.core.chain_code,
            },
        }
    }

    pub fn to_compr_pk(&self) -> CompressedPk {
        self.core.private_key.public_key(SECP256K1).into()
    }

    pub fn to_private_ecdsa(&self) -> SecretKey { self.core.private_key }

    /// Attempts to derive an extended private key from a path.
    pub fn derive_priv(
        &self,
        path: impl IntoIterator<Item = DerivationIndex>,
    ) -> Result<Xpriv, DerivationError> {
        path.into_iter().try_fold(*self, |xpriv, idx| xpriv.ckd_priv(idx))
    }

    /// Private->Private child key derivation
    pub fn ckd_priv(&self, idx: DerivationIndex) -> Result<Xpriv, DerivationError> {
        let mut hmac_engine: HmacEngine<sha512::Hash> =
            HmacEngine::new(self.core.chain_code.as_ref());
        match idx {
            DerivationIndex::Normal(_) => {
                // Non-hardened key: compute public data and use that
                hmac_engine.input(
                    &PublicKey::from_secret_key(SECP256K1, &self.core.private_key).serialize(),
                );
            }
            DerivationIndex::Hardened(_) => {
                // Hardened key: use only secret data to prevent public derivation
                hmac_engine.input(&[0u8]);
                hmac_engine.input(&self.core.private_key.secret_bytes());
            }
        }

        hmac_engine.input(&idx.to_be_bytes());
        let hmac_result: Hmac<sha512::Hash> = Hmac::from_engine(hmac_engine);
        let sk =
            SecretKey::from_slice(&hmac_result[..32]).expect("statistically impossible to hit");
        let tweaked =
            sk.add_tweak(&self.core.private_key.into()).expect("statistically impossible to hit");

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&hmac_result[32..]);

        Ok(Xpriv {
            testnet: self.testnet,
            meta: self.meta.child(self.fingerprint(), idx)?,
            core: XprivCore {
                private_key: tweaked,
                chain_code: chain_code.into(),
            },
        })
    }
}

/// Origin of a key: fingerprint of the master key and the full derivation
/// path from it.
#[derive(Getters, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[display("{master_fp}{derivation}", alt = "{master_fp}{derivation:#}")]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct KeyOrigin {
    #[getter(as_copy)]
    master_fp: XpubFp,
    derivation: DerivationPath,
}

impl FromStr for KeyOrigin {
    type Err = OriginParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (master_fp, path) = match s.split_once('/') {
            None if s == "m" => (XpubFp::master(), ""),
            None => (XpubFp::from_str(s)?, ""),
            Some(("m", p)) => (XpubFp::master(), p),
            Some((fp, p)) => (XpubFp::from_str(fp)?, p),
        };
        Ok(KeyOrigin {
            master_fp,
            derivation: DerivationPath::from_str(path)?,
        })
    }
}

impl KeyOrigin {
    pub fn new(master_fp: XpubFp, derivation: impl Into<DerivationPath>) -> Self {
        KeyOrigin {
            master_fp,
            derivation: derivation.into(),
        }
    }

    /// Origin of a key derived from a key with this origin using the
    /// provided `path`.
    pub fn child(&self, path: impl IntoIterator<Item = DerivationIndex>) -> KeyOrigin {
        let mut derivation = self.derivation.clone();
        derivation.extend(path);
        KeyOrigin {
            master_fp: self.master_fp,
            derivation,
        }
    }

    /// If `descendant` originates from the same master key and its derivation
    /// starts with the whole derivation of this origin, returns the rest of
    /// its derivation path.
    pub fn child_derivation<'a>(&self, descendant: &'a KeyOrigin) -> Option<&'a [DerivationIndex]> {
        if self.master_fp != descendant.master_fp {
            return None;
        }
        let prefix = self.derivation.len();
        if descendant.derivation.shared_prefix(&self.derivation) != prefix {
            return None;
        }
        Some(&descendant.derivation[prefix..])
    }

    pub fn is_subset_of(&self, other: &KeyOrigin) -> bool { self.child_derivation(other).is_some() }
}

/// Extended public key of an account together with its origin.
#[derive(Getters, Clone, Eq, PartialEq, Hash, Debug)]
pub struct XpubAccount {
    origin: KeyOrigin,
    xpub: Xpub,
}

impl Display for XpubAccount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        Display::fmt(&self.origin, f)?;
        write!(f, "]{}", self.account_fp())
    }
}

impl XpubAccount {
    pub fn new(xpub: Xpub, origin: KeyOrigin) -> Self { XpubAccount { xpub, origin } }

    #[inline]
    pub fn master_fp(&self) -> XpubFp { self.origin.master_fp }

    #[inline]
    pub fn account_fp(&self) -> XpubFp { self.xpub.fingerprint() }

    #[inline]
    pub fn account_id(&self) -> XpubId { self.xpub.identifier() }

    /// Path from the account key to a key with the given origin, if the key
    /// belongs to the account.
    pub fn child_derivation<'a>(&self, origin: &'a KeyOrigin) -> Option<&'a [DerivationIndex]> {
        self.origin.child_derivation(origin)
    }
}

/// Extended private key of an account together with its origin.
#[derive(Getters, Clone, Eq, PartialEq, Debug)]
pub struct XprivAccount {
    origin: KeyOrigin,
    xpriv: Xpriv,
}

impl XprivAccount {
    pub fn new(xpriv: Xpriv, origin: KeyOrigin) -> Self { XprivAccount { xpriv, origin } }

    /// Constructs account for a master key, with an empty derivation path.
    pub fn new_master(xpriv: Xpriv) -> Self {
        XprivAccount {
            origin: KeyOrigin::new(xpriv.fingerprint(), DerivationPath::new()),
            xpriv,
        }
    }

    pub fn to_xpub_account(&self) -> XpubAccount {
        XpubAccount::new(self.xpriv.to_xpub(), self.origin.clone())
    }

    #[inline]
    pub fn master_fp(&self) -> XpubFp { self.origin.master_fp }

    #[inline]
    pub fn account_fp(&self) -> XpubFp { self.xpriv.fingerprint() }

    /// Derives a sub-account using the `path` relative to this account.
    pub fn derive(
        &self,
        path: impl IntoIterator<Item = DerivationIndex> + Clone,
    ) -> Result<XprivAccount, DerivationError> {
        Ok(XprivAccount {
            xpriv: self.xpriv.derive_priv(path.clone())?,
            origin: self.origin.child(path),
        })
    }

    /// Path from the account key to a key with the given origin, if the key
    /// belongs to the account.
    pub fn child_derivation<'a>(&self, origin: &'a KeyOrigin) -> Option<&'a [DerivationIndex]> {
        self.origin.child_derivation(origin)
    }
}
