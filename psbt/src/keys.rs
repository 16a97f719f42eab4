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

use std::fmt::Debug;
use std::hash::Hash;

use crate::PsbtVer;

/// Name of a PSBT map, used in the error reporting.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[display(lowercase)]
pub enum MapName {
    Global,
    Input,
    Output,
}

/// Key type of some PSBT map.
pub trait KeyType: Copy + Ord + Eq + Hash + Debug + 'static {
    /// Map which keys are of this type.
    const MAP: MapName;
    /// All key types defined by the supported BIPs.
    const STANDARD: &'static [Self];

    fn from_u8(val: u8) -> Self;
    fn into_u8(self) -> u8;
    fn to_u8(&self) -> u8 { self.into_u8() }
    fn is_unknown(self) -> bool;
    fn has_key_data(self) -> bool;
    fn present_since(self) -> PsbtVer;
    /// Version of PSBT since which the key must not be present anymore.
    fn removed_since(self) -> Option<PsbtVer>;
    #[inline]
    fn is_allowed(self, version: PsbtVer) -> bool {
        version >= self.present_since() && self.removed_since().map_or(true, |ver| version < ver)
    }
    /// Whether the key is required for the PSBT versions it is allowed in.
    fn is_required(self) -> bool;
}

pub(crate) const PSBT_GLOBAL_UNSIGNED_TX: u8 = 0x00;
pub(crate) const PSBT_GLOBAL_XPUB: u8 = 0x01;
pub(crate) const PSBT_GLOBAL_TX_VERSION: u8 = 0x02;
pub(crate) const PSBT_GLOBAL_FALLBACK_LOCKTIME: u8 = 0x03;
pub(crate) const PSBT_GLOBAL_INPUT_COUNT: u8 = 0x04;
pub(crate) const PSBT_GLOBAL_OUTPUT_COUNT: u8 = 0x05;
pub(crate) const PSBT_GLOBAL_TX_MODIFIABLE: u8 = 0x06;
pub(crate) const PSBT_GLOBAL_VERSION: u8 = 0xFB;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum GlobalKey {
    /// `PSBT_GLOBAL_UNSIGNED_TX`
    UnsignedTx,

    /// `PSBT_GLOBAL_XPUB`
    Xpub,

    /// `PSBT_GLOBAL_TX_VERSION`
    TxVersion,

    /// `PSBT_GLOBAL_FALLBACK_LOCKTIME`
    FallbackLocktime,

    /// `PSBT_GLOBAL_INPUT_COUNT`
    InputCount,

    /// `PSBT_GLOBAL_OUTPUT_COUNT`
    OutputCount,

    /// `PSBT_GLOBAL_TX_MODIFIABLE`
    TxModifiable,

    /// `PSBT_GLOBAL_VERSION`
    Version,

    /// All unknown keys, including proprietary ones
    Unknown(u8),
}

impl KeyType for GlobalKey {
    const MAP: MapName = MapName::Global;
    const STANDARD: &'static [Self] = &[
        Self::UnsignedTx,
        Self::Xpub,
        Self::TxVersion,
        Self::FallbackLocktime,
        Self::InputCount,
        Self::OutputCount,
        Self::TxModifiable,
        Self::Version,
    ];

    fn from_u8(val: u8) -> Self {
        match val {
            PSBT_GLOBAL_UNSIGNED_TX => Self::UnsignedTx,
            PSBT_GLOBAL_XPUB => Self::Xpub,
            PSBT_GLOBAL_TX_VERSION => Self::TxVersion,
            PSBT_GLOBAL_FALLBACK_LOCKTIME => Self::FallbackLocktime,
            PSBT_GLOBAL_INPUT_COUNT => Self::InputCount,
            PSBT_GLOBAL_OUTPUT_COUNT => Self::OutputCount,
            PSBT_GLOBAL_TX_MODIFIABLE => Self::TxModifiable,
            PSBT_GLOBAL_VERSION => Self::Version,
            unknown => Self::Unknown(unknown),
        }
    }

    fn into_u8(self) -> u8 {
        match self {
            GlobalKey::UnsignedTx => PSBT_GLOBAL_UNSIGNED_TX,
            GlobalKey::Xpub => PSBT_GLOBAL_XPUB,
            GlobalKey::TxVersion => PSBT_GLOBAL_TX_VERSION,
            GlobalKey::FallbackLocktime => PSBT_GLOBAL_FALLBACK_LOCKTIME,
            GlobalKey::InputCount => PSBT_GLOBAL_INPUT_COUNT,
            GlobalKey::OutputCount => PSBT_GLOBAL_OUTPUT_COUNT,
            GlobalKey::TxModifiable => PSBT_GLOBAL_TX_MODIFIABLE,
            GlobalKey::Version => PSBT_GLOBAL_VERSION,
            GlobalKey::Unknown(key_type) => key_type,
        }
    }

    fn is_unknown(self) -> bool { matches!(self, GlobalKey::Unknown(_)) }

    fn has_key_data(self) -> bool { matches!(self, GlobalKey::Xpub | GlobalKey::Unknown(_)) }

    fn present_since(self) -> PsbtVer {
        match self {
            GlobalKey::UnsignedTx | GlobalKey::Xpub | GlobalKey::Version => PsbtVer::V0,

            GlobalKey::TxVersion
            | GlobalKey::FallbackLocktime
            | GlobalKey::InputCount
            | GlobalKey::OutputCount
            | GlobalKey::TxModifiable => PsbtVer::V2,

            GlobalKey::Unknown(_) => PsbtVer::V0,
        }
    }

    fn removed_since(self) -> Option<PsbtVer> {
        match self {
            GlobalKey::UnsignedTx => Some(PsbtVer::V2),
            _ => None,
        }
    }

    fn is_required(self) -> bool {
        matches!(
            self,
            GlobalKey::UnsignedTx
                | GlobalKey::TxVersion
                | GlobalKey::InputCount
                | GlobalKey::OutputCount
        )
    }
}

pub(crate) const PSBT_IN_NON_WITNESS_UTXO: u8 = 0x00;
pub(crate) const PSBT_IN_WITNESS_UTXO: u8 = 0x01;
pub(crate) const PSBT_IN_PARTIAL_SIG: u8 = 0x02;
pub(crate) const PSBT_IN_SIGHASH_TYPE: u8 = 0x03;
pub(crate) const PSBT_IN_REDEEM_SCRIPT: u8 = 0x04;
pub(crate) const PSBT_IN_WITNESS_SCRIPT: u8 = 0x05;
pub(crate) const PSBT_IN_BIP32_DERIVATION: u8 = 0x06;
pub(crate) const PSBT_IN_FINAL_SCRIPTSIG: u8 = 0x07;
pub(crate) const PSBT_IN_FINAL_SCRIPTWITNESS: u8 = 0x08;
pub(crate) const PSBT_IN_PREVIOUS_TXID: u8 = 0x0e;
pub(crate) const PSBT_IN_OUTPUT_INDEX: u8 = 0x0f;
pub(crate) const PSBT_IN_SEQUENCE: u8 = 0x10;
pub(crate) const PSBT_IN_REQUIRED_TIME_LOCKTIME: u8 = 0x11;
pub(crate) const PSBT_IN_REQUIRED_HEIGHT_LOCKTIME: u8 = 0x12;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum InputKey {
    /// `PSBT_IN_NON_WITNESS_UTXO`
    NonWitnessUtxo,

    /// `PSBT_IN_WITNESS_UTXO`
    WitnessUtxo,

    /// `PSBT_IN_PARTIAL_SIG`
    PartialSig,

    /// `PSBT_IN_SIGHASH_TYPE`
    SighashType,

    /// `PSBT_IN_REDEEM_SCRIPT`
    RedeemScript,

    /// `PSBT_IN_WITNESS_SCRIPT`
    WitnessScript,

    /// `PSBT_IN_BIP32_DERIVATION`
    Bip32Derivation,

    /// `PSBT_IN_FINAL_SCRIPTSIG`
    FinalScriptSig,

    /// `PSBT_IN_FINAL_SCRIPTWITNESS`
    FinalWitness,

    /// `PSBT_IN_PREVIOUS_TXID`
    PreviousTxid,

    /// `PSBT_IN_OUTPUT_INDEX`
    OutputIndex,

    /// `PSBT_IN_SEQUENCE`
    Sequence,

    /// `PSBT_IN_REQUIRED_TIME_LOCKTIME`
    RequiredTimeLock,

    /// `PSBT_IN_REQUIRED_HEIGHT_LOCKTIME`
    RequiredHeightLock,

    /// All unknown keys, including hash preimages, taproot and proprietary
    /// keys
    Unknown(u8),
}

impl KeyType for InputKey {
    const MAP: MapName = MapName::Input;
    const STANDARD: &'static [Self] = &[
        Self::NonWitnessUtxo,
        Self::WitnessUtxo,
        Self::PartialSig,
        Self::SighashType,
        Self::RedeemScript,
        Self::WitnessScript,
        Self::Bip32Derivation,
        Self::FinalScriptSig,
        Self::FinalWitness,
        Self::PreviousTxid,
        Self::OutputIndex,
        Self::Sequence,
        Self::RequiredTimeLock,
        Self::RequiredHeightLock,
    ];

    fn from_u8(val: u8) -> Self {
        match val {
            PSBT_IN_NON_WITNESS_UTXO => Self::NonWitnessUtxo,
            PSBT_IN_WITNESS_UTXO => Self::WitnessUtxo,
            PSBT_IN_PARTIAL_SIG => Self::PartialSig,
            PSBT_IN_SIGHASH_TYPE => Self::SighashType,
            PSBT_IN_REDEEM_SCRIPT => Self::RedeemScript,
            PSBT_IN_WITNESS_SCRIPT => Self::WitnessScript,
            PSBT_IN_BIP32_DERIVATION => Self::Bip32Derivation,
            PSBT_IN_FINAL_SCRIPTSIG => Self::FinalScriptSig,
            PSBT_IN_FINAL_SCRIPTWITNESS => Self::FinalWitness,
            PSBT_IN_PREVIOUS_TXID => Self::PreviousTxid,
            PSBT_IN_OUTPUT_INDEX => Self::OutputIndex,
            PSBT_IN_SEQUENCE => Self::Sequence,
            PSBT_IN_REQUIRED_TIME_LOCKTIME => Self::RequiredTimeLock,
            PSBT_IN_REQUIRED_HEIGHT_LOCKTIME => Self::RequiredHeightLock,
            unknown => Self::Unknown(unknown),
        }
    }

    fn into_u8(self) -> u8 {
        match self {
            InputKey::NonWitnessUtxo => PSBT_IN_NON_WITNESS_UTXO,
            InputKey::WitnessUtxo => PSBT_IN_WITNESS_UTXO,
            InputKey::PartialSig => PSBT_IN_PARTIAL_SIG,
            InputKey::SighashType => PSBT_IN_SIGHASH_TYPE,
            InputKey::RedeemScript => PSBT_IN_REDEEM_SCRIPT,
            InputKey::WitnessScript => PSBT_IN_WITNESS_SCRIPT,
            InputKey::Bip32Derivation => PSBT_IN_BIP32_DERIVATION,
            InputKey::FinalScriptSig => PSBT_IN_FINAL_SCRIPTSIG,
            InputKey::FinalWitness => PSBT_IN_FINAL_SCRIPTWITNESS,
            InputKey::PreviousTxid => PSBT_IN_PREVIOUS_TXID,
            InputKey::OutputIndex => PSBT_IN_OUTPUT_INDEX,
            InputKey::Sequence => PSBT_IN_SEQUENCE,
            InputKey::RequiredTimeLock => PSBT_IN_REQUIRED_TIME_LOCKTIME,
            InputKey::RequiredHeightLock => PSBT_IN_REQUIRED_HEIGHT_LOCKTIME,
            InputKey::Unknown(key_type) => key_type,
        }
    }

    fn is_unknown(self) -> bool { matches!(self, InputKey::Unknown(_)) }

    fn has_key_data(self) -> bool {
        matches!(self, InputKey::PartialSig | InputKey::Bip32Derivation | InputKey::Unknown(_))
    }

    fn present_since(self) -> PsbtVer {
        match self {
            InputKey::PreviousTxid
            | InputKey::OutputIndex
            | InputKey::Sequence
            | InputKey::RequiredTimeLock
            | InputKey::RequiredHeightLock => PsbtVer::V2,

            _ => PsbtVer::V0,
        }
    }

    fn removed_since(self) -> Option<PsbtVer> { None }

    fn is_required(self) -> bool { matches!(self, InputKey::PreviousTxid | InputKey::OutputIndex) }
}

pub(crate) const PSBT_OUT_REDEEM_SCRIPT: u8 = 0x00;
pub(crate) const PSBT_OUT_WITNESS_SCRIPT: u8 = 0x01;
pub(crate) const PSBT_OUT_BIP32_DERIVATION: u8 = 0x02;
pub(crate) const PSBT_OUT_AMOUNT: u8 = 0x03;
pub(crate) const PSBT_OUT_SCRIPT: u8 = 0x04;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum OutputKey {
    /// `PSBT_OUT_REDEEM_SCRIPT`
    RedeemScript,

    /// `PSBT_OUT_WITNESS_SCRIPT`
    WitnessScript,

    /// `PSBT_OUT_BIP32_DERIVATION`
    Bip32Derivation,

    /// `PSBT_OUT_AMOUNT`
    Amount,

    /// `PSBT_OUT_SCRIPT`
    Script,

    /// All unknown keys
    Unknown(u8),
}

impl KeyType for OutputKey {
    const MAP: MapName = MapName::Output;
    const STANDARD: &'static [Self] = &[
        Self::RedeemScript,
        Self::WitnessScript,
        Self::Bip32Derivation,
        Self::Amount,
        Self::Script,
    ];

    fn from_u8(val: u8) -> Self {
        match val {
            PSBT_OUT_REDEEM_SCRIPT => Self::RedeemScript,
            PSBT_OUT_WITNESS_SCRIPT => Self::WitnessScript,
            PSBT_OUT_BIP32_DERIVATION => Self::Bip32Derivation,
            PSBT_OUT_AMOUNT => Self::Amount,
            PSBT_OUT_SCRIPT => Self::Script,
            unknown => Self::Unknown(unknown),
        }
    }

    fn into_u8(self) -> u8 {
        match self {
            OutputKey::RedeemScript => PSBT_OUT_REDEEM_SCRIPT,
            OutputKey::WitnessScript => PSBT_OUT_WITNESS_SCRIPT,
            OutputKey::Bip32Derivation => PSBT_OUT_BIP32_DERIVATION,
            OutputKey::Amount => PSBT_OUT_AMOUNT,
            OutputKey::Script => PSBT_OUT_SCRIPT,
            OutputKey::Unknown(key_type) => key_type,
        }
    }

    fn is_unknown(self) -> bool { matches!(self, OutputKey::Unknown(_)) }

    fn has_key_data(self) -> bool {
        matches!(self, OutputKey::Bip32Derivation | OutputKey::Unknown(_))
    }

    fn present_since(self) -> PsbtVer {
        match self {
            OutputKey::Amount | OutputKey::Script => PsbtVer::V2,
            _ => PsbtVer::V0,
        }
    }

    fn removed_since(self) -> Option<PsbtVer> { None }

    fn is_required(self) -> bool { matches!(self, OutputKey::Amount | OutputKey::Script) }
}
