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

use std::collections::BTreeMap;

use derive::{
    KeyOrigin, LegacyPk, LegacySig, LockHeight, LockTime, LockTimestamp, Outpoint, RedeemScript,
    Sats, ScriptPubkey, SeqNo, SigScript, SighashCache, SighashType, Tx, TxIn, TxOut, TxVer, Txid,
    VarIntArray, Witness, WitnessScript, Xpub,
};
use indexmap::IndexMap;

pub use self::display_from_str::PsbtParseError;
use crate::{Map, PsbtError};

/// Sequence number of inputs which don't specify one.
pub const SEQ_NO_MAX_VALUE: u32 = 0xFFFFFFFF;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("PSBT can't be modified")]
pub struct Unmodifiable;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("unsupported version of PSBT v{0}")]
pub struct PsbtUnsupportedVer(pub u32);

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(crate = "serde_crate"))]
pub enum PsbtVer {
    /// Fixed-transaction PSBT defined in BIP-174.
    #[default]
    #[display("v0")]
    V0 = 0,

    /// Constructed-transaction PSBT defined in BIP-370.
    #[display("v2")]
    V2 = 2,
}

impl PsbtVer {
    pub const fn try_from_standard_u32(v: u32) -> Result<Self, PsbtUnsupportedVer> {
        Ok(match v {
            0 => Self::V0,
            2 => Self::V2,
            wrong => return Err(PsbtUnsupportedVer(wrong)),
        })
    }

    pub const fn to_standard_u32(&self) -> u32 { *self as u32 }
}

/// Runtime settings of a PSBT. They are not serialized.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct PsbtSettings {
    /// When a BIP32 key path is added to an input or output without a redeem
    /// script, detect P2SH-wrapped P2WPKH scripts for the key and fill in the
    /// redeem script.
    pub infer_redeem_scripts: bool,
}

impl Default for PsbtSettings {
    fn default() -> Self {
        PsbtSettings {
            infer_redeem_scripts: true,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct ModifiableFlags {
    pub inputs_modifiable: bool,
    pub outputs_modifiable: bool,
    pub sighash_single: bool,
    /// Bits not defined by BIP-370, kept for the serialization.
    pub unknown: u8,
}

impl ModifiableFlags {
    pub const fn unmodifiable() -> Self {
        ModifiableFlags {
            inputs_modifiable: false,
            outputs_modifiable: false,
            sighash_single: false,
            unknown: 0,
        }
    }

    pub const fn modifiable() -> Self {
        ModifiableFlags {
            inputs_modifiable: true,
            outputs_modifiable: true,
            sighash_single: false,
            unknown: 0,
        }
    }

    pub const fn from_standard_u8(val: u8) -> Self {
        ModifiableFlags {
            inputs_modifiable: val & 0x01 == 0x01,
            outputs_modifiable: val & 0x02 == 0x02,
            sighash_single: val & 0x04 == 0x04,
            unknown: val >> 3,
        }
    }

    pub const fn to_standard_u8(&self) -> u8 {
        (self.inputs_modifiable as u8)
            | ((self.outputs_modifiable as u8) << 1)
            | ((self.sighash_single as u8) << 2)
            | (self.unknown << 3)
    }

    pub const fn is_modifiable(&self) -> bool {
        self.inputs_modifiable | self.outputs_modifiable | self.sighash_single
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Psbt {
    /// PSBT version
    pub version: PsbtVer,

    /// Transaction version.
    pub tx_version: TxVer,

    /// Fallback locktime (used if none of the inputs specifies their
    /// locktime). For PSBT v0 this is the lock time of the unsigned
    /// transaction.
    pub fallback_locktime: Option<LockTime>,

    /// The corresponding key-value map for each input.
    pub(crate) inputs: Vec<Input>,

    /// The corresponding key-value map for each output.
    pub(crate) outputs: Vec<Output>,

    /// A global map from extended public keys to the used key fingerprint and
    /// derivation path as defined by BIP 32
    pub xpubs: IndexMap<Xpub, KeyOrigin>,

    /// Transaction Modifiable Flags
    pub(crate) tx_modifiable: Option<ModifiableFlags>,

    /// Unknown and proprietary keys
    pub unknown: Map,

    pub settings: PsbtSettings,
}

impl Default for Psbt {
    fn default() -> Self { Psbt::create(PsbtVer::V2) }
}

impl Psbt {
    pub fn create(version: PsbtVer) -> Psbt {
        Psbt {
            version,
            tx_version: TxVer::V2,
            fallback_locktime: None,
            inputs: vec![],
            outputs: vec![],
            xpubs: none!(),
            tx_modifiable: match version {
                PsbtVer::V0 => None,
                PsbtVer::V2 => Some(ModifiableFlags::modifiable()),
            },
            unknown: none!(),
            settings: default!(),
        }
    }

    /// Creates v0 PSBT from a transaction. Signatures and witnesses present in
    /// the transaction are removed from the unsigned transaction, but are
    /// kept by the inputs as hints for [`Input::update_from_coin`].
    pub fn from_tx(tx: Tx) -> Psbt {
        let mut psbt = Psbt::create(PsbtVer::V0);
        psbt.tx_version = tx.version;
        psbt.fallback_locktime = Some(tx.lock_time);
        psbt.inputs = tx
            .inputs
            .into_iter()
            .enumerate()
            .map(|(index, txin)| Input::with_txin(txin, index))
            .collect();
        psbt.outputs = tx
            .outputs
            .into_iter()
            .enumerate()
            .map(|(index, txout)| Output::with_txout(txout, index))
            .collect();
        psbt
    }

    /// Creates v0 PSBT from a transaction which must not contain any
    /// signatures or witnesses.
    pub fn from_unsigned_tx(tx: Tx) -> Result<Psbt, PsbtError> {
        if tx.inputs.iter().any(|txin| !txin.sig_script.is_empty() || !txin.witness.is_empty()) {
            return Err(PsbtError::SignedUnsignedTx);
        }
        Ok(Psbt::from_tx(tx))
    }

    pub(crate) fn reset_inputs(&mut self, input_count: usize) {
        self.inputs = (0..input_count).map(Input::new).collect();
    }

    pub(crate) fn reset_outputs(&mut self, output_count: usize) {
        self.outputs = (0..output_count).map(Output::new).collect();
    }

    pub fn to_unsigned_tx(&self) -> Tx {
        Tx {
            version: self.tx_version,
            inputs: VarIntArray::from_iter_checked(self.inputs().map(Input::to_unsigned_txin)),
            outputs: VarIntArray::from_iter_checked(self.outputs().map(Output::to_txout)),
            lock_time: self.lock_time(),
        }
    }

    /// Signature hasher over the unsigned transaction. Unknown spent outputs
    /// are replaced with empty ones, since only taproot sighashes read them.
    pub fn sighasher(&self) -> SighashCache {
        let prevouts = self.inputs().map(|input| input.prev_txout().unwrap_or_default()).collect();
        SighashCache::new(self.to_unsigned_tx(), prevouts)
            .expect("inputs and prevouts match algorithmically")
    }

    pub fn txid(&self) -> Txid { self.to_unsigned_tx().txid() }

    /// Identifier of the transaction which doesn't change when the input
    /// sequence numbers are updated (BIP-370 unique id).
    pub fn unique_id(&self) -> Txid {
        let mut tx = self.to_unsigned_tx();
        for txin in &mut tx.inputs {
            txin.sequence = SeqNo::ZERO;
        }
        tx.txid()
    }

    pub fn input(&self, index: usize) -> Option<&Input> { self.inputs.get(index) }

    pub fn input_mut(&mut self, index: usize) -> Option<&mut Input> { self.inputs.get_mut(index) }

    pub fn inputs(&self) -> impl ExactSizeIterator<Item = &Input> { self.inputs.iter() }

    pub fn inputs_mut(&mut self) -> impl ExactSizeIterator<Item = &mut Input> {
        self.inputs.iter_mut()
    }

    pub fn output(&self, index: usize) -> Option<&Output> { self.outputs.get(index) }

    pub fn output_mut(&mut self, index: usize) -> Option<&mut Output> {
        self.outputs.get_mut(index)
    }

    pub fn outputs(&self) -> impl ExactSizeIterator<Item = &Output> { self.outputs.iter() }

    pub fn outputs_mut(&mut self) -> impl ExactSizeIterator<Item = &mut Output> {
        self.outputs.iter_mut()
    }

    /// Computes transaction lock time following BIP-370 rules: if none of the
    /// inputs requires a lock time, the fallback lock time is used; otherwise
    /// the height-based lock time is preferred unless some input requires
    /// time-based lock only.
    ///
    /// PSBTs mixing inputs which require only height-based and only
    /// time-based locks can't be satisfied; for them the time-based lock is
    /// returned.
    pub fn lock_time(&self) -> LockTime {
        let mut locked = self
            .inputs
            .iter()
            .filter(|input| {
                input.required_time_lock.is_some() || input.required_height_lock.is_some()
            })
            .peekable();
        if locked.peek().is_none() {
            return self.fallback_locktime.unwrap_or(LockTime::ZERO);
        }
        if locked.clone().all(|input| input.required_height_lock.is_some()) {
            locked
                .filter_map(|input| input.required_height_lock)
                .max()
                .map(LockTime::from)
                .unwrap_or(LockTime::ZERO)
        } else {
            locked
                .filter_map(|input| input.required_time_lock)
                .max()
                .map(LockTime::from)
                .unwrap_or(LockTime::ZERO)
        }
    }

    /// Sum of the values of the spent outputs, if all of them are known and
    /// the sum doesn't overflow.
    pub fn input_sum(&self) -> Option<Sats> {
        self.inputs()
            .try_fold(Sats::ZERO, |sum, input| sum.checked_add(input.prev_txout()?.value))
    }

    /// Sum of the output values, or `None` if it overflows.
    pub fn output_sum(&self) -> Option<Sats> {
        self.outputs().try_fold(Sats::ZERO, |sum, output| sum.checked_add(output.value()))
    }

    /// Transaction fee, if all spent outputs are known and their value is not
    /// less than the value of the outputs.
    #[inline]
    pub fn fee(&self) -> Option<Sats> { self.input_sum()?.checked_sub(self.output_sum()?) }

    pub fn xpubs(&self) -> impl Iterator<Item = (&Xpub, &KeyOrigin)> { self.xpubs.iter() }

    #[inline]
    pub fn tx_modifiable(&self) -> Option<ModifiableFlags> { self.tx_modifiable }

    pub fn are_inputs_modifiable(&self) -> bool {
        match (self.version, self.tx_modifiable) {
            (PsbtVer::V0, None) => true,
            (_, flags) => flags.map(|flags| flags.inputs_modifiable).unwrap_or_default(),
        }
    }

    pub fn are_outputs_modifiable(&self) -> bool {
        match (self.version, self.tx_modifiable) {
            (PsbtVer::V0, None) => true,
            (_, flags) => flags.map(|flags| flags.outputs_modifiable).unwrap_or_default(),
        }
    }

    pub fn construct_input(
        &mut self,
        prevout: Outpoint,
        sequence: SeqNo,
    ) -> Result<&mut Input, Unmodifiable> {
        if !self.are_inputs_modifiable() {
            return Err(Unmodifiable);
        }
        let input = Input {
            previous_outpoint: prevout,
            sequence_number: Some(sequence),
            ..Input::new(self.inputs.len())
        };
        self.inputs.push(input);
        Ok(self.inputs.last_mut().expect("just inserted"))
    }

    pub fn construct_output(
        &mut self,
        script_pubkey: ScriptPubkey,
        value: Sats,
    ) -> Result<&mut Output, Unmodifiable> {
        if !self.are_outputs_modifiable() {
            return Err(Unmodifiable);
        }
        let output = Output {
            amount: value,
            script: script_pubkey,
            ..Output::new(self.outputs.len())
        };
        self.outputs.push(output);
        Ok(self.outputs.last_mut().expect("just inserted"))
    }

    pub fn complete_construction(&mut self) {
        if self.version == PsbtVer::V2 {
            self.tx_modifiable = Some(ModifiableFlags::unmodifiable())
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Input {
    /// The index of this input. Used in error reporting.
    pub(crate) index: usize,

    /// Previous transaction outpoint to spent.
    pub previous_outpoint: Outpoint,

    /// Sequence number of this input. If omitted, the sequence number is
    /// assumed to be the final sequence number (0xffffffff).
    pub sequence_number: Option<SeqNo>,

    /// 32 bit unsigned little endian integer greater than or equal to 500000000
    /// representing the minimum Unix timestamp that this input requires to be
    /// set as the transaction's lock time.
    pub required_time_lock: Option<LockTimestamp>,

    /// 32 bit unsigned little endian integer less than 500000000 representing
    /// the minimum block height that this input requires to be set as the
    /// transaction's lock time.
    pub required_height_lock: Option<LockHeight>,

    /// The non-witness transaction this input spends from. Should only be
    /// `Some` for inputs which spend non-segwit outputs or if it is unknown
    /// whether an input spends a segwit output.
    pub non_witness_tx: Option<Tx>,

    /// The transaction output this input spends from. Should only be `Some`
    /// for inputs which spend segwit outputs, including P2SH embedded ones.
    pub witness_utxo: Option<TxOut>,

    /// A map from public keys to their corresponding signature as would be
    /// pushed to the stack from a scriptSig or witness.
    pub partial_sigs: BTreeMap<LegacyPk, LegacySig>,

    /// The sighash type to be used for this input. Signatures for this input
    /// must use the sighash type.
    pub sighash_type: Option<SighashType>,

    /// The redeem script for this input.
    pub redeem_script: Option<RedeemScript>,

    /// The witness script for this input.
    pub witness_script: Option<WitnessScript>,

    /// A map from public keys needed to sign this input to their corresponding
    /// master key fingerprints and derivation paths.
    pub bip32_derivation: IndexMap<LegacyPk, KeyOrigin>,

    /// The finalized, fully-constructed scriptSig with signatures and any other
    /// scripts necessary for this input to pass validation.
    pub final_script_sig: Option<SigScript>,

    /// The finalized, fully-constructed scriptWitness with signatures and any
    /// other scripts necessary for this input to pass validation.
    pub final_witness: Option<Witness>,

    /// Unknown and proprietary keys
    pub unknown: Map,

    /// scriptSig of the transaction the PSBT was created from.
    pub(crate) original_sig_script: Option<SigScript>,

    /// Witness of the transaction the PSBT was created from.
    pub(crate) original_witness: Option<Witness>,
}

impl Input {
    pub fn new(index: usize) -> Input {
        Input {
            index,
            previous_outpoint: Outpoint::coinbase(),
            sequence_number: None,
            required_time_lock: None,
            required_height_lock: None,
            non_witness_tx: None,
            witness_utxo: None,
            partial_sigs: none!(),
            sighash_type: None,
            redeem_script: None,
            witness_script: None,
            bip32_derivation: none!(),
            final_script_sig: None,
            final_witness: None,
            unknown: none!(),
            original_sig_script: None,
            original_witness: None,
        }
    }

    pub fn with_txin(txin: TxIn, index: usize) -> Input {
        Input {
            previous_outpoint: txin.prev_output,
            sequence_number: Some(txin.sequence),
            original_sig_script: (!txin.sig_script.is_empty()).then_some(txin.sig_script),
            original_witness: (!txin.witness.is_empty()).then_some(txin.witness),
            ..Input::new(index)
        }
    }

    pub fn to_unsigned_txin(&self) -> TxIn {
        TxIn {
            prev_output: self.previous_outpoint,
            sig_script: none!(),
            sequence: self
                .sequence_number
                .unwrap_or(SeqNo::from_consensus_u32(SEQ_NO_MAX_VALUE)),
            witness: none!(),
        }
    }

    /// The output spent by this input, if it is known.
    pub fn prev_txout(&self) -> Option<TxOut> {
        if let Some(txout) = &self.witness_utxo {
            return Some(txout.clone());
        }
        self.non_witness_tx
            .as_ref()?
            .outputs
            .get(self.previous_outpoint.vout.into_usize())
            .cloned()
    }

    #[inline]
    pub fn value(&self) -> Option<Sats> { self.prev_txout().map(|txout| txout.value) }

    #[inline]
    pub fn index(&self) -> usize { self.index }
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Output {
    /// The index of this output. Used in error reporting.
    pub(crate) index: usize,

    /// The output's amount in satoshis.
    pub amount: Sats,

    /// The script for this output, also known as the scriptPubKey.
    pub script: ScriptPubkey,

    /// The redeem script for this output.
    pub redeem_script: Option<RedeemScript>,

    /// The witness script for this output.
    pub witness_script: Option<WitnessScript>,

    /// A map from public keys needed to spend this output to their
    /// corresponding master key fingerprints and derivation paths.
    pub bip32_derivation: IndexMap<LegacyPk, KeyOrigin>,

    /// Unknown and proprietary keys
    pub unknown: Map,
}

impl Output {
    pub fn new(index: usize) -> Self {
        Output {
            index,
            amount: Sats::ZERO,
            script: none!(),
            redeem_script: None,
            witness_script: None,
            bip32_derivation: none!(),
            unknown: none!(),
        }
    }

    pub fn with_txout(txout: TxOut, index: usize) -> Self {
        Output {
            amount: txout.value,
            script: txout.script_pubkey,
            ..Output::new(index)
        }
    }

    pub fn to_txout(&self) -> TxOut {
        TxOut {
            value: self.amount,
            script_pubkey: self.script.clone(),
        }
    }

    #[inline]
    pub fn value(&self) -> Sats { self.amount }

    #[inline]
    pub fn index(&self) -> usize { self.index }
}

mod display_from_str {
    use std::fmt::{self, Display, Formatter, LowerHex};
    use std::str::FromStr;

    use amplify::hex::{self, FromHex, ToHex};
    use base64::display::Base64Display;
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;

    use super::*;

    #[derive(Clone, Debug, Display, Error, From)]
    #[display(inner)]
    pub enum PsbtParseError {
        #[from]
        Hex(hex::Error),

        #[from]
        Base64(base64::DecodeError),

        #[from]
        Psbt(PsbtError),
    }

    impl Psbt {
        pub fn from_base64(s: &str) -> Result<Psbt, PsbtParseError> {
            Psbt::deserialize(BASE64_STANDARD.decode(s)?).map_err(PsbtParseError::from)
        }

        pub fn from_base16(s: &str) -> Result<Psbt, PsbtParseError> {
            let data = Vec::<u8>::from_hex(s)?;
            Psbt::deserialize(data).map_err(PsbtParseError::from)
        }

        pub fn to_base64(&self) -> String { BASE64_STANDARD.encode(self.serialize()) }

        pub fn to_base16(&self) -> String { self.serialize().to_hex() }
    }

    /// FromStr implementation parses both Base64 and Hex (Base16) encodings.
    impl FromStr for Psbt {
        type Err = PsbtParseError;

        #[inline]
        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Self::from_base16(s).or_else(|_| Self::from_base64(s))
        }
    }

    /// PSBT displays Base64-encoded string.
    impl Display for Psbt {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "{}", Base64Display::new(&self.serialize(), &BASE64_STANDARD))
        }
    }

    impl LowerHex for Psbt {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(&self.to_base16()) }
    }
}
