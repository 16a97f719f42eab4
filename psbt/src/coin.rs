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

//! Scripts and key annotations shared by inputs and outputs, and resolution of
//! the spent output into a coin which can be signed.

use derive::{
    KeyOrigin, LegacyPk, PubkeyHash, RedeemScript, Sats, ScriptBytes, ScriptPubkey, Sighash,
    SighashCache, SighashError, SighashType, TxOut, WPubkeyHash, WitnessScript,
};
use indexmap::IndexMap;

use crate::script::{LegacyPkExt, RedeemScriptExt, ScriptPubkeyExt};
use crate::verify::script_sighash;
use crate::{Input, Output, ScriptTemplate};

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum CoinError {
    /// the spent output is not known: neither witness nor non-witness UTXO is
    /// present.
    NoUtxo,

    /// the spent output is P2SH, but the redeem script is not provided.
    RedeemScriptRequired,

    /// the redeem script doesn't match the P2SH hash of the spent output.
    RedeemScriptMismatch,

    /// the spent output is not P2SH, while the redeem script is present.
    UnexpectedRedeemScript,

    /// the spent output is P2WSH (or P2SH-wrapped P2WSH), but the witness
    /// script is not provided.
    WitnessScriptRequired,

    /// the witness script doesn't match the P2WSH witness program.
    WitnessScriptMismatch,

    /// the spent output is not P2WSH, while the witness script is present.
    UnexpectedWitnessScript,

    /// the script of the spent output doesn't match any of the supported
    /// templates.
    NonStandardScript,
}

/// Data common to PSBT inputs and outputs.
pub trait PsbtCoin {
    /// The script of the output, if it is known.
    fn script_pubkey(&self) -> Option<ScriptPubkey>;
    fn redeem_script(&self) -> Option<&RedeemScript>;
    fn witness_script(&self) -> Option<&WitnessScript>;
    fn set_redeem_script(&mut self, script: RedeemScript);
    fn bip32_derivation(&self) -> &IndexMap<LegacyPk, KeyOrigin>;
    fn bip32_derivation_mut(&mut self) -> &mut IndexMap<LegacyPk, KeyOrigin>;

    /// Adds (or replaces) key derivation information.
    ///
    /// If `infer_redeem_script` is set and no redeem script is known, detects
    /// the P2SH-wrapped P2WPKH output for the key and adds the redeem script.
    fn add_key_path(&mut self, pk: LegacyPk, origin: KeyOrigin, infer_redeem_script: bool) {
        self.bip32_derivation_mut().insert(pk, origin);
        if !infer_redeem_script || self.redeem_script().is_some() {
            return;
        }
        let Some(compressed) = pk.to_compressed_pk() else {
            return;
        };
        let redeem_script = RedeemScript::p2sh_wpkh(WPubkeyHash::from(compressed));
        if self.script_pubkey() == Some(redeem_script.to_script_pubkey()) {
            log::trace!(target: "psbt", "inferred P2SH-P2WPKH redeem script for key {pk}");
            self.set_redeem_script(redeem_script);
        }
    }

    /// Detects whether the key may be used to spend the output: the key has
    /// derivation information, or the output script (directly or through the
    /// redeem and witness scripts) commits to it.
    fn is_related_key(&self, pk: LegacyPk) -> bool {
        if self.bip32_derivation().contains_key(&pk) {
            return true;
        }
        let Some(script_pubkey) = self.script_pubkey() else {
            return false;
        };

        let mut direct = vec![ScriptPubkey::p2pk(pk), ScriptPubkey::p2pkh(PubkeyHash::from(pk))];
        if let Some(compressed) = pk.to_compressed_pk() {
            let hash = WPubkeyHash::from(compressed);
            direct.push(ScriptPubkey::p2wpkh(hash));
            direct.push(RedeemScript::p2sh_wpkh(hash).to_script_pubkey());
        }
        if direct.contains(&script_pubkey) {
            return true;
        }

        let commits = |script: &ScriptBytes| {
            ScriptTemplate::classify(script).is_some_and(|template| template.commits_to(pk))
        };
        if let Some(witness_script) = self.witness_script() {
            if commits(witness_script.as_script_bytes())
                && (witness_script.to_script_pubkey() == script_pubkey
                    || witness_script.to_redeem_script().to_script_pubkey() == script_pubkey)
            {
                return true;
            }
        }
        if let Some(redeem_script) = self.redeem_script() {
            if commits(redeem_script.as_script_bytes())
                && redeem_script.to_script_pubkey() == script_pubkey
            {
                return true;
            }
        }
        false
    }
}

impl PsbtCoin for Input {
    fn script_pubkey(&self) -> Option<ScriptPubkey> {
        self.prev_txout().map(|txout| txout.script_pubkey)
    }

    fn redeem_script(&self) -> Option<&RedeemScript> { self.redeem_script.as_ref() }

    fn witness_script(&self) -> Option<&WitnessScript> { self.witness_script.as_ref() }

    fn set_redeem_script(&mut self, script: RedeemScript) { self.redeem_script = Some(script) }

    fn bip32_derivation(&self) -> &IndexMap<LegacyPk, KeyOrigin> { &self.bip32_derivation }

    fn bip32_derivation_mut(&mut self) -> &mut IndexMap<LegacyPk, KeyOrigin> {
        &mut self.bip32_derivation
    }
}

impl PsbtCoin for Output {
    fn script_pubkey(&self) -> Option<ScriptPubkey> { Some(self.script.clone()) }

    fn redeem_script(&self) -> Option<&RedeemScript> { self.redeem_script.as_ref() }

    fn witness_script(&self) -> Option<&WitnessScript> { self.witness_script.as_ref() }

    fn set_redeem_script(&mut self, script: RedeemScript) { self.redeem_script = Some(script) }

    fn bip32_derivation(&self) -> &IndexMap<LegacyPk, KeyOrigin> { &self.bip32_derivation }

    fn bip32_derivation_mut(&mut self) -> &mut IndexMap<LegacyPk, KeyOrigin> {
        &mut self.bip32_derivation
    }
}

/// Spent output together with all the scripts required to satisfy it.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct SignableCoin {
    pub prevout: TxOut,
    pub redeem_script: Option<RedeemScript>,
    pub witness_script: Option<WitnessScript>,
}

impl SignableCoin {
    /// Walks P2SH and P2WSH nesting of the `prevout` script, checking that the
    /// provided scripts are present exactly when they are required and match
    /// their commitments.
    pub fn resolve(
        prevout: TxOut,
        redeem_script: Option<&RedeemScript>,
        witness_script: Option<&WitnessScript>,
    ) -> Result<SignableCoin, CoinError> {
        let script_pubkey = &prevout.script_pubkey;

        let (redeem_script, program) = if script_pubkey.is_p2sh() {
            let redeem_script = redeem_script.ok_or(CoinError::RedeemScriptRequired)?;
            if redeem_script.to_script_pubkey() != *script_pubkey {
                return Err(CoinError::RedeemScriptMismatch);
            }
            (Some(redeem_script.clone()), redeem_script.to_inner_script_pubkey())
        } else {
            if redeem_script.is_some() {
                return Err(CoinError::UnexpectedRedeemScript);
            }
            (None, script_pubkey.clone())
        };

        let witness_script = if program.is_p2wsh() {
            let witness_script = witness_script.ok_or(CoinError::WitnessScriptRequired)?;
            if witness_script.to_script_pubkey() != program {
                return Err(CoinError::WitnessScriptMismatch);
            }
            Some(witness_script.clone())
        } else if witness_script.is_some() {
            return Err(CoinError::UnexpectedWitnessScript);
        } else {
            None
        };

        Ok(SignableCoin {
            prevout,
            redeem_script,
            witness_script,
        })
    }

    #[inline]
    pub fn value(&self) -> Sats { self.prevout.value }

    /// The script which is checked against the witness: either the redeem
    /// script of a P2SH output or the output script itself.
    pub fn program(&self) -> ScriptPubkey {
        match &self.redeem_script {
            Some(redeem_script) => redeem_script.to_inner_script_pubkey(),
            None => self.prevout.script_pubkey.clone(),
        }
    }

    #[inline]
    pub fn is_segwit(&self) -> bool { self.program().is_witness_program() }

    /// The innermost script, which must be satisfied with signatures.
    pub fn executed_script(&self) -> ScriptBytes {
        if let Some(witness_script) = &self.witness_script {
            return witness_script.as_script_bytes().clone();
        }
        self.program().as_script_bytes().clone()
    }

    pub fn template(&self) -> Result<ScriptTemplate, CoinError> {
        ScriptTemplate::classify(&self.executed_script()).ok_or(CoinError::NonStandardScript)
    }

    /// Script code used in the signature hash computation.
    pub fn script_code(&self) -> ScriptBytes {
        match ScriptTemplate::classify(&self.executed_script()) {
            Some(ScriptTemplate::P2wpkh(hash)) => {
                ScriptPubkey::p2pkh(<[u8; 20]>::from(hash)).as_script_bytes().clone()
            }
            _ => self.executed_script(),
        }
    }

    pub fn sighash(
        &self,
        sighasher: &mut SighashCache,
        index: usize,
        sighash_type: SighashType,
    ) -> Result<Sighash, SighashError> {
        let segwit_value = self.is_segwit().then(|| self.value());
        script_sighash(sighasher, index, &self.script_code(), segwit_value, sighash_type)
    }
}

impl Input {
    /// Resolves the spent output into the coin which can be signed.
    pub fn signable_coin(&self) -> Result<SignableCoin, CoinError> {
        let prevout = self.prev_txout().ok_or(CoinError::NoUtxo)?;
        SignableCoin::resolve(prevout, self.redeem_script.as_ref(), self.witness_script.as_ref())
    }
}
