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

//! Construction of the final scriptSig and witness from the partial
//! signatures.

use std::fmt::{self, Display, Formatter};

use derive::secp256k1::{Message, SECP256K1};
use derive::{
    LegacyPk, LegacySig, PubkeyHash, SigScript, SighashCache, SighashError, Tx, WPubkeyHash,
    Witness,
};

use crate::script::{LegacyPkExt, SigScriptExt};
use crate::{
    verify_input, CoinError, Input, Psbt, SanityError, ScriptError, ScriptTemplate, SignableCoin,
    StateError,
};

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(inner)]
pub enum FinalizeError {
    #[from]
    Sanity(SanityError),

    #[from]
    Coin(CoinError),

    #[from]
    State(StateError),

    #[display("partial signature for key {0} is invalid.")]
    InvalidPartialSig(LegacyPk),

    #[from]
    Sighash(SighashError),

    #[from]
    Verification(ScriptError),
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("input #{index}: {error}")]
pub struct InputFinalizeError {
    pub index: usize,
    pub error: FinalizeError,
}

/// Failures of the inputs which were not finalized.
#[derive(Clone, Eq, PartialEq, Debug, Default, Error)]
pub struct FinalizeErrors(pub Vec<InputFinalizeError>);

impl Display for FinalizeErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("some of PSBT inputs can't be finalized:")?;
        for err in &self.0 {
            write!(f, "\n- {err}")?;
        }
        Ok(())
    }
}

impl Input {
    /// Finalizes the input, producing its final scriptSig and witness.
    ///
    /// Finalizing an already finalized input succeeds without any changes. On
    /// failure the input is left unchanged. Segwit inputs which were known only
    /// by their previous transaction get the witness UTXO instead of it.
    pub fn finalize(&mut self, sighasher: &mut SighashCache) -> Result<(), Vec<FinalizeError>> {
        if self.is_finalized() {
            return Ok(());
        }
        let sanity = self.check_sanity();
        if !sanity.is_empty() {
            return Err(sanity.into_iter().map(FinalizeError::from).collect());
        }

        let (sig_script, witness) = self.satisfy(sighasher).map_err(|err| vec![err])?;
        let prevout = self.prev_txout().expect("checked by the coin resolution");
        verify_input(sighasher, self.index, &sig_script, &witness, &prevout)
            .map_err(|err| vec![FinalizeError::from(err)])?;

        self.set_final(sig_script, witness);
        if self.final_witness.is_some() && self.witness_utxo.is_none() {
            self.witness_utxo = Some(prevout);
            self.non_witness_tx = None;
        }
        self.clear_signing_data();
        log::debug!(target: "psbt", "input #{} is finalized", self.index);
        Ok(())
    }

    fn satisfy(
        &self,
        sighasher: &mut SighashCache,
    ) -> Result<(SigScript, Witness), FinalizeError> {
        let coin = self.signable_coin()?;
        let template = coin.template()?;

        let mut stack: Vec<Vec<u8>> = match template {
            ScriptTemplate::P2pk(pk) => {
                let sig = self.checked_sig(&coin, sighasher, pk)?.ok_or(
                    StateError::NotEnoughSignatures {
                        required: 1,
                        present: 0,
                    },
                )?;
                vec![sig.to_vec()]
            }
            ScriptTemplate::P2pkh(hash) => {
                self.satisfy_key(&coin, sighasher, |pk| PubkeyHash::from(pk) == hash)?
            }
            ScriptTemplate::P2wpkh(hash) => self.satisfy_key(&coin, sighasher, |pk| {
                pk.to_compressed_pk().map(WPubkeyHash::from) == Some(hash)
            })?,
            ScriptTemplate::Multisig(multisig) => {
                let required = multisig.threshold as usize;
                // signatures must follow the order of the keys in the script
                let mut sigs = Vec::with_capacity(required);
                for pk in &multisig.keys {
                    if sigs.len() == required {
                        break;
                    }
                    if let Some(sig) = self.checked_sig(&coin, sighasher, *pk)? {
                        sigs.push(sig.to_vec());
                    }
                }
                if sigs.len() < required {
                    return Err(StateError::NotEnoughSignatures {
                        required,
                        present: sigs.len(),
                    }
                    .into());
                }
                let mut stack = vec![vec![]];
                stack.extend(sigs);
                stack
            }
        };

        let redeem_push = coin.redeem_script.as_ref().map(|script| script.to_vec());
        if coin.is_segwit() {
            if let Some(witness_script) = &coin.witness_script {
                stack.push(witness_script.to_vec());
            }
            let sig_script = SigScript::from_push_items(redeem_push.as_deref());
            Ok((sig_script, Witness::from_consensus_stack(stack)))
        } else {
            stack.extend(redeem_push);
            let sig_script = SigScript::from_push_items(stack.iter().map(Vec::as_slice));
            Ok((sig_script, Witness::new()))
        }
    }

    /// Finds a key with a partial signature matching the `filter`, returning
    /// the signature and the key pushes.
    fn satisfy_key(
        &self,
        coin: &SignableCoin,
        sighasher: &mut SighashCache,
        filter: impl Fn(LegacyPk) -> bool,
    ) -> Result<Vec<Vec<u8>>, FinalizeError> {
        let Some(pk) = self.partial_sigs.keys().copied().find(|pk| filter(*pk)) else {
            return Err(StateError::NotEnoughSignatures {
                required: 1,
                present: 0,
            }
            .into());
        };
        let sig = self
            .checked_sig(coin, sighasher, pk)?
            .expect("key is taken from the signatures");
        Ok(vec![sig.to_vec(), pk.to_vec()])
    }

    /// Returns the partial signature for the key after checking it against
    /// the transaction.
    fn checked_sig(
        &self,
        coin: &SignableCoin,
        sighasher: &mut SighashCache,
        pk: LegacyPk,
    ) -> Result<Option<LegacySig>, FinalizeError> {
        let Some(sig) = self.partial_sigs.get(&pk).copied() else {
            return Ok(None);
        };
        let sighash = coin.sighash(sighasher, self.index, sig.sighash_type)?;
        let mut ecdsa = sig.sig;
        ecdsa.normalize_s();
        SECP256K1
            .verify_ecdsa(&Message::from(sighash), &ecdsa, &pk.pubkey)
            .map_err(|_| FinalizeError::InvalidPartialSig(pk))?;
        Ok(Some(sig))
    }
}

impl Psbt {
    #[inline]
    pub fn is_finalized(&self) -> bool { self.inputs().all(Input::is_finalized) }

    /// Finalizes a single input.
    pub fn finalize_input(&mut self, index: usize) -> Result<(), Vec<FinalizeError>> {
        let mut sighasher = self.sighasher();
        let input = self
            .inputs
            .get_mut(index)
            .ok_or_else(|| vec![FinalizeError::State(StateError::NoInput(index))])?;
        input.finalize(&mut sighasher)
    }

    /// Tries to finalize all the inputs, continuing after failures. Returns
    /// the number of finalized inputs, or the errors of the inputs which
    /// could not be finalized.
    pub fn finalize(&mut self) -> Result<usize, FinalizeErrors> {
        let mut sighasher = self.sighasher();
        let mut errors = vec![];
        for input in &mut self.inputs {
            let index = input.index;
            if let Err(errs) = input.finalize(&mut sighasher) {
                for error in errs {
                    log::warn!(target: "psbt", "unable to finalize input #{index}: {error}");
                    errors.push(InputFinalizeError { index, error });
                }
            }
        }
        if !errors.is_empty() {
            return Err(FinalizeErrors(errors));
        }
        Ok(self.inputs.len())
    }

    /// Extracts the signed transaction. All the inputs must be finalized.
    pub fn extract_tx(&self) -> Result<Tx, StateError> {
        let mut tx = self.to_unsigned_tx();
        for (txin, input) in tx.inputs.iter_mut().zip(self.inputs()) {
            if !input.is_finalized() {
                return Err(StateError::NotFinalized(input.index));
            }
            txin.sig_script = input.final_script_sig.clone().unwrap_or_default();
            txin.witness = input.final_witness.clone().unwrap_or_default();
        }
        Ok(tx)
    }
}
