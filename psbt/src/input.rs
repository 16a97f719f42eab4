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

use derive::{
    Outpoint, RedeemScript, SigScript, SighashType, Tx, TxOut, Txid, Vout, Witness, WitnessScript,
};

use crate::script::{RedeemScriptExt, ScriptExt};
use crate::Input;

#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum StateError {
    /// input #{0} is already finalized and can't be modified.
    Finalized(usize),

    /// input #{0} is not finalized yet.
    NotFinalized(usize),

    /// PSBT doesn't have input #{0}.
    NoInput(usize),

    /// PSBT doesn't have output #{0}.
    NoOutput(usize),

    /// coin {found} doesn't match outpoint {expected} spent by input #{index}.
    OutpointMismatch {
        index: usize,
        expected: Outpoint,
        found: Outpoint,
    },

    /// input #{0} spends a non-segwit output, which requires the full previous
    /// transaction to be known.
    NonWitnessTxRequired(usize),

    /// previous transaction {found} doesn't match transaction {expected} spent
    /// by input #{index}.
    PrevTxMismatch {
        index: usize,
        expected: Txid,
        found: Txid,
    },

    /// previous transaction for input #{index} has only {outputs} outputs, while
    /// the input spends output #{vout}.
    PrevoutOutOfRange {
        index: usize,
        vout: Vout,
        outputs: usize,
    },

    /// input #{index} requires {required} signatures, which doesn't match the
    /// requested {requested} signature type.
    SighashMismatch {
        index: usize,
        required: SighashType,
        requested: SighashType,
    },

    /// not enough signatures: {required} are required, but only {present} are
    /// present.
    NotEnoughSignatures { required: usize, present: usize },
}

/// Unspent output together with its outpoint and, optionally, the transaction
/// which created it.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Utxo {
    pub outpoint: Outpoint,
    pub txout: TxOut,
    pub prev_tx: Option<Tx>,
}

impl Utxo {
    pub fn new(outpoint: Outpoint, txout: TxOut) -> Self {
        Utxo {
            outpoint,
            txout,
            prev_tx: None,
        }
    }

    /// Constructs UTXO from the transaction which created it.
    pub fn with_tx(tx: Tx, vout: impl Into<Vout>) -> Option<Self> {
        let vout = vout.into();
        let txout = tx.outputs.get(vout.into_usize())?.clone();
        Some(Utxo {
            outpoint: Outpoint::new(tx.txid(), vout),
            txout,
            prev_tx: Some(tx),
        })
    }
}

impl Input {
    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.final_script_sig.is_some() || self.final_witness.is_some()
    }

    fn check_not_finalized(&self) -> Result<(), StateError> {
        if self.is_finalized() {
            return Err(StateError::Finalized(self.index));
        }
        Ok(())
    }

    /// Sets information about the spent output.
    ///
    /// If the PSBT was created from a transaction which had scriptSig or
    /// witness data for this input, redeem and witness scripts are recovered
    /// from them when they match the spent output. Afterwards, witness UTXO
    /// is set for segwit outputs, and the previous transaction is set for all
    /// the other outputs.
    pub fn update_from_coin(&mut self, utxo: Utxo) -> Result<(), StateError> {
        self.check_not_finalized()?;
        if utxo.outpoint != self.previous_outpoint {
            return Err(StateError::OutpointMismatch {
                index: self.index,
                expected: self.previous_outpoint,
                found: utxo.outpoint,
            });
        }

        let script_pubkey = &utxo.txout.script_pubkey;
        if script_pubkey.is_p2sh() && self.redeem_script.is_none() {
            let last_push = self
                .original_sig_script
                .as_ref()
                .and_then(|sig_script| sig_script.push_items())
                .and_then(|mut items| items.pop());
            if let Some(script) = last_push {
                let redeem_script = RedeemScript::from_unsafe(script);
                if redeem_script.to_script_pubkey() == *script_pubkey {
                    self.redeem_script = Some(redeem_script);
                }
            }
        }
        let program = match &self.redeem_script {
            Some(redeem_script) if script_pubkey.is_p2sh() => {
                redeem_script.to_inner_script_pubkey()
            }
            _ => script_pubkey.clone(),
        };
        if program.is_p2wsh() && self.witness_script.is_none() {
            let last_element = self
                .original_witness
                .as_ref()
                .and_then(|witness| witness.elements().last())
                .map(<[u8]>::to_vec);
            if let Some(script) = last_element {
                let witness_script = WitnessScript::from_unsafe(script);
                if witness_script.to_script_pubkey() == program {
                    self.witness_script = Some(witness_script);
                }
            }
        }

        if program.is_witness_program() {
            self.witness_utxo = Some(utxo.txout);
            self.non_witness_tx = None;
        } else {
            let tx = utxo.prev_tx.ok_or(StateError::NonWitnessTxRequired(self.index))?;
            self.set_non_witness_tx(tx)?;
            self.witness_utxo = None;
        }
        Ok(())
    }

    /// Sets the previous transaction, checking that it is the one spent by
    /// this input.
    pub fn update_from_tx(&mut self, tx: Tx) -> Result<(), StateError> {
        self.check_not_finalized()?;
        self.set_non_witness_tx(tx)
    }

    fn set_non_witness_tx(&mut self, tx: Tx) -> Result<(), StateError> {
        let txid = tx.txid();
        if txid != self.previous_outpoint.txid {
            return Err(StateError::PrevTxMismatch {
                index: self.index,
                expected: self.previous_outpoint.txid,
                found: txid,
            });
        }
        let vout = self.previous_outpoint.vout;
        if vout.into_usize() >= tx.outputs.len() {
            return Err(StateError::PrevoutOutOfRange {
                index: self.index,
                vout,
                outputs: tx.outputs.len(),
            });
        }
        self.non_witness_tx = Some(tx);
        Ok(())
    }

    /// Replaces the previous transaction with the witness UTXO when the spent
    /// output is known to be segwit. Returns whether the replacement happened.
    pub fn try_slim_utxo(&mut self) -> bool {
        if self.non_witness_tx.is_none() {
            return false;
        }
        let Ok(coin) = self.signable_coin() else {
            return false;
        };
        if !coin.is_segwit() {
            return false;
        }
        self.witness_utxo = Some(coin.prevout);
        self.non_witness_tx = None;
        true
    }

    /// Removes all the data which are not needed once the input is finalized.
    pub fn clear_signing_data(&mut self) {
        self.partial_sigs.clear();
        self.bip32_derivation.clear();
        self.sighash_type = None;
        self.redeem_script = None;
        self.witness_script = None;
    }

    /// Redeem script revealed by the final scriptSig of a P2SH input.
    pub fn final_redeem_script(&self) -> Option<RedeemScript> {
        let script_pubkey = self.prev_txout()?.script_pubkey;
        if !script_pubkey.is_p2sh() {
            return None;
        }
        let script = self.final_script_sig.as_ref()?.push_items()?.pop()?;
        let redeem_script = RedeemScript::from_unsafe(script);
        (redeem_script.to_script_pubkey() == script_pubkey).then_some(redeem_script)
    }

    /// Witness script revealed by the final witness of a P2WSH input.
    pub fn final_witness_script(&self) -> Option<WitnessScript> {
        let script_pubkey = self.prev_txout()?.script_pubkey;
        let program = match self.final_redeem_script() {
            Some(redeem_script) => redeem_script.to_inner_script_pubkey(),
            None => script_pubkey,
        };
        if !program.is_p2wsh() {
            return None;
        }
        let script = self.final_witness.as_ref()?.elements().last()?.to_vec();
        let witness_script = WitnessScript::from_unsafe(script);
        (witness_script.to_script_pubkey() == program).then_some(witness_script)
    }

    /// Merges data about the same input from another PSBT.
    ///
    /// Keyed data are united, keeping the existing values. Other fields are
    /// taken from `other` only if they are absent here, with the exception of
    /// the final scriptSig and witness, which always replace the existing
    /// ones. If the input becomes finalized, the signing data are removed.
    pub fn combine(&mut self, other: Input) {
        fn fill<T>(field: &mut Option<T>, other: Option<T>) {
            if field.is_none() {
                *field = other;
            }
        }

        for (pk, sig) in other.partial_sigs {
            self.partial_sigs.entry(pk).or_insert(sig);
        }
        for (pk, origin) in other.bip32_derivation {
            self.bip32_derivation.entry(pk).or_insert(origin);
        }
        self.unknown.merge(other.unknown);

        fill(&mut self.non_witness_tx, other.non_witness_tx);
        fill(&mut self.witness_utxo, other.witness_utxo);
        fill(&mut self.redeem_script, other.redeem_script);
        fill(&mut self.witness_script, other.witness_script);
        fill(&mut self.sighash_type, other.sighash_type);
        fill(&mut self.sequence_number, other.sequence_number);
        fill(&mut self.required_time_lock, other.required_time_lock);
        fill(&mut self.required_height_lock, other.required_height_lock);
        fill(&mut self.original_sig_script, other.original_sig_script);
        fill(&mut self.original_witness, other.original_witness);

        if other.final_script_sig.is_some() {
            self.final_script_sig = other.final_script_sig;
        }
        if other.final_witness.is_some() {
            self.final_witness = other.final_witness;
        }
        if self.is_finalized() {
            self.clear_signing_data();
        }
    }

    /// Sets the final scriptSig and witness, treating empty ones as absent.
    pub(crate) fn set_final(&mut self, sig_script: SigScript, witness: Witness) {
        self.final_script_sig = (!sig_script.is_empty()).then_some(sig_script);
        self.final_witness = (!witness.is_empty()).then_some(witness);
    }
}

#[cfg(test)]
mod test {
    use derive::{LockTime, Sats, ScriptPubkey, SeqNo, TxIn, TxVer, VarIntArray};

    use super::*;
    use crate::SEQ_NO_MAX_VALUE;

    fn prev_tx(script_pubkey: ScriptPubkey) -> Tx {
        Tx {
            version: TxVer::V1,
            inputs: VarIntArray::from_checked(vec![TxIn {
                prev_output: Outpoint::coinbase(),
                sig_script: none!(),
                sequence: SeqNo::from_consensus_u32(SEQ_NO_MAX_VALUE),
                witness: none!(),
            }]),
            outputs: VarIntArray::from_checked(vec![TxOut::new(script_pubkey, Sats(5000))]),
            lock_time: LockTime::ZERO,
        }
    }

    #[test]
    fn coin_update() {
        let tx = prev_tx(WitnessScript::from_unsafe(vec![0x51]).to_script_pubkey());
        let utxo = Utxo::with_tx(tx.clone(), 0u32).unwrap();

        let mut input = Input::new(0);
        assert_eq!(
            input.update_from_coin(utxo.clone()),
            Err(StateError::OutpointMismatch {
                index: 0,
                expected: Outpoint::coinbase(),
                found: utxo.outpoint
            })
        );

        input.previous_outpoint = utxo.outpoint;
        input.update_from_coin(utxo.clone()).unwrap();
        assert_eq!(input.witness_utxo, Some(utxo.txout.clone()));
        assert_eq!(input.non_witness_tx, None);

        let legacy = prev_tx(ScriptPubkey::from_unsafe(vec![0x51]));
        let mut input = Input::new(0);
        input.previous_outpoint = Outpoint::new(legacy.txid(), 0u32);
        let utxo = Utxo::new(input.previous_outpoint, legacy.outputs[0].clone());
        assert_eq!(input.update_from_coin(utxo), Err(StateError::NonWitnessTxRequired(0)));
        input.update_from_coin(Utxo::with_tx(legacy.clone(), 0u32).unwrap()).unwrap();
        assert_eq!(input.non_witness_tx, Some(legacy));
        assert!(!input.try_slim_utxo());
    }

    #[test]
    fn slim_utxo() {
        let witness_script = WitnessScript::from_unsafe(vec![0x51]);
        let tx = prev_tx(witness_script.to_script_pubkey());
        let mut input = Input::new(0);
        input.previous_outpoint = Outpoint::new(tx.txid(), 0u32);
        input.update_from_tx(tx.clone()).unwrap();
        // the witness script is required to resolve the coin
        input.witness_script = Some(witness_script);
        assert!(input.try_slim_utxo());
        assert_eq!(input.witness_utxo.as_ref(), tx.outputs.first());
        assert_eq!(input.non_witness_tx, None);
    }

    #[test]
    fn combine_fills_absent() {
        let mut input = Input::new(0);
        input.redeem_script = Some(RedeemScript::from_unsafe(vec![0x51]));
        let mut other = Input::new(0);
        other.redeem_script = Some(RedeemScript::from_unsafe(vec![0x52]));
        other.sighash_type = Some(SighashType::all());
        input.combine(other);
        assert_eq!(input.redeem_script, Some(RedeemScript::from_unsafe(vec![0x51])));
        assert_eq!(input.sighash_type, Some(SighashType::all()));

        let mut finalized = Input::new(0);
        finalized.final_witness = Some(Witness::from_consensus_stack([vec![0x01]]));
        input.combine(finalized);
        assert!(input.is_finalized());
        assert_eq!(input.redeem_script, None);
        assert_eq!(input.sighash_type, None);
        assert_eq!(input.update_from_tx(prev_tx(none!())), Err(StateError::Finalized(0)));
    }
}
