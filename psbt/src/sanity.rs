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

use std::fmt::{self, Display, Formatter};

use derive::{Txid, Vout};

use crate::script::RedeemScriptExt;
use crate::{Input, Psbt};

/// Violation of the consistency rules for the data of a single input.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SanityError {
    /// input is finalized, but still contains partial signatures, key
    /// derivations, sighash type or scripts.
    FinalizedWithSigningData,

    /// both witness and non-witness UTXOs are present.
    BothUtxos,

    /// witness script is present without the witness UTXO.
    WitnessScriptWithoutWitnessUtxo,

    /// final witness is present without the witness UTXO.
    FinalWitnessWithoutWitnessUtxo,

    /// non-witness UTXO {found} doesn't match the spent transaction {expected}.
    NonWitnessTxMismatch { expected: Txid, found: Txid },

    /// spent output #{vout} is out of range of the non-witness UTXO having
    /// {outputs} outputs.
    NonWitnessVoutOutOfRange { vout: Vout, outputs: usize },

    /// redeem script doesn't match the script of the spent output.
    RedeemScriptMismatch,

    /// witness script doesn't match the witness program of the spent output.
    WitnessScriptMismatch,

    /// witness UTXO is neither P2SH nor a witness program.
    WitnessUtxoNotSegwit,
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("input #{index}: {error}")]
pub struct InputSanityError {
    pub index: usize,
    pub error: SanityError,
}

/// All the sanity violations found in a PSBT.
#[derive(Clone, Eq, PartialEq, Debug, Default, Error)]
pub struct InsanePsbt(pub Vec<InputSanityError>);

impl Display for InsanePsbt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("PSBT fails sanity check:")?;
        for err in &self.0 {
            write!(f, "\n- {err}")?;
        }
        Ok(())
    }
}

impl Input {
    /// Checks consistency of the input data, reporting all the violations.
    pub fn check_sanity(&self) -> Vec<SanityError> {
        let mut errors = vec![];

        if self.is_finalized()
            && (!self.partial_sigs.is_empty()
                || !self.bip32_derivation.is_empty()
                || self.sighash_type.is_some()
                || self.redeem_script.is_some()
                || self.witness_script.is_some())
        {
            errors.push(SanityError::FinalizedWithSigningData);
        }
        if self.witness_utxo.is_some() && self.non_witness_tx.is_some() {
            errors.push(SanityError::BothUtxos);
        }
        if self.witness_utxo.is_none() && self.witness_script.is_some() {
            errors.push(SanityError::WitnessScriptWithoutWitnessUtxo);
        }
        if self.witness_utxo.is_none() && self.final_witness.is_some() {
            errors.push(SanityError::FinalWitnessWithoutWitnessUtxo);
        }

        if let Some(tx) = &self.non_witness_tx {
            let expected = self.previous_outpoint.txid;
            let found = tx.txid();
            if found != expected {
                errors.push(SanityError::NonWitnessTxMismatch { expected, found });
            }
            let vout = self.previous_outpoint.vout;
            match tx.outputs.get(vout.into_usize()) {
                None => errors.push(SanityError::NonWitnessVoutOutOfRange {
                    vout,
                    outputs: tx.outputs.len(),
                }),
                Some(txout) => {
                    if let Some(redeem_script) = &self.redeem_script {
                        if redeem_script.to_script_pubkey() != txout.script_pubkey {
                            errors.push(SanityError::RedeemScriptMismatch);
                        }
                    }
                }
            }
        }

        if let Some(txout) = &self.witness_utxo {
            let script_pubkey = &txout.script_pubkey;
            if !script_pubkey.is_p2sh() && !script_pubkey.is_witness_program() {
                errors.push(SanityError::WitnessUtxoNotSegwit);
            }
            let program = match &self.redeem_script {
                Some(redeem_script) => {
                    if redeem_script.to_script_pubkey() != *script_pubkey {
                        errors.push(SanityError::RedeemScriptMismatch);
                    }
                    redeem_script.to_inner_script_pubkey()
                }
                None => script_pubkey.clone(),
            };
            if let Some(witness_script) = &self.witness_script {
                if witness_script.to_script_pubkey() != program {
                    errors.push(SanityError::WitnessScriptMismatch);
                }
            }
        }

        errors
    }
}

impl Psbt {
    /// Runs sanity checks for all the inputs.
    pub fn check_sanity(&self) -> Vec<InputSanityError> {
        self.inputs()
            .flat_map(|input| {
                input.check_sanity().into_iter().map(|error| InputSanityError {
                    index: input.index(),
                    error,
                })
            })
            .collect()
    }

    pub fn assert_sanity(&self) -> Result<(), InsanePsbt> {
        let errors = self.check_sanity();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(InsanePsbt(errors))
        }
    }
}

#[cfg(test)]
mod test {
    use derive::{
        LockTime, Outpoint, Sats, ScriptPubkey, SeqNo, Tx, TxIn, TxOut, TxVer, VarIntArray,
        Witness, WitnessScript,
    };

    use super::*;
    use crate::{PsbtVer, SEQ_NO_MAX_VALUE};

    fn seq_final() -> SeqNo { SeqNo::from_consensus_u32(SEQ_NO_MAX_VALUE) }

    fn witness_script() -> WitnessScript { WitnessScript::from_unsafe(vec![0x51]) }

    #[test]
    fn accumulates_violations() {
        let tx = Tx {
            version: TxVer::V1,
            inputs: VarIntArray::from_checked(vec![TxIn {
                prev_output: Outpoint::coinbase(),
                sig_script: none!(),
                sequence: seq_final(),
                witness: none!(),
            }]),
            outputs: VarIntArray::from_checked(vec![TxOut::new(
                ScriptPubkey::from_unsafe(vec![0x51]),
                Sats(100),
            )]),
            lock_time: LockTime::ZERO,
        };
        let mut input = Input::new(0);
        input.previous_outpoint = Outpoint::new(Txid::from([7; 32]), 3u32);
        input.non_witness_tx = Some(tx);
        input.witness_utxo = Some(TxOut::new(ScriptPubkey::from_unsafe(vec![0x51]), Sats(100)));
        input.witness_script = Some(witness_script());

        let errors = input.check_sanity();
        assert!(errors.contains(&SanityError::BothUtxos));
        assert!(errors.contains(&SanityError::WitnessUtxoNotSegwit));
        assert!(errors.contains(&SanityError::WitnessScriptMismatch));
        assert!(errors.contains(&SanityError::NonWitnessVoutOutOfRange {
            vout: Vout::from_u32(3),
            outputs: 1
        }));
        assert!(errors.iter().any(|err| matches!(err, SanityError::NonWitnessTxMismatch { .. })));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn finalized_input() {
        let mut input = Input::new(0);
        input.witness_utxo = Some(TxOut::new(witness_script().to_script_pubkey(), Sats(100)));
        input.final_witness = Some(Witness::from_consensus_stack([witness_script().to_vec()]));
        assert_eq!(input.check_sanity(), vec![]);

        input.redeem_script = Some(witness_script().to_redeem_script());
        assert_eq!(input.check_sanity(), vec![
            SanityError::FinalizedWithSigningData,
            SanityError::RedeemScriptMismatch
        ]);

        let mut psbt = Psbt::create(PsbtVer::V2);
        psbt.construct_input(Outpoint::coinbase(), seq_final()).unwrap();
        psbt.construct_input(Outpoint::coinbase(), seq_final()).unwrap();
        psbt.inputs[1] = Input { index: 1, ..input };
        let err = psbt.assert_sanity().unwrap_err();
        assert_eq!(err.0.len(), 2);
        assert!(err.0.iter().all(|err| err.index == 1));
        assert!(err.to_string().contains("input #1"));
    }
}
