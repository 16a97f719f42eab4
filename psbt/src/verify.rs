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


//! Verification of input satisfactions against the closed set of standard
//! script templates. This is not a general script interpreter: scripts outside
//! of [`ScriptTemplate`] are reported as non-standard.

use amplify::Wrapper;
use derive::secp256k1::{Message, SECP256K1};
use derive::{
    LegacyPk, LegacySig, PubkeyHash, RedeemScript, Sats, ScriptBytes, ScriptCode, ScriptPubkey,
    SigError, SigScript, Sighash, SighashCache, SighashError, SighashType, TxOut, WPubkeyHash,
    Witness, WitnessScript,
};

use crate::script::{LegacyPkExt, RedeemScriptExt, ScriptExt};
use crate::ScriptTemplate;

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ScriptError {
    /// scriptSig contains operations other than data pushes.
    SigScriptNotPushOnly,

    /// script satisfaction has {found} stack items while {expected} are required.
    StackSize { expected: usize, found: usize },

    /// redeem script doesn't match the P2SH output script.
    RedeemScriptMismatch,

    /// witness script doesn't match the P2WSH witness program.
    WitnessScriptMismatch,

    /// public key doesn't match the public key hash.
    PubkeyHashMismatch,

    /// witness program must be spent with the empty scriptSig.
    WitnessMalleated,

    /// nested witness program must be spent with a scriptSig containing just
    /// the redeem script.
    WitnessMalleatedP2sh,

    /// output which is not a witness program can't be spent with witness data.
    UnexpectedWitness,

    /// segwit v0 allows only compressed public keys.
    WitnessPubkeyType,

    /// witness version {0} is not supported.
    UnsupportedWitnessVersion(u8),

    /// invalid public key data in the script satisfaction.
    InvalidPubkey,

    /// invalid signature encoding. Details: {0}
    #[from]
    SigEncoding(SigError),

    /// signature doesn't match the public key and the signed transaction.
    InvalidSignature,

    /// CHECKMULTISIG dummy element must be empty.
    NonNullDummy,

    /// script doesn't match any of the supported templates.
    NonStandard,

    #[from]
    #[display(inner)]
    Sighash(SighashError),
}

/// Computes signature hash for the `script_code`. Segwit v0 sighashes commit
/// to the value of the spent output, which must be provided for them.
pub(crate) fn script_sighash(
    sighasher: &mut SighashCache,
    index: usize,
    script_code: &ScriptBytes,
    segwit_value: Option<Sats>,
    sighash_type: SighashType,
) -> Result<Sighash, SighashError> {
    match segwit_value {
        Some(value) => sighasher.segwit_sighash(
            index,
            &ScriptCode::from_inner(script_code.clone()),
            value,
            sighash_type,
        ),
        None => sighasher.legacy_sighash(
            index,
            &ScriptPubkey::from_inner(script_code.clone()),
            sighash_type.to_consensus_u32(),
        ),
    }
}

struct Checker<'cache> {
    sighasher: &'cache mut SighashCache,
    index: usize,
    segwit_value: Option<Sats>,
}

impl<'cache> Checker<'cache> {
    fn check_sig(
        &mut self,
        sig: &[u8],
        pk: LegacyPk,
        script_code: &ScriptBytes,
    ) -> Result<(), ScriptError> {
        let sig = LegacySig::from_bytes(sig)?;
        if self.segwit_value.is_some() && !pk.compressed {
            return Err(ScriptError::WitnessPubkeyType);
        }
        let sighash = script_sighash(
            self.sighasher,
            self.index,
            script_code,
            self.segwit_value,
            sig.sighash_type,
        )?;
        let mut ecdsa = sig.sig;
        ecdsa.normalize_s();
        SECP256K1
            .verify_ecdsa(&Message::from(sighash), &ecdsa, &pk.pubkey)
            .map_err(|_| ScriptError::InvalidSignature)
    }

    fn eval_template(&mut self, script: &ScriptBytes, stack: &[&[u8]]) -> Result<(), ScriptError> {
        match ScriptTemplate::classify(script).ok_or(ScriptError::NonStandard)? {
            ScriptTemplate::P2pk(pk) => {
                let [sig] = stack else {
                    return Err(ScriptError::StackSize {
                        expected: 1,
                        found: stack.len(),
                    });
                };
                self.check_sig(sig, pk, script)
            }
            ScriptTemplate::P2pkh(hash) => {
                let [sig, pk] = stack else {
                    return Err(ScriptError::StackSize {
                        expected: 2,
                        found: stack.len(),
                    });
                };
                let pk = LegacyPk::from_bytes(pk).map_err(|_| ScriptError::InvalidPubkey)?;
                if PubkeyHash::from(pk) != hash {
                    return Err(ScriptError::PubkeyHashMismatch);
                }
                self.check_sig(sig, pk, script)
            }
            ScriptTemplate::Multisig(multisig) => {
                let threshold = multisig.threshold as usize;
                if stack.len() != threshold + 1 {
                    return Err(ScriptError::StackSize {
                        expected: threshold + 1,
                        found: stack.len(),
                    });
                }
                if !stack[0].is_empty() {
                    return Err(ScriptError::NonNullDummy);
                }
                // signatures must follow the order of the keys in the script
                let mut keys = multisig.keys.iter();
                'sigs: for sig in &stack[1..] {
                    for pk in keys.by_ref() {
                        if self.check_sig(sig, *pk, script).is_ok() {
                            continue 'sigs;
                        }
                    }
                    return Err(ScriptError::InvalidSignature);
                }
                Ok(())
            }
            ScriptTemplate::P2wpkh(_) => Err(ScriptError::NonStandard),
        }
    }

    fn eval_witness_program(
        &mut self,
        program: &ScriptPubkey,
        witness: &Witness,
    ) -> Result<(), ScriptError> {
        match program.witness_version() {
            Some(0) => {}
            Some(version) => return Err(ScriptError::UnsupportedWitnessVersion(version)),
            None => return Err(ScriptError::NonStandard),
        }
        let stack = witness.elements().collect::<Vec<_>>();
        if program.is_p2wpkh() {
            let [sig, pk] = stack.as_slice() else {
                return Err(ScriptError::StackSize {
                    expected: 2,
                    found: stack.len(),
                });
            };
            let pk = LegacyPk::from_bytes(pk).map_err(|_| ScriptError::InvalidPubkey)?;
            let Some(compressed) = pk.to_compressed_pk() else {
                return Err(ScriptError::WitnessPubkeyType);
            };
            if program.as_script_bytes().as_slice()[2..]
                != <[u8; 20]>::from(WPubkeyHash::from(compressed))
            {
                return Err(ScriptError::PubkeyHashMismatch);
            }
            let script_code = ScriptPubkey::p2pkh(PubkeyHash::from(pk));
            self.check_sig(sig, pk, script_code.as_script_bytes())
        } else if program.is_p2wsh() {
            let Some((witness_script, stack)) = stack.split_last() else {
                return Err(ScriptError::StackSize {
                    expected: 1,
                    found: 0,
                });
            };
            let witness_script = WitnessScript::from_unsafe(witness_script.to_vec());
            if witness_script.to_script_pubkey() != *program {
                return Err(ScriptError::WitnessScriptMismatch);
            }
            self.eval_template(witness_script.as_script_bytes(), stack)
        } else {
            Err(ScriptError::NonStandard)
        }
    }
}

/// Verifies that the scriptSig and witness satisfy the output script being
/// spent by the transaction input at `index`.
pub fn verify_input(
    sighasher: &mut SighashCache,
    index: usize,
    sig_script: &SigScript,
    witness: &Witness,
    prevout: &TxOut,
) -> Result<(), ScriptError> {
    let pushes = sig_script.push_items().ok_or(ScriptError::SigScriptNotPushOnly)?;
    let pushes = pushes.iter().map(Vec::as_slice).collect::<Vec<_>>();
    let script_pubkey = &prevout.script_pubkey;
    let mut checker = Checker {
        sighasher,
        index,
        segwit_value: None,
    };

    if script_pubkey.is_witness_program() {
        if !sig_script.is_empty() {
            return Err(ScriptError::WitnessMalleated);
        }
        checker.segwit_value = Some(prevout.value);
        return checker.eval_witness_program(script_pubkey, witness);
    }

    if script_pubkey.is_p2sh() {
        let Some((redeem_script, stack)) = pushes.split_last() else {
            return Err(ScriptError::StackSize {
                expected: 1,
                found: 0,
            });
        };
        let redeem_script = RedeemScript::from_unsafe(redeem_script.to_vec());
        if redeem_script.to_script_pubkey() != *script_pubkey {
            return Err(ScriptError::RedeemScriptMismatch);
        }
        let program = redeem_script.to_inner_script_pubkey();
        if program.is_witness_program() {
            if !stack.is_empty() {
                return Err(ScriptError::WitnessMalleatedP2sh);
            }
            checker.segwit_value = Some(prevout.value);
            return checker.eval_witness_program(&program, witness);
        }
        if !witness.is_empty() {
            return Err(ScriptError::UnexpectedWitness);
        }
        return checker.eval_template(redeem_script.as_script_bytes(), stack);
    }

    if !witness.is_empty() {
        return Err(ScriptError::UnexpectedWitness);
    }
    checker.eval_template(script_pubkey.as_script_bytes(), &pushes)
}

#[cfg(test)]
mod test {
    use derive::secp256k1::SecretKey;
    use derive::{LockTime, Outpoint, SeqNo, Tx, TxIn, TxVer, Txid, VarIntArray};

    use super::*;
    use crate::script::SigScriptExt;
    use crate::MultisigScript;

    fn key(byte: u8) -> (SecretKey, LegacyPk) {
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        (sk, LegacyPk::compressed(sk.public_key(SECP256K1)))
    }

    fn sighasher(prevout: &TxOut) -> SighashCache {
        let tx = Tx {
            version: TxVer::V2,
            inputs: VarIntArray::from_checked(vec![TxIn {
                prev_output: Outpoint::new(Txid::from([1u8; 32]), 0u32),
                sig_script: none!(),
                sequence: SeqNo::from_consensus_u32(u32::MAX),
                witness: none!(),
            }]),
            outputs: VarIntArray::from_checked(vec![TxOut::new(ScriptPubkey::new(), 90_000u64)]),
            lock_time: LockTime::ZERO,
        };
        SighashCache::new(tx, vec![prevout.clone()]).unwrap()
    }

    fn sign(sk: &SecretKey, sighash: Sighash) -> Vec<u8> {
        let sig = SECP256K1.sign_ecdsa(&Message::from(sighash), sk);
        LegacySig::sighash_all(sig).to_vec()
    }

    #[test]
    fn p2pkh() {
        let (sk, pk) = key(1);
        let prevout = TxOut::new(ScriptPubkey::p2pkh(PubkeyHash::from(pk)), 100_000u64);
        let mut cache = sighasher(&prevout);
        let sighash = cache
            .legacy_sighash(0, &prevout.script_pubkey, SighashType::all().to_consensus_u32())
            .unwrap();
        let sig = sign(&sk, sighash);
        let sig_script = SigScript::from_push_items([sig.as_slice(), pk.to_vec().as_slice()]);
        assert_eq!(verify_input(&mut cache, 0, &sig_script, &none!(), &prevout), Ok(()));

        let (_, other) = key(2);
        let sig_script = SigScript::from_push_items([sig.as_slice(), other.to_vec().as_slice()]);
        assert_eq!(
            verify_input(&mut cache, 0, &sig_script, &none!(), &prevout),
            Err(ScriptError::PubkeyHashMismatch)
        );
    }

    #[test]
    fn p2wsh_multisig_order() {
        let (sk1, pk1) = key(1);
        let (sk2, pk2) = key(2);
        let witness_script = MultisigScript::new(2, [pk1, pk2]).to_witness_script();
        let prevout = TxOut::new(witness_script.to_script_pubkey(), 100_000u64);
        let mut cache = sighasher(&prevout);
        let sighash = cache
            .segwit_sighash(
                0,
                &ScriptCode::with_p2wsh(&witness_script),
                Sats::from_sats(100_000u64),
                SighashType::all(),
            )
            .unwrap();
        let sig1 = sign(&sk1, sighash);
        let sig2 = sign(&sk2, sighash);
        let script_bytes = witness_script.as_script_bytes().clone().into_vec();

        let witness =
            Witness::from_consensus_stack([vec![], sig1.clone(), sig2.clone(), script_bytes.clone()]);
        assert_eq!(verify_input(&mut cache, 0, &none!(), &witness, &prevout), Ok(()));

        let witness = Witness::from_consensus_stack([vec![], sig2, sig1, script_bytes]);
        assert_eq!(
            verify_input(&mut cache, 0, &none!(), &witness, &prevout),
            Err(ScriptError::InvalidSignature)
        );
    }

    #[test]
    fn witness_program_with_sig_script() {
        let (_, pk) = key(3);
        let compressed = pk.to_compressed_pk().unwrap();
        let prevout = TxOut::new(ScriptPubkey::p2wpkh(WPubkeyHash::from(compressed)), 1000u64);
        let mut cache = sighasher(&prevout);
        let sig_script = SigScript::from_push_items([[1u8].as_slice()]);
        assert_eq!(
            verify_input(&mut cache, 0, &sig_script, &none!(), &prevout),
            Err(ScriptError::WitnessMalleated)
        );
    }
}
