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

#![allow(dead_code)]

use derive::secp256k1::{SecretKey, SECP256K1};
use derive::{
    LegacyPk, LockTime, Outpoint, Sats, ScriptPubkey, SeqNo, SigScript, Tx, TxIn, TxOut, TxVer,
    VarIntArray, WPubkeyHash, Witness,
};
use psbt::{LegacyPkExt, Psbt, Utxo, SEQ_NO_MAX_VALUE};

pub fn key(byte: u8) -> (SecretKey, LegacyPk) {
    let sk = SecretKey::from_slice(&[byte; 32]).expect("valid secret key");
    (sk, LegacyPk::compressed(sk.public_key(SECP256K1)))
}

pub fn pk(byte: u8) -> LegacyPk { key(byte).1 }

pub fn wpkh(pk: LegacyPk) -> ScriptPubkey {
    ScriptPubkey::p2wpkh(WPubkeyHash::from(pk.to_compressed_pk().expect("compressed key")))
}

pub fn txin(prev_output: Outpoint, sequence: SeqNo) -> TxIn {
    TxIn {
        prev_output,
        sig_script: SigScript::new(),
        sequence,
        witness: Witness::new(),
    }
}

/// Transaction funding an output with the given script.
pub fn funding_tx(script_pubkey: ScriptPubkey, value: u64, salt: u32) -> Tx {
    Tx {
        version: TxVer::V2,
        inputs: VarIntArray::from_checked(vec![txin(
            Outpoint::coinbase(),
            SeqNo::from_consensus_u32(salt),
        )]),
        outputs: VarIntArray::from_checked(vec![TxOut::new(script_pubkey, value)]),
        lock_time: LockTime::ZERO,
    }
}

/// Version 0 PSBT spending the first outputs of the `funding` transactions
/// into a single output.
pub fn spending_psbt(funding: &[Tx]) -> Psbt {
    let value = funding.iter().map(|tx| tx.outputs[0].value).sum::<Sats>();
    let tx = Tx {
        version: TxVer::V2,
        inputs: VarIntArray::from_iter_checked(funding.iter().map(|prev| {
            txin(Outpoint::new(prev.txid(), 0u32), SeqNo::from_consensus_u32(SEQ_NO_MAX_VALUE))
        })),
        outputs: VarIntArray::from_checked(vec![TxOut::new(
            wpkh(pk(99)),
            value.checked_sub(1000u64).expect("enough funds"),
        )]),
        lock_time: LockTime::ZERO,
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).expect("unsigned transaction");
    for (input, prev) in psbt.inputs_mut().zip(funding) {
        input
            .update_from_coin(Utxo::with_tx(prev.clone(), 0u32).expect("output exists"))
            .expect("matching coin");
    }
    psbt
}
