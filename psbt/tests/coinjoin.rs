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

mod common;

use common::{funding_tx, key, pk, spending_psbt, wpkh};
use derive::{ScriptPubkey, SighashType, TxOut};
use psbt::{JoinError, SanityError};

fn p2wpkh(byte: u8) -> ScriptPubkey { wpkh(pk(byte)) }

#[test]
fn join_and_sign() {
    let alice = spending_psbt(&[funding_tx(p2wpkh(1), 40_000, 0)]);
    let bob = spending_psbt(&[funding_tx(p2wpkh(2), 60_000, 1), funding_tx(p2wpkh(3), 5000, 2)]);

    let mut joined = alice.coin_join(&bob).unwrap();
    assert_eq!(joined.inputs().len(), 3);
    assert_eq!(joined.outputs().len(), 2);
    assert_eq!(
        joined.inputs().map(|input| input.index()).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(joined.fee(), alice.fee().zip(bob.fee()).map(|(a, b)| a + b));

    // each party signs the joined transaction
    let mut alice_signed = joined.clone();
    alice_signed.sign_input(0, &key(1).0, SighashType::all()).unwrap();
    let mut bob_signed = joined.clone();
    bob_signed.sign_input(1, &key(2).0, SighashType::all()).unwrap();
    bob_signed.sign_input(2, &key(3).0, SighashType::all()).unwrap();

    joined = alice_signed.combine(bob_signed).unwrap();
    assert_eq!(joined.finalize(), Ok(3));
    let tx = joined.extract_tx().unwrap();
    assert_eq!(tx.inputs.len(), 3);
    assert!(tx.inputs.iter().all(|txin| txin.witness.len() == 2));
}

#[test]
fn double_spend() {
    let funding = funding_tx(p2wpkh(1), 40_000, 0);
    let alice = spending_psbt(&[funding.clone()]);
    let bob = spending_psbt(&[funding_tx(p2wpkh(2), 60_000, 1), funding]);
    assert_eq!(
        alice.coin_join(&bob),
        Err(JoinError::DoubleSpend(alice.input(0).unwrap().previous_outpoint))
    );
}

#[test]
fn insane_party() {
    let alice = spending_psbt(&[funding_tx(p2wpkh(1), 40_000, 0)]);
    let mut bob = spending_psbt(&[funding_tx(p2wpkh(2), 60_000, 1)]);
    let input = bob.input_mut(0).unwrap();
    input.non_witness_tx = Some(funding_tx(p2wpkh(2), 60_000, 1));
    input.witness_utxo = Some(TxOut::new(p2wpkh(2), 60_000u64));

    let Err(JoinError::Insane(err)) = alice.coin_join(&bob) else {
        panic!("insane PSBT was joined");
    };
    assert_eq!(err.0.len(), 1);
    assert_eq!(err.0[0].index, 0);
    assert_eq!(err.0[0].error, SanityError::BothUtxos);

    // sanity of the PSBT which is joined to is not required
    assert!(bob.coin_join(&alice).is_ok());
}
