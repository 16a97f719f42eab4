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

use std::str::FromStr;

use common::{funding_tx, key, pk, spending_psbt, wpkh};
use derive::{
    ConsensusEncode, DerivationIndex, KeyOrigin, LockHeight, LockTime, Outpoint, PubkeyHash, Sats,
    ScriptPubkey, SeqNo, SigScript, SighashType, TxOut, Txid, WitnessScript, Xpriv,
};
use psbt::{MapName, Psbt, PsbtError, PsbtVer, RecordKey, SigScriptExt, SEQ_NO_MAX_VALUE};

fn v2_psbt() -> Psbt {
    let master = Xpriv::new_master(true, &[0x07; 32]);
    let account = [DerivationIndex::hardened(84), DerivationIndex::hardened(1)];
    let xpub = master.derive_priv(account).unwrap().to_xpub();
    let origin = KeyOrigin::new(master.fingerprint(), account);

    let mut psbt = Psbt::create(PsbtVer::V2);
    psbt.fallback_locktime = Some(LockTime::from_consensus_u32(800_000));
    psbt.xpubs.insert(xpub, origin.clone());
    psbt.unknown.insert(RecordKey::new(0xFC, b"\x04test"), vec![0x01, 0x02]);

    let (sk, pk) = key(1);
    let input = psbt
        .construct_input(Outpoint::new(Txid::from([0x11; 32]), 3u32), SeqNo::ZERO)
        .unwrap();
    input.witness_utxo = Some(TxOut::new(wpkh(pk), 25_000u64));
    input.required_height_lock = LockHeight::try_from_consensus_u32(799_000).ok();
    input.unknown.insert(RecordKey::new(0xF1, []), vec![0xFF]);
    psbt.add_input_key_path(0, pk, origin.child([DerivationIndex::normal(0)])).unwrap();
    psbt.sign_input(0, &sk, SighashType::all_anyone_can_pay()).unwrap();

    let witness_script = WitnessScript::from_unsafe(vec![0x51]);
    let output = psbt.construct_output(witness_script.to_script_pubkey(), Sats(24_000)).unwrap();
    output.witness_script = Some(witness_script);
    output.unknown.insert(RecordKey::new(0xF2, [0x01]), vec![]);
    psbt.add_output_key_path(0, pk, origin.child([DerivationIndex::normal(1)])).unwrap();
    psbt
}

#[test]
fn v2_roundtrip() {
    let psbt = v2_psbt();
    let data = psbt.serialize();
    assert_eq!(&data[..5], b"psbt\xFF");
    let parsed = Psbt::deserialize(&data).unwrap();
    assert_eq!(parsed, psbt);
    assert_eq!(parsed.serialize(), data);
    assert_eq!(parsed.lock_time(), LockTime::from_consensus_u32(799_000));
    assert_eq!(parsed.input(0).unwrap().sighash_type, Some(SighashType::all_anyone_can_pay()));
}

#[test]
fn v0_roundtrip() {
    let funding = funding_tx(ScriptPubkey::p2pkh(PubkeyHash::from(pk(2))), 10_000, 0);
    let psbt = spending_psbt(&[funding]);
    assert_eq!(psbt.version, PsbtVer::V0);
    let parsed = Psbt::deserialize(psbt.serialize()).unwrap();
    assert_eq!(parsed, psbt);
    assert_eq!(parsed.txid(), psbt.txid());
}

#[test]
fn text_encodings() {
    let psbt = v2_psbt();
    let base64 = psbt.to_string();
    assert!(base64.starts_with("cHNidP8"));
    assert_eq!(base64, psbt.to_base64());
    assert_eq!(Psbt::from_str(&base64).unwrap(), psbt);
    assert_eq!(Psbt::from_str(&psbt.to_base16()).unwrap(), psbt);
    assert_eq!(format!("{psbt:x}"), psbt.to_base16());
    assert!(Psbt::from_str("not a psbt").is_err());
}

#[test]
fn invalid_magic() {
    let mut data = v2_psbt().serialize();
    data[4] = 0x00;
    assert_eq!(Psbt::deserialize(data), Err(PsbtError::InvalidMagic(*b"psbt\x00")));
}

#[test]
fn map_count() {
    let mut data = v2_psbt().serialize();
    data.push(0x00);
    assert_eq!(
        Psbt::deserialize(&data),
        Err(PsbtError::MapCountMismatch {
            expected: 3,
            found: 4
        })
    );
    data.truncate(data.len() - 2);
    assert_eq!(Psbt::deserialize(&data), Err(PsbtError::MalformedRecord(2)));
}

#[test]
fn repeated_input_key() {
    let mut psbt = Psbt::create(PsbtVer::V2);
    let sequence = SeqNo::from_consensus_u32(SEQ_NO_MAX_VALUE);
    psbt.construct_input(Outpoint::coinbase(), sequence).unwrap();
    let maps = psbt.to_maps();
    let mut data = Psbt::MAGIC.to_vec();
    maps[0].encode(&mut data).unwrap();
    data.extend([0x02, 0xF0, 0x01, 0x01, 0xAA, 0x02, 0xF0, 0x01, 0x01, 0xBB, 0x00]);
    assert_eq!(
        Psbt::deserialize(data),
        Err(PsbtError::RepeatedKey(1, RecordKey::new(0xF0, [0x01])))
    );
}

#[test]
fn repeated_global_key() {
    let mut data = Psbt::MAGIC.to_vec();
    // PSBT version record given twice with different values
    data.extend([0x01, 0xFB, 0x04, 0x02, 0x00, 0x00, 0x00]);
    data.extend([0x01, 0xFB, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(
        Psbt::deserialize(data),
        Err(PsbtError::RepeatedKey(0, RecordKey::new(0xFB, [])))
    );
}

#[test]
fn repeated_output_key() {
    let mut psbt = Psbt::create(PsbtVer::V2);
    psbt.construct_input(Outpoint::coinbase(), SeqNo::ZERO).unwrap();
    psbt.construct_output(ScriptPubkey::new(), Sats(500)).unwrap();
    let maps = psbt.to_maps();
    let mut data = Psbt::MAGIC.to_vec();
    maps[0].encode(&mut data).unwrap();
    maps[1].encode(&mut data).unwrap();
    // output amount record given twice
    data.extend([0x01, 0x03, 0x08, 0xF4, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    data.extend([0x01, 0x03, 0x08, 0xE8, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    data.extend([0x01, 0x04, 0x00, 0x00]);
    assert_eq!(
        Psbt::deserialize(data),
        Err(PsbtError::RepeatedKey(2, RecordKey::new(0x03, [])))
    );
}

#[test]
fn truncated_value() {
    let mut data = Psbt::MAGIC.to_vec();
    data.extend([0x01, 0x00, 0x05, 0xAA]);
    assert_eq!(Psbt::deserialize(data), Err(PsbtError::MalformedRecord(0)));
}

#[test]
fn required_keys() {
    let psbt = v2_psbt();
    let mut maps = psbt.to_maps();
    maps[1].remove(&RecordKey::new(0x0e, []));
    assert_eq!(
        Psbt::from_maps(maps),
        Err(PsbtError::RequiredKeyAbsent(MapName::Input, 0x0e, PsbtVer::V2))
    );

    let mut maps = psbt.to_maps();
    maps[0].insert(RecordKey::new(0x00, []), psbt.to_unsigned_tx().consensus_serialize());
    assert_eq!(
        Psbt::from_maps(maps),
        Err(PsbtError::UnexpectedKey(MapName::Global, 0x00, PsbtVer::V2))
    );
}

#[test]
fn signed_unsigned_tx() {
    let funding = funding_tx(ScriptPubkey::p2pkh(PubkeyHash::from(pk(2))), 10_000, 0);
    let mut tx = spending_psbt(&[funding]).to_unsigned_tx();
    tx.inputs[0].sig_script = SigScript::from_push_items([[0x01u8].as_slice()]);
    assert_eq!(Psbt::from_unsigned_tx(tx.clone()), Err(PsbtError::SignedUnsignedTx));

    // signatures are remembered, but not serialized
    let psbt = Psbt::from_tx(tx);
    let parsed = Psbt::deserialize(psbt.serialize()).unwrap();
    assert_eq!(parsed.to_unsigned_tx(), psbt.to_unsigned_tx());
    assert!(parsed.to_unsigned_tx().inputs[0].sig_script.is_empty());
}
