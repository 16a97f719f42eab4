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

use std::io::{self, Read, Write};

use amplify::Wrapper;
use derive::{
    ConsensusDataError, ConsensusDecode, ConsensusDecodeError, ConsensusEncode, DerivationIndex,
    DerivationPath, InvalidPubkey, KeyOrigin, LegacyPk, LegacySig, LockHeight, LockTime,
    LockTimestamp, NonStandardValue, Outpoint, RedeemScript, Sats, ScriptPubkey, SeqNo, SigError,
    SigScript, SighashType, Tx, TxIn, TxOut, TxVer, Txid, VarInt, VarIntArray, Vout, Witness,
    WitnessScript, XkeyDecodeError, Xpub, XpubFp,
};

use crate::keys::*;
use crate::{
    GlobalKey, Input, InputKey, KeyType, Map, MapName, Maps, ModifiableFlags, Output, OutputKey,
    Psbt, PsbtUnsupportedVer, PsbtVer, RecordKey, ValueData,
};

#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(inner)]
pub enum DecodeError {
    Io(io::ErrorKind),

    #[from]
    Psbt(PsbtError),
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => DecodeError::Psbt(PsbtError::UnexpectedEod),
            kind => DecodeError::Io(kind),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum PsbtError {
    /// unexpected end of data.
    UnexpectedEod,

    /// invalid magic bytes {0:02x?}.
    InvalidMagic([u8; 5]),

    /// malformed record in PSBT map #{0}.
    MalformedRecord(usize),

    /// repeated key {1} in PSBT map #{0}.
    RepeatedKey(usize, RecordKey),

    /// PSBT contains {found} maps, while its transaction requires {expected}.
    MapCountMismatch { expected: u64, found: usize },

    /// {0} key {1:#04x} must not be present in PSBT {2}.
    UnexpectedKey(MapName, u8, PsbtVer),

    /// {0} key {1:#04x} required for PSBT {2} is not present.
    RequiredKeyAbsent(MapName, u8, PsbtVer),

    /// {0} key {1:#04x} must not contain additional key data.
    NonEmptyKeyData(MapName, u8),

    /// value of {0} key {1:#04x} has invalid length {2}.
    InvalidValueLength(MapName, u8, usize),

    #[from]
    #[display(inner)]
    UnsupportedVersion(PsbtUnsupportedVer),

    /// unsigned transaction inside PSBT contains signatures or witness data.
    SignedUnsignedTx,

    /// non-witness transaction {found} doesn't match the transaction {expected}
    /// spent by input #{index}.
    NonWitnessTxMismatch { index: usize, expected: Txid, found: Txid },

    /// invalid lock height value {0}.
    InvalidLockHeight(u32),

    /// invalid lock timestamp {0}.
    InvalidLockTimestamp(u32),

    /// invalid public key: {0}
    #[from]
    InvalidPubkey(InvalidPubkey<65>),

    /// invalid signature: {0}
    #[from]
    InvalidSig(SigError),

    /// invalid sighash type: {0}
    #[from]
    InvalidSighash(NonStandardValue<u32>),

    /// invalid extended public key: {0}
    #[from]
    InvalidXpub(XkeyDecodeError),

    /// BIP32 derivation data have invalid length {0}.
    InvalidKeyOrigin(usize),

    /// invalid consensus data in PSBT value: {0}
    #[from]
    Consensus(ConsensusDecodeError),
}

fn value_from<T: ConsensusDecode>(value: &ValueData) -> Result<T, PsbtError> {
    T::consensus_deserialize(value.as_slice()).map_err(PsbtError::from)
}

/// Decodes transaction without preallocating memory for its untrusted input
/// count.
///
/// PSBT v0 unsigned transaction is always serialized in the non-witness
/// format, and may have no inputs at all; in that case the zero prefix is the
/// input count rather than the segwit marker, so `witness_format` must be
/// unset for it.
fn tx_from(value: &ValueData, witness_format: bool) -> Result<Tx, PsbtError> {
    let mut reader = value.as_slice();
    let tx = decode_tx(&mut reader, witness_format)?;
    if !reader.is_empty() {
        return Err(ConsensusDecodeError::Data(ConsensusDataError::DataNotConsumed).into());
    }
    Ok(tx)
}

fn decode_tx(reader: &mut impl Read, witness_format: bool) -> Result<Tx, ConsensusDecodeError> {
    let version = TxVer::consensus_decode(reader)?;
    let prefix = VarInt::consensus_decode(reader)?;
    let segwit = witness_format && prefix == 0u8;
    let input_count = if segwit {
        let flag = u8::consensus_decode(reader)?;
        if flag != 0x01 {
            return Err(ConsensusDataError::UnsupportedSegwitFlag(flag).into());
        }
        VarInt::consensus_decode(reader)?
    } else {
        prefix
    };
    let mut inputs = Vec::new();
    for _ in 0..input_count.to_u64() {
        inputs.push(TxIn::consensus_decode(reader)?);
    }
    let mut inputs = VarIntArray::try_from(inputs)?;
    let outputs = VarIntArray::<TxOut>::consensus_decode(reader)?;
    if segwit {
        for input in &mut inputs {
            input.witness = Witness::consensus_decode(reader)?;
        }
    }
    let lock_time = LockTime::consensus_decode(reader)?;
    Ok(Tx {
        version,
        inputs,
        outputs,
        lock_time,
    })
}

fn u32_from<K: KeyType>(key: K, value: &ValueData) -> Result<u32, PsbtError> {
    let bytes: [u8; 4] = value
        .as_slice()
        .try_into()
        .map_err(|_| PsbtError::InvalidValueLength(K::MAP, key.into_u8(), value.len()))?;
    Ok(u32::from_le_bytes(bytes))
}

fn origin_from(value: &ValueData) -> Result<KeyOrigin, PsbtError> {
    let data = value.as_slice();
    if data.len() < 4 || data.len() % 4 != 0 {
        return Err(PsbtError::InvalidKeyOrigin(data.len()));
    }
    let mut fp = [0u8; 4];
    fp.copy_from_slice(&data[..4]);
    let derivation = data[4..]
        .chunks_exact(4)
        .map(|chunk| {
            let mut index = [0u8; 4];
            index.copy_from_slice(chunk);
            DerivationIndex::from_index(u32::from_le_bytes(index))
        })
        .collect::<DerivationPath>();
    Ok(KeyOrigin::new(XpubFp::from_byte_array(fp), derivation))
}

fn origin_to_vec(origin: &KeyOrigin) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + origin.derivation().len() * 4);
    data.extend(origin.master_fp().to_byte_array());
    for index in origin.derivation() {
        data.extend(index.to_le_bytes());
    }
    data
}

/// Iterates over the records of a map, classifying them with the key type and
/// checking them against the PSBT version. Unknown keys are collected into
/// `unknown`.
fn known_records<K: KeyType>(
    map: Map,
    version: PsbtVer,
    unknown: &mut Map,
) -> Result<Vec<(K, RecordKey, ValueData)>, PsbtError> {
    let mut records = Vec::with_capacity(map.len());
    for (key, value) in map {
        let key_type = K::from_u8(key.key_type());
        if key_type.is_unknown() {
            unknown.insert(key, value);
            continue;
        }
        if !key_type.is_allowed(version) {
            return Err(PsbtError::UnexpectedKey(K::MAP, key_type.into_u8(), version));
        }
        if !key_type.has_key_data() && !key.key_data().is_empty() {
            return Err(PsbtError::NonEmptyKeyData(K::MAP, key_type.into_u8()));
        }
        records.push((key_type, key, value));
    }
    for key_type in K::STANDARD {
        if key_type.is_required()
            && key_type.is_allowed(version)
            && !records.iter().any(|(k, ..)| k == key_type)
        {
            return Err(PsbtError::RequiredKeyAbsent(K::MAP, key_type.into_u8(), version));
        }
    }
    Ok(records)
}

impl Psbt {
    pub const MAGIC: [u8; 5] = *b"psbt\xFF";

    /// Constructs PSBT from the sequence of decoded maps.
    pub fn from_maps(maps: Maps) -> Result<Psbt, PsbtError> {
        let mut maps = maps.into_inner().into_iter();
        let global = maps.next().ok_or(PsbtError::UnexpectedEod)?;

        let version = match global.get(&RecordKey::new(PSBT_GLOBAL_VERSION, [])) {
            Some(value) => PsbtVer::try_from_standard_u32(u32_from(GlobalKey::Version, value)?)?,
            None => PsbtVer::V0,
        };
        let mut psbt = Psbt::create(version);
        psbt.tx_modifiable = None;
        let mut input_count = 0u64;
        let mut output_count = 0u64;
        let mut unsigned_tx = None;

        let mut unknown = Map::new();
        for (key_type, key, value) in known_records::<GlobalKey>(global, version, &mut unknown)? {
            match key_type {
                GlobalKey::UnsignedTx => {
                    let tx = tx_from(&value, false)?;
                    if tx.inputs.iter().any(|txin| !txin.sig_script.is_empty()) {
                        return Err(PsbtError::SignedUnsignedTx);
                    }
                    unsigned_tx = Some(tx);
                }
                GlobalKey::Xpub => {
                    let xpub = Xpub::decode(key.key_data())?;
                    psbt.xpubs.insert(xpub, origin_from(&value)?);
                }
                GlobalKey::TxVersion => {
                    psbt.tx_version =
                        TxVer::from_consensus_i32(u32_from(key_type, &value)? as i32);
                }
                GlobalKey::FallbackLocktime => {
                    psbt.fallback_locktime =
                        Some(LockTime::from_consensus_u32(u32_from(key_type, &value)?));
                }
                GlobalKey::InputCount => {
                    input_count = value_from::<VarInt>(&value)?.to_u64();
                }
                GlobalKey::OutputCount => {
                    output_count = value_from::<VarInt>(&value)?.to_u64();
                }
                GlobalKey::TxModifiable => {
                    let [flags] = value.as_slice() else {
                        return Err(PsbtError::InvalidValueLength(
                            MapName::Global,
                            key_type.into_u8(),
                            value.len(),
                        ));
                    };
                    psbt.tx_modifiable = Some(ModifiableFlags::from_standard_u8(*flags));
                }
                GlobalKey::Version => {}
                GlobalKey::Unknown(_) => unreachable!("unknown keys are filtered out"),
            }
        }
        psbt.unknown = unknown;

        if let Some(tx) = unsigned_tx {
            let version = psbt.version;
            let settings = psbt.settings;
            let xpubs = psbt.xpubs;
            let unknown = psbt.unknown;
            psbt = Psbt::from_tx(tx);
            psbt.version = version;
            psbt.settings = settings;
            psbt.xpubs = xpubs;
            psbt.unknown = unknown;
            input_count = psbt.inputs.len() as u64;
            output_count = psbt.outputs.len() as u64;
        }

        // counts are untrusted and must match the data before anything is
        // allocated for them
        let found = 1 + maps.len();
        let expected = input_count.checked_add(output_count).and_then(|n| n.checked_add(1));
        if expected != Some(found as u64) {
            return Err(PsbtError::MapCountMismatch {
                expected: expected.unwrap_or(u64::MAX),
                found,
            });
        }
        if psbt.version == PsbtVer::V2 {
            psbt.reset_inputs(input_count as usize);
            psbt.reset_outputs(output_count as usize);
        }

        for (input, map) in psbt.inputs.iter_mut().zip(maps.by_ref()) {
            input.parse_map(version, map)?;
        }
        for (output, map) in psbt.outputs.iter_mut().zip(maps) {
            output.parse_map(version, map)?;
        }

        Ok(psbt)
    }

    /// Converts PSBT into the sequence of maps.
    pub fn to_maps(&self) -> Maps {
        let mut global = self.unknown.clone();
        let mut insert = |key_type: GlobalKey, value: Vec<u8>| {
            global.insert(RecordKey::new(key_type.into_u8(), []), value);
        };
        match self.version {
            PsbtVer::V0 => {
                insert(GlobalKey::UnsignedTx, self.to_unsigned_tx().consensus_serialize());
            }
            PsbtVer::V2 => {
                insert(
                    GlobalKey::TxVersion,
                    self.tx_version.to_consensus_i32().to_le_bytes().to_vec(),
                );
                if let Some(lock_time) = self.fallback_locktime {
                    insert(
                        GlobalKey::FallbackLocktime,
                        lock_time.to_consensus_u32().to_le_bytes().to_vec(),
                    );
                }
                insert(GlobalKey::InputCount, VarInt::with(self.inputs.len()).consensus_serialize());
                insert(
                    GlobalKey::OutputCount,
                    VarInt::with(self.outputs.len()).consensus_serialize(),
                );
                if let Some(flags) = self.tx_modifiable {
                    insert(GlobalKey::TxModifiable, vec![flags.to_standard_u8()]);
                }
                insert(GlobalKey::Version, self.version.to_standard_u32().to_le_bytes().to_vec());
            }
        }
        for (xpub, origin) in &self.xpubs {
            global.insert(RecordKey::new(PSBT_GLOBAL_XPUB, xpub.encode()), origin_to_vec(origin));
        }

        let mut maps = Vec::with_capacity(1 + self.inputs.len() + self.outputs.len());
        maps.push(global);
        maps.extend(self.inputs.iter().map(|input| input.to_map(self.version)));
        maps.extend(self.outputs.iter().map(|output| output.to_map(self.version)));
        Maps::from(maps)
    }

    pub fn encode(&self, writer: &mut impl Write) -> Result<usize, io::Error> {
        writer.write_all(&Self::MAGIC)?;
        Ok(Self::MAGIC.len() + self.to_maps().encode(writer)?)
    }

    /// Decodes PSBT from the reader, consuming it to the end.
    pub fn decode(reader: &mut impl Read) -> Result<Psbt, DecodeError> {
        let mut magic = [0u8; 5];
        reader.read_exact(&mut magic)?;
        if magic != Self::MAGIC {
            return Err(PsbtError::InvalidMagic(magic).into());
        }
        let maps = Maps::decode(reader)?;
        Ok(Psbt::from_maps(maps)?)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf).expect("in-memory writing can't fail");
        buf
    }

    pub fn deserialize(data: impl AsRef<[u8]>) -> Result<Psbt, PsbtError> {
        let mut data = data.as_ref();
        Psbt::decode(&mut data).map_err(|err| match err {
            DecodeError::Psbt(err) => err,
            DecodeError::Io(_) => unreachable!("in-memory reader doesn't produce I/O errors"),
        })
    }
}

impl Input {
    pub(crate) fn parse_map(&mut self, version: PsbtVer, map: Map) -> Result<(), PsbtError> {
        let mut txid = None;
        let mut vout = None;
        for (key_type, key, value) in known_records::<InputKey>(map, version, &mut self.unknown)? {
            match key_type {
                InputKey::NonWitnessUtxo => self.non_witness_tx = Some(tx_from(&value, true)?),
                InputKey::WitnessUtxo => self.witness_utxo = Some(value_from::<TxOut>(&value)?),
                InputKey::PartialSig => {
                    let pk = LegacyPk::from_bytes(key.key_data())?;
                    let sig = LegacySig::from_bytes(value.as_slice())?;
                    self.partial_sigs.insert(pk, sig);
                }
                InputKey::SighashType => {
                    let ty = SighashType::from_standard_u32(u32_from(key_type, &value)?)?;
                    self.sighash_type = Some(ty);
                }
                InputKey::RedeemScript => {
                    self.redeem_script = Some(RedeemScript::from_unsafe(value.to_vec()))
                }
                InputKey::WitnessScript => {
                    self.witness_script = Some(WitnessScript::from_unsafe(value.to_vec()))
                }
                InputKey::Bip32Derivation => {
                    let pk = LegacyPk::from_bytes(key.key_data())?;
                    self.bip32_derivation.insert(pk, origin_from(&value)?);
                }
                InputKey::FinalScriptSig => {
                    self.final_script_sig = Some(SigScript::from_unsafe(value.to_vec()))
                }
                InputKey::FinalWitness => self.final_witness = Some(value_from::<Witness>(&value)?),
                InputKey::PreviousTxid => txid = Some(value_from::<Txid>(&value)?),
                InputKey::OutputIndex => vout = Some(u32_from(key_type, &value)?),
                InputKey::Sequence => {
                    self.sequence_number = Some(SeqNo::from_consensus_u32(u32_from(key_type, &value)?))
                }
                InputKey::RequiredTimeLock => {
                    let val = u32_from(key_type, &value)?;
                    self.required_time_lock = Some(
                        LockTimestamp::try_from_consensus_u32(val)
                            .map_err(|_| PsbtError::InvalidLockTimestamp(val))?,
                    );
                }
                InputKey::RequiredHeightLock => {
                    let val = u32_from(key_type, &value)?;
                    self.required_height_lock = Some(
                        LockHeight::try_from_consensus_u32(val)
                            .map_err(|_| PsbtError::InvalidLockHeight(val))?,
                    );
                }
                InputKey::Unknown(_) => unreachable!("unknown keys are filtered out"),
            }
        }
        if let (Some(txid), Some(vout)) = (txid, vout) {
            self.previous_outpoint = Outpoint::new(txid, Vout::from_u32(vout));
        }
        if let Some(tx) = &self.non_witness_tx {
            let found = tx.txid();
            if found != self.previous_outpoint.txid {
                return Err(PsbtError::NonWitnessTxMismatch {
                    index: self.index,
                    expected: self.previous_outpoint.txid,
                    found,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn to_map(&self, version: PsbtVer) -> Map {
        let mut map = self.unknown.clone();
        let mut insert = |key_type: InputKey, key_data: &[u8], value: Vec<u8>| {
            map.insert(RecordKey::new(key_type.into_u8(), key_data), value);
        };

        if version == PsbtVer::V2 {
            insert(InputKey::PreviousTxid, &[], self.previous_outpoint.txid.consensus_serialize());
            insert(
                InputKey::OutputIndex,
                &[],
                self.previous_outpoint.vout.into_u32().to_le_bytes().to_vec(),
            );
            if let Some(seq) = self.sequence_number {
                insert(InputKey::Sequence, &[], seq.to_consensus_u32().to_le_bytes().to_vec());
            }
            if let Some(lock) = self.required_time_lock {
                insert(
                    InputKey::RequiredTimeLock,
                    &[],
                    lock.to_consensus_u32().to_le_bytes().to_vec(),
                );
            }
            if let Some(lock) = self.required_height_lock {
                insert(
                    InputKey::RequiredHeightLock,
                    &[],
                    lock.to_consensus_u32().to_le_bytes().to_vec(),
                );
            }
        }
        if let Some(tx) = &self.non_witness_tx {
            insert(InputKey::NonWitnessUtxo, &[], tx.consensus_serialize());
        }
        if let Some(txout) = &self.witness_utxo {
            insert(InputKey::WitnessUtxo, &[], txout.consensus_serialize());
        }
        for (pk, sig) in &self.partial_sigs {
            insert(InputKey::PartialSig, &pk.to_vec(), sig.to_vec());
        }
        if let Some(ty) = self.sighash_type {
            insert(InputKey::SighashType, &[], ty.to_consensus_u32().to_le_bytes().to_vec());
        }
        if let Some(script) = &self.redeem_script {
            insert(InputKey::RedeemScript, &[], script.to_vec());
        }
        if let Some(script) = &self.witness_script {
            insert(InputKey::WitnessScript, &[], script.to_vec());
        }
        for (pk, origin) in &self.bip32_derivation {
            insert(InputKey::Bip32Derivation, &pk.to_vec(), origin_to_vec(origin));
        }
        if let Some(script) = &self.final_script_sig {
            insert(InputKey::FinalScriptSig, &[], script.to_vec());
        }
        if let Some(witness) = &self.final_witness {
            insert(InputKey::FinalWitness, &[], witness.consensus_serialize());
        }
        map
    }
}

impl Output {
    pub(crate) fn parse_map(&mut self, version: PsbtVer, map: Map) -> Result<(), PsbtError> {
        for (key_type, key, value) in known_records::<OutputKey>(map, version, &mut self.unknown)?
        {
            match key_type {
                OutputKey::RedeemScript => {
                    self.redeem_script = Some(RedeemScript::from_unsafe(value.to_vec()))
                }
                OutputKey::WitnessScript => {
                    self.witness_script = Some(WitnessScript::from_unsafe(value.to_vec()))
                }
                OutputKey::Bip32Derivation => {
                    let pk = LegacyPk::from_bytes(key.key_data())?;
                    self.bip32_derivation.insert(pk, origin_from(&value)?);
                }
                OutputKey::Amount => self.amount = value_from::<Sats>(&value)?,
                OutputKey::Script => self.script = ScriptPubkey::from_unsafe(value.to_vec()),
                OutputKey::Unknown(_) => unreachable!("unknown keys are filtered out"),
            }
        }
        Ok(())
    }

    pub(crate) fn to_map(&self, version: PsbtVer) -> Map {
        let mut map = self.unknown.clone();
        let mut insert = |key_type: OutputKey, key_data: &[u8], value: Vec<u8>| {
            map.insert(RecordKey::new(key_type.into_u8(), key_data), value);
        };

        if version == PsbtVer::V2 {
            insert(OutputKey::Amount, &[], self.amount.consensus_serialize());
            insert(OutputKey::Script, &[], self.script.to_vec());
        }
        if let Some(script) = &self.redeem_script {
            insert(OutputKey::RedeemScript, &[], script.to_vec());
        }
        if let Some(script) = &self.witness_script {
            insert(OutputKey::WitnessScript, &[], script.to_vec());
        }
        for (pk, origin) in &self.bip32_derivation {
            insert(OutputKey::Bip32Derivation, &pk.to_vec(), origin_to_vec(origin));
        }
        map
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::SEQ_NO_MAX_VALUE;

    fn seq_final() -> SeqNo { SeqNo::from_consensus_u32(SEQ_NO_MAX_VALUE) }

    fn origin() -> KeyOrigin {
        KeyOrigin::new(XpubFp::from_byte_array([0xd9, 0x0c, 0x6a, 0x4f]), [
            DerivationIndex::hardened(84),
            DerivationIndex::hardened(1),
            DerivationIndex::normal(7),
        ])
    }

    #[test]
    fn key_origin_value() {
        let data = origin_to_vec(&origin());
        assert_eq!(data.len(), 16);
        assert_eq!(&data[..8], &[0xd9, 0x0c, 0x6a, 0x4f, 0x54, 0x00, 0x00, 0x80]);
        assert_eq!(origin_from(&ValueData::from(data)).unwrap(), origin());
        assert_eq!(
            origin_from(&ValueData::from(vec![0u8; 6])),
            Err(PsbtError::InvalidKeyOrigin(6))
        );
    }

    #[test]
    fn unknown_keys_preserved() {
        let mut psbt = Psbt::create(PsbtVer::V2);
        psbt.construct_input(Outpoint::coinbase(), seq_final()).unwrap();
        psbt.unknown.insert(RecordKey::new(0xFC, b"\x03bpsomething"), vec![1, 2, 3]);
        psbt.inputs[0].unknown.insert(RecordKey::new(0x13, []), vec![0x42]);
        let data = psbt.serialize();
        let decoded = Psbt::deserialize(data).unwrap();
        assert_eq!(decoded, psbt);
    }

    #[test]
    fn v0_rejects_v2_keys() {
        let psbt = Psbt::from_tx(Tx {
            version: TxVer::V2,
            inputs: VarIntArray::from_checked(vec![TxIn {
                prev_output: Outpoint::coinbase(),
                sig_script: none!(),
                sequence: seq_final(),
                witness: none!(),
            }]),
            outputs: none!(),
            lock_time: LockTime::ZERO,
        });
        let mut maps = psbt.to_maps();
        maps[1].insert(RecordKey::new(PSBT_IN_SEQUENCE, []), vec![0, 0, 0, 0]);
        assert_eq!(
            Psbt::from_maps(maps),
            Err(PsbtError::UnexpectedKey(MapName::Input, PSBT_IN_SEQUENCE, PsbtVer::V0))
        );

        let mut maps = psbt.to_maps();
        maps.push(Map::new());
        assert_eq!(
            Psbt::from_maps(maps),
            Err(PsbtError::MapCountMismatch {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn untrusted_counts() {
        let mut global = Map::new();
        global.insert(RecordKey::new(PSBT_GLOBAL_TX_VERSION, []), vec![2, 0, 0, 0]);
        global.insert(
            RecordKey::new(PSBT_GLOBAL_INPUT_COUNT, []),
            VarInt(u64::MAX).consensus_serialize(),
        );
        global.insert(RecordKey::new(PSBT_GLOBAL_OUTPUT_COUNT, []), vec![0]);
        global.insert(RecordKey::new(PSBT_GLOBAL_VERSION, []), vec![2, 0, 0, 0]);
        assert_eq!(
            Psbt::from_maps(Maps::from(vec![global.clone()])),
            Err(PsbtError::MapCountMismatch {
                expected: u64::MAX,
                found: 1
            })
        );

        global.insert(
            RecordKey::new(PSBT_GLOBAL_INPUT_COUNT, []),
            VarInt(1 << 40).consensus_serialize(),
        );
        let mut data = Psbt::MAGIC.to_vec();
        data.extend(Maps::from(vec![global]).serialize());
        assert_eq!(
            Psbt::deserialize(data),
            Err(PsbtError::MapCountMismatch {
                expected: (1 << 40) + 1,
                found: 1
            })
        );
    }

    #[test]
    fn no_inputs_v0() {
        let tx = Tx {
            version: TxVer::V2,
            inputs: none!(),
            outputs: VarIntArray::from_checked(vec![TxOut::new(
                ScriptPubkey::from_unsafe(vec![0x51]),
                Sats(1000),
            )]),
            lock_time: LockTime::ZERO,
        };
        let psbt = Psbt::from_unsigned_tx(tx.clone()).unwrap();
        let decoded = Psbt::deserialize(psbt.serialize()).unwrap();
        assert_eq!(decoded, psbt);
        assert_eq!(decoded.to_unsigned_tx(), tx);
    }

    #[test]
    fn witness_prev_tx() {
        let mut prev_tx = Tx {
            version: TxVer::V2,
            inputs: VarIntArray::from_checked(vec![TxIn {
                prev_output: Outpoint::coinbase(),
                sig_script: none!(),
                sequence: seq_final(),
                witness: Witness::from_consensus_stack([vec![0xAB; 72], vec![0x02; 33]]),
            }]),
            outputs: VarIntArray::from_checked(vec![TxOut::new(ScriptPubkey::new(), Sats(5000))]),
            lock_time: LockTime::ZERO,
        };
        let value = ValueData::from(prev_tx.consensus_serialize());
        assert_eq!(tx_from(&value, true), Ok(prev_tx.clone()));

        prev_tx.inputs[0].witness = none!();
        let value = ValueData::from(prev_tx.consensus_serialize());
        assert_eq!(tx_from(&value, true), Ok(prev_tx));

        let mut data = value.to_vec();
        data.push(0x00);
        assert_eq!(
            tx_from(&ValueData::from(data), true),
            Err(PsbtError::Consensus(ConsensusDataError::DataNotConsumed.into()))
        );
    }

    #[test]
    fn magic() {
        assert_eq!(
            Psbt::deserialize(b"psbu\xff\x00"),
            Err(PsbtError::InvalidMagic(*b"psbu\xff"))
        );
        assert_eq!(Psbt::deserialize(b"psb"), Err(PsbtError::UnexpectedEod));
    }
}
