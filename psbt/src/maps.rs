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

//! Generic PSBT record codec: maps of unique byte keys to byte values, without
//! any knowledge of what the keys mean.

use std::collections::{btree_map, BTreeMap};
use std::fmt::{self, Display, Formatter, LowerHex};
use std::io::{self, Read, Write};

use derive::{ConsensusDecode, ConsensusDecodeError, ConsensusEncode, VarInt};

use crate::{DecodeError, PsbtError};

/// Full key of a PSBT record: key type followed by the key data.
///
/// Record keys are never empty, since zero-length key is the map separator.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct RecordKey(Vec<u8>);

impl RecordKey {
    pub fn new(key_type: u8, key_data: impl AsRef<[u8]>) -> Self {
        let key_data = key_data.as_ref();
        let mut key = Vec::with_capacity(key_data.len() + 1);
        key.push(key_type);
        key.extend_from_slice(key_data);
        RecordKey(key)
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        (!bytes.is_empty()).then_some(RecordKey(bytes))
    }

    #[inline]
    pub fn key_type(&self) -> u8 { self.0[0] }

    #[inline]
    pub fn key_data(&self) -> &[u8] { &self.0[1..] }

    #[inline]
    pub fn len(&self) -> usize { self.0.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { false }

    pub fn to_vec(&self) -> Vec<u8> { self.0.clone() }
}

impl AsRef<[u8]> for RecordKey {
    fn as_ref(&self) -> &[u8] { &self.0 }
}

/// Value of a PSBT record.
#[derive(Wrapper, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default, From)]
#[wrapper(Deref, AsSlice, BorrowSlice)]
pub struct ValueData(Vec<u8>);

macro_rules! impl_hex {
    ($ty:ty) => {
        impl LowerHex for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl Display for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { LowerHex::fmt(self, f) }
        }
    };
}

impl_hex!(RecordKey);
impl_hex!(ValueData);

/// Single PSBT map (global, input or output). Records are kept and serialized
/// in the ascending lexicographic order of their keys.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Map(BTreeMap<RecordKey, ValueData>);

impl Map {
    #[inline]
    pub fn new() -> Self { Map(none!()) }

    #[inline]
    pub fn len(&self) -> usize { self.0.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    #[inline]
    pub fn get(&self, key: &RecordKey) -> Option<&ValueData> { self.0.get(key) }

    #[inline]
    pub fn contains_key(&self, key: &RecordKey) -> bool { self.0.contains_key(key) }

    /// Inserts a record, overwriting previous value for the same key.
    #[inline]
    pub fn insert(&mut self, key: RecordKey, value: impl Into<ValueData>) -> Option<ValueData> {
        self.0.insert(key, value.into())
    }

    /// Inserts a record, failing if the key is already present. On error, the
    /// repeated key is returned.
    pub fn insert_unique(
        &mut self,
        key: RecordKey,
        value: impl Into<ValueData>,
    ) -> Result<(), RecordKey> {
        match self.0.entry(key) {
            btree_map::Entry::Occupied(entry) => Err(entry.key().clone()),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(value.into());
                Ok(())
            }
        }
    }

    #[inline]
    pub fn remove(&mut self, key: &RecordKey) -> Option<ValueData> { self.0.remove(key) }

    #[inline]
    pub fn iter(&self) -> btree_map::Iter<'_, RecordKey, ValueData> { self.0.iter() }

    /// Adds records from the `other` map which keys are not present in this
    /// map; existing records are never changed.
    pub fn merge(&mut self, other: Map) {
        for (key, value) in other {
            self.0.entry(key).or_insert(value);
        }
    }

    /// Reads records until the zero-length separator key. `position` is the
    /// number of the map in the map sequence, used in errors.
    pub fn decode(reader: &mut impl Read, position: usize) -> Result<Map, DecodeError> {
        let mut map = Map::new();
        loop {
            let key_len = read_len(reader, position)?;
            if key_len == 0 {
                break;
            }
            let key = RecordKey(read_data(reader, key_len, position)?);
            let value_len = read_len(reader, position)?;
            let value = ValueData(read_data(reader, value_len, position)?);
            map.insert_unique(key, value)
                .map_err(|key| PsbtError::RepeatedKey(position, key))?;
        }
        Ok(map)
    }

    pub fn encode(&self, writer: &mut impl Write) -> Result<usize, io::Error> {
        let mut counter = 0;
        for (key, value) in &self.0 {
            counter += VarInt::with(key.len()).consensus_encode(writer)?;
            writer.write_all(key.as_ref())?;
            counter += key.len();
            counter += VarInt::with(value.len()).consensus_encode(writer)?;
            writer.write_all(value.as_slice())?;
            counter += value.len();
        }
        writer.write_all(&[0x00])?;
        Ok(counter + 1)
    }
}

impl IntoIterator for Map {
    type Item = (RecordKey, ValueData);
    type IntoIter = btree_map::IntoIter<RecordKey, ValueData>;

    fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

impl<'map> IntoIterator for &'map Map {
    type Item = (&'map RecordKey, &'map ValueData);
    type IntoIter = btree_map::Iter<'map, RecordKey, ValueData>;

    fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

impl FromIterator<(RecordKey, ValueData)> for Map {
    fn from_iter<T: IntoIterator<Item = (RecordKey, ValueData)>>(iter: T) -> Self {
        Map(iter.into_iter().collect())
    }
}

/// Upper bound for buffer preallocation when the length comes from untrusted
/// data.
const MAX_PREALLOC: u64 = 32 * 1024;

fn record_error(err: ConsensusDecodeError, position: usize) -> DecodeError {
    match err {
        ConsensusDecodeError::Io(err) if err.kind() != io::ErrorKind::UnexpectedEof => {
            DecodeError::Io(err.kind())
        }
        ConsensusDecodeError::Io(_) | ConsensusDecodeError::Data(_) => {
            PsbtError::MalformedRecord(position).into()
        }
    }
}

/// Reads exactly `len` bytes, growing the buffer as the data arrive.
pub(crate) fn read_bytes(reader: &mut impl Read, len: u64) -> Result<Vec<u8>, io::Error> {
    let mut data = Vec::with_capacity(len.min(MAX_PREALLOC) as usize);
    reader.by_ref().take(len).read_to_end(&mut data)?;
    if (data.len() as u64) < len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(data)
}

fn read_len(reader: &mut impl Read, position: usize) -> Result<u64, DecodeError> {
    VarInt::consensus_decode(reader)
        .map(|len| len.to_u64())
        .map_err(|err| record_error(err, position))
}

fn read_data(reader: &mut impl Read, len: u64, position: usize) -> Result<Vec<u8>, DecodeError> {
    read_bytes(reader, len).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => PsbtError::MalformedRecord(position).into(),
        kind => DecodeError::Io(kind),
    })
}

/// Sequence of PSBT maps: the global map followed by input and output maps.
#[derive(Wrapper, WrapperMut, Clone, Eq, PartialEq, Hash, Debug, Default, From)]
#[wrapper(Deref)]
#[wrapper_mut(DerefMut)]
pub struct Maps(Vec<Map>);

impl Maps {
    /// Reads maps until the end of the stream.
    pub fn decode(reader: &mut impl Read) -> Result<Maps, DecodeError> {
        let mut maps = Vec::new();
        let mut first = [0u8; 1];
        loop {
            match reader.read(&mut first) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(DecodeError::Io(err.kind())),
            }
            let mut chained = first.as_slice().chain(reader.by_ref());
            let map = Map::decode(&mut chained, maps.len())?;
            maps.push(map);
        }
        log::trace!(target: "psbt", "decoded {} PSBT maps", maps.len());
        Ok(Maps(maps))
    }

    pub fn encode(&self, writer: &mut impl Write) -> Result<usize, io::Error> {
        let mut counter = 0;
        for map in &self.0 {
            counter += map.encode(writer)?;
        }
        Ok(counter)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf).expect("in-memory writing can't fail");
        buf
    }

    pub fn deserialize(data: impl AsRef<[u8]>) -> Result<Maps, PsbtError> {
        let mut data = data.as_ref();
        Maps::decode(&mut data).map_err(|err| match err {
            DecodeError::Psbt(err) => err,
            DecodeError::Io(_) => unreachable!("in-memory reader doesn't produce I/O errors"),
        })
    }
}
