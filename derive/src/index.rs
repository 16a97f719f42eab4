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
use std::str::FromStr;

/// Constant determining BIP32 boundary for u32 values after which index
/// is treated as hardened
pub const HARDENED_INDEX_BOUNDARY: u32 = 1 << 31;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display("child number {0} exceeds the maximum value of 2^31-1")]
pub struct IndexError(pub u32);

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum IndexParseError {
    /// invalid derivation index number '{0}'.
    InvalidNumber(String),

    #[from]
    #[display(inner)]
    OutOfRange(IndexError),
}

/// Single step of BIP32 derivation, holding the child number (i.e. the index
/// value without the hardened bit).
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum DerivationIndex {
    Normal(u32),
    Hardened(u32),
}

impl From<u32> for DerivationIndex {
    fn from(value: u32) -> Self { Self::from_index(value) }
}

impl DerivationIndex {
    pub const ZERO: Self = DerivationIndex::Normal(0);

    pub const fn normal(child_number: u16) -> Self { Self::Normal(child_number as u32) }

    pub const fn hardened(child_number: u16) -> Self { Self::Hardened(child_number as u32) }

    pub fn try_normal(child_number: u32) -> Result<Self, IndexError> {
        if child_number >= HARDENED_INDEX_BOUNDARY {
            return Err(IndexError(child_number));
        }
        Ok(Self::Normal(child_number))
    }

    pub fn try_hardened(child_number: u32) -> Result<Self, IndexError> {
        if child_number >= HARDENED_INDEX_BOUNDARY {
            return Err(IndexError(child_number));
        }
        Ok(Self::Hardened(child_number))
    }

    /// Constructs index from its BIP32 `u32` representation, where values
    /// above [`HARDENED_INDEX_BOUNDARY`] are hardened.
    pub const fn from_index(value: u32) -> Self {
        match value {
            0..=0x7FFF_FFFF => DerivationIndex::Normal(value),
            _ => DerivationIndex::Hardened(value - HARDENED_INDEX_BOUNDARY),
        }
    }

    /// Index value as it is used in BIP32 derivation and serialization.
    pub const fn index(&self) -> u32 {
        match self {
            DerivationIndex::Normal(no) => *no,
            DerivationIndex::Hardened(no) => *no + HARDENED_INDEX_BOUNDARY,
        }
    }

    pub const fn child_number(&self) -> u32 {
        match self {
            DerivationIndex::Normal(no) | DerivationIndex::Hardened(no) => *no,
        }
    }

    pub const fn is_hardened(&self) -> bool { matches!(self, DerivationIndex::Hardened(_)) }

    pub fn to_be_bytes(&self) -> [u8; 4] { self.index().to_be_bytes() }

    pub fn to_le_bytes(&self) -> [u8; 4] { self.index().to_le_bytes() }
}

impl Display for DerivationIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DerivationIndex::Normal(no) => write!(f, "{no}"),
            DerivationIndex::Hardened(no) if f.alternate() => write!(f, "{no}'"),
            DerivationIndex::Hardened(no) => write!(f, "{no}h"),
        }
    }
}

impl FromStr for DerivationIndex {
    type Err = IndexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (number, hardened) = match s.strip_suffix(['h', 'H', '\'']) {
            Some(number) => (number, true),
            None => (s, false),
        };
        let no = u32::from_str(number).map_err(|_| IndexParseError::InvalidNumber(s.to_owned()))?;
        Ok(match hardened {
            true => Self::try_hardened(no)?,
            false => Self::try_normal(no)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_forms() {
        let idx = DerivationIndex::from_index(HARDENED_INDEX_BOUNDARY + 84);
        assert_eq!(idx, DerivationIndex::hardened(84));
        assert_eq!(idx.index(), 0x8000_0054);
        assert_eq!(idx.child_number(), 84);
        assert!(idx.is_hardened());
        assert_eq!(idx.to_string(), "84h");
        assert_eq!(format!("{idx:#}"), "84'");

        assert_eq!(DerivationIndex::from(7u32), DerivationIndex::normal(7));
    }

    #[test]
    fn index_parse() {
        assert_eq!("5".parse(), Ok(DerivationIndex::normal(5)));
        for s in ["5h", "5H", "5'"] {
            assert_eq!(s.parse(), Ok(DerivationIndex::hardened(5)));
        }
        assert_eq!(
            DerivationIndex::from_str("2147483648"),
            Err(IndexParseError::OutOfRange(IndexError(HARDENED_INDEX_BOUNDARY)))
        );
        assert_eq!(
            DerivationIndex::from_str("x1"),
            Err(IndexParseError::InvalidNumber(s!("x1")))
        );
    }
}
