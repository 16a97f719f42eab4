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

use crate::{DerivationIndex, IndexParseError};

#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum DerivationParseError {
    /// unable to parse derivation path '{0}' - {1}
    InvalidIndex(String, IndexParseError),
    /// invalid derivation path format '{0}'
    InvalidFormat(String),
}

/// Sequence of BIP32 derivation steps, possibly mixing hardened and normal
/// indexes.
#[derive(Wrapper, WrapperMut, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, From)]
#[wrapper(Deref)]
#[wrapper_mut(DerefMut)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct DerivationPath(Vec<DerivationIndex>);

impl From<&[DerivationIndex]> for DerivationPath {
    fn from(path: &[DerivationIndex]) -> Self { Self(path.to_vec()) }
}

impl<const LEN: usize> From<[DerivationIndex; LEN]> for DerivationPath {
    fn from(path: [DerivationIndex; LEN]) -> Self { Self(path.to_vec()) }
}

impl AsRef<[DerivationIndex]> for DerivationPath {
    fn as_ref(&self) -> &[DerivationIndex] { self.0.as_ref() }
}

impl Display for DerivationPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            f.write_str("/")?;
            Display::fmt(segment, f)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationParseError;

    fn from_str(mut s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('/') {
            s = &s[1..];
        }
        if s.is_empty() {
            return Ok(none!());
        }
        if s.ends_with('/') {
            return Err(DerivationParseError::InvalidFormat(s.to_owned()));
        }
        let inner = s
            .split('/')
            .map(DerivationIndex::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| DerivationParseError::InvalidIndex(s.to_owned(), err))?;
        Ok(Self(inner))
    }
}

impl IntoIterator for DerivationPath {
    type Item = DerivationIndex;
    type IntoIter = std::vec::IntoIter<DerivationIndex>;

    fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

impl<'path> IntoIterator for &'path DerivationPath {
    type Item = DerivationIndex;
    type IntoIter = std::iter::Copied<std::slice::Iter<'path, DerivationIndex>>;

    fn into_iter(self) -> Self::IntoIter { self.0.iter().copied() }
}

impl FromIterator<DerivationIndex> for DerivationPath {
    fn from_iter<T: IntoIterator<Item = DerivationIndex>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<DerivationIndex> for DerivationPath {
    fn extend<T: IntoIterator<Item = DerivationIndex>>(&mut self, iter: T) { self.0.extend(iter) }
}

impl DerivationPath {
    /// Constructs empty derivation path.
    pub fn new() -> Self { Self(vec![]) }

    pub fn with_capacity(capacity: usize) -> Self { Self(Vec::with_capacity(capacity)) }

    /// Number of steps shared by both paths from their start.
    pub fn shared_prefix(&self, other: impl AsRef<[DerivationIndex]>) -> usize {
        self.0.iter().zip(other.as_ref()).take_while(|(a, b)| a == b).count()
    }

    /// Checks whether all the steps are normal, i.e. the derivation can be
    /// done from an extended public key.
    pub fn is_public(&self) -> bool { self.0.iter().all(|idx| !idx.is_hardened()) }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn altstr() {
        let path1 = DerivationPath::from_str("86h/1h/0h").unwrap();
        let path2 = DerivationPath::from_str("86'/1'/0'").unwrap();
        let path3 = DerivationPath::from_str("/86H/1H/0H").unwrap();
        assert_eq!(path1, path2);
        assert_eq!(path1, path3);
        assert_eq!(path1.to_string(), "/86h/1h/0h");
        assert_eq!(format!("{path1:#}"), "/86'/1'/0'");
        assert!(!path1.is_public());
    }

    #[test]
    fn empty_and_invalid() {
        assert_eq!(DerivationPath::from_str(""), Ok(DerivationPath::new()));
        assert_eq!(DerivationPath::from_str("m").ok(), None);
        assert!(matches!(
            DerivationPath::from_str("0/1/"),
            Err(DerivationParseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn shared_prefix() {
        let account = DerivationPath::from_str("84h/0h/0h").unwrap();
        let key = DerivationPath::from_str("84h/0h/0h/1/7").unwrap();
        let other = DerivationPath::from_str("84h/0h/1h/0/7").unwrap();
        assert_eq!(account.shared_prefix(&key), 3);
        assert_eq!(account.shared_prefix(&other), 2);
        assert!(key[3..].iter().all(|idx| !idx.is_hardened()));
    }
}
