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

use derive::secp256k1::{ecdsa, Message, SecretKey, SECP256K1};
use derive::{
    KeyOrigin, LegacyPk, LegacySig, Sighash, SighashCache, SighashError, SighashType, Sign,
};

use crate::{CoinError, Input, Psbt, StateError};

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("the transaction was rejected by the signer.")]
pub struct Rejected;

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(inner)]
pub enum SignInputError {
    #[from]
    State(StateError),

    #[from]
    Coin(CoinError),

    #[from]
    Sighash(SighashError),

    #[display("key {0} is not used by the script of the spent output.")]
    UnrelatedKey(LegacyPk),
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("input #{index}: {error}")]
pub struct InputSignError {
    pub index: usize,
    pub error: SignInputError,
}

#[derive(Clone, Eq, PartialEq, Debug, Error, From)]
pub enum SignError {
    #[from(Rejected)]
    Rejected,

    /// Some of the inputs failed to sign; signatures made for the other
    /// inputs are kept.
    Inputs {
        signed: usize,
        failures: Vec<InputSignError>,
    },
}

impl Display for SignError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SignError::Rejected => Display::fmt(&Rejected, f),
            SignError::Inputs { signed, failures } => {
                write!(f, "{signed} signatures were created, but some inputs failed:")?;
                for failure in failures {
                    write!(f, "\n- {failure}")?;
                }
                Ok(())
            }
        }
    }
}

/// Trait which should be implemented by all signers.
///
/// Signers must ensure that the transaction is checked by the user when they
/// get [`Signer::approve`] callback.
pub trait Signer {
    /// Type which does the actual signatures. See [`Sign`] trait for the
    /// details.
    type Sign<'s>: Sign
    where Self: 's;

    /// In the implementation of this method signers must ensure that the
    /// transaction is checked by the user.
    fn approve(&self, psbt: &Psbt) -> Result<Self::Sign<'_>, Rejected>;
}

impl Psbt {
    /// Signs PSBT using the given `signer`. Every key with BIP32 derivation
    /// information in every non-finalized input is offered to the signer.
    ///
    /// Failing inputs don't prevent signing of the other inputs. Returns the
    /// number of created signatures.
    pub fn sign(&mut self, signer: &impl Signer) -> Result<usize, SignError> {
        let satisfier = signer.approve(self)?;

        let mut sighasher = self.sighasher();
        let mut signed = 0usize;
        let mut failures = vec![];

        for input in self.inputs.iter_mut().filter(|input| !input.is_finalized()) {
            let keys = input
                .signing_origins()
                .map(|(pk, origin)| (*pk, origin.clone()))
                .collect::<Vec<_>>();
            let sighash_type = input.sighash_type.unwrap_or_else(SighashType::all);
            for (pk, origin) in keys {
                let res = input.sign_with(&mut sighasher, pk, sighash_type, |sighash| {
                    satisfier.sign_ecdsa(sighash, pk, Some(&origin))
                });
                match res {
                    Ok(Some(_)) => signed += 1,
                    Ok(None) => {}
                    Err(error) => failures.push(InputSignError {
                        index: input.index,
                        error,
                    }),
                }
            }
        }
        log::debug!(target: "psbt", "created {signed} signatures, {} inputs failed", failures.len());

        if !failures.is_empty() {
            return Err(SignError::Inputs { signed, failures });
        }
        Ok(signed)
    }

    /// Signs a single input with the private key.
    pub fn sign_input(
        &mut self,
        index: usize,
        sk: &SecretKey,
        sighash_type: SighashType,
    ) -> Result<LegacySig, SignInputError> {
        let mut sighasher = self.sighasher();
        let input = self.inputs.get_mut(index).ok_or(StateError::NoInput(index))?;
        input.sign(&mut sighasher, sk, sighash_type)
    }
}

impl Input {
    /// Signs the input with the private key, storing the partial signature.
    ///
    /// Signing again with the same key and sighash type returns the existing
    /// signature; a different sighash type for that key is an error.
    pub fn sign(
        &mut self,
        sighasher: &mut SighashCache,
        sk: &SecretKey,
        sighash_type: SighashType,
    ) -> Result<LegacySig, SignInputError> {
        let pk = LegacyPk::compressed(sk.public_key(SECP256K1));
        let sig = self.sign_with(sighasher, pk, sighash_type, |sighash| {
            Some(SECP256K1.sign_ecdsa(&Message::from(sighash), sk))
        })?;
        Ok(sig.expect("signing with a secret key always succeeds"))
    }

    /// Signs the input for the key `pk` with a signature produced by `signer`.
    /// Returns `None` if the signer doesn't provide the signature.
    pub fn sign_with(
        &mut self,
        sighasher: &mut SighashCache,
        pk: LegacyPk,
        sighash_type: SighashType,
        signer: impl FnOnce(Sighash) -> Option<ecdsa::Signature>,
    ) -> Result<Option<LegacySig>, SignInputError> {
        if self.is_finalized() {
            return Err(StateError::Finalized(self.index).into());
        }
        if let Some(required) = self.sighash_type {
            if required != sighash_type {
                return Err(StateError::SighashMismatch {
                    index: self.index,
                    required,
                    requested: sighash_type,
                }
                .into());
            }
        }
        if let Some(sig) = self.partial_sigs.get(&pk) {
            if sig.sighash_type != sighash_type {
                return Err(StateError::SighashMismatch {
                    index: self.index,
                    required: sig.sighash_type,
                    requested: sighash_type,
                }
                .into());
            }
            return Ok(Some(*sig));
        }

        let coin = self.signable_coin()?;
        if !coin.template()?.commits_to(pk) {
            return Err(SignInputError::UnrelatedKey(pk));
        }
        let sighash = coin.sighash(sighasher, self.index, sighash_type)?;
        let Some(sig) = signer(sighash) else {
            return Ok(None);
        };
        let sig = LegacySig { sig, sighash_type };
        self.partial_sigs.insert(pk, sig);
        self.sighash_type = Some(sighash_type);
        log::debug!(target: "psbt", "input #{} is signed with key {pk}", self.index);
        Ok(Some(sig))
    }

    /// Keys with derivation information which have not signed the input yet.
    pub fn signing_origins(&self) -> impl Iterator<Item = (&LegacyPk, &KeyOrigin)> {
        self.bip32_derivation.iter().filter(|(pk, _)| !self.partial_sigs.contains_key(*pk))
    }
}
