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

use derive::{DerivationCache, KeyOrigin, LegacyPk, Xpub, XpubAccount};

use crate::{Output, Psbt, PsbtCoin, StateError};

impl Output {
    /// Merges data about the same output from another PSBT: scripts are taken
    /// from `other` only if they are absent here, key derivations and unknown
    /// keys are united.
    pub fn combine(&mut self, other: Output) {
        if self.redeem_script.is_none() {
            self.redeem_script = other.redeem_script;
        }
        if self.witness_script.is_none() {
            self.witness_script = other.witness_script;
        }
        for (pk, origin) in other.bip32_derivation {
            self.bip32_derivation.entry(pk).or_insert(origin);
        }
        self.unknown.merge(other.unknown);
    }

    /// Detects whether some of the keys with derivation information belong to
    /// the `account`, deriving them through the `cache`.
    pub fn is_derived_from(&self, account: &XpubAccount, cache: &DerivationCache<Xpub>) -> bool {
        self.bip32_derivation.iter().any(|(pk, origin)| {
            let Some(path) = account.child_derivation(origin) else {
                return false;
            };
            match cache.derive(account.xpub(), path.iter().copied()) {
                Ok(xpub) => xpub.to_legacy_pk() == *pk,
                Err(err) => {
                    log::trace!(target: "psbt", "key {pk} with origin {origin} is not derivable: {err}");
                    false
                }
            }
        })
    }
}

impl Psbt {
    /// Outputs which can be spent with keys of the `account`, for instance the
    /// change outputs.
    pub fn related_outputs(
        &self,
        account: &XpubAccount,
        cache: &DerivationCache<Xpub>,
    ) -> Vec<&Output> {
        self.outputs().filter(|output| output.is_derived_from(account, cache)).collect()
    }

    /// Adds key derivation information to the input. Depending on the PSBT
    /// settings, the redeem script of P2SH-P2WPKH input is inferred.
    pub fn add_input_key_path(
        &mut self,
        index: usize,
        pk: LegacyPk,
        origin: KeyOrigin,
    ) -> Result<(), StateError> {
        let infer = self.settings.infer_redeem_scripts;
        let input = self.inputs.get_mut(index).ok_or(StateError::NoInput(index))?;
        if input.is_finalized() {
            return Err(StateError::Finalized(index));
        }
        input.add_key_path(pk, origin, infer);
        Ok(())
    }

    /// Adds key derivation information to the output. Depending on the PSBT
    /// settings, the redeem script of P2SH-P2WPKH output is inferred.
    pub fn add_output_key_path(
        &mut self,
        index: usize,
        pk: LegacyPk,
        origin: KeyOrigin,
    ) -> Result<(), StateError> {
        let infer = self.settings.infer_redeem_scripts;
        let output = self.outputs.get_mut(index).ok_or(StateError::NoOutput(index))?;
        output.add_key_path(pk, origin, infer);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use derive::{DerivationIndex, RedeemScript, Sats, ScriptPubkey, WPubkeyHash, Xpriv};

    use super::*;
    use crate::{LegacyPkExt, PsbtVer};

    fn account() -> XpubAccount {
        let master = Xpriv::new_master(true, &[0x11; 32]);
        let path = [DerivationIndex::hardened(84), DerivationIndex::hardened(1)];
        let xpub = master.derive_priv(path).unwrap().to_xpub();
        XpubAccount::new(xpub, KeyOrigin::new(master.fingerprint(), path))
    }

    fn wpkh_hash(pk: LegacyPk) -> WPubkeyHash { WPubkeyHash::from(pk.to_compressed_pk().unwrap()) }

    fn change_key(account: &XpubAccount, no: u16) -> (LegacyPk, KeyOrigin) {
        let path = [DerivationIndex::normal(1), DerivationIndex::normal(no)];
        let pk = account.xpub().derive_pub(path).unwrap().to_legacy_pk();
        (pk, account.origin().child(path))
    }

    #[test]
    fn change_outputs() {
        let account = account();
        let cache = DerivationCache::new();
        let mut psbt = Psbt::create(PsbtVer::V2);
        for no in 0..3u16 {
            let (pk, origin) = change_key(&account, no);
            let script = ScriptPubkey::p2wpkh(wpkh_hash(pk));
            psbt.construct_output(script, Sats(1000)).unwrap();
            if no != 1 {
                psbt.add_output_key_path(no as usize, pk, origin).unwrap();
            }
        }
        let (pk, _) = change_key(&account, 7);
        let foreign = KeyOrigin::new(account.master_fp(), [DerivationIndex::normal(7)]);
        psbt.add_output_key_path(1, pk, foreign).unwrap();

        let related = psbt.related_outputs(&account, &cache);
        assert_eq!(related.iter().map(|output| output.index()).collect::<Vec<_>>(), vec![0, 2]);
        // the keychain key is derived once
        assert_eq!(cache.misses(), 3);

        assert_eq!(
            psbt.add_output_key_path(3, pk, account.origin().clone()),
            Err(StateError::NoOutput(3))
        );
    }

    #[test]
    fn infers_redeem_script() {
        let account = account();
        let (pk, origin) = change_key(&account, 0);
        let redeem_script = RedeemScript::p2sh_wpkh(wpkh_hash(pk));

        let mut psbt = Psbt::create(PsbtVer::V2);
        psbt.construct_output(redeem_script.to_script_pubkey(), Sats(1000)).unwrap();
        psbt.construct_output(redeem_script.to_script_pubkey(), Sats(1000)).unwrap();
        psbt.add_output_key_path(0, pk, origin.clone()).unwrap();
        assert_eq!(psbt.output(0).unwrap().redeem_script, Some(redeem_script));
        assert!(psbt.output(0).unwrap().is_related_key(pk));

        psbt.settings.infer_redeem_scripts = false;
        psbt.add_output_key_path(1, pk, origin).unwrap();
        assert_eq!(psbt.output(1).unwrap().redeem_script, None);
    }

    #[test]
    fn combine() {
        let account = account();
        let (pk1, origin1) = change_key(&account, 0);
        let (pk2, origin2) = change_key(&account, 1);

        let mut output = Output::new(0);
        output.bip32_derivation.insert(pk1, origin1.clone());
        let mut other = Output::new(0);
        other.bip32_derivation.insert(pk1, origin2.clone());
        other.bip32_derivation.insert(pk2, origin2.clone());
        other.redeem_script = Some(RedeemScript::p2sh_wpkh(wpkh_hash(pk2)));

        output.combine(other.clone());
        assert_eq!(output.bip32_derivation.get(&pk1), Some(&origin1));
        assert_eq!(output.bip32_derivation.get(&pk2), Some(&origin2));
        assert_eq!(output.redeem_script, other.redeem_script);
    }
}
