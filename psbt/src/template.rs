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


use amplify::Wrapper;
use derive::opcodes::{OP_CHECKMULTISIG, OP_CHECKSIG};
use derive::{
    LegacyPk, PubkeyHash, RedeemScript, ScriptBytes, ScriptPubkey, WPubkeyHash, WitnessScript,
};

use crate::script::{small_num, small_num_op, Instruction, LegacyPkExt, ScriptExt};

/// Bare multisig script `OP_m <pk_1> ... <pk_n> OP_n OP_CHECKMULTISIG`.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct MultisigScript {
    pub threshold: u8,
    pub keys: Vec<LegacyPk>,
}

impl MultisigScript {
    pub fn new(threshold: u8, keys: impl IntoIterator<Item = LegacyPk>) -> Self {
        MultisigScript {
            threshold,
            keys: keys.into_iter().collect(),
        }
    }

    pub fn to_script_bytes(&self) -> ScriptBytes {
        let mut script = ScriptBytes::from_unsafe(vec![small_num_op(self.threshold)]);
        for key in &self.keys {
            script.push_slice(&key.to_vec());
        }
        let mut bytes = script.into_vec();
        bytes.push(small_num_op(self.keys.len() as u8));
        bytes.push(OP_CHECKMULTISIG);
        ScriptBytes::from_unsafe(bytes)
    }

    #[inline]
    pub fn to_redeem_script(&self) -> RedeemScript {
        RedeemScript::from_inner(self.to_script_bytes())
    }

    #[inline]
    pub fn to_witness_script(&self) -> WitnessScript {
        WitnessScript::from_inner(self.to_script_bytes())
    }
}

/// Closed set of script templates which can be satisfied with signatures.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum ScriptTemplate {
    /// `<pk> OP_CHECKSIG`
    P2pk(LegacyPk),

    /// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`
    P2pkh(PubkeyHash),

    /// `OP_0 <hash>` witness program
    P2wpkh(WPubkeyHash),

    Multisig(MultisigScript),
}

impl ScriptTemplate {
    /// Recognizes the template of a script, returning `None` for scripts which
    /// do not match any of the supported templates.
    pub fn classify(script: &ScriptBytes) -> Option<ScriptTemplate> {
        let script_pubkey = ScriptPubkey::from_inner(script.clone());
        if script_pubkey.is_p2pkh() {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script.as_slice()[3..23]);
            return Some(ScriptTemplate::P2pkh(PubkeyHash::from(hash)));
        }
        if script_pubkey.is_p2wpkh() {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script.as_slice()[2..22]);
            return Some(ScriptTemplate::P2wpkh(WPubkeyHash::from(hash)));
        }

        let instructions = script.instructions().collect::<Result<Vec<_>, _>>().ok()?;
        match instructions.as_slice() {
            [Instruction::PushBytes(pk), Instruction::Op(OP_CHECKSIG)] => {
                LegacyPk::from_bytes(pk).ok().map(ScriptTemplate::P2pk)
            }
            [Instruction::Op(m), keys @ .., Instruction::Op(n), Instruction::Op(OP_CHECKMULTISIG)] => {
                let threshold = small_num(*m)?;
                let count = small_num(*n)?;
                if threshold == 0 || threshold > count || count as usize != keys.len() {
                    return None;
                }
                let keys = keys
                    .iter()
                    .map(|instruction| match instruction {
                        Instruction::PushBytes(pk) => LegacyPk::from_bytes(pk).ok(),
                        Instruction::Op(_) => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(ScriptTemplate::Multisig(MultisigScript { threshold, keys }))
            }
            _ => None,
        }
    }

    /// Checks whether the template commits to the given public key, either
    /// directly or via its hash.
    pub fn commits_to(&self, pk: LegacyPk) -> bool {
        match self {
            ScriptTemplate::P2pk(key) => *key == pk,
            ScriptTemplate::P2pkh(hash) => *hash == PubkeyHash::from(pk),
            ScriptTemplate::P2wpkh(hash) => {
                pk.to_compressed_pk().map(WPubkeyHash::from).as_ref() == Some(hash)
            }
            ScriptTemplate::Multisig(multisig) => multisig.keys.contains(&pk),
        }
    }
}

#[cfg(test)]
mod test {
    use derive::secp256k1::{SecretKey, SECP256K1};

    use super::*;
    use crate::script::ScriptPubkeyExt;

    fn pk(byte: u8) -> LegacyPk {
        LegacyPk::compressed(SecretKey::from_slice(&[byte; 32]).unwrap().public_key(SECP256K1))
    }

    #[test]
    fn classify_multisig() {
        let multisig = MultisigScript::new(2, [pk(1), pk(2), pk(3)]);
        let script = multisig.to_script_bytes();
        assert_eq!(script.as_slice()[0], 0x52);
        assert_eq!(script.as_slice()[script.len() - 2], 0x53);
        assert_eq!(script.as_slice()[script.len() - 1], OP_CHECKMULTISIG);
        assert_eq!(ScriptTemplate::classify(&script), Some(ScriptTemplate::Multisig(multisig)));
    }

    #[test]
    fn classify_invalid_multisig() {
        // threshold exceeding the number of keys
        let script = MultisigScript::new(3, [pk(1), pk(2)]).to_script_bytes();
        assert_eq!(ScriptTemplate::classify(&script), None);

        // key which is not a valid point
        let mut script = ScriptBytes::from_unsafe(vec![small_num_op(1)]);
        script.push_slice(&[0x05; 33]);
        let mut bytes = script.into_vec();
        bytes.extend([small_num_op(1), OP_CHECKMULTISIG]);
        assert_eq!(ScriptTemplate::classify(&ScriptBytes::from_unsafe(bytes)), None);
    }

    #[test]
    fn classify_single_key() {
        let key = pk(4);
        let p2pk = ScriptPubkey::p2pk(key);
        assert_eq!(ScriptTemplate::classify(p2pk.as_script_bytes()), Some(ScriptTemplate::P2pk(key)));

        let p2pkh = ScriptPubkey::p2pkh(PubkeyHash::from(key));
        let template = ScriptTemplate::classify(p2pkh.as_script_bytes()).unwrap();
        assert_eq!(template, ScriptTemplate::P2pkh(PubkeyHash::from(key)));
        assert!(template.commits_to(key));
        assert!(!template.commits_to(LegacyPk::uncompressed(key.pubkey)));

        let p2wpkh = ScriptPubkey::p2wpkh(WPubkeyHash::from(key.to_compressed_pk().unwrap()));
        assert!(ScriptTemplate::classify(p2wpkh.as_script_bytes()).unwrap().commits_to(key));
    }
}
