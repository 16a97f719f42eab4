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


//! Script parsing and construction helpers missing from the consensus types.

use amplify::Wrapper;
use derive::opcodes::{OP_CHECKSIG, OP_PUSHNUM_1, OP_PUSHNUM_16, OP_PUSHNUM_NEG1};
use derive::{CompressedPk, LegacyPk, RedeemScript, ScriptBytes, ScriptPubkey, SigScript};

/// A single parsed script instruction.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Instruction<'script> {
    /// Data push (including the empty push performed by `OP_0`).
    PushBytes(&'script [u8]),
    /// Non-push operation code.
    Op(u8),
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display("script data push at byte {0} exceeds the script length")]
pub struct MalformedPush(pub usize);

pub struct Instructions<'script> {
    data: &'script [u8],
    pos: usize,
}

impl<'script> Iterator for Instructions<'script> {
    type Item = Result<Instruction<'script>, MalformedPush>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.pos;
        let opcode = *self.data.get(start)?;
        let rest = &self.data[start + 1..];
        let (len_size, len) = match opcode {
            0x00 => {
                self.pos += 1;
                return Some(Ok(Instruction::PushBytes(&[])));
            }
            0x01..=0x4b => (0usize, Some(opcode as usize)),
            0x4c => (1, rest.first().map(|b| *b as usize)),
            0x4d => (2, rest.get(..2).map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)),
            0x4e => (4, rest.get(..4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)),
            op => {
                self.pos += 1;
                return Some(Ok(Instruction::Op(op)));
            }
        };
        let Some(len) = len else {
            self.pos = self.data.len();
            return Some(Err(MalformedPush(start)));
        };
        let data_start = start + 1 + len_size;
        let Some(data) = self.data.get(data_start..data_start + len) else {
            self.pos = self.data.len();
            return Some(Err(MalformedPush(start)));
        };
        self.pos = data_start + len;
        Some(Ok(Instruction::PushBytes(data)))
    }
}

/// Opcode pushing a small integer (0 to 16) onto the stack.
pub(crate) fn small_num_op(num: u8) -> u8 {
    debug_assert!(num <= 16, "only small integers can be pushed with an opcode");
    match num {
        0 => 0x00,
        n => OP_PUSHNUM_1 + n - 1,
    }
}

/// Small integer pushed by the opcode, if the opcode is one of `OP_1`..`OP_16`.
pub(crate) fn small_num(op: u8) -> Option<u8> {
    (OP_PUSHNUM_1..=OP_PUSHNUM_16).contains(&op).then(|| op - OP_PUSHNUM_1 + 1)
}

/// Parsing of raw script bytes. Available on all script types through their
/// dereference to [`ScriptBytes`].
pub trait ScriptExt {
    fn instructions(&self) -> Instructions<'_>;

    /// Returns data of all push operations if the script consists of pushes
    /// only; otherwise returns `None`. Small integer opcodes are treated as
    /// pushes of their numeric values.
    fn push_items(&self) -> Option<Vec<Vec<u8>>> {
        let mut items = vec![];
        for instruction in self.instructions() {
            match instruction.ok()? {
                Instruction::PushBytes(data) => items.push(data.to_vec()),
                Instruction::Op(OP_PUSHNUM_NEG1) => items.push(vec![0x81]),
                Instruction::Op(op) => items.push(vec![small_num(op)?]),
            }
        }
        Some(items)
    }

    #[inline]
    fn is_push_only(&self) -> bool { self.push_items().is_some() }

    /// Checks whether the script contains a data push equal to `data`.
    fn contains_push(&self, data: &[u8]) -> bool {
        self.instructions()
            .any(|instruction| matches!(instruction, Ok(Instruction::PushBytes(push)) if push == data))
    }

    /// Returns witness version of the witness program, or `None` if the script
    /// is not a witness program.
    fn witness_version(&self) -> Option<u8>;
}

impl ScriptExt for ScriptBytes {
    fn instructions(&self) -> Instructions<'_> {
        Instructions {
            data: self.as_slice(),
            pos: 0,
        }
    }

    fn witness_version(&self) -> Option<u8> {
        let s = self.as_slice();
        if !(4..=42).contains(&s.len()) || s[1] as usize != s.len() - 2 {
            return None;
        }
        match s[0] {
            0x00 => Some(0),
            op => small_num(op),
        }
    }
}

pub trait ScriptPubkeyExt {
    /// Bare public key output script.
    fn p2pk(pk: LegacyPk) -> Self;
}

impl ScriptPubkeyExt for ScriptPubkey {
    fn p2pk(pk: LegacyPk) -> Self {
        let mut script = ScriptBytes::from_unsafe(Vec::with_capacity(67));
        script.push_slice(&pk.to_vec());
        let mut bytes = script.into_vec();
        bytes.push(OP_CHECKSIG);
        ScriptPubkey::from_unsafe(bytes)
    }
}

pub trait RedeemScriptExt {
    /// Interprets the redeem script as an output script; used for nested
    /// witness programs.
    fn to_inner_script_pubkey(&self) -> ScriptPubkey;
}

impl RedeemScriptExt for RedeemScript {
    fn to_inner_script_pubkey(&self) -> ScriptPubkey {
        ScriptPubkey::from_inner(self.as_script_bytes().clone())
    }
}

pub trait SigScriptExt {
    /// Constructs scriptSig made of data pushes only.
    fn from_push_items<'a>(items: impl IntoIterator<Item = &'a [u8]>) -> Self;
}

impl SigScriptExt for SigScript {
    fn from_push_items<'a>(items: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut script = ScriptBytes::default();
        for item in items {
            script.push_slice(item);
        }
        SigScript::from_inner(script)
    }
}

pub trait LegacyPkExt {
    fn to_compressed_pk(&self) -> Option<CompressedPk>;
}

impl LegacyPkExt for LegacyPk {
    fn to_compressed_pk(&self) -> Option<CompressedPk> {
        self.compressed.then(|| CompressedPk::from(self.pubkey))
    }
}
