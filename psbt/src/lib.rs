// Modern, minimalistic & standard-compliant cold wallet library.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2020-2023 by
//     Dr Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// Copyright (C) 2020-2023 LNP/BP Standards Association. All rights reserved.
// Copyright (C) 2020-2023 Dr Maxim Orlovsky. All rights reserved.
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

//! Partially signed bitcoin transactions (BIP-174 and BIP-370): binary record
//! format, per-input and per-output data, combining, signing and finalization.

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod script;
mod template;
mod verify;
mod maps;
mod keys;
mod data;
mod coders;
mod coin;
mod input;
mod output;
mod sanity;
mod finalize;
mod combine;
mod sign;

pub use coders::{DecodeError, PsbtError};
pub use coin::{CoinError, PsbtCoin, SignableCoin};
pub use combine::{CombineError, JoinError};
pub use data::{
    Input, ModifiableFlags, Output, Psbt, PsbtParseError, PsbtSettings, PsbtUnsupportedVer,
    PsbtVer, Unmodifiable, SEQ_NO_MAX_VALUE,
};
pub use finalize::{FinalizeError, FinalizeErrors, InputFinalizeError};
pub use input::{StateError, Utxo};
pub use keys::{GlobalKey, InputKey, KeyType, MapName, OutputKey};
pub use maps::{Map, Maps, RecordKey, ValueData};
pub use sanity::{InputSanityError, InsanePsbt, SanityError};
pub use script::{
    Instruction, Instructions, LegacyPkExt, MalformedPush, RedeemScriptExt, ScriptExt,
    ScriptPubkeyExt, SigScriptExt,
};
pub use sign::{InputSignError, Rejected, SignError, SignInputError, Signer};
pub use template::{MultisigScript, ScriptTemplate};
pub use verify::{verify_input, ScriptError};
