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

//! Partially signed bitcoin transactions with BIP32 key derivation and a
//! reference signer.

pub use derive::*;
pub use psbt::{
    verify_input, CoinError, CombineError, DecodeError, FinalizeError, FinalizeErrors, GlobalKey,
    Input, InputFinalizeError, InputKey, InputSanityError, InputSignError, InsanePsbt, Instruction,
    Instructions, JoinError, KeyType, LegacyPkExt, MalformedPush, Map, MapName, Maps,
    ModifiableFlags, MultisigScript, Output, OutputKey, Psbt, PsbtCoin, PsbtError, PsbtParseError,
    PsbtSettings, PsbtUnsupportedVer, PsbtVer, RecordKey, RedeemScriptExt, Rejected, SanityError,
    ScriptError, ScriptExt, ScriptPubkeyExt, ScriptTemplate, SigScriptExt, SignError,
    SignInputError, SignableCoin, Signer, StateError, Unmodifiable, Utxo, ValueData,
    SEQ_NO_MAX_VALUE,
};
pub use signers::{SigningSession, XprivSigner};

mod signers;
