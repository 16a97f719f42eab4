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

//! Merging of PSBTs: combining the data of several signers for the same
//! transaction, and joining transactions of different parties.

use std::collections::HashSet;

use derive::{LockTime, Outpoint, TxVer, Txid};

use crate::{InsanePsbt, Psbt, PsbtVer, Unmodifiable};

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum CombineError {
    /// PSBTs of different versions {0} and {1} can't be combined.
    VersionMismatch(PsbtVer, PsbtVer),

    /// PSBTs describe different transactions {expected} and {found}.
    TxMismatch { expected: Txid, found: Txid },
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum JoinError {
    /// the joined PSBT is not sane. {0}
    #[from]
    Insane(InsanePsbt),

    /// both PSBTs spend the same output {0}.
    DoubleSpend(Outpoint),

    /// PSBTs of different versions {0} and {1} can't be joined.
    VersionMismatch(PsbtVer, PsbtVer),

    /// PSBTs have different transaction versions {0:?} and {1:?}.
    TxVersionMismatch(TxVer, TxVer),

    /// PSBTs require different lock times {0:?} and {1:?}.
    LockTimeMismatch(LockTime, LockTime),

    /// inputs or outputs of the PSBT can't be modified.
    #[from(Unmodifiable)]
    Unmodifiable,
}

impl Psbt {
    /// Combines PSBT with another PSBT for the same transaction, merging the
    /// data provided by different participants.
    ///
    /// Version 0 PSBTs must have the same transaction id; version 2 PSBTs must
    /// have the same unique id (which doesn't depend on sequence numbers).
    pub fn combine(mut self, other: Psbt) -> Result<Psbt, CombineError> {
        if self.version != other.version {
            return Err(CombineError::VersionMismatch(self.version, other.version));
        }
        let (expected, found) = match self.version {
            PsbtVer::V0 => (self.txid(), other.txid()),
            PsbtVer::V2 => (self.unique_id(), other.unique_id()),
        };
        if expected != found {
            return Err(CombineError::TxMismatch { expected, found });
        }

        for (xpub, origin) in other.xpubs {
            self.xpubs.entry(xpub).or_insert(origin);
        }
        self.unknown.merge(other.unknown);
        if self.fallback_locktime.is_none() {
            self.fallback_locktime = other.fallback_locktime;
        }
        if self.tx_modifiable.is_none() {
            self.tx_modifiable = other.tx_modifiable;
        }

        for (input, other) in self.inputs.iter_mut().zip(other.inputs) {
            input.combine(other);
        }
        for (output, other) in self.outputs.iter_mut().zip(other.outputs) {
            output.combine(other);
        }

        log::debug!(target: "psbt", "combined PSBT for transaction {expected}");
        Ok(self)
    }

    /// Joins inputs and outputs of another PSBT to the inputs and outputs of
    /// this PSBT, producing a PSBT for a transaction spending the coins of
    /// both.
    ///
    /// The other PSBT must pass sanity checks, and the PSBTs must not spend
    /// the same outputs.
    pub fn coin_join(&self, other: &Psbt) -> Result<Psbt, JoinError> {
        if self.version != other.version {
            return Err(JoinError::VersionMismatch(self.version, other.version));
        }
        if self.tx_version != other.tx_version {
            return Err(JoinError::TxVersionMismatch(self.tx_version, other.tx_version));
        }
        if self.lock_time() != other.lock_time() {
            return Err(JoinError::LockTimeMismatch(self.lock_time(), other.lock_time()));
        }
        if !self.are_inputs_modifiable() || !self.are_outputs_modifiable() {
            return Err(Unmodifiable.into());
        }
        other.assert_sanity()?;

        let spent = self.inputs().map(|input| input.previous_outpoint).collect::<HashSet<_>>();
        if let Some(input) = other.inputs().find(|input| spent.contains(&input.previous_outpoint)) {
            return Err(JoinError::DoubleSpend(input.previous_outpoint));
        }

        let mut joined = self.clone();
        let input_offset = joined.inputs.len();
        let output_offset = joined.outputs.len();
        joined.inputs.extend(other.inputs().cloned().map(|mut input| {
            input.index += input_offset;
            input
        }));
        joined.outputs.extend(other.outputs().cloned().map(|mut output| {
            output.index += output_offset;
            output
        }));
        for (xpub, origin) in other.xpubs() {
            joined.xpubs.entry(*xpub).or_insert_with(|| origin.clone());
        }
        joined.unknown.merge(other.unknown.clone());

        log::debug!(
            target: "psbt",
            "joined {} inputs and {} outputs to PSBT with {input_offset} inputs and {output_offset} outputs",
            other.inputs.len(),
            other.outputs.len()
        );
        Ok(joined)
    }
}

#[cfg(test)]
mod test {
    use derive::{LockTime, Sats, ScriptPubkey, SeqNo};

    use super::*;
    use crate::SEQ_NO_MAX_VALUE;

    fn psbt(txid: u8, inputs: u32) -> Psbt {
        let mut psbt = Psbt::create(PsbtVer::V2);
        for vout in 0..inputs {
            let outpoint = Outpoint::new(Txid::from([txid; 32]), vout);
            psbt.construct_input(outpoint, SeqNo::from_consensus_u32(SEQ_NO_MAX_VALUE)).unwrap();
        }
        psbt.construct_output(ScriptPubkey::new(), Sats(1000)).unwrap();
        psbt
    }

    #[test]
    fn combine_checks_tx() {
        let a = psbt(1, 1);
        assert_eq!(
            a.clone().combine(psbt(2, 1)),
            Err(CombineError::TxMismatch {
                expected: a.unique_id(),
                found: psbt(2, 1).unique_id()
            })
        );
        assert_eq!(
            a.clone().combine(Psbt::create(PsbtVer::V0)),
            Err(CombineError::VersionMismatch(PsbtVer::V2, PsbtVer::V0))
        );

        let mut b = a.clone();
        b.inputs[0].sequence_number = Some(SeqNo::ZERO);
        let combined = a.clone().combine(b).unwrap();
        assert_eq!(combined, a);
    }

    #[test]
    fn coin_join() {
        let a = psbt(1, 2);
        let b = psbt(2, 1);
        let joined = a.coin_join(&b).unwrap();
        assert_eq!(joined.inputs().len(), 3);
        assert_eq!(joined.outputs().len(), 2);
        assert_eq!(joined.input(2).unwrap().index(), 2);
        assert_eq!(joined.input(2).unwrap().previous_outpoint, b.input(0).unwrap().previous_outpoint);
        assert_eq!(joined.output(1).unwrap().index(), 1);

        assert_eq!(
            a.coin_join(&psbt(1, 1)),
            Err(JoinError::DoubleSpend(Outpoint::new(Txid::from([1; 32]), 0u32)))
        );

        let mut c = psbt(3, 1);
        c.fallback_locktime = Some(LockTime::from_consensus_u32(10));
        assert!(matches!(a.coin_join(&c), Err(JoinError::LockTimeMismatch(..))));

        let mut d = psbt(4, 1);
        d.complete_construction();
        assert_eq!(d.coin_join(&a), Err(JoinError::Unmodifiable));
    }
}
