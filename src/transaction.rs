// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Transaction records.
//!
//! Every committed charge or use leaves exactly one [`TransactionRecord`] in
//! the history log. Records are immutable; a user's balance can always be
//! rebuilt by folding their history with [`replay`].

use crate::base::{Timestamp, TransactionId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Charge,
    Use,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charge => write!(f, "CHARGE"),
            Self::Use => write!(f, "USE"),
        }
    }
}

/// A validated transaction that has not been assigned an id yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionDraft {
    pub user_id: UserId,
    pub amount: u64,
    pub kind: TransactionType,
    pub timestamp: Timestamp,
}

/// Immutable log entry for one charge or use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: u64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub timestamp: Timestamp,
}

impl TransactionRecord {
    pub fn from_draft(id: TransactionId, draft: TransactionDraft) -> Self {
        Self {
            id,
            user_id: draft.user_id,
            amount: draft.amount,
            kind: draft.kind,
            timestamp: draft.timestamp,
        }
    }
}

/// Rebuilds a balance from a history, starting at zero.
///
/// Returns `None` if the history would ever drive the balance below zero or
/// past `u64::MAX`, which no history produced by the ledger can do.
pub fn replay<'a, I>(history: I) -> Option<u64>
where
    I: IntoIterator<Item = &'a TransactionRecord>,
{
    history
        .into_iter()
        .try_fold(0u64, |points, record| match record.kind {
            TransactionType::Charge => points.checked_add(record.amount),
            TransactionType::Use => points.checked_sub(record.amount),
        })
}
