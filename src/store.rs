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

//! Balance storage.
//!
//! The [`LedgerStore`] only promises atomic single-key reads and upserts. It
//! does no locking of its own across operations; the ledger serializes
//! writers per user before it touches the store.

use crate::balance::BalanceRecord;
use crate::base::UserId;
use dashmap::DashMap;

/// Key-value storage for current balances.
pub trait LedgerStore: Send + Sync {
    /// Returns the stored balance, or `None` for a user never written.
    fn get(&self, user_id: UserId) -> Option<BalanceRecord>;

    /// Inserts or replaces the balance for `balance.user_id`.
    fn put(&self, balance: BalanceRecord) -> BalanceRecord;

    /// Users that have a stored balance, in no particular order.
    fn user_ids(&self) -> Vec<UserId>;
}

/// In-memory [`LedgerStore`] backed by a sharded [`DashMap`].
///
/// Writes to different users land on independent shards most of the time,
/// so unrelated users do not contend.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    balances: DashMap<UserId, BalanceRecord>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn get(&self, user_id: UserId) -> Option<BalanceRecord> {
        self.balances.get(&user_id).map(|entry| *entry)
    }

    fn put(&self, balance: BalanceRecord) -> BalanceRecord {
        self.balances.insert(balance.user_id, balance);
        balance
    }

    fn user_ids(&self) -> Vec<UserId> {
        self.balances.iter().map(|entry| *entry.key()).collect()
    }
}
