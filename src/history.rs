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

//! Append-only transaction history.
//!
//! Provides a concurrent log that assigns globally increasing transaction ids
//! while keeping each user's records in insertion order.

use crate::base::{TransactionId, UserId};
use crate::transaction::{TransactionDraft, TransactionRecord};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only store of transaction records, partitioned by user.
pub trait HistoryLog: Send + Sync {
    /// Assigns the next id to `draft` and appends it to the user's history.
    fn append(&self, draft: TransactionDraft) -> TransactionRecord;

    /// All records for `user_id` in insertion order. Unknown users have an
    /// empty history.
    fn list_by_user(&self, user_id: UserId) -> Vec<TransactionRecord>;
}

/// In-memory [`HistoryLog`].
///
/// Combines an atomic counter for id assignment with a [`DashMap`] of
/// per-user vectors. Appends for different users only contend when their
/// keys share a shard.
#[derive(Debug)]
pub struct InMemoryHistoryLog {
    /// Records per user, oldest first.
    records: DashMap<UserId, Vec<TransactionRecord>>,

    /// Next id to hand out. Ids start at 1.
    next_id: AtomicU64,
}

impl InMemoryHistoryLog {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Total number of records across all users.
    pub fn len(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryHistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryLog for InMemoryHistoryLog {
    fn append(&self, draft: TransactionDraft) -> TransactionRecord {
        // Take the id while holding the user's entry so that ids within one
        // user's vector are strictly increasing.
        let mut entry = self.records.entry(draft.user_id).or_default();
        let id = TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = TransactionRecord::from_draft(id, draft);
        entry.push(record);
        record
    }

    fn list_by_user(&self, user_id: UserId) -> Vec<TransactionRecord> {
        self.records
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Timestamp;
    use crate::transaction::TransactionType;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn draft(user: u64, amount: u64, kind: TransactionType) -> TransactionDraft {
        TransactionDraft {
            user_id: UserId(user),
            amount,
            kind,
            timestamp: Timestamp(10),
        }
    }

    #[test]
    fn unknown_user_has_empty_history() {
        let log = InMemoryHistoryLog::new();
        assert!(log.list_by_user(UserId(1)).is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn append_assigns_increasing_ids_from_one() {
        let log = InMemoryHistoryLog::new();
        let first = log.append(draft(1, 1000, TransactionType::Charge));
        let second = log.append(draft(2, 2000, TransactionType::Charge));
        let third = log.append(draft(1, 500, TransactionType::Use));

        assert_eq!(first.id, TransactionId(1));
        assert_eq!(second.id, TransactionId(2));
        assert_eq!(third.id, TransactionId(3));
    }

    #[test]
    fn list_preserves_insertion_order_per_user() {
        let log = InMemoryHistoryLog::new();
        log.append(draft(1, 1000, TransactionType::Charge));
        log.append(draft(2, 3000, TransactionType::Charge));
        log.append(draft(1, 400, TransactionType::Use));

        let history = log.list_by_user(UserId(1));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TransactionType::Charge);
        assert_eq!(history[0].amount, 1000);
        assert_eq!(history[1].kind, TransactionType::Use);
        assert_eq!(history[1].amount, 400);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn listing_is_restartable() {
        let log = InMemoryHistoryLog::new();
        log.append(draft(1, 1000, TransactionType::Charge));
        assert_eq!(log.list_by_user(UserId(1)), log.list_by_user(UserId(1)));
    }

    #[test]
    fn concurrent_appends_never_reuse_ids() {
        let log = Arc::new(InMemoryHistoryLog::new());
        let handles: Vec<_> = (0..8u64)
            .map(|user| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for _ in 0..250 {
                        log.append(draft(user % 3, 1000, TransactionType::Charge));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let ids: HashSet<_> = (0..3)
            .flat_map(|user| log.list_by_user(UserId(user)))
            .map(|record| record.id)
            .collect();
        assert_eq!(ids.len(), 2000);
        assert_eq!(log.len(), 2000);

        for user in 0..3 {
            let history = log.list_by_user(UserId(user));
            assert!(history.windows(2).all(|pair| pair[0].id < pair[1].id));
        }
    }
}
