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

//! Point ledger service.
//!
//! The [`PointLedger`] is the central component. It owns the balance store,
//! the history log and the per-user lock registry, and it is the only code
//! that mutates balances.
//!
//! # Operations
//!
//! - **Charge**: credit points. Rejected below the configured minimum.
//! - **Use**: debit points. Rejected if the balance would go negative.
//! - **Balance / History**: read a user's current balance or full history.
//!
//! # Thread Safety
//!
//! Every operation on a user runs under that user's lock from the
//! [`UserLockRegistry`]. A charge or use reads the balance, validates, appends
//! the history record and writes the new balance without releasing the lock,
//! so no other operation can see the history and balance out of step.
//! Operations on different users take different locks and run in parallel.

use crate::balance::BalanceRecord;
use crate::base::UserId;
use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::error::PointError;
use crate::history::{HistoryLog, InMemoryHistoryLog};
use crate::lock_registry::{UserLockGuard, UserLockRegistry};
use crate::store::{InMemoryLedgerStore, LedgerStore};
use crate::transaction::{TransactionDraft, TransactionRecord, TransactionType, replay};
use std::sync::Arc;
use tracing::debug;

/// Per-user serialized point ledger.
///
/// # Invariants
///
/// - A balance never goes below zero.
/// - A user's balance equals the sum of their charges minus the sum of their
///   uses, as recorded in the history log.
/// - A rejected operation changes neither the balance nor the history.
/// - A critical section holds exactly one user lock, so operations cannot
///   deadlock on each other.
pub struct PointLedger<S = InMemoryLedgerStore, H = InMemoryHistoryLog> {
    store: S,
    history: H,
    locks: UserLockRegistry,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl PointLedger {
    /// Creates an in-memory ledger with default configuration and the system
    /// clock.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self::from_parts(
            InMemoryLedgerStore::new(),
            InMemoryHistoryLog::new(),
            Arc::new(SystemClock),
            config,
        )
    }
}

impl Default for PointLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: LedgerStore, H: HistoryLog> PointLedger<S, H> {
    /// Assembles a ledger from its collaborators.
    pub fn from_parts(store: S, history: H, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        let locks = UserLockRegistry::with_config(&config);
        Self {
            store,
            history,
            locks,
            clock,
            config,
        }
    }

    /// Credits `amount` points to `user_id` and returns the updated balance.
    ///
    /// Users without a balance start from zero.
    ///
    /// # Errors
    ///
    /// - [`PointError::InvalidAmount`] - amount is not positive, is below
    ///   `min_charge_amount`, or the balance would overflow.
    /// - [`PointError::LockTimeout`] - a lock timeout is configured and expired.
    pub fn charge_point(&self, user_id: UserId, amount: i64) -> Result<BalanceRecord, PointError> {
        let amount_points = positive(amount)?;
        if amount_points < self.config.min_charge_amount {
            let error = PointError::below_minimum(amount, self.config.min_charge_amount);
            debug!(%user_id, amount, %error, "charge rejected");
            return Err(error);
        }

        self.apply(user_id, amount_points, TransactionType::Charge)
            .inspect_err(|error| debug!(%user_id, amount, %error, "charge rejected"))
    }

    /// Debits `amount` points from `user_id` and returns the updated balance.
    ///
    /// # Errors
    ///
    /// - [`PointError::InvalidAmount`] - amount is not positive.
    /// - [`PointError::InsufficientBalance`] - amount exceeds the balance.
    /// - [`PointError::LockTimeout`] - a lock timeout is configured and expired.
    pub fn use_point(&self, user_id: UserId, amount: i64) -> Result<BalanceRecord, PointError> {
        let amount_points = positive(amount)?;
        self.apply(user_id, amount_points, TransactionType::Use)
            .inspect_err(|error| debug!(%user_id, amount, %error, "use rejected"))
    }

    /// Current balance of `user_id`, or a zero balance if the user has none.
    ///
    /// Waits for any in-flight charge or use on the same user, so the result
    /// always matches [`get_history`](Self::get_history) at some instant.
    pub fn get_balance(&self, user_id: UserId) -> BalanceRecord {
        let _guard = self.locks.acquire(user_id);
        self.current_balance(user_id)
    }

    /// Full history of `user_id` in the order operations were committed.
    pub fn get_history(&self, user_id: UserId) -> Vec<TransactionRecord> {
        let _guard = self.locks.acquire(user_id);
        self.history.list_by_user(user_id)
    }

    /// Reads balance and history together and replays the history.
    pub fn audit(&self, user_id: UserId) -> AuditReport {
        let _guard = self.locks.acquire(user_id);
        let balance = self.current_balance(user_id);
        let history = self.history.list_by_user(user_id);
        AuditReport {
            balance,
            replayed: replay(&history),
            transactions: history.len(),
        }
    }

    /// Users with a stored balance, sorted by id.
    pub fn users(&self) -> Vec<UserId> {
        let mut users = self.store.user_ids();
        users.sort_unstable();
        users
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn lock_registry(&self) -> &UserLockRegistry {
        &self.locks
    }

    /// Runs one charge or use as a single critical section.
    fn apply(
        &self,
        user_id: UserId,
        amount: u64,
        kind: TransactionType,
    ) -> Result<BalanceRecord, PointError> {
        let _guard = self.lock(user_id)?;

        let current = self.current_balance(user_id);
        let now = self.clock.now();
        let next = match kind {
            TransactionType::Charge => current.charge(amount, now)?,
            TransactionType::Use => current.reduce(amount, now)?,
        };

        // Nothing has been written yet; from here on both writes happen.
        let record = self.history.append(TransactionDraft {
            user_id,
            amount,
            kind,
            timestamp: next.updated_at,
        });
        let stored = self.store.put(next);

        debug!(
            %user_id,
            transaction_id = %record.id,
            %kind,
            amount,
            points = stored.points,
            "transaction committed"
        );
        Ok(stored)
    }

    fn lock(&self, user_id: UserId) -> Result<UserLockGuard<'_>, PointError> {
        match self.config.lock_timeout() {
            None => Ok(self.locks.acquire(user_id)),
            Some(timeout) => self
                .locks
                .try_acquire_for(user_id, timeout)
                .ok_or(PointError::LockTimeout { user_id }),
        }
    }

    fn current_balance(&self, user_id: UserId) -> BalanceRecord {
        self.store
            .get(user_id)
            .unwrap_or_else(|| BalanceRecord::empty(user_id))
    }
}

/// Result of [`PointLedger::audit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditReport {
    pub balance: BalanceRecord,
    /// Balance rebuilt from history, `None` if the history cannot be replayed.
    pub replayed: Option<u64>,
    pub transactions: usize,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.replayed == Some(self.balance.points)
    }
}

fn positive(amount: i64) -> Result<u64, PointError> {
    match u64::try_from(amount) {
        Ok(points) if points > 0 => Ok(points),
        _ => Err(PointError::not_positive(amount)),
    }
}
