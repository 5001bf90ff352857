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

//! Balance records.
//!
//! A [`BalanceRecord`] is a value: applying a charge or use produces a new
//! record and leaves the old one alone, so a rejected operation can never
//! leave a half-updated balance behind.
//!
//! # Example
//!
//! ```
//! use point_ledger::{BalanceRecord, Timestamp, UserId};
//!
//! let balance = BalanceRecord::empty(UserId(1));
//! assert_eq!(balance.points, 0);
//!
//! let charged = balance.charge(1000, Timestamp(10)).unwrap();
//! assert_eq!(charged.points, 1000);
//! assert_eq!(balance.points, 0);
//! ```

use crate::base::{Timestamp, UserId};
use crate::error::PointError;
use serde::{Deserialize, Serialize};

/// Current point total for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub user_id: UserId,
    pub points: u64,
    pub updated_at: Timestamp,
}

impl BalanceRecord {
    /// Zero balance for a user the ledger has never seen.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            points: 0,
            updated_at: Timestamp::EPOCH,
        }
    }

    /// Returns the balance after crediting `amount`.
    ///
    /// `updated_at` never moves backwards: if `at` is earlier than the current
    /// stamp, the current stamp is kept.
    ///
    /// # Errors
    ///
    /// - [`PointError::InvalidAmount`] if `amount` is zero or the sum overflows.
    pub fn charge(&self, amount: u64, at: Timestamp) -> Result<Self, PointError> {
        if amount == 0 {
            return Err(PointError::not_positive(0));
        }
        let points = self
            .points
            .checked_add(amount)
            .ok_or_else(|| PointError::overflow(signed(amount)))?;
        Ok(self.with_points(points, at))
    }

    /// Returns the balance after debiting `amount`.
    ///
    /// # Errors
    ///
    /// - [`PointError::InvalidAmount`] if `amount` is zero.
    /// - [`PointError::InsufficientBalance`] if `amount` exceeds the balance.
    pub fn reduce(&self, amount: u64, at: Timestamp) -> Result<Self, PointError> {
        if amount == 0 {
            return Err(PointError::not_positive(0));
        }
        let points = self
            .points
            .checked_sub(amount)
            .ok_or(PointError::InsufficientBalance {
                user_id: self.user_id,
                balance: self.points,
                requested: amount,
            })?;
        Ok(self.with_points(points, at))
    }

    fn with_points(&self, points: u64, at: Timestamp) -> Self {
        let next = Self {
            user_id: self.user_id,
            points,
            updated_at: at.max(self.updated_at),
        };
        debug_assert!(
            next.updated_at >= self.updated_at,
            "Invariant violated: updated_at moved backwards for user {}",
            self.user_id
        );
        next
    }
}

fn signed(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}
