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

//! Error types for ledger operations.

use crate::base::UserId;
use std::fmt;
use thiserror::Error;

/// Why an amount was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountRejection {
    /// Amount is zero or negative.
    NotPositive,
    /// Charge is smaller than the configured minimum.
    BelowMinimumCharge { minimum: u64 },
    /// Resulting balance would not fit in the balance type.
    Overflow,
}

/// Ledger operation errors.
///
/// Every variant is returned before any mutation takes place, so a failed
/// operation leaves both the balance and the history untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointError {
    /// Amount is non-positive, below the charge minimum, or would overflow
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount {
        amount: i64,
        reason: AmountRejection,
    },

    /// Use would take the balance below zero
    #[error("insufficient balance for user {user_id}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        user_id: UserId,
        balance: u64,
        requested: u64,
    },

    /// Caller gave up waiting for the user's lock (only with a configured timeout)
    #[error("timed out waiting for lock on user {user_id}")]
    LockTimeout { user_id: UserId },
}

impl fmt::Display for AmountRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmountRejection::NotPositive => write!(f, "must be positive"),
            AmountRejection::BelowMinimumCharge { minimum } => {
                write!(f, "charge must be at least {minimum}")
            }
            AmountRejection::Overflow => write!(f, "balance would overflow"),
        }
    }
}

impl PointError {
    pub fn not_positive(amount: i64) -> Self {
        PointError::InvalidAmount {
            amount,
            reason: AmountRejection::NotPositive,
        }
    }

    pub fn below_minimum(amount: i64, minimum: u64) -> Self {
        PointError::InvalidAmount {
            amount,
            reason: AmountRejection::BelowMinimumCharge { minimum },
        }
    }

    pub fn overflow(amount: i64) -> Self {
        PointError::InvalidAmount {
            amount,
            reason: AmountRejection::Overflow,
        }
    }

    /// Returns `true` for [`PointError::InvalidAmount`], whatever the reason.
    pub fn is_invalid_amount(&self) -> bool {
        matches!(self, PointError::InvalidAmount { .. })
    }
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
