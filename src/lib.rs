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

//! # Point Ledger
//!
//! This library keeps a point balance and an append-only transaction history
//! per user, and makes charge (credit) and use (debit) safe under concurrent
//! access.
//!
//! ## Core Components
//!
//! - [`PointLedger`]: Service that runs charge/use/read operations
//! - [`UserLockRegistry`]: One lazily created lock per user
//! - [`LedgerStore`] / [`HistoryLog`]: Balance and history storage
//! - [`PointError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use point_ledger::{PointError, PointLedger, TransactionType, UserId};
//!
//! let ledger = PointLedger::new();
//!
//! // Charge, then use
//! ledger.charge_point(UserId(1), 5000).unwrap();
//! let balance = ledger.use_point(UserId(1), 1000).unwrap();
//! assert_eq!(balance.points, 4000);
//!
//! // Rejected operations leave the ledger untouched
//! let result = ledger.use_point(UserId(1), 10_000);
//! assert!(matches!(result, Err(PointError::InsufficientBalance { .. })));
//!
//! let history = ledger.get_history(UserId(1));
//! assert_eq!(history.len(), 2);
//! assert_eq!(history[1].kind, TransactionType::Use);
//! ```
//!
//! ## Thread Safety
//!
//! Operations on the same user are serialized by that user's lock. Operations
//! on different users proceed in parallel.

mod balance;
mod base;
mod clock;
pub mod config;
pub mod error;
mod history;
mod ledger;
mod lock_registry;
mod store;
mod transaction;

pub use balance::BalanceRecord;
pub use base::{Timestamp, TransactionId, UserId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use crate::config::LedgerConfig;
pub use error::{AmountRejection, ConfigError, PointError};
pub use history::{HistoryLog, InMemoryHistoryLog};
pub use ledger::{AuditReport, PointLedger};
pub use lock_registry::{UserLockGuard, UserLockRegistry};
pub use store::{InMemoryLedgerStore, LedgerStore};
pub use transaction::{TransactionDraft, TransactionRecord, TransactionType, replay};
