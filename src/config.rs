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

//! Ledger configuration.

use crate::error::ConfigError;
use ::config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;

/// Smallest charge accepted when nothing else is configured.
pub const DEFAULT_MIN_CHARGE_AMOUNT: u64 = 1000;

const ENV_PREFIX: &str = "POINT_LEDGER";

/// Tunables for the ledger and its lock registry.
///
/// Every field has a default, so an empty source yields
/// [`LedgerConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Charges below this amount are rejected.
    pub min_charge_amount: u64,
    /// Hand a released user lock straight to the longest waiter.
    pub fair_unlock: bool,
    /// Give up waiting for a user lock after this many milliseconds.
    /// `None` waits forever.
    pub lock_timeout_ms: Option<u64>,
    /// Remove a user's lock entry as soon as it is idle.
    pub reclaim_on_release: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_charge_amount: DEFAULT_MIN_CHARGE_AMOUNT,
            fair_unlock: true,
            lock_timeout_ms: None,
            reclaim_on_release: true,
        }
    }
}

impl LedgerConfig {
    /// Loads overrides from `POINT_LEDGER_*` environment variables, e.g.
    /// `POINT_LEDGER_MIN_CHARGE_AMOUNT=500`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::with_prefix(ENV_PREFIX))
    }

    fn load(environment: Environment) -> Result<Self, ConfigError> {
        let config: LedgerConfig = Config::builder()
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_charge_amount == 0 {
            return Err(ConfigError::Invalid(
                "min_charge_amount must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}
