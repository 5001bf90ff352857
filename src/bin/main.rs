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

use clap::Parser;
use crossbeam::channel;
use csv::{ReaderBuilder, Trim, Writer};
use point_ledger::{BalanceRecord, LedgerConfig, PointError, PointLedger, UserId};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Commands buffered between the CSV reader and the workers.
const COMMAND_QUEUE_DEPTH: usize = 1024;

/// Point Ledger - Replay charge/use commands from a CSV file
///
/// Reads commands from a CSV file, applies them to an in-memory ledger from
/// several worker threads, and writes the resulting balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "point-ledger")]
#[command(about = "Replays point charge/use commands against a concurrent ledger", long_about = None)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected format: op,user,amount (a `type` header is also accepted)
    /// Example: cargo run -- commands.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Number of worker threads applying commands
    ///
    /// Commands for the same user may be applied in a different order than
    /// they appear in the file unless this is 1.
    #[arg(short, long, default_value_t = 4)]
    workers: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match LedgerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!(path = %args.input.display(), error = %e, "cannot open command file");
            process::exit(1);
        }
    };

    let ledger = PointLedger::with_config(config);
    let stats = process_commands(BufReader::new(file), &ledger, args.workers);
    info!(
        applied = stats.applied,
        rejected = stats.rejected,
        skipped = stats.skipped,
        "replay finished"
    );

    if let Err(e) = write_balances(&ledger, std::io::stdout()) {
        error!(error = %e, "cannot write balances");
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, user, amount`. The first column may also be headed `type`.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(alias = "type")]
    op: String,
    user: u64,
    amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Charge { user_id: UserId, amount: i64 },
    Use { user_id: UserId, amount: i64 },
}

impl CsvRecord {
    /// Returns `None` for unknown operation types and for user id 0.
    fn into_command(self) -> Option<Command> {
        if self.user == 0 {
            return None;
        }
        let user_id = UserId(self.user);
        let amount = self.amount;
        match self.op.to_lowercase().as_str() {
            "charge" => Some(Command::Charge { user_id, amount }),
            "use" => Some(Command::Use { user_id, amount }),
            _ => None,
        }
    }
}

impl Command {
    fn apply(self, ledger: &PointLedger) -> Result<BalanceRecord, PointError> {
        match self {
            Command::Charge { user_id, amount } => ledger.charge_point(user_id, amount),
            Command::Use { user_id, amount } => ledger.use_point(user_id, amount),
        }
    }
}

/// Counters reported after a replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ReplayStats {
    applied: usize,
    rejected: usize,
    skipped: usize,
}

/// Replays commands from a CSV reader against `ledger`.
///
/// The reader runs on the calling thread and feeds a bounded channel that
/// `workers` threads drain. Malformed rows are skipped; rejected operations
/// are counted and logged, never fatal.
///
/// # CSV Format
///
/// ```csv
/// op,user,amount
/// charge,1,5000
/// use,1,1200
/// ```
fn process_commands<R: Read>(reader: R, ledger: &PointLedger, workers: usize) -> ReplayStats {
    let (sender, receiver) = channel::bounded::<Command>(COMMAND_QUEUE_DEPTH);
    let applied = AtomicUsize::new(0);
    let rejected = AtomicUsize::new(0);
    let mut skipped = 0;

    thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            let receiver = receiver.clone();
            let (applied, rejected) = (&applied, &rejected);
            scope.spawn(move || {
                for command in receiver {
                    match command.apply(ledger) {
                        Ok(_) => {
                            applied.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            debug!(?command, error = %e, "command rejected");
                            rejected.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
        drop(receiver);

        let mut rdr = ReaderBuilder::new()
            .trim(Trim::All)
            .has_headers(true)
            .from_reader(reader);

        for result in rdr.deserialize::<CsvRecord>() {
            let command = match result.map(CsvRecord::into_command) {
                Ok(Some(command)) => command,
                Ok(None) => {
                    warn!("skipping row with unknown operation type or user id 0");
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "skipping malformed row");
                    skipped += 1;
                    continue;
                }
            };
            if sender.send(command).is_err() {
                // Every worker is gone; nothing left to apply commands.
                break;
            }
        }
        drop(sender);
    });

    ReplayStats {
        applied: applied.into_inner(),
        rejected: rejected.into_inner(),
        skipped,
    }
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    user: UserId,
    points: u64,
    updated_at: u64,
    transactions: usize,
    consistent: bool,
}

/// Writes one row per user, sorted by user id.
///
/// # CSV Format
///
/// ```csv
/// user,points,updated_at,transactions,consistent
/// 1,3800,1767225600000,2,true
/// ```
fn write_balances<W: Write>(ledger: &PointLedger, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for user_id in ledger.users() {
        let report = ledger.audit(user_id);
        wtr.serialize(BalanceRow {
            user: user_id,
            points: report.balance.points,
            updated_at: report.balance.updated_at.as_millis(),
            transactions: report.transactions,
            consistent: report.is_consistent(),
        })?;
    }

    wtr.flush()?;
    Ok(())
}
