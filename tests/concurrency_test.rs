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

//! Concurrency tests for the point ledger.
//!
//! These run many threads against one ledger and check that the per-user
//! locking keeps balances and histories in step. A background thread polls
//! parking_lot's deadlock detector (enabled through the `deadlock_detection`
//! dev feature) while each test runs.

use parking_lot::deadlock;
use point_ledger::{LedgerConfig, PointError, PointLedger, TransactionType, UserId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

// === Deadlock Detection Infrastructure ===

struct DeadlockDetector {
    running: Arc<AtomicBool>,
    detected: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Starts a background thread that checks for deadlocks.
fn start_deadlock_detector() -> DeadlockDetector {
    let running = Arc::new(AtomicBool::new(true));
    let detected = Arc::new(AtomicBool::new(false));
    let handle = {
        let running = running.clone();
        let detected = detected.clone();
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
                let deadlocks = deadlock::check_deadlock();
                if !deadlocks.is_empty() {
                    eprintln!("\n=== DEADLOCK DETECTED ===");
                    for (i, threads) in deadlocks.iter().enumerate() {
                        eprintln!("\nDeadlock #{}", i + 1);
                        for t in threads {
                            eprintln!("Thread ID: {:?}", t.thread_id());
                            eprintln!("Backtrace:\n{:#?}", t.backtrace());
                        }
                    }
                    detected.store(true, Ordering::SeqCst);
                    return;
                }
            }
        })
    };
    DeadlockDetector {
        running,
        detected,
        handle: Some(handle),
    }
}

/// Stops the detector and fails the test if it saw a deadlock.
fn stop_deadlock_detector(mut detector: DeadlockDetector) {
    detector.running.store(false, Ordering::SeqCst);
    if let Some(handle) = detector.handle.take() {
        handle.join().expect("detector thread panicked");
    }
    assert!(
        !detector.detected.load(Ordering::SeqCst),
        "Deadlock detected! See output above for details."
    );
}

fn assert_consistent(ledger: &PointLedger, user_id: UserId) {
    let report = ledger.audit(user_id);
    assert!(
        report.is_consistent(),
        "user {user_id}: balance {} but history replays to {:?}",
        report.balance.points,
        report.replayed
    );
}

// === Tests ===

/// N concurrent valid charges land exactly once each.
#[test]
fn concurrent_charges_are_all_applied() {
    let detector = start_deadlock_detector();
    let ledger = Arc::new(PointLedger::new());

    const NUM_THREADS: usize = 16;
    const OPS_PER_THREAD: usize = 100;

    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let ledger = ledger.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..OPS_PER_THREAD {
                    ledger.charge_point(UserId(1), 1000).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let total = (NUM_THREADS * OPS_PER_THREAD) as u64;
    assert_eq!(ledger.get_balance(UserId(1)).points, total * 1000);

    let history = ledger.get_history(UserId(1));
    assert_eq!(history.len() as u64, total);
    let ids: HashSet<_> = history.iter().map(|record| record.id).collect();
    assert_eq!(ids.len() as u64, total, "duplicate transaction ids");
    assert_consistent(&ledger, UserId(1));
}

/// Concurrent uses never overdraw: exactly balance / amount of them succeed.
#[test]
fn concurrent_uses_never_overdraw() {
    let detector = start_deadlock_detector();
    let ledger = Arc::new(PointLedger::new());
    ledger.charge_point(UserId(1), 10_000).unwrap();

    const NUM_THREADS: usize = 32;

    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let succeeded = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let ledger = ledger.clone();
            let barrier = barrier.clone();
            let succeeded = succeeded.clone();
            thread::spawn(move || {
                barrier.wait();
                match ledger.use_point(UserId(1), 1000) {
                    Ok(balance) => {
                        succeeded.fetch_add(1, Ordering::SeqCst);
                        assert!(balance.points <= 9000);
                    }
                    Err(e) => assert!(matches!(e, PointError::InsufficientBalance { .. })),
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(succeeded.load(Ordering::SeqCst), 10);
    assert_eq!(ledger.get_balance(UserId(1)).points, 0);
    assert_eq!(ledger.get_history(UserId(1)).len(), 11);
    assert_consistent(&ledger, UserId(1));
}

/// Mixed charges, uses and reads on one user under heavy contention.
#[test]
fn no_deadlock_high_contention_single_user() {
    let detector = start_deadlock_detector();
    let ledger = Arc::new(PointLedger::new());

    const NUM_THREADS: usize = 50;
    const OPS_PER_THREAD: usize = 100;

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    match i % 3 {
                        0 => {
                            ledger.charge_point(UserId(1), 1000).unwrap();
                        }
                        1 => {
                            let _ = ledger.use_point(UserId(1), 700);
                        }
                        _ => {
                            // Reads must never see a torn write.
                            assert_consistent(&ledger, UserId(1));
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_consistent(&ledger, UserId(1));
    let history = ledger.get_history(UserId(1));
    let charges = history
        .iter()
        .filter(|record| record.kind == TransactionType::Charge)
        .count();
    assert_eq!(charges, NUM_THREADS * OPS_PER_THREAD.div_ceil(3));
}

/// Threads spread over many users; each user's history matches its balance.
#[test]
fn no_deadlock_cross_user_operations() {
    let detector = start_deadlock_detector();
    let ledger = Arc::new(PointLedger::new());

    const NUM_THREADS: usize = 20;
    const NUM_USERS: u64 = 10;
    const OPS_PER_THREAD: usize = 50;

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let user_id = UserId(((thread_id + i) as u64 % NUM_USERS) + 1);
                    if i % 2 == 0 {
                        ledger.charge_point(user_id, 5000).unwrap();
                    } else {
                        let _ = ledger.use_point(user_id, 1000);
                    }

                    // Also read from a different user
                    let other = UserId(((thread_id + i + 1) as u64 % NUM_USERS) + 1);
                    let _ = ledger.get_balance(other);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(ledger.users().len(), NUM_USERS as usize);
    for user in 1..=NUM_USERS {
        assert_consistent(&ledger, UserId(user));
    }
    assert!(ledger.lock_registry().is_empty());
}

/// A user held for a long time does not slow down other users.
#[test]
fn held_user_does_not_block_other_users() {
    let ledger = Arc::new(PointLedger::new());
    let guard = ledger.lock_registry().acquire(UserId(1));

    let other = ledger.clone();
    let handle = thread::spawn(move || {
        for user in 2..50 {
            other.charge_point(UserId(user), 1000).unwrap();
        }
    });
    handle.join().expect("Thread panicked");

    drop(guard);
    assert_eq!(ledger.users().len(), 48);
}

/// A waiter that times out leaves no trace; the holder's operation completes.
#[test]
fn abandoned_wait_has_no_side_effects() {
    let ledger = Arc::new(PointLedger::with_config(LedgerConfig {
        lock_timeout_ms: Some(20),
        ..LedgerConfig::default()
    }));
    ledger.charge_point(UserId(1), 2000).unwrap();

    let guard = ledger.lock_registry().acquire(UserId(1));
    let waiter = {
        let ledger = ledger.clone();
        thread::spawn(move || ledger.use_point(UserId(1), 500))
    };
    let result = waiter.join().expect("Thread panicked");
    drop(guard);

    assert_eq!(result, Err(PointError::LockTimeout { user_id: UserId(1) }));
    assert_eq!(ledger.get_balance(UserId(1)).points, 2000);
    assert_eq!(ledger.get_history(UserId(1)).len(), 1);
}

/// Without fair hand-off or eager reclamation the ledger is still correct.
#[test]
fn unfair_unlock_without_reclaim_stays_consistent() {
    let ledger = Arc::new(PointLedger::with_config(LedgerConfig {
        fair_unlock: false,
        reclaim_on_release: false,
        ..LedgerConfig::default()
    }));

    let handles: Vec<_> = (0..8u64)
        .map(|thread_id| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                for i in 0..200u64 {
                    let user_id = UserId((thread_id + i) % 4 + 1);
                    ledger.charge_point(user_id, 1000).unwrap();
                    let _ = ledger.use_point(user_id, 1500);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    for user in 1..=4 {
        assert_consistent(&ledger, UserId(user));
    }
    assert_eq!(ledger.lock_registry().len(), 4);
    assert_eq!(ledger.lock_registry().reclaim_idle(), 4);
}
