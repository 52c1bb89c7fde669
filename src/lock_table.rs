use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use rand::{thread_rng, Rng};

use crate::debug_delay::debug_delay;
use crate::{Error, PageId, Permission, Result, TransactionId};

/// The two lock strengths, mirroring [`Permission`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl From<Permission> for LockMode {
    fn from(perm: Permission) -> LockMode {
        match perm {
            Permission::ReadOnly => LockMode::Shared,
            Permission::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// The lock state of a single page. The exclusive variant
/// holds exactly one transaction by construction, which is
/// the invariant a mode flag plus holder list fails to make
/// unrepresentable.
#[derive(Debug)]
enum LockState {
    Shared(HashSet<TransactionId>),
    Exclusive(TransactionId),
}

#[derive(Default, Debug)]
struct Tables {
    locks: HashMap<PageId, LockState>,
    // inverse index, kept in step with `locks` under the
    // same critical section. authoritative for release_all.
    held: HashMap<TransactionId, HashSet<PageId>>,
}

impl Tables {
    /// Grants the request if the compatibility rules allow
    /// it, mutating both tables. Returns `false` when the
    /// caller must wait.
    fn try_grant(&mut self, tid: TransactionId, pid: PageId, mode: LockMode) -> bool {
        let can_grant = match (self.locks.get(&pid), mode) {
            (None, _) => true,
            (Some(LockState::Shared(_)), LockMode::Shared) => true,
            // only the sole shared holder may upgrade
            (Some(LockState::Shared(holders)), LockMode::Exclusive) => {
                holders.len() == 1 && holders.contains(&tid)
            }
            // exclusive dominates shared for its holder
            (Some(LockState::Exclusive(holder)), _) => *holder == tid,
        };

        if !can_grant {
            return false;
        }

        match mode {
            LockMode::Exclusive => {
                // fresh install, re-entrant request, and
                // sole-holder upgrade all land in the same
                // end state, with no window where the lock
                // is unheld
                self.locks.insert(pid, LockState::Exclusive(tid));
            }
            LockMode::Shared => {
                let state = self
                    .locks
                    .entry(pid)
                    .or_insert_with(|| LockState::Shared(HashSet::new()));
                if let LockState::Shared(holders) = state {
                    holders.insert(tid);
                }
                // a shared request against an exclusive lock
                // the requester already holds changes nothing
            }
        }

        self.held.entry(tid).or_default().insert(pid);

        true
    }

    /// Removes `tid` from `pid`'s lock state. Returns whether
    /// anything changed, so the caller knows to wake waiters.
    fn remove(&mut self, tid: TransactionId, pid: PageId) -> bool {
        let mut changed = false;

        if let Some(pids) = self.held.get_mut(&tid) {
            changed |= pids.remove(&pid);
            if pids.is_empty() {
                self.held.remove(&tid);
            }
        }

        let drop_entry = match self.locks.get_mut(&pid) {
            Some(LockState::Shared(holders)) => {
                changed |= holders.remove(&tid);
                holders.is_empty()
            }
            Some(LockState::Exclusive(holder)) => {
                if *holder == tid {
                    changed = true;
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if drop_entry {
            self.locks.remove(&pid);
        }

        changed
    }
}

/// Page-granularity two-phase locking.
///
/// A single mutex guards both the page table and the inverse
/// transaction index, and a single condvar serves all blocked
/// acquirers. Wakeups only happen on release, so contention
/// on the shared condition stays low at this scale.
///
/// Deadlocks are broken probabilistically: each acquisition
/// draws a uniform random timeout in `[0, max_timeout]`, and
/// a request that outlives its draw fails with
/// [`Error::TransactionAborted`]. Symmetric deadlocks almost
/// surely draw different timeouts, so one party backs out.
#[derive(Default)]
pub struct LockTable {
    mu: Mutex<Tables>,
    cv: Condvar,
}

impl LockTable {
    /// Blocks until `tid` holds `pid` in (at least) `mode`,
    /// or until the sampled timeout lapses.
    ///
    /// No fairness is guaranteed among waiters; a request
    /// that becomes grantable is granted whenever its thread
    /// next observes the lock table.
    pub fn acquire(
        &self,
        tid: TransactionId,
        pid: PageId,
        mode: LockMode,
        max_timeout: Duration,
    ) -> Result<()> {
        let sampled_ms = thread_rng().gen_range(0..=max_timeout.as_millis() as u64);
        let deadline = Instant::now() + Duration::from_millis(sampled_ms);

        let mut tables = self.mu.lock().unwrap();

        loop {
            debug_delay();

            if tables.try_grant(tid, pid, mode) {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                log::trace!(
                    "lock wait for {:?} on {:?} exceeded its {}ms draw, aborting",
                    tid,
                    pid,
                    sampled_ms,
                );
                return Err(Error::TransactionAborted);
            }

            let (guard, _timed_out) = self.cv.wait_timeout(tables, deadline - now).unwrap();
            tables = guard;
        }
    }

    /// Releases `tid`'s lock on `pid`, if held. Releasing a
    /// lock that is not held is a no-op, so release is
    /// idempotent.
    pub fn release(&self, tid: TransactionId, pid: PageId) {
        let mut tables = self.mu.lock().unwrap();
        if tables.remove(tid, pid) {
            self.cv.notify_all();
        }
    }

    /// Releases every lock held by `tid`, waking waiters
    /// once. Called at the end of commit and abort
    /// processing.
    pub fn release_all(&self, tid: TransactionId) {
        let mut tables = self.mu.lock().unwrap();

        if let Some(pids) = tables.held.remove(&tid) {
            for pid in pids {
                let changed = tables.remove(tid, pid);
                assert!(changed, "inverse index out of step with lock table");
            }

            self.cv.notify_all();
        }
    }

    pub fn holds(&self, tid: TransactionId, pid: PageId) -> bool {
        let tables = self.mu.lock().unwrap();
        tables.held.get(&tid).map_or(false, |pids| pids.contains(&pid))
    }

    /// The pages `tid` currently holds locks on, in no
    /// particular order.
    pub fn pages_held_by(&self, tid: TransactionId) -> Vec<PageId> {
        let tables = self.mu.lock().unwrap();
        tables
            .held
            .get(&tid)
            .map(|pids| pids.iter().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let tables = self.mu.lock().unwrap();

        for (pid, state) in &tables.locks {
            let holders: Vec<TransactionId> = match state {
                LockState::Shared(holders) => {
                    assert!(!holders.is_empty(), "empty shared lock left in table");
                    holders.iter().copied().collect()
                }
                LockState::Exclusive(holder) => vec![*holder],
            };
            for tid in holders {
                assert!(tables.held[&tid].contains(pid));
            }
        }

        for (tid, pids) in &tables.held {
            assert!(!pids.is_empty(), "empty holding set left in index");
            for pid in pids {
                let held = match &tables.locks[pid] {
                    LockState::Shared(holders) => holders.contains(tid),
                    LockState::Exclusive(holder) => holder == tid,
                };
                assert!(held);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn pid(page_no: u64) -> PageId {
        PageId {
            table_id: 0,
            page_no,
        }
    }

    #[test]
    fn shared_then_upgrade() {
        let lt = LockTable::default();
        let t1 = TransactionId::new();

        lt.acquire(t1, pid(0), LockMode::Shared, TIMEOUT).unwrap();
        assert!(lt.holds(t1, pid(0)));

        // sole holder, so the upgrade is granted in place
        lt.acquire(t1, pid(0), LockMode::Exclusive, TIMEOUT)
            .unwrap();
        assert!(lt.holds(t1, pid(0)));
        assert_eq!(lt.pages_held_by(t1), vec![pid(0)]);

        // exclusive dominates a later shared re-request
        lt.acquire(t1, pid(0), LockMode::Shared, TIMEOUT).unwrap();
        lt.assert_consistent();
    }

    #[test]
    fn shared_locks_coexist() {
        let lt = LockTable::default();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        lt.acquire(t1, pid(0), LockMode::Shared, TIMEOUT).unwrap();
        lt.acquire(t2, pid(0), LockMode::Shared, TIMEOUT).unwrap();

        assert!(lt.holds(t1, pid(0)));
        assert!(lt.holds(t2, pid(0)));
        lt.assert_consistent();
    }

    #[test]
    fn upgrade_blocked_by_second_reader() {
        let lt = LockTable::default();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        lt.acquire(t1, pid(0), LockMode::Shared, TIMEOUT).unwrap();
        lt.acquire(t2, pid(0), LockMode::Shared, TIMEOUT).unwrap();

        let res = lt.acquire(t1, pid(0), LockMode::Exclusive, Duration::from_millis(20));
        assert!(matches!(res, Err(Error::TransactionAborted)));

        // the failed upgrade must not have disturbed either
        // shared hold
        assert!(lt.holds(t1, pid(0)));
        assert!(lt.holds(t2, pid(0)));
        lt.assert_consistent();
    }

    #[test]
    fn release_is_idempotent() {
        let lt = LockTable::default();
        let t1 = TransactionId::new();

        lt.acquire(t1, pid(0), LockMode::Exclusive, TIMEOUT)
            .unwrap();
        lt.release(t1, pid(0));
        lt.release(t1, pid(0));

        assert!(!lt.holds(t1, pid(0)));
        assert!(lt.pages_held_by(t1).is_empty());
        lt.assert_consistent();
    }

    #[test]
    fn release_all_clears_every_page() {
        let lt = LockTable::default();
        let t1 = TransactionId::new();

        for page_no in 0..4 {
            lt.acquire(t1, pid(page_no), LockMode::Shared, TIMEOUT)
                .unwrap();
        }
        lt.acquire(t1, pid(4), LockMode::Exclusive, TIMEOUT)
            .unwrap();
        assert_eq!(lt.pages_held_by(t1).len(), 5);

        lt.release_all(t1);

        assert!(lt.pages_held_by(t1).is_empty());
        for page_no in 0..5 {
            assert!(!lt.holds(t1, pid(page_no)));
        }
        lt.assert_consistent();
    }
}
