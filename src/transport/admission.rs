//! Connection admission control: per-source-address rate limiting.
//!
//! A sliding window per packed IPv4 address, held in a process-wide map.
//! Every transition — first attempt, window rollover, increment, reject —
//! is a compare-and-swap over one packed `AtomicU64`, so no lock is held
//! across a decision; a losing CAS simply retries against the freshly
//! observed entry. A single-winner periodic sweep bounds map growth by
//! pruning entries idle for two windows.
//!
//! Rejection is silent: the caller just drops the socket. Nothing is ever
//! written to a refused peer.

use crate::config::AdmissionConfig;
use crate::error::{GateError, Result};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, trace};

/// Pack `(count, window_start_secs)` into one atomic word.
#[inline]
fn pack(count: u32, start: u32) -> u64 {
    (u64::from(count) << 32) | u64::from(start)
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// Lock-free sliding-window rate limiter keyed by source IPv4 address.
pub struct AdmissionControl {
    entries: RwLock<HashMap<u32, Arc<AtomicU64>>>,
    max_attempts: u32,
    window_secs: u32,
    /// Next sweep deadline, in seconds since `epoch`; CAS-guarded so
    /// exactly one caller prunes per interval
    next_prune: AtomicU64,
    epoch: Instant,
}

impl AdmissionControl {
    /// Build from config: `max_attempts` admits per address per `window`.
    pub fn new(config: &AdmissionConfig) -> Self {
        let window_secs = config.window.as_secs().max(1) as u32;
        Self {
            entries: RwLock::new(HashMap::new()),
            max_attempts: config.max_attempts,
            window_secs,
            next_prune: AtomicU64::new(u64::from(window_secs)),
            epoch: Instant::now(),
        }
    }

    fn now_secs(&self) -> u32 {
        self.epoch.elapsed().as_secs() as u32
    }

    /// Decide one connection attempt from `peer`.
    ///
    /// `Err(RateLimited)` means refuse silently. Non-IPv4 sources are
    /// admitted without counting; the legacy client population is
    /// IPv4-only.
    pub fn check(&self, peer: SocketAddr) -> Result<()> {
        let key = match peer.ip() {
            IpAddr::V4(v4) => u32::from_be_bytes(v4.octets()),
            IpAddr::V6(_) => return Ok(()),
        };

        let now = self.now_secs();
        self.maybe_prune(now);

        let slot = self.slot(key, now)?;

        loop {
            let current = slot.load(Ordering::Acquire);
            let (count, start) = unpack(current);

            let next = if now.saturating_sub(start) > self.window_secs {
                // Window expired: roll over with this attempt as the first
                pack(1, now)
            } else if count < self.max_attempts {
                pack(count + 1, start)
            } else {
                trace!(peer = %peer, count, "admission refused");
                return Err(GateError::RateLimited);
            };

            if slot
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
            // Lost the race; retry against the freshly observed entry
        }
    }

    /// Number of addresses currently tracked.
    pub fn tracked(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Fetch or insert the entry for `key`. New entries start at count 0 so
    /// the caller's CAS performs the first increment exactly once.
    fn slot(&self, key: u32, now: u32) -> Result<Arc<AtomicU64>> {
        if let Ok(map) = self.entries.read() {
            if let Some(slot) = map.get(&key) {
                return Ok(slot.clone());
            }
        }
        let mut map = self
            .entries
            .write()
            .map_err(|_| GateError::Custom("admission map poisoned".into()))?;
        Ok(map
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(pack(0, now))))
            .clone())
    }

    /// Elect at most one caller per interval to sweep stale entries.
    fn maybe_prune(&self, now: u32) {
        let due = self.next_prune.load(Ordering::Acquire);
        if u64::from(now) < due {
            return;
        }
        if self
            .next_prune
            .compare_exchange(
                due,
                u64::from(now) + u64::from(self.window_secs),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Another caller won this interval
            return;
        }

        let horizon = self.window_secs.saturating_mul(2);
        if let Ok(mut map) = self.entries.write() {
            let before = map.len();
            map.retain(|_, slot| {
                let (_, start) = unpack(slot.load(Ordering::Acquire));
                now.saturating_sub(start) <= horizon
            });
            let removed = before - map.len();
            if removed > 0 {
                debug!(removed, remaining = map.len(), "pruned stale admission entries");
            }
        }
    }
}
