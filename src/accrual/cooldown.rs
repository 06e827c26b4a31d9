//! Process-wide rate-limit cooldown for the accrual authority

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Furthest deadline used when a requested cooldown does not fit in an `Instant`
const MAX_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Earliest moment the next authority call may go out.
///
/// One instance lives inside the client and is shared by every worker. While a
/// deadline is pending, callers pass the gate one at a time, so a cooldown
/// serializes calls instead of rejecting them.
#[derive(Debug, Default)]
pub struct Cooldown {
    deadline: Mutex<Option<Instant>>,
    gate: tokio::sync::Mutex<()>,
}

impl Cooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rate-limit signal; an earlier deadline never shortens a later one
    pub fn trip(&self, retry_after: Duration) {
        let now = Instant::now();
        let until = now
            .checked_add(retry_after)
            .unwrap_or_else(|| now + MAX_DEADLINE);
        let mut deadline = self.lock_deadline();
        match *deadline {
            Some(existing) if existing >= until => {}
            _ => *deadline = Some(until),
        }
        debug!("Accrual cooldown set for {:?}", retry_after);
    }

    /// Pending deadline, if it is still in the future
    pub fn remaining(&self) -> Option<Duration> {
        let deadline = *self.lock_deadline();
        deadline.and_then(|d| d.checked_duration_since(Instant::now()))
    }

    /// Block until no cooldown is pending
    pub async fn wait(&self) {
        if self.remaining().is_none() {
            return;
        }

        let _gate = self.gate.lock().await;
        // The deadline may move while we sleep, so re-check after each wake-up
        loop {
            let pending = *self.lock_deadline();
            match pending {
                Some(until) if until > Instant::now() => {
                    tokio::time::sleep_until(until).await;
                }
                _ => {
                    let mut deadline = self.lock_deadline();
                    if deadline.is_some_and(|d| d <= Instant::now()) {
                        *deadline = None;
                    }
                    return;
                }
            }
        }
    }

    fn lock_deadline(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        // The guarded value is a plain timestamp, so a poisoned lock is still usable
        self.deadline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
