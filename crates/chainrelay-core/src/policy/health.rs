//! Consecutive-probe health tracking.
//!
//! State transitions:
//! - `Healthy` → `Unhealthy`: consecutive failed probes reach `unhealthy_threshold`
//! - `Unhealthy` → `Healthy`: one successful probe

use parking_lot::Mutex;

/// Health as seen by the probe loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

struct ProbeInner {
    state: HealthState,
    consecutive_failures: u32,
}

/// Counts consecutive failed health probes for one provider.
pub struct ProbeTracker {
    unhealthy_threshold: u32,
    inner: Mutex<ProbeInner>,
}

impl ProbeTracker {
    pub fn new(unhealthy_threshold: u32) -> Self {
        Self {
            unhealthy_threshold: unhealthy_threshold.max(1),
            inner: Mutex::new(ProbeInner {
                state: HealthState::Healthy,
                consecutive_failures: 0,
            }),
        }
    }

    pub fn state(&self) -> HealthState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Record a passing probe. Returns the new state if it changed.
    pub fn record_success(&self) -> Option<HealthState> {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        match inner.state {
            HealthState::Unhealthy => {
                inner.state = HealthState::Healthy;
                Some(HealthState::Healthy)
            }
            HealthState::Healthy => None,
        }
    }

    /// Record a failed probe. Returns the new state if it changed.
    pub fn record_failure(&self) -> Option<HealthState> {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if inner.state == HealthState::Healthy
            && inner.consecutive_failures >= self.unhealthy_threshold
        {
            inner.state = HealthState::Unhealthy;
            return Some(HealthState::Unhealthy);
        }
        None
    }
}

impl std::fmt::Debug for ProbeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ProbeTracker")
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .finish()
    }
}
