/// Edge produced by recording one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Still on the same side of the threshold; nothing to do.
    None,
    /// This check is the one that first reached the threshold.
    OutageStarted,
    /// First healthy check after an outage.
    Recovered,
}

/// Consecutive-failure counter with hysteresis.
///
/// An outage begins at the check that brings `consecutive_failures` up to
/// `threshold` and ends at the next healthy check. Only those two edges are
/// reported; every check in between yields `Transition::None`.
#[derive(Debug, Clone)]
pub struct OutageState {
    threshold: u32,
    consecutive_failures: u32,
}

impl OutageState {
    /// `threshold` must be at least 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive_failures: 0,
        }
    }

    /// Record a check result and report which edge, if any, it crossed.
    pub fn record(&mut self, healthy: bool) -> Transition {
        let was_outage = self.in_outage();

        if healthy {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        match (was_outage, self.in_outage()) {
            (false, true) => Transition::OutageStarted,
            (true, false) => Transition::Recovered,
            _ => Transition::None,
        }
    }

    pub fn in_outage(&self) -> bool {
        self.consecutive_failures >= self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
