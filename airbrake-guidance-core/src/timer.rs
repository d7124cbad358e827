/// Fixed-rate cycle gate driven by wall clock differences.
///
/// Call `poll` as often as convenient; it returns true when at least one
/// period has passed since the last cycle started. A late cycle runs late,
/// missed cycles are never made up.
#[derive(Debug, Clone)]
pub struct CycleTimer {
    period_us: u64,
    last_us: Option<u64>,
    overruns: u32,
}

impl CycleTimer {
    pub fn new(period_us: u64) -> Self {
        Self {
            period_us,
            last_us: None,
            overruns: 0,
        }
    }

    pub fn poll(&mut self, now_us: u64) -> bool {
        let Some(last) = self.last_us else {
            self.last_us = Some(now_us);
            return true;
        };

        let elapsed = now_us.saturating_sub(last);
        if elapsed < self.period_us {
            return false;
        }
        if elapsed >= 2 * self.period_us {
            self.overruns = self.overruns.saturating_add(1);
            log_debug!("cycle late by {} us", elapsed - self.period_us);
        }
        self.last_us = Some(now_us);
        true
    }

    pub fn period_us(&self) -> u64 {
        self.period_us
    }

    /// Cycles that started more than one period late.
    pub fn overruns(&self) -> u32 {
        self.overruns
    }
}
