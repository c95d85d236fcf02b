//! # Server Tick Pacing
//!
//! Deadline scheduling for the fixed-rate dish simulation. The server
//! owes the world one step per period; [`TickPacer`] tracks the next
//! deadline, reports how many steps have come due, and measures how
//! much of each period the work actually consumed. The pacer only
//! keeps time; the server decides what a tick does.
//!
//! A long stall (debugger, swapped-out host) is not repaid in full:
//! past the catch-up cap the remaining debt is forfeited and the
//! deadline re-anchored to the present, the same bound the client puts
//! on its prediction accumulator. The dish skips a little time; the
//! alternative is a burst of ticks that delays the next broadcast even
//! further.

use std::time::{Duration, Instant};

use petri_shared::constants::TICK_RATE;

/// Most ticks one catch-up burst may run before the remaining debt is
/// forfeited. A quarter second at the server rate, matching the
/// client-side accumulator bound.
const MAX_CATCHUP_TICKS: u32 = 15;

/// Final stretch of a wait that is spun rather than slept; the OS
/// sleep granularity is too coarse to hit the deadline on its own.
const SPIN_WINDOW: Duration = Duration::from_micros(500);

/// Deadline-driven pacing for the fixed-rate server loop.
pub struct TickPacer {
    /// Target duration of one tick.
    period: Duration,
    /// When the next tick comes due.
    next_deadline: Instant,
    /// Ticks recorded since construction.
    ticks: u64,
    /// Work measurements since the last reset.
    stats: TickStats,
}

/// Work measurements over a reporting window.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickStats {
    /// Ticks measured in this window.
    pub ticks: u64,
    /// Total work time across those ticks, microseconds.
    pub busy_us: u64,
    /// Longest single tick, microseconds.
    pub worst_us: u64,
    /// Ticks whose work overran the period.
    pub late_ticks: u64,
    /// Catch-up bursts that hit the cap and forfeited debt.
    pub forfeited_bursts: u64,
}

impl TickStats {
    /// Mean work time per tick, microseconds.
    #[must_use]
    pub fn avg_us(&self) -> u64 {
        if self.ticks == 0 {
            0
        } else {
            self.busy_us / self.ticks
        }
    }
}

impl TickPacer {
    /// Creates a pacer for the given rate in Hz; the first tick comes
    /// due one period from now.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let period = Duration::from_micros(1_000_000 / u64::from(tick_rate));
        Self {
            period,
            next_deadline: Instant::now() + period,
            ticks: 0,
            stats: TickStats::default(),
        }
    }

    /// Number of ticks that have come due since the last call, capped
    /// at the catch-up limit.
    ///
    /// Each due tick advances the deadline by one period, so a loop
    /// that runs exactly this many ticks stays on schedule. When the
    /// cap is hit with debt remaining, the leftover is forfeited and
    /// the deadline re-anchored one period from now.
    pub fn due_ticks(&mut self) -> u32 {
        let now = Instant::now();
        let mut due = 0;
        while due < MAX_CATCHUP_TICKS && self.next_deadline <= now {
            self.next_deadline += self.period;
            due += 1;
        }
        if self.next_deadline <= now {
            self.next_deadline = now + self.period;
            self.stats.forfeited_bursts += 1;
        }
        due
    }

    /// Records the work time of one completed tick.
    pub fn record(&mut self, work: Duration) {
        #[allow(clippy::cast_possible_truncation)]
        let work_us = work.as_micros() as u64;
        self.ticks += 1;
        self.stats.ticks += 1;
        self.stats.busy_us += work_us;
        self.stats.worst_us = self.stats.worst_us.max(work_us);
        if work > self.period {
            self.stats.late_ticks += 1;
        }
    }

    /// Blocks until the next deadline: sleeps most of the remaining
    /// time, then spins the final window for accuracy. Returns at once
    /// if the deadline has already passed.
    pub fn wait_for_due(&self) {
        let mut now = Instant::now();
        while now < self.next_deadline {
            let remaining = self.next_deadline - now;
            if remaining > SPIN_WINDOW {
                std::thread::sleep(remaining - SPIN_WINDOW);
            } else {
                std::hint::spin_loop();
            }
            now = Instant::now();
        }
    }

    /// Ticks recorded since construction (reset does not touch this).
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Work measurements since the last reset.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Target duration of one tick.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Clears the measurement window, e.g. after a status report.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::default();
    }
}

impl Default for TickPacer {
    fn default() -> Self {
        Self::new(TICK_RATE)
    }
}
