//! System time tracking and deadline timers

use core::cell::Cell;
use critical_section::Mutex;

/// Monotonic millisecond source. Wraps after ~49 days; comparisons below are
/// wrap-aware.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Tick counter advanced by the timer interrupt, one tick per millisecond.
pub struct SystemTicks {
    ticks: Mutex<Cell<u32>>,
}

impl SystemTicks {
    pub const fn new() -> Self {
        Self {
            ticks: Mutex::new(Cell::new(0)),
        }
    }

    /// Increment system tick counter
    #[inline]
    pub fn tick(&self) {
        critical_section::with(|cs| {
            let ticks = self.ticks.borrow(cs);
            ticks.set(ticks.get().wrapping_add(1));
        });
    }
}

impl Clock for SystemTicks {
    #[inline]
    fn now_ms(&self) -> u32 {
        critical_section::with(|cs| self.ticks.borrow(cs).get())
    }
}

impl Default for SystemTicks {
    fn default() -> Self {
        Self::new()
    }
}

/// Global tick source, written only by the timer interrupt
pub static SYSTEM_TICKS: SystemTicks = SystemTicks::new();

/// Deadline against a [`Clock`].
///
/// A one-shot timer reports expiry once and then stays quiet until
/// [`reset`](SimpleTimer::reset). An auto-reset timer moves its deadline one
/// period forward every time it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleTimer {
    wait_ms: u32,
    target: u32,
    auto_reset: bool,
    fired: bool,
}

impl SimpleTimer {
    pub fn arm<C: Clock + ?Sized>(clock: &C, wait_ms: u32, auto_reset: bool) -> Self {
        Self {
            wait_ms,
            target: clock.now_ms().wrapping_add(wait_ms),
            auto_reset,
            fired: false,
        }
    }

    pub fn has_elapsed<C: Clock + ?Sized>(&mut self, clock: &C) -> bool {
        if self.fired && !self.auto_reset {
            return false;
        }

        let now = clock.now_ms();
        // Signed distance keeps this correct across counter wrap
        let elapsed = now.wrapping_sub(self.target) as i32 >= 0;
        if elapsed {
            self.fired = true;
            if self.auto_reset {
                self.target = self.target.wrapping_add(self.wait_ms);
            }
        }
        elapsed
    }

    /// Rearms the full period from now.
    pub fn reset<C: Clock + ?Sized>(&mut self, clock: &C) {
        *self = Self::arm(clock, self.wait_ms, self.auto_reset);
    }

    pub fn wait_ms(&self) -> u32 {
        self.wait_ms
    }
}
