//! Tick pacing.
//!
//! A [`Throttle`] tells the scheduler how long to sleep before the next tick.
//! [`FixedThrottle`] always answers the same delay. [`AdaptiveThrottle`]
//! subtracts the time spent working since its previous answer from a target
//! interval, so a loop doing cheap work runs at roughly one tick per interval
//! and a loop doing expensive work never sleeps at all.

use std::time::{Duration, Instant};

use crate::core::audit::{record_event, EngineEventKind, SharedEventSink};
use crate::util::clock::{system_clock, SharedClock};

/// Decides the sleep between scheduler ticks.
pub trait Throttle: Send {
    /// Delay to sleep before the next tick.
    fn next_delay(&mut self) -> Duration;
}

/// Always returns the configured delay.
#[derive(Debug, Clone, Copy)]
pub struct FixedThrottle {
    delay: Duration,
}

impl FixedThrottle {
    /// Create a throttle that always waits `delay`.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Throttle for FixedThrottle {
    fn next_delay(&mut self) -> Duration {
        self.delay
    }
}

/// Returns `max(0, target - elapsed)` where `elapsed` runs from the end of the
/// previous call to the start of this one.
pub struct AdaptiveThrottle {
    target: Duration,
    clock: SharedClock,
    /// Instant the previous call returned, shifted by the delay it handed out.
    last_return: Option<Instant>,
    overruns: u64,
    events: Option<SharedEventSink>,
}

impl AdaptiveThrottle {
    /// Create a throttle targeting one tick per `target` on the system clock.
    #[must_use]
    pub fn new(target: Duration) -> Self {
        Self::with_clock(target, system_clock())
    }

    /// Create a throttle reading time from `clock`.
    #[must_use]
    pub fn with_clock(target: Duration, clock: SharedClock) -> Self {
        Self {
            target,
            clock,
            last_return: None,
            overruns: 0,
            events: None,
        }
    }

    /// Attach an event sink receiving overrun events.
    #[must_use]
    pub fn with_events(mut self, events: SharedEventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Configured interval.
    #[must_use]
    pub const fn target(&self) -> Duration {
        self.target
    }

    /// Number of ticks whose work exceeded the interval.
    #[must_use]
    pub const fn overruns(&self) -> u64 {
        self.overruns
    }
}

impl Throttle for AdaptiveThrottle {
    fn next_delay(&mut self) -> Duration {
        let now = self.clock.now();
        let delay = match self.last_return {
            None => Duration::ZERO,
            Some(previous) => {
                let elapsed = now.saturating_duration_since(previous);
                if elapsed > self.target {
                    self.overruns += 1;
                    tracing::debug!(
                        elapsed_ms = elapsed.as_millis(),
                        target_ms = self.target.as_millis(),
                        "tick overran throttle interval"
                    );
                    record_event(
                        self.events.as_ref(),
                        EngineEventKind::ThrottleOverrun,
                        "throttle",
                        Some(format!(
                            "elapsed {}ms > target {}ms",
                            elapsed.as_millis(),
                            self.target.as_millis()
                        )),
                    );
                    Duration::ZERO
                } else {
                    self.target - elapsed
                }
            }
        };
        // The caller sleeps `delay` right after this returns; that sleep is not work.
        self.last_return = Some(now + delay);
        delay
    }
}
