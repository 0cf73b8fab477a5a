// Press-and-hold repeat logic for the temperature buttons, keyboard style:
// the first tick fires on the press itself, the second after the initial
// interval, subsequent ones at a steady rate. The state machine is timer
// free; callers arm one timer for the returned delay and feed expiry back
// through `timer_fired`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay before the first repeated tick after the press.
pub const INITIAL_INTERVAL: Duration = Duration::from_millis(400);

/// Delay between subsequent ticks while the press is held.
pub const SUBSEQUENT_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
}

/// One press gesture: `press` → zero or more `timer_fired` → `release`.
#[derive(Debug, Default)]
pub struct RepeatPress {
    held: Option<Direction>,
}

impl RepeatPress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a gesture. Returns the immediate tick and the delay until the
    /// repeat timer should fire. A duplicate press while one is already held
    /// is a no-op so an armed timer is never doubled.
    pub fn press(&mut self, direction: Direction) -> Option<(Direction, Duration)> {
        if self.held.is_some() {
            return None;
        }
        self.held = Some(direction);
        Some((direction, INITIAL_INTERVAL))
    }

    /// Timer expiry while held: one more tick plus the steady re-arm delay.
    /// A stale expiry after release yields nothing.
    pub fn timer_fired(&mut self) -> Option<(Direction, Duration)> {
        self.held.map(|direction| (direction, SUBSEQUENT_INTERVAL))
    }

    /// Ends the gesture. Returns true when a commit must be emitted, i.e.
    /// when a press was actually in progress.
    pub fn release(&mut self) -> bool {
        self.held.take().is_some()
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }
}
