use serde::{Deserialize, Serialize};

use crate::repeat::Direction;
use crate::{clamp_setpoint, MINIMUM_TEMPERATURE};

/// Desired target temperature plus the arbitration token between the local
/// press controller and the device's own target reports.
///
/// While a press is in progress the local value wins and reports from the
/// device are ignored (`suppress_remote_update` set); committing the value
/// hands ownership back to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetpointState {
    pub desired: i32,
    pub suppress_remote_update: bool,
}

impl SetpointState {
    pub fn new() -> Self {
        Self {
            desired: MINIMUM_TEMPERATURE,
            suppress_remote_update: false,
        }
    }

    /// One local tick. Claims ownership, clamps to the settable range and
    /// returns the new value for optimistic display. Saturated ticks keep
    /// returning the pinned bound.
    pub fn apply_tick(&mut self, direction: Direction) -> i32 {
        self.suppress_remote_update = true;
        let step = match direction {
            Direction::Increase => 1,
            Direction::Decrease => -1,
        };
        self.desired = clamp_setpoint(self.desired + step);
        self.desired
    }

    /// A target reported by the device. Ignored while a local press owns the
    /// value; returns whether the report was applied.
    pub fn apply_remote(&mut self, target: i32) -> bool {
        if self.suppress_remote_update {
            return false;
        }
        self.desired = target;
        true
    }

    /// Ends local ownership and yields the value to send to the device.
    pub fn commit(&mut self) -> i32 {
        self.suppress_remote_update = false;
        self.desired
    }
}

impl Default for SetpointState {
    fn default() -> Self {
        Self::new()
    }
}

/// Last known PID coefficients, each in `[0.0, 25.5]`. The device is the
/// source of truth; local edits are staged and only become authoritative
/// after a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidState {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAXIMUM_TEMPERATURE;

    #[test]
    fn starts_at_the_minimum_without_suppression() {
        let state = SetpointState::new();
        assert_eq!(state.desired, MINIMUM_TEMPERATURE);
        assert!(!state.suppress_remote_update);
    }

    #[test]
    fn ticks_clamp_at_the_maximum() {
        let mut state = SetpointState::new();
        state.desired = MAXIMUM_TEMPERATURE - 1;
        for _ in 0..5 {
            let value = state.apply_tick(Direction::Increase);
            assert!(value <= MAXIMUM_TEMPERATURE);
        }
        assert_eq!(state.desired, MAXIMUM_TEMPERATURE);
    }

    #[test]
    fn ticks_clamp_at_the_minimum() {
        let mut state = SetpointState::new();
        for _ in 0..3 {
            assert_eq!(state.apply_tick(Direction::Decrease), MINIMUM_TEMPERATURE);
        }
    }

    #[test]
    fn remote_target_is_ignored_while_pressed() {
        let mut state = SetpointState::new();
        state.apply_tick(Direction::Increase);
        assert!(!state.apply_remote(200));
        assert_eq!(state.desired, MINIMUM_TEMPERATURE + 1);

        let committed = state.commit();
        assert_eq!(committed, MINIMUM_TEMPERATURE + 1);
        assert!(state.apply_remote(200));
        assert_eq!(state.desired, 200);
    }
}
