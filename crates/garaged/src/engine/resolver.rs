//! Garage door state resolution.
//!
//! The door has no sensor for "in motion". The only transient evidence is the
//! time elapsed since the last toggle, so (off, off) readings count as
//! `opening` inside the opening window and as `unavailable` outside it.

use std::time::Duration;

use super::state::DoorState;
use super::state::Reading;

/// Map the two sensor readings and the time since the last toggle to a door
/// state. Rules are evaluated in order and the first match wins.
///
/// `since_toggle` is `None` when no toggle has been observed yet.
pub fn resolve(
    open: Reading,
    closed: Reading,
    since_toggle: Option<Duration>,
    opening_duration: Duration,
) -> DoorState {
    match (open, closed) {
        (Reading::Unavailable, _) | (_, Reading::Unavailable) => DoorState::Unavailable,
        (Reading::On, Reading::Off) => DoorState::Open,
        (Reading::Off, Reading::On) => DoorState::Closed,
        (Reading::Off, Reading::Off) => match since_toggle {
            Some(elapsed) if elapsed < opening_duration => DoorState::Opening,
            _ => DoorState::Unavailable,
        },
        // Both limit switches closed at once is never a physical state.
        (Reading::On, Reading::On) => DoorState::Unavailable,
    }
}
