//! Entity abstraction for garaged
//!
//! Entities are the binary sensors and relays an integration discovers.

use super::state::Reading;

/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    /// Entity id in `domain.object_id` form
    fn entity_id(&self) -> &str;

    /// Return the platform type of this entity (e.g. "binary_sensor", "switch")
    fn platform(&self) -> &'static str;

    /// Current tri-state reading
    fn reading(&self) -> Reading;
}
