//! Confirmation-aware cache refresh.
//!
//! Chain writes are not visible to reads the instant they commit. After a
//! deposit or withdrawal the affected queries are refreshed right away and
//! once more after a fixed delay; [`coordinator`] owns those timers and
//! [`events`] feeds it from vault operation outcomes.

pub mod coordinator;
pub mod events;

pub use coordinator::{confirmation_window_active, QueryKey, RefetchCoordinator, RefetchOptions};
pub use events::{VaultEvent, VaultOperation};
