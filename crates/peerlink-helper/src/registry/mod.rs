//! Object registries exposed to the daemon by id only.
//!
//! Each kind has its own counter and map; no operation spans two registries.

pub mod arena;
pub mod streams;
pub mod subscriptions;
pub mod validations;

pub use arena::Arena;
pub use streams::{StreamEntry, StreamRegistry};
pub use subscriptions::{Subscription, SubscriptionRegistry};
pub use validations::{PendingValidation, ValidationRegistry};
