//! Event dispatch exports.
//!
//! Re-exports the dispatcher and observer trait so downstream consumers can
//! depend on this module directly.

pub mod dispatcher;

pub use dispatcher::{DispatchReport, EventDispatcher, EventObserver, SubscriptionId};
