//! gridlink client library entry.
//!
//! This crate wires the Unix socket transport, correlation table, event
//! dispatcher and configuration into a client session for the grid server's
//! line-delimited JSON protocol. It is consumed by the `gridlink` binary and
//! by integration tests.

pub mod client;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod obs;
pub mod transport;

pub use client::GridClient;
pub use config::{ClientConfig, ClientSection};
pub use correlation::{CorrelationTable, PendingRequest, Resolution};
pub use dispatch::{DispatchReport, EventDispatcher, EventObserver, SubscriptionId};
pub use transport::{Session, SessionState};
