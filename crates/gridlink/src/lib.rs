//! Top-level facade crate for gridlink.
//!
//! Re-exports the protocol core and the client runtime so users can depend on a single crate.

pub mod core {
    pub use gridlink_core::*;
}

pub mod client {
    pub use gridlink_client::*;
}

pub use gridlink_client::{ClientConfig, EventObserver, GridClient, Session};
pub use gridlink_core::{LinkError, Result};
