//! gridlink core: wire types, frame codec and the error surface.
//!
//! Everything here is runtime-free: no sockets, no tokio. The client crate
//! drives these types over a Unix socket, and test peers can reuse them to
//! speak the same protocol.
//!
//! Bytes from the peer are untrusted, so `unwrap`, `expect` and `panic!` are
//! denied; every failure comes back as a [`LinkError`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

pub use error::{ErrorKind, LinkError, Result};
