//! Transport layer (Unix domain socket).
//!
//! Exposes the connection session and the codec that decodes each frame once
//! before it reaches correlation or event dispatch.

pub mod codec;
pub mod session;

pub use session::{Session, SessionState};
