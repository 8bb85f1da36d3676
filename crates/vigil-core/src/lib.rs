//! vigil-core: shared types, wire format, and the single-slot mailbox.
//! All other vigil crates depend on this one.

pub mod config;
pub mod error;
pub mod frame;
pub mod mailbox;
pub mod wire;

pub use error::TransportError;
pub use frame::{Frame, FrameInfo};
pub use mailbox::Mailbox;
