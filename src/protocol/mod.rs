//! Broker wire conventions
//!
//! Topic layout, client identifiers and outbound payload types shared by the
//! transport and the session loop.

pub mod identity;
pub mod messages;
pub mod topics;

pub use identity::SessionIdentity;
pub use messages::*;
pub use topics::*;
