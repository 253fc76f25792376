//! Testing utilities and mock implementations
//!
//! Mocks for driving the session loop without a broker or signing keys.

pub mod mocks;

pub use mocks::*;
