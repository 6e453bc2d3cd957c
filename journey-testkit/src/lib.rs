//! Test support for journey: an in-memory platform and fixtures.

pub mod job;
pub mod mock;

pub use job::*;
pub use mock::{Capability, FakePlatform, ListStep};
