//! Reusable test fixtures

mod stub_server;

pub use stub_server::{NatBehavior, StubStunServer};
