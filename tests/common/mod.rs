//! Common test utilities and helpers
//!
//! - `remote.rs`: recording fake of the remote examination API
//! - `fixtures.rs`: configs, services and event waiting

pub mod remote;

pub use fixtures::*;
pub use remote::*;
