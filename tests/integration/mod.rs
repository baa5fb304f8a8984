//! Integration tests

pub mod cross_context;
pub mod offline_scenarios;
