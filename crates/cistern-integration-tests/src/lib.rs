//! Integration test support for cistern
//!
//! Mock drivers and connections plus small helpers shared by the scenario
//! and stress tests. Nothing in here talks to a real database; the mocks
//! journal every lifecycle event so tests can assert open/close accounting
//! down to the individual physical connection.

pub mod helpers;
pub mod mocks;
