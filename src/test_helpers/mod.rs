//! Shared fixtures for unit tests.

pub mod fixtures;
pub mod temp;
