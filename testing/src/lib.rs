//! Shared test fixtures for the colloquy workspace.
//!
//! Provides a single shared Redis testcontainer across all test files.
//! The fixture is lazily initialized once per test process, returns
//! `None` when Docker is unavailable (tests skip gracefully), and is
//! cleaned up when the process exits.

mod fixtures;

pub use fixtures::*;
