//! Deterministic, pure logic for the agent loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod content;
pub mod decoder;
pub mod literal;
pub mod path;
pub mod skeleton;
pub mod types;
