//! Deterministic, pure logic shared by the guardian pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod budget;
pub mod cancel;
pub mod context;
pub mod extract;
pub mod sanitize;
pub mod types;
