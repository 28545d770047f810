//! Generate, run and repair unit tests for a batch of code units.
//!
//! For every subject the guardian asks a text generator for a test, writes it
//! to disk, runs it as an isolated process and feeds failures back into the
//! next prompt until the test passes or the attempt budget is spent. The
//! crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, naming, context
//!   windowing, data model). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, manifests, processes,
//!   files). Behind traits where tests need to substitute them.
//!
//! Orchestration modules ([`attempt`], [`orchestrator`]) coordinate core
//! logic with I/O to implement `guardian run`.

pub mod attempt;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
