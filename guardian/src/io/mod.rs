//! Side-effecting adapters: configuration, subjects, processes and files.

pub mod config;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod store;
pub mod subjects;
pub mod test_exec;
