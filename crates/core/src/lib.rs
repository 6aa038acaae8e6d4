//! Shared plumbing for the task binaries: finding tasks on disk, loading settings and printing
//! results.

pub mod config;
pub mod printer;
pub mod reader;
