//! Command-line interface for prof-agent
//!
//! This module contains CLI argument parsing and configuration

pub mod args;

pub use args::{Args, Command, RecordArgs};
