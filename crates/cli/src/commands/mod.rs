//! Subcommand implementations

pub mod cost;
pub mod environment;
pub mod run;
