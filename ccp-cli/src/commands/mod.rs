//! CLI subcommands.

pub mod compare;
pub mod config;
pub mod finish;
pub mod get;
pub mod serve;
