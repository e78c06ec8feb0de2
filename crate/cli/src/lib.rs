pub mod actions;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;

pub use commands::{Cli, CliCommands};
