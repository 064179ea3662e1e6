//! Inbound surface: command-line parsing, runtime overrides and file loading.

pub mod cli;
pub mod files;
pub mod settings;

pub use self::cli::{CliArgs, Command, Outcome, run};
pub use self::settings::ConnectionOverrides;
