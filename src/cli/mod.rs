pub mod args;
pub mod config;
pub mod summarize;

pub use args::{Cli, CliCommand, DEFAULT_PORT};
pub use config::handle_config_command;
pub use summarize::{handle_inspect_command, handle_summarize_command};
