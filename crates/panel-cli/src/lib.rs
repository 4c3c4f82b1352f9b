pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod utils;

pub use cli::{Cli, Commands, GuardCommands, OutputFormat, XuiCommands};
pub use commands::CommandHandler;
pub use config::{ConfigManager, PanelsConfig};
pub use error::{CliError, Result};
