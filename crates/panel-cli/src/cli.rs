use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "panels",
    about = "Export and import accounts between proxy control panels",
    version = env!("CARGO_PKG_VERSION"),
    long_about = "Moves accounts between 3X-UI and PasarGuard panels through portable JSON snapshots. \
                  Imports match existing accounts by credential and update them in place."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format for summaries
    #[arg(long, default_value = "table", global = true)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// 3X-UI panel operations
    Xui {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(subcommand)]
        command: XuiCommands,
    },

    /// PasarGuard panel operations
    Guard {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(subcommand)]
        command: GuardCommands,
    },
}

/// Overrides for the connection section of the config file.
#[derive(Args, Clone, Debug, Default)]
pub struct ConnectionArgs {
    /// Panel address, e.g. https://127.0.0.1:2053
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Panel admin username
    #[arg(long, global = true)]
    pub username: Option<String>,
}

#[derive(Subcommand, Clone)]
pub enum XuiCommands {
    /// Export inbounds with their clients and traffic
    ExportInbounds {
        /// Output file
        #[arg(short, long, default_value = "3xui_users_data.json")]
        output: PathBuf,

        /// Skip per-client traffic lookups
        #[arg(long)]
        no_traffic: bool,
    },

    /// Export inbound clients as PasarGuard user records
    ExportUsers {
        /// Output file
        #[arg(short, long, default_value = "3xui_users_pasarguard.json")]
        output: PathBuf,
    },

    /// Import an inbounds snapshot
    Import {
        /// Snapshot file
        file: PathBuf,
    },
}

#[derive(Subcommand, Clone)]
pub enum GuardCommands {
    /// Export all users
    Export {
        /// Output file
        #[arg(short, long, default_value = "pasarguard_users_data.json")]
        output: PathBuf,
    },

    /// Import a users snapshot
    Import {
        /// Snapshot file
        file: PathBuf,

        /// Assign every imported user to these groups
        #[arg(long = "group", value_name = "ID")]
        groups: Vec<i64>,

        /// Leave existing group membership alone when a record has none
        #[arg(long)]
        keep_groups: bool,
    },

    /// List groups defined on the panel
    Groups,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}
