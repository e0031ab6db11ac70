// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the app and tx subcommand trees and their arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "Standalone application deployment and supervision for a single host")]
#[command(version)]
pub struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Host configuration file (discovered when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Operate deployed applications
    App {
        #[command(subcommand)]
        command: AppCommands,
    },
    /// Operate transactions
    Tx {
        #[command(subcommand)]
        command: TxCommands,
    },
}

/// Application selection shared by the batch commands.
#[derive(Args, Debug, Clone)]
pub struct SelectorArgs {
    /// Application name (anchored regular expression)
    pub app_regex: Option<String>,

    /// Select all deployed applications
    #[arg(long)]
    pub all: bool,

    /// Select applications marked for boot-time start
    #[arg(long)]
    pub bootstart: bool,
}

#[derive(Subcommand)]
pub enum AppCommands {
    /// List deployed applications
    Ls {
        #[command(flatten)]
        selector: SelectorArgs,

        /// Include create/deploy user and time columns
        #[arg(long)]
        details: bool,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show running state and process ids
    Status {
        #[command(flatten)]
        selector: SelectorArgs,

        #[arg(long)]
        json: bool,
    },

    /// Start applications
    Start {
        #[command(flatten)]
        selector: SelectorArgs,

        /// Acknowledge special handling instructions up front
        #[arg(long)]
        iknow: bool,
    },

    /// Stop applications
    Stop {
        #[command(flatten)]
        selector: SelectorArgs,

        #[arg(long)]
        iknow: bool,
    },

    /// Stop, then start applications
    Restart {
        #[command(flatten)]
        selector: SelectorArgs,

        #[arg(long)]
        iknow: bool,
    },

    /// Run the configured health checks
    Check {
        #[command(flatten)]
        selector: SelectorArgs,

        /// Show matched response lines
        #[arg(long)]
        details: bool,
    },

    /// Uninstall an application and move it to a backout transaction
    Rm {
        /// Application name (no regex)
        name: String,
    },
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// List transactions
    Ls {
        /// Application name filter (anchored regular expression)
        #[arg(default_value = ".*")]
        app_regex: String,

        #[arg(long)]
        json: bool,
    },

    /// Detailed info about a transaction
    Info {
        txid: String,

        #[arg(long)]
        json: bool,
    },

    /// Deploy a transaction by id or unique application name
    Deploy {
        appname_or_txid: String,

        /// Acknowledge special handling instructions up front
        #[arg(long)]
        iknow: bool,
    },

    /// Remove transaction(s) by id or application name
    Rm {
        #[arg(required = true)]
        specifiers: Vec<String>,
    },

    /// Compare a transaction with its deployed application, or two
    /// transactions with each other
    Diff {
        txid_1: String,
        txid_2: Option<String>,
    },
}
