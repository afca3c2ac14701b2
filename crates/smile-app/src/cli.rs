use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "smile2unlock", about = "Smile2Unlock: log on with your face")]
pub struct Cli {
    /// Path to config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one face recognition attempt and release the stored credential
    Authenticate {
        /// Behave like the logon tile being shown: only start when auto_start is on
        #[arg(long)]
        on_show: bool,
    },

    /// Enroll or replace the logon password
    SetPassword {
        /// Read the password and its confirmation as two lines from stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Print every status message arriving on the channel
    Listen {
        /// Exit after this many messages
        #[arg(long)]
        count: Option<usize>,
        /// Exit after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Inspect or edit the configuration store
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// List every known entry (secrets are masked)
    Show,
    Get {
        key: String,
    },
    Set {
        key: String,
        value: String,
    },
    Unset {
        key: String,
    },
}
