mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use smile_core::config::AppConfig;
use smile_core::lifecycle;

use cli::{Cli, Commands, ConfigCommand};

fn main() -> Result<()> {
    lifecycle::init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref());

    match cli.command {
        Commands::Authenticate { on_show } => {
            lifecycle::log_startup("logon");
            let result = commands::authenticate(&config, on_show);
            lifecycle::log_shutdown("logon");
            result?;
        }
        Commands::SetPassword { stdin } => {
            commands::set_password(&config, stdin)?;
        }
        Commands::Listen { count, timeout_secs } => {
            commands::listen(&config, count, timeout_secs)?;
        }
        Commands::Config(cmd) => match cmd {
            ConfigCommand::Show => commands::config_show(&config)?,
            ConfigCommand::Get { key } => commands::config_get(&config, &key)?,
            ConfigCommand::Set { key, value } => commands::config_set(&config, &key, &value)?,
            ConfigCommand::Unset { key } => commands::config_unset(&config, &key)?,
        },
    }

    Ok(())
}
