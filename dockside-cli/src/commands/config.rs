//! `dockside config`: locate the config file and read single keys.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use dockside_core::config::{config_value, find_config};
use dockside_core::EnvOverrides;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the config file in effect, if any.
    Path,
    /// Print one dotted key, e.g. `update.check_interval`.
    Get { key: String },
}

pub fn run(command: ConfigCommand) -> Result<u8> {
    let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
    let env = EnvOverrides::from_process();
    let file = find_config(&home, env.config_path.as_deref());

    match command {
        ConfigCommand::Path => match file {
            Some(path) => println!("{}", path.display()),
            None => {
                println!("no config file; using built-in defaults");
            }
        },
        ConfigCommand::Get { key } => {
            let Some(path) = file else {
                eprintln!("no config file; '{key}' uses its built-in default");
                return Ok(1);
            };
            let value = config_value(&path, &key)
                .with_context(|| format!("failed to read {}", path.display()))?;
            match value {
                Some(value) => println!("{value}"),
                None => {
                    eprintln!("'{key}' is not set in {}", path.display());
                    return Ok(1);
                }
            }
        }
    }
    Ok(0)
}
