//! Config command implementations
//!
//! A running daemon is the source of truth: reads come from its live
//! configuration and writes go through it so they take effect at once. With
//! no daemon the config file is read and written directly.

use std::path::Path;

use anyhow::{Context, Result};

use mg_core::config::{self, AppConfig, ConfigPatch};

use crate::ipc::{is_not_running, DaemonClient};
use crate::output::{print_error, print_info, print_success};

/// Where a configuration was read from
enum Source {
    Daemon,
    File,
}

/// Load from the daemon if it is running, else from the file (or defaults)
async fn current_config(client: &mut DaemonClient, path: &Path) -> Result<(AppConfig, Source)> {
    match client.get_config().await {
        Ok(config) => Ok((config, Source::Daemon)),
        Err(e) if is_not_running(&e) => Ok((load_local(path)?, Source::File)),
        Err(e) => Err(e),
    }
}

fn load_local(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    config::load_config(path).with_context(|| format!("Failed to load config from {:?}", path))
}

/// Show current configuration
pub async fn config_show(client: &mut DaemonClient, path: &Path) -> Result<()> {
    let (config, source) = current_config(client, path).await?;

    match source {
        Source::Daemon => print_info(&format!("Live configuration from {}", client.address())),
        Source::File if path.exists() => print_info(&format!("Configuration file: {:?}", path)),
        Source::File => print_info(&format!("No configuration file at {:?}, showing defaults", path)),
    }
    println!();
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}

/// Get a config value by dotted key
pub async fn config_get(client: &mut DaemonClient, path: &Path, key: &str) -> Result<()> {
    let (config, _) = current_config(client, path).await?;
    let root = toml::Value::try_from(&config)?;

    // Navigate through the key path (e.g., "watch.path")
    let mut current = &root;
    for part in key.split('.') {
        match current.get(part) {
            Some(value) => current = value,
            None => {
                print_error(&format!("Key not found: {}", key));
                anyhow::bail!("Unknown config key: {}", key);
            }
        }
    }

    match current {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Integer(i) => println!("{}", i),
        toml::Value::Float(f) => println!("{}", f),
        toml::Value::Boolean(b) => println!("{}", b),
        toml::Value::Array(a) => {
            for item in a {
                match item.as_str() {
                    Some(s) => println!("{}", s),
                    None => println!("{}", item),
                }
            }
        }
        toml::Value::Table(_) => {
            // Print sub-table as TOML
            println!("{}", toml::to_string_pretty(current)?);
        }
        toml::Value::Datetime(d) => println!("{}", d),
    }

    Ok(())
}

/// Set a config value by dotted key
pub async fn config_set(
    client: &mut DaemonClient,
    path: &Path,
    key: &str,
    value: &str,
) -> Result<()> {
    let patch = ConfigPatch::from_key_value(key, value)?;

    match client.set_config(patch.clone()).await {
        Ok(_) => {
            print_success(&format!("Set {} = {} (applied to running daemon)", key, value));
            return Ok(());
        }
        Err(e) if is_not_running(&e) => {}
        Err(e) => return Err(e),
    }

    let mut config = load_local(path)?;
    patch.apply(&mut config);
    config::save_config(path, &config)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Set {} = {}", key, value));
    Ok(())
}

/// Show the config file path
pub fn config_path(path: &Path) {
    println!("{}", path.display());
}
