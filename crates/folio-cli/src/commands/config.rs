//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use folio_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, device_name, host_dir, save_debounce_ms, save_retry_delay_ms, \
                          advertise_interval_ms, connect_timeout_secs, discovery_port, \
                          transport_port, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to serialize config")?
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:              {}", config.data_dir.display());
            println!(
                "  device_name:           {}",
                config.device_name.as_deref().unwrap_or("(not set)")
            );
            println!("  host_dir:              {}", display_path(&config.host_dir));
            println!("  save_debounce_ms:      {}", config.save_debounce_ms);
            println!("  save_retry_delay_ms:   {}", config.save_retry_delay_ms);
            println!("  advertise_interval_ms: {}", config.advertise_interval_ms);
            println!("  connect_timeout_secs:  {}", config.connect_timeout_secs);
            println!("  discovery_port:        {}", config.discovery_port);
            println!("  transport_port:        {}", config.transport_port);
            println!("  log_file:              {}", display_path(&config.log_file));
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply_setting(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "device_name" => {
            config.device_name = optional(value);
        }
        "host_dir" => {
            config.host_dir = optional(value).map(PathBuf::from);
        }
        "log_file" => {
            config.log_file = optional(value).map(PathBuf::from);
        }
        "save_debounce_ms" => {
            config.save_debounce_ms = parse_number(key, value)?;
        }
        "save_retry_delay_ms" => {
            config.save_retry_delay_ms = parse_number(key, value)?;
        }
        "advertise_interval_ms" => {
            config.advertise_interval_ms = parse_number(key, value)?;
        }
        "connect_timeout_secs" => {
            config.connect_timeout_secs = parse_number(key, value)?;
        }
        "discovery_port" => {
            config.discovery_port = parse_number(key, value)?;
        }
        "transport_port" => {
            config.transport_port = parse_number(key, value)?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

/// Empty or "none" clears an optional setting
fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: '{}' is not a number", key, value))
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}
