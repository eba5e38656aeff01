//! Config command implementation.

use anyhow::Result;

use beckon_core::config::{parse_duration, Config, DeliveryMode, DuplicatePolicy};

use super::{ConfigAction, ConfigArgs};

/// Keys shown by `config show`, grouped by file section.
const SECTIONS: &[(&str, &[&str])] = &[
    ("general", &["device_name", "download_dir"]),
    ("share", &["shared_dir"]),
    ("signal", &["peer", "signal_port"]),
    ("server", &["server_port"]),
    (
        "transfer",
        &["mode", "duplicate_policy", "request_timeout", "verify_checksum"],
    ),
    ("discovery", &["discovery_enabled", "discovery_port", "scan_timeout"]),
];

/// Run the config command.
pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            match get_config_value(&config, &key) {
                Some(v) => println!("{}: {}", key, v),
                None => println!("Unknown configuration key: {}", key),
            }
        }

        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            if set_config_value(&mut config, &key, &value)? {
                config.save()?;
                println!("Set {} = {}", key, value);
            } else {
                println!("Unknown configuration key: {}", key);
            }
        }

        ConfigAction::Show => {
            let config = Config::load()?;
            println!();
            println!("Beckon Configuration");
            println!("{}", "─".repeat(50));
            println!();
            for (section, keys) in SECTIONS {
                println!("[{}]", section);
                for key in *keys {
                    if let Some(value) = get_config_value(&config, key) {
                        println!("  {} = {}", key, value);
                    }
                }
                println!();
            }
        }

        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }

        ConfigAction::Reset => {
            Config::default().save()?;
            println!("Configuration reset to defaults.");
        }
    }

    Ok(())
}

fn get_config_value(config: &Config, key: &str) -> Option<String> {
    let display = |path: Option<&std::path::Path>| {
        path.map_or_else(|| "(not set)".to_string(), |p| p.display().to_string())
    };

    match key {
        "device_name" => Some(config.general.device_name.clone()),
        "download_dir" => Some(display(config.general.download_dir.as_deref())),
        "shared_dir" => Some(display(config.share.directory.as_deref())),
        "peer" => Some(
            config
                .signal
                .peer
                .clone()
                .unwrap_or_else(|| "(not set)".to_string()),
        ),
        "signal_port" => Some(config.signal.listen_port.to_string()),
        "server_port" => Some(config.server.port.to_string()),
        "mode" => Some(format!("{:?}", config.transfer.mode).to_lowercase()),
        "duplicate_policy" => {
            Some(format!("{:?}", config.transfer.duplicate_policy).to_lowercase())
        }
        "request_timeout" => Some(
            config
                .transfer
                .request_timeout
                .map_or_else(|| "(off)".to_string(), |t| format!("{}s", t.as_secs())),
        ),
        "verify_checksum" => Some(config.transfer.verify_checksum.to_string()),
        "discovery_enabled" => Some(config.discovery.enabled.to_string()),
        "discovery_port" => Some(config.discovery.port.to_string()),
        "scan_timeout" => Some(format!("{}s", config.discovery.scan_timeout.as_secs())),
        _ => None,
    }
}

fn set_config_value(config: &mut Config, key: &str, value: &str) -> Result<bool> {
    match key {
        "device_name" => config.general.device_name = value.to_string(),
        "download_dir" => config.general.download_dir = Some(value.into()),
        "shared_dir" => config.share.directory = Some(value.into()),
        "peer" => config.signal.peer = Some(value.to_string()),
        "signal_port" => config.signal.listen_port = value.parse()?,
        "server_port" => config.server.port = value.parse()?,
        "mode" => {
            config.transfer.mode = match value {
                "push" => DeliveryMode::Push,
                "fetch" => DeliveryMode::Fetch,
                other => anyhow::bail!("Unknown mode '{}' (expected push or fetch)", other),
            }
        }
        "duplicate_policy" => {
            config.transfer.duplicate_policy = match value {
                "reject" => DuplicatePolicy::Reject,
                "attach" => DuplicatePolicy::Attach,
                other => anyhow::bail!(
                    "Unknown duplicate policy '{}' (expected reject or attach)",
                    other
                ),
            }
        }
        "request_timeout" => {
            config.transfer.request_timeout = match value {
                "off" | "none" => None,
                other => Some(parse_duration(other)?),
            }
        }
        "verify_checksum" => config.transfer.verify_checksum = value.parse()?,
        "discovery_enabled" => config.discovery.enabled = value.parse()?,
        "discovery_port" => config.discovery.port = value.parse()?,
        "scan_timeout" => config.discovery.scan_timeout = parse_duration(value)?,
        _ => return Ok(false),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();

        assert!(set_config_value(&mut config, "peer", "192.168.1.20").unwrap());
        assert!(set_config_value(&mut config, "mode", "fetch").unwrap());
        assert!(set_config_value(&mut config, "request_timeout", "2m").unwrap());

        assert_eq!(config.transfer.mode, DeliveryMode::Fetch);
        assert_eq!(config.transfer.request_timeout, Some(Duration::from_secs(120)));
        assert_eq!(get_config_value(&config, "peer").unwrap(), "192.168.1.20");
        assert_eq!(get_config_value(&config, "mode").unwrap(), "fetch");
        assert_eq!(get_config_value(&config, "request_timeout").unwrap(), "120s");
    }

    #[test]
    fn test_discovery_keys() {
        let mut config = Config::default();

        assert!(set_config_value(&mut config, "discovery_enabled", "false").unwrap());
        assert!(set_config_value(&mut config, "scan_timeout", "10s").unwrap());

        assert!(!config.discovery.enabled);
        assert_eq!(get_config_value(&config, "scan_timeout").unwrap(), "10s");
    }

    #[test]
    fn test_shown_keys_are_readable() {
        let config = Config::default();
        for (_, keys) in SECTIONS {
            for key in *keys {
                assert!(get_config_value(&config, key).is_some(), "{key} not readable");
            }
        }
    }

    #[test]
    fn test_unknown_key() {
        let mut config = Config::default();
        assert!(!set_config_value(&mut config, "colour", "blue").unwrap());
        assert!(get_config_value(&config, "colour").is_none());
    }

    #[test]
    fn test_invalid_values() {
        let mut config = Config::default();
        assert!(set_config_value(&mut config, "mode", "carrier-pigeon").is_err());
        assert!(set_config_value(&mut config, "server_port", "lots").is_err());
        assert!(set_config_value(&mut config, "verify_checksum", "maybe").is_err());
    }
}
