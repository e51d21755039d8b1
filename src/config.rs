//! Trade engine configuration. Controlling various behaviors.
//!
//! This module defines the configurable parameters of the protocol engine:
//! confirmation depth for the escrow, flat fee budgets for the deposit and
//! payout transactions, and the grace window added on top of a payment
//! method's trade period when computing the delayed payout lock time.

use crate::utill::{get_engine_dir, parse_field, parse_toml};
use std::{io, io::Write, path::Path};

/// Engine configuration
///
/// This struct defines all configurable parameters of the trade protocol
/// engine. Amount fields are in satoshis, durations in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Confirmations required before the escrow counts as confirmed (default: 1)
    pub required_confirms: u32,
    /// Flat miner fee budget for the deposit transaction, in sats (default: 1000)
    pub deposit_tx_fee: u64,
    /// Flat miner fee budget for payout transactions, in sats (default: 500)
    pub payout_tx_fee: u64,
    /// Grace window added to the payment method's max trade period when
    /// computing the delayed payout lock time, in seconds (default: 86400)
    pub dispute_grace_period: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            required_confirms: 1,
            deposit_tx_fee: 1000,
            payout_tx_fee: 500,
            dispute_grace_period: 86_400,
        }
    }
}

impl EngineConfig {
    /// Constructs an [`EngineConfig`] from a specified config path. Or create
    /// default configs and load them.
    ///
    /// The config file should exist at the provided location. Or else, a new
    /// default config will be written there and loaded. If no path is
    /// provided, the default location `~/.escrowtrade/engine/config.toml` is
    /// used.
    pub fn new(config_path: Option<&Path>) -> io::Result<Self> {
        let default_config_path = get_engine_dir().join("config.toml");

        let config_path = config_path.unwrap_or(&default_config_path);

        let default_config = Self::default();

        if !config_path.exists() || std::fs::metadata(config_path)?.len() == 0 {
            log::warn!(
                "Engine config file not found, creating default config file at path: {}",
                config_path.display()
            );
            default_config.write_to_file(config_path)?;
        }

        let config_map = parse_toml(config_path)?;

        log::info!(
            "Successfully loaded config file from : {}",
            config_path.display()
        );

        Ok(EngineConfig {
            required_confirms: parse_field(
                config_map.get("required_confirms"),
                default_config.required_confirms,
            ),
            deposit_tx_fee: parse_field(
                config_map.get("deposit_tx_fee"),
                default_config.deposit_tx_fee,
            ),
            payout_tx_fee: parse_field(
                config_map.get("payout_tx_fee"),
                default_config.payout_tx_fee,
            ),
            dispute_grace_period: parse_field(
                config_map.get("dispute_grace_period"),
                default_config.dispute_grace_period,
            ),
        })
    }

    /// This method serializes the EngineConfig into a TOML format and writes it to disk.
    /// It creates the parent directory if it doesn't exist.
    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let toml_data = format!(
            "# Engine Configuration File
# Confirmations required before the escrow counts as confirmed
required_confirms = {}
# Flat miner fee budget for the deposit transaction (sats)
deposit_tx_fee = {}
# Flat miner fee budget for payout transactions (sats)
payout_tx_fee = {}
# Grace window added to the trade period for the delayed payout lock time (seconds)
dispute_grace_period = {}",
            self.required_confirms, self.deposit_tx_fee, self.payout_tx_fee,
            self.dispute_grace_period,
        );

        std::fs::create_dir_all(path.parent().expect("Path should NOT be root!"))?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(toml_data.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use std::{
        fs::{self, File},
        io::Write,
        path::PathBuf,
    };

    fn create_temp_config(contents: &str, file_name: &str) -> PathBuf {
        let file_path = std::env::temp_dir().join(file_name);
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "{contents}").unwrap();
        file_path
    }

    fn remove_temp_config(path: &Path) {
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_valid_config() {
        let contents = r#"
        required_confirms = 1
        deposit_tx_fee = 1000
        payout_tx_fee = 500
        dispute_grace_period = 86400
        "#;
        let config_path = create_temp_config(contents, "valid_engine_config.toml");
        let config = EngineConfig::new(Some(&config_path)).unwrap();
        remove_temp_config(&config_path);

        let default_config = EngineConfig::default();
        assert_eq!(config, default_config);
    }

    #[test]
    fn test_missing_fields() {
        let contents = r#"
            required_confirms = 3
        "#;
        let config_path = create_temp_config(contents, "missing_fields_engine_config.toml");
        let config = EngineConfig::new(Some(&config_path)).unwrap();
        remove_temp_config(&config_path);

        assert_eq!(
            config,
            EngineConfig {
                required_confirms: 3,
                ..EngineConfig::default()
            }
        );
    }

    #[test]
    fn test_incorrect_data_type() {
        let contents = r#"
            deposit_tx_fee = "not_a_number"
        "#;
        let config_path = create_temp_config(contents, "incorrect_type_engine_config.toml");
        let config = EngineConfig::new(Some(&config_path)).unwrap();
        remove_temp_config(&config_path);

        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_missing_file() {
        let config_path = std::env::temp_dir().join("fresh_engine_config.toml");
        if config_path.exists() {
            fs::remove_file(&config_path).unwrap();
        }
        let config = EngineConfig::new(Some(&config_path)).unwrap();
        remove_temp_config(&config_path);
        assert_eq!(config, EngineConfig::default());
    }
}
