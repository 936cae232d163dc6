//! Swap Configuration. Controlling chains, polling and fees.

use std::{
    io::{self, Write},
    path::Path,
    time::Duration,
};

use crate::{
    crypto::Chain,
    tx::Fee,
    utill::{get_data_dir, parse_field, parse_toml},
    watch::WatchConfig,
};

/// Swap configuration shared by both roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapConfig {
    /// Network the trade's chains run on
    pub chain: Chain,
    /// First delay when no new block is available
    pub min_poll_delay_secs: u64,
    /// Delay cap of the watchers' backoff
    pub max_poll_delay_secs: u64,
    /// How long a stage waits for the counterparty's message
    pub message_timeout_secs: u64,
    /// Fee rate of redeem and recovery spends
    pub fee_per_byte: u64,
    /// Blocks below the tip a fresh watch starts from
    pub watch_lookback: u64,
    /// Listening port of the seller
    pub port: u16,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            chain: Chain::Regtest,
            min_poll_delay_secs: 1,
            max_poll_delay_secs: 30,
            message_timeout_secs: 300,
            fee_per_byte: 10,
            watch_lookback: 100,
            port: 6110,
        }
    }
}

impl SwapConfig {
    /// Constructs a [SwapConfig] from a config file, or creates the default one.
    ///
    /// When the file does not exist or is empty, the defaults are written there first.
    /// Without a path `~/.atomicswap/config.toml` is used. Missing or invalid fields fall
    /// back to their defaults.
    pub fn new(config_path: Option<&Path>) -> io::Result<Self> {
        let default_config_path = get_data_dir().join("config.toml");

        let config_path = config_path.unwrap_or(&default_config_path);
        let default_config = Self::default();

        if !config_path.exists() || std::fs::metadata(config_path)?.len() == 0 {
            log::warn!(
                "Swap config file not found, creating default config file at path: {}",
                config_path.display()
            );
            default_config.write_to_file(config_path)?;
        }

        let config_map = parse_toml(config_path)?;

        log::info!(
            "Successfully loaded config file from : {}",
            config_path.display()
        );

        Ok(SwapConfig {
            chain: parse_field(config_map.get("chain"), default_config.chain),
            min_poll_delay_secs: parse_field(
                config_map.get("min_poll_delay_secs"),
                default_config.min_poll_delay_secs,
            ),
            max_poll_delay_secs: parse_field(
                config_map.get("max_poll_delay_secs"),
                default_config.max_poll_delay_secs,
            ),
            message_timeout_secs: parse_field(
                config_map.get("message_timeout_secs"),
                default_config.message_timeout_secs,
            ),
            fee_per_byte: parse_field(config_map.get("fee_per_byte"), default_config.fee_per_byte),
            watch_lookback: parse_field(
                config_map.get("watch_lookback"),
                default_config.watch_lookback,
            ),
            port: parse_field(config_map.get("port"), default_config.port),
        })
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let toml_data = format!(
            "[swap_config]
chain = {}
min_poll_delay_secs = {}
max_poll_delay_secs = {}
message_timeout_secs = {}
fee_per_byte = {}
watch_lookback = {}
port = {}
",
            self.chain,
            self.min_poll_delay_secs,
            self.max_poll_delay_secs,
            self.message_timeout_secs,
            self.fee_per_byte,
            self.watch_lookback,
            self.port,
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        file.write_all(toml_data.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn watch_config(&self) -> WatchConfig {
        let min_poll_delay = Duration::from_secs(self.min_poll_delay_secs);
        WatchConfig {
            min_poll_delay,
            max_poll_delay: Duration::from_secs(self.max_poll_delay_secs).max(min_poll_delay),
            lookback: self.watch_lookback,
        }
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }

    pub fn fee(&self) -> Fee {
        Fee::PerByte(self.fee_per_byte)
    }
}
