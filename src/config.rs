use ghostnet_client::{ClientConfig, DEFAULT_INPUT_LEAD_TICKS};
use ghostnet_core::DEFAULT_TICK_RATE;
use ghostnet_net::{
    TransportSettings, DEFAULT_COMMAND_WINDOW, DEFAULT_SNAPSHOT_BUDGET, DEFAULT_SNAPSHOT_HISTORY,
};
use ghostnet_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use std::{fs, path::Path};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/ghostnet.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetConfig {
    /// Address the server listens on.
    pub listen_addr: SocketAddr,
    /// Address clients connect to.
    pub connect_addr: SocketAddr,
    pub tick_rate: u32,
    /// Per-connection per-tick snapshot budget.
    pub snapshot_budget_bytes: usize,
    pub command_window_ticks: usize,
    pub snapshot_history_ticks: u32,
    /// Ticks clients sample ahead of the tick they joined on.
    pub input_lead_ticks: u32,
    /// Seconds of silence before a peer is disconnected.
    pub idle_timeout_secs: u64,
    pub keep_alive_secs: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7979)),
            connect_addr: SocketAddr::from(([127, 0, 0, 1], 7979)),
            tick_rate: DEFAULT_TICK_RATE,
            snapshot_budget_bytes: DEFAULT_SNAPSHOT_BUDGET,
            command_window_ticks: DEFAULT_COMMAND_WINDOW,
            snapshot_history_ticks: DEFAULT_SNAPSHOT_HISTORY,
            input_lead_ticks: DEFAULT_INPUT_LEAD_TICKS,
            idle_timeout_secs: 30,
            keep_alive_secs: 5,
        }
    }
}

impl NetConfig {
    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<NetConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    NetConfig::default()
                }
            },
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    warn!("Config not found at {}. Using defaults", path.display());
                } else {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                }
                NetConfig::default()
            }
        }
    }

    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            tick_rate: self.tick_rate,
            snapshot_budget: self.snapshot_budget_bytes,
            command_window: self.command_window_ticks,
            snapshot_history: self.snapshot_history_ticks,
        }
    }

    pub fn client(&self) -> ClientConfig {
        ClientConfig {
            tick_rate: self.tick_rate,
            command_window: self.command_window_ticks,
            snapshot_history: self.snapshot_history_ticks,
            input_lead_ticks: self.input_lead_ticks,
        }
    }

    pub fn transport(&self) -> TransportSettings {
        TransportSettings {
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tick_rate = 30\nsnapshot_budget_bytes = 600").unwrap();

        let cfg = NetConfig::load_from_path(file.path());
        assert_eq!(cfg.tick_rate, 30);
        assert_eq!(cfg.snapshot_budget_bytes, 600);
        assert_eq!(cfg.command_window_ticks, DEFAULT_COMMAND_WINDOW);
        assert_eq!(cfg.server().snapshot_budget, 600);
        assert_eq!(cfg.client().tick_rate, 30);
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tick_rate = \"fast\"").unwrap();
        assert_eq!(NetConfig::load_from_path(file.path()), NetConfig::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = NetConfig::load_from_path(&dir.path().join("absent.toml"));
        assert_eq!(cfg, NetConfig::default());
    }

    #[test]
    fn addresses_and_timeouts_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghostnet.toml");
        fs::write(
            &path,
            "listen_addr = \"127.0.0.1:9000\"\nidle_timeout_secs = 4\nkeep_alive_secs = 1\n",
        )
        .unwrap();

        let cfg = NetConfig::load_from_path(&path);
        assert_eq!(cfg.listen_addr, "127.0.0.1:9000".parse().unwrap());
        let transport = cfg.transport();
        assert_eq!(transport.idle_timeout, Duration::from_secs(4));
        assert_eq!(transport.keep_alive, Duration::from_secs(1));
    }
}
