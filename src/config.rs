use serde::{Deserialize, Serialize};
use std::{env, io::ErrorKind, net::Ipv4Addr, path::PathBuf, time::Duration};
use tokio::{fs, io};
use tracing::warn;

/// Well-known UDP port every peer broadcasts its presence on.
pub const DISCOVERY_PORT: u16 = 37020;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Generated at startup when absent.
    pub peer_id: Option<String>,
    pub broadcast_addr: Ipv4Addr,
    pub broadcast_interval_secs: u64,
    pub peer_timeout_secs: u64,
    pub chunk_size: usize,
    pub control_timeout_secs: u64,
    pub file_timeout_secs: u64,
    pub max_frames_per_connection: usize,
    pub ports: ConfigPorts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPorts {
    /// TCP messaging port, 0 lets the OS pick one.
    pub transport: u16,
    pub discovery: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_id: None,
            broadcast_addr: Ipv4Addr::BROADCAST,
            broadcast_interval_secs: 5,
            peer_timeout_secs: 30,
            chunk_size: 8192,
            control_timeout_secs: 5,
            file_timeout_secs: 30,
            max_frames_per_connection: 1000,
            ports: ConfigPorts::default(),
        }
    }
}

impl Default for ConfigPorts {
    fn default() -> Self {
        Self {
            transport: 0,
            discovery: DISCOVERY_PORT,
        }
    }
}

impl Config {
    /// Loads `<config dir>/lantalk/config.toml`, writing the defaults on first
    /// run, then applies `LANTALK_*` environment overrides.
    pub async fn init() -> io::Result<Self> {
        let path = config_file()?;

        let mut cfg = if path.exists() {
            let contents = fs::read_to_string(&path).await?;
            toml::from_str(&contents).map_err(io::Error::other)?
        } else {
            let cfg = Self::default();

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let contents = toml::to_string_pretty(&cfg).map_err(io::Error::other)?;

            fs::write(&path, contents).await?;
            cfg
        };

        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(id) = env::var("LANTALK_PEER_ID")
            && !id.trim().is_empty()
        {
            self.peer_id = Some(id.trim().to_string());
        }
        if let Some(port) = env_port("LANTALK_TRANSPORT_PORT") {
            self.ports.transport = port;
        }
        if let Some(port) = env_port("LANTALK_DISCOVERY_PORT") {
            self.ports.discovery = port;
        }
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn file_timeout(&self) -> Duration {
        Duration::from_secs(self.file_timeout_secs)
    }
}

fn env_port(key: &str) -> Option<u16> {
    let value = env::var(key).ok()?;

    match value.parse() {
        Ok(port) => Some(port),
        Err(_) => {
            warn!("Ignoring {key}: {value:?} is not a port number");
            None
        }
    }
}

fn config_file() -> io::Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("lantalk").join("config.toml"))
        .ok_or_else(|| {
            io::Error::new(
                ErrorKind::NotFound,
                "Could not determine config directory",
            )
        })
}
