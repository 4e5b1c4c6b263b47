use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_BAUD: u32 = 115_200;

#[derive(Debug, Deserialize, PartialEq)]
pub struct Config {
    pub bus: Bus,
    pub host: Host,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Bus {
    pub interface: String,
    /// Whether bitrate and listen-only changes are pushed to the interface
    /// with `ip link`. Needs CAP_NET_ADMIN.
    #[serde(default)]
    pub manage_link: bool,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum Host {
    #[serde(rename = "serial")]
    Serial {
        path: PathBuf,
        #[serde(default = "default_baud")]
        baud: u32,
    },
    #[serde(rename = "tcp")]
    Tcp { bind: SocketAddr },
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

impl Config {
    pub fn parse(text: &str) -> anyhow::Result<Config> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Config::parse(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
    }
}
