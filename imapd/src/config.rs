//! On-disk configuration file format. Parsed with `toml`/`serde`, then
//! turned into the plainer types the protocol and user crates actually want.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use imapd_proto::config::{ImapConfig, ImapUnsecureConfig};

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Accounts this daemon will authenticate. Passwords are argon2 hashes
    /// produced by `imapd tools password-hash`, never plaintext.
    pub users: HashMap<String, String>,

    pub imap: Option<TlsListenerConfig>,
    pub imap_unsecure: Option<ListenerConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ListenerConfig {
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
pub struct TlsListenerConfig {
    pub bind_addr: SocketAddr,
    pub certs: PathBuf,
    pub key: PathBuf,
}

impl From<ListenerConfig> for ImapUnsecureConfig {
    fn from(c: ListenerConfig) -> Self {
        ImapUnsecureConfig { bind_addr: c.bind_addr }
    }
}

impl From<TlsListenerConfig> for ImapConfig {
    fn from(c: TlsListenerConfig) -> Self {
        ImapConfig {
            bind_addr: c.bind_addr,
            certs: c.certs,
            key: c.key,
        }
    }
}

pub fn read_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing configuration file {}", path.display()))
}
