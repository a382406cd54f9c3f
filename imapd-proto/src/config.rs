//! Configuration consumed directly by the protocol listeners: TLS material
//! and bind addresses. The higher-level, serde-deserialized configuration
//! file format lives in the `imapd` binary crate, which builds these from
//! whatever it parses.

use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub bind_addr: SocketAddr,
    pub certs: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ImapUnsecureConfig {
    pub bind_addr: SocketAddr,
}
