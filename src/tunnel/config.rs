use anyhow::{Context, ensure};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Snapshot of one tunnel's configuration: the local interface plus its peers.
///
/// Equality is structural over the whole tree; setter short-circuiting in
/// [`Tunnel::set_config`] relies on it.
///
/// [`Tunnel::set_config`]: crate::tunnel::Tunnel::set_config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub interface: InterfaceConfig,

    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Base64-encoded private key. Key material is opaque at this layer.
    pub private_key: String,

    #[serde(default)]
    pub addresses: Vec<String>,

    #[serde(default)]
    pub listen_port: Option<u16>,

    #[serde(default)]
    pub dns_servers: Vec<String>,

    #[serde(default)]
    pub mtu: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Base64-encoded public key; also the key under which per-peer
    /// statistics are reported.
    pub public_key: String,

    #[serde(default)]
    pub allowed_ips: Vec<String>,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub persistent_keepalive: Option<u16>,
}

impl TunnelConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.interface.private_key.trim().is_empty(),
            "Interface private key cannot be empty"
        );

        if let Some(mtu) = self.interface.mtu {
            ensure!(mtu >= 576, "MTU too small (minimum 576): {}", mtu);
        }

        let mut seen_keys = HashSet::new();
        for peer in &self.peers {
            ensure!(
                seen_keys.insert(peer.public_key.as_str()),
                "Duplicate peer public key: {}",
                peer.public_key
            );
            peer.validate()
                .with_context(|| format!("Validation failed for peer: {}", peer.public_key))?;
        }

        Ok(())
    }
}

impl PeerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.public_key.trim().is_empty(),
            "Peer public key cannot be empty"
        );
        ensure!(
            !self.allowed_ips.is_empty(),
            "Peer must route at least one allowed IP range"
        );
        Ok(())
    }
}
