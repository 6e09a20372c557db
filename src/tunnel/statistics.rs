use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(SystemTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(SystemTime::now())
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.0.elapsed().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_rfc3339(self.0))
    }
}

/// Transfer counters for a single peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStatistics {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Snapshot of a tunnel's transport counters, keyed by peer public key.
///
/// Only meaningful while the tunnel is up; any transition away from up clears
/// the cached snapshot. The snapshot records when it was collected but
/// enforces no staleness policy; consumers that care should check
/// [`Statistics::age`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    peers: BTreeMap<String, PeerStatistics>,
    collected_at: Timestamp,
}

impl Statistics {
    pub fn new(peers: BTreeMap<String, PeerStatistics>) -> Self {
        Self {
            peers,
            collected_at: Timestamp::now(),
        }
    }

    pub fn peer(&self, public_key: &str) -> Option<PeerStatistics> {
        self.peers.get(public_key).copied()
    }

    pub fn peers(&self) -> impl Iterator<Item = (&str, PeerStatistics)> {
        self.peers.iter().map(|(key, stats)| (key.as_str(), *stats))
    }

    pub fn total_rx(&self) -> u64 {
        self.peers.values().map(|p| p.rx_bytes).sum()
    }

    pub fn total_tx(&self) -> u64 {
        self.peers.values().map(|p| p.tx_bytes).sum()
    }

    pub fn collected_at(&self) -> Timestamp {
        self.collected_at
    }

    /// Time since this snapshot was collected.
    pub fn age(&self) -> std::time::Duration {
        self.collected_at.elapsed()
    }
}
