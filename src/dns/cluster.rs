//! Cluster definitions
//!
//! ```text
//! address    ::= (<peername> '.' <name-suffix> | <hash> '.' <hash-suffix>) ['=' <ip> [':' <port>]]
//! clusterdef ::= address (',' address)*
//! ```

use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::warn;

use super::resolver::{parse_hash_label, strip_suffix_ignore_case, PeerNameResolver};
use crate::types::SeedHash;

/// Cluster members with their optional address override, in hash order
pub type ClusterMap = BTreeMap<SeedHash, Option<String>>;

impl PeerNameResolver {
    /// Resolve a cluster definition; unknown or malformed members are skipped
    pub fn cluster_hashes(&self, definition: &str) -> ClusterMap {
        let mut members = ClusterMap::new();
        for entry in definition.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (domain, address) = match entry.split_once('=') {
                Some((domain, address)) => (domain.trim(), Some(address.trim())),
                None => (entry, None),
            };

            if let Some(address) = address {
                if !is_valid_override(address) {
                    warn!("Cluster peer '{}' has a malformed address '{}'", domain, address);
                    continue;
                }
            }

            let hash = if let Some(label) = strip_suffix_ignore_case(domain, self.hash_suffix()) {
                parse_hash_label(label)
                    .and_then(|hash| self.registry().get(&hash))
                    .map(|seed| seed.hash())
            } else if let Some(name) = strip_suffix_ignore_case(domain, self.name_suffix()) {
                self.registry().lookup_by_name(name).map(|seed| seed.hash())
            } else {
                warn!(
                    "Cluster peer '{}' has wrong syntax, the name must end with .{} or .{}",
                    entry,
                    self.name_suffix(),
                    self.hash_suffix()
                );
                continue;
            };

            match hash {
                Some(hash) => {
                    members.insert(hash, address.map(str::to_string));
                }
                None => warn!("Cluster peer '{}' was not found", domain),
            }
        }
        members
    }
}

/// `<ip>` or `<ip>:<port>`, IPv6 in brackets when a port is given
fn is_valid_override(address: &str) -> bool {
    if address.parse::<IpAddr>().is_ok() {
        return true;
    }
    let (host, port) = match address.rsplit_once(':') {
        Some(parts) => parts,
        None => return false,
    };
    let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
    host.parse::<IpAddr>().is_ok() && port.parse::<u16>().map(|p| p > 0).unwrap_or(false)
}
