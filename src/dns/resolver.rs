//! Virtual name resolution

use std::sync::Arc;
use tracing::debug;

use crate::registry::SeedRegistry;
use crate::types::{Seed, SeedHash, HASH_LENGTH};

/// Resolves virtual peer names against the registry
pub struct PeerNameResolver {
    registry: Arc<SeedRegistry>,
    name_suffix: String,
    hash_suffix: String,
    local_http_port: u16,
}

/// A virtual host split into its parts
struct VirtualHost<'a> {
    subdomain: Option<&'a str>,
    label: &'a str,
}

impl PeerNameResolver {
    /// Resolver using the registry's naming settings
    pub fn new(registry: Arc<SeedRegistry>) -> Self {
        let config = registry.config();
        let name_suffix = config.name_suffix.clone();
        let hash_suffix = config.hash_suffix.clone();
        let local_http_port = config.local_http_port;
        Self {
            registry,
            name_suffix,
            hash_suffix,
            local_http_port,
        }
    }

    pub fn registry(&self) -> &Arc<SeedRegistry> {
        &self.registry
    }

    /// Turn a virtual host into `ip:port[/subdomain]`; `None` if unknown
    pub fn resolve(&self, host: &str) -> Option<String> {
        let host = host.trim();
        if let Some(vhost) = split_virtual(host, &self.hash_suffix) {
            let seed = self.seed_by_hash(vhost.label)?;
            return with_subdomain(seed.public_address()?, vhost.subdomain);
        }
        if let Some(vhost) = split_virtual(host, &self.name_suffix) {
            let seed = self.registry.lookup_by_name(vhost.label)?;
            let is_own = self.registry.own_seed().hash() == seed.hash();
            if is_own && !seed.is_online() {
                let local = format!("127.0.0.1:{}", self.local_http_port);
                return with_subdomain(local, vhost.subdomain);
            }
            return with_subdomain(seed.public_address()?, vhost.subdomain);
        }
        debug!("Not a virtual peer name: {}", host);
        None
    }

    /// Active peer or local seed with the given hash
    pub(crate) fn seed_by_hash(&self, label: &str) -> Option<Seed> {
        let hash = parse_hash_label(label)?;
        if let Some(seed) = self.registry.get_connected(&hash) {
            return Some(seed);
        }
        Some(self.registry.own_seed()).filter(|own| own.hash() == hash)
    }

    pub(crate) fn name_suffix(&self) -> &str {
        &self.name_suffix
    }

    pub(crate) fn hash_suffix(&self) -> &str {
        &self.hash_suffix
    }
}

/// Base64 hash, or the hex rendering of its bytes
pub(crate) fn parse_hash_label(label: &str) -> Option<SeedHash> {
    if label.len() > HASH_LENGTH {
        SeedHash::from_hex(label).ok()
    } else {
        SeedHash::parse(label).ok()
    }
}

/// Split `[sub.]label.suffix`; `None` if `host` does not end in `.suffix`
fn split_virtual<'a>(host: &'a str, suffix: &str) -> Option<VirtualHost<'a>> {
    let stem = strip_suffix_ignore_case(host, suffix)?;
    if stem.is_empty() {
        return None;
    }
    match stem.split_once('.') {
        Some((subdomain, label)) if !subdomain.is_empty() && !label.is_empty() => Some(VirtualHost {
            subdomain: Some(subdomain),
            label,
        }),
        Some(_) => None,
        None => Some(VirtualHost {
            subdomain: None,
            label: stem,
        }),
    }
}

/// `host` without a trailing `.suffix`
pub(crate) fn strip_suffix_ignore_case<'a>(host: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = host.len().checked_sub(suffix.len() + 1)?;
    if !host.is_char_boundary(cut) {
        return None;
    }
    let (stem, tail) = host.split_at(cut);
    (tail.starts_with('.') && tail[1..].eq_ignore_ascii_case(suffix)).then_some(stem)
}

fn with_subdomain(address: String, subdomain: Option<&str>) -> Option<String> {
    match subdomain {
        Some(sub) => Some(format!("{}/{}", address, sub)),
        None => Some(address),
    }
}
